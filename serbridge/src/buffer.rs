//! Bounded receive buffer shared by the arrival path and the reader.
//!
//! The buffer has exactly one producer (the transport's arrival callback)
//! and one consumer (the blocking reader). Both sides take the same lock for
//! the copy and the length update only; the reader's wait releases it.

use log::trace;
use parking_lot::{Condvar, Mutex};

use crate::error::{Error, Result};

#[derive(Debug)]
struct RxState<const N: usize> {
    /// Unread bytes, oldest first.
    data: heapless::Vec<u8, N>,

    /// Set by `interrupt()`, consumed by the next drain that returns.
    interrupt_pending: bool,

    /// Set once the owning bridge detaches.
    closed: bool,
}

/// A fixed-capacity byte store with append and drain-all semantics.
///
/// `append` never blocks and silently drops whatever does not fit.
/// `drain` waits for data, hands back at most `max_count` bytes and empties
/// the buffer, discarding anything beyond `max_count`.
#[derive(Debug)]
pub struct ReceiveBuffer<const N: usize> {
    state: Mutex<RxState<N>>,
    ready: Condvar,
}

impl<const N: usize> ReceiveBuffer<N> {
    /// Creates a new empty buffer.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(RxState {
                data: heapless::Vec::new(),
                interrupt_pending: false,
                closed: false,
            }),
            ready: Condvar::new(),
        }
    }

    /// Returns the buffer capacity.
    #[inline]
    pub const fn capacity(&self) -> usize {
        N
    }

    /// Returns the number of unread bytes.
    pub fn len(&self) -> usize {
        self.state.lock().data.len()
    }

    /// Returns true if there is nothing to read.
    pub fn is_empty(&self) -> bool {
        self.state.lock().data.is_empty()
    }

    /// Returns true once the buffer has been closed.
    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Appends as much of `data` as fits and wakes the reader.
    ///
    /// Returns the number of bytes accepted. The remainder is dropped.
    pub fn append(&self, data: &[u8]) -> usize {
        let accepted = {
            let mut state = self.state.lock();
            if state.closed {
                return 0;
            }

            let to_write = core::cmp::min(data.len(), N - state.data.len());
            let fits = state.data.extend_from_slice(&data[..to_write]).is_ok();
            debug_assert!(fits);

            trace!(
                "rx append: offered={}, accepted={}, buffered={}",
                data.len(),
                to_write,
                state.data.len()
            );
            to_write
        };

        if accepted > 0 {
            self.ready.notify_all();
        }
        accepted
    }

    /// Waits for data, then takes up to `max_count` bytes and empties the buffer.
    ///
    /// Fails with [`Error::Interrupted`] if an [`interrupt`](Self::interrupt)
    /// is pending while the buffer is empty, and with [`Error::NotAttached`]
    /// once the buffer is closed. Neither failure touches the buffered bytes.
    pub fn drain(&self, max_count: usize) -> Result<Vec<u8>> {
        let mut state = self.state.lock();

        loop {
            if state.closed {
                return Err(Error::NotAttached);
            }
            if !state.data.is_empty() {
                break;
            }
            if state.interrupt_pending {
                state.interrupt_pending = false;
                return Err(Error::Interrupted);
            }
            self.ready.wait(&mut state);
        }

        // Data wins over an interrupt aimed at this drain
        state.interrupt_pending = false;

        let count = core::cmp::min(max_count, state.data.len());
        let out = state.data[..count].to_vec();
        if count < state.data.len() {
            trace!("rx drain: truncated {} bytes", state.data.len() - count);
        }
        state.data.clear();

        trace!("rx drain: returned={}", count);
        Ok(out)
    }

    /// Makes the current or next `drain` that finds no data fail with
    /// [`Error::Interrupted`].
    ///
    /// The request is remembered until a drain returns, so an interrupt that
    /// lands before the reader starts waiting is not lost.
    pub fn interrupt(&self) {
        self.state.lock().interrupt_pending = true;
        self.ready.notify_all();
    }

    /// Closes the buffer. Pending and future drains fail with
    /// [`Error::NotAttached`] and appends are refused.
    pub fn close(&self) {
        self.state.lock().closed = true;
        self.ready.notify_all();
    }
}

impl<const N: usize> Default for ReceiveBuffer<N> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::sync::mpsc;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    /// Starts a drain on another thread and reports its outcome on a channel.
    fn spawn_drain<const N: usize>(
        buf: &Arc<ReceiveBuffer<N>>,
        max: usize,
    ) -> mpsc::Receiver<Result<Vec<u8>>> {
        let (tx, rx) = mpsc::channel();
        let buf = Arc::clone(buf);
        thread::spawn(move || {
            let _ = tx.send(buf.drain(max));
        });
        rx
    }

    fn interrupt_and_wait<const N: usize>(
        buf: &ReceiveBuffer<N>,
        rx: &mpsc::Receiver<Result<Vec<u8>>>,
    ) -> Result<Vec<u8>> {
        buf.interrupt();
        rx.recv_timeout(Duration::from_secs(5)).unwrap()
    }

    #[test]
    fn test_append_drain() {
        let buf: ReceiveBuffer<256> = ReceiveBuffer::new();

        let data: Vec<u8> = (0..10).collect();
        assert_eq!(buf.append(&data), 10);
        assert_eq!(buf.len(), 10);

        let out = buf.drain(256).unwrap();
        assert_eq!(out, data);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_overflow_drops_tail() {
        let buf: ReceiveBuffer<256> = ReceiveBuffer::new();

        let first = vec![0xAA; 200];
        let second = vec![0xBB; 100];
        assert_eq!(buf.append(&first), 200);
        assert_eq!(buf.append(&second), 56);
        assert_eq!(buf.len(), 256);

        // Full: nothing more fits
        assert_eq!(buf.append(b"x"), 0);

        let out = buf.drain(256).unwrap();
        assert_eq!(out.len(), 256);
        assert_eq!(&out[..200], &first[..]);
        assert_eq!(&out[200..], &second[..56]);
    }

    #[test]
    fn test_short_drain_discards_rest() {
        let buf: ReceiveBuffer<32> = ReceiveBuffer::new();
        buf.append(b"Hello, World!");

        let out = buf.drain(5).unwrap();
        assert_eq!(out, b"Hello");
        assert!(buf.is_empty());

        buf.append(b"next");
        assert_eq!(buf.drain(32).unwrap(), b"next");
    }

    #[test]
    fn test_zero_length_drain_clears() {
        let buf: ReceiveBuffer<8> = ReceiveBuffer::new();
        buf.append(b"abc");

        assert!(buf.drain(0).unwrap().is_empty());
        assert!(buf.is_empty());
    }

    #[test]
    fn test_empty_append_is_noop() {
        let buf: ReceiveBuffer<8> = ReceiveBuffer::new();
        assert_eq!(buf.append(&[]), 0);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_drain_blocks_until_append() {
        let buf: Arc<ReceiveBuffer<256>> = Arc::new(ReceiveBuffer::new());
        let rx = spawn_drain(&buf, 256);

        assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());

        buf.append(b"wake");
        let out = rx.recv_timeout(Duration::from_secs(5)).unwrap().unwrap();
        assert_eq!(out, b"wake");
    }

    #[test]
    fn test_second_drain_blocks() {
        let buf: Arc<ReceiveBuffer<256>> = Arc::new(ReceiveBuffer::new());
        buf.append(&[7u8; 10]);
        assert_eq!(buf.drain(256).unwrap(), vec![7u8; 10]);

        let rx = spawn_drain(&buf, 256);
        assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());

        // Release the waiter
        let res = interrupt_and_wait(&buf, &rx);
        assert!(matches!(res, Err(Error::Interrupted)));
    }

    #[test]
    fn test_interrupt_keeps_state() {
        let buf: Arc<ReceiveBuffer<16>> = Arc::new(ReceiveBuffer::new());
        let rx = spawn_drain(&buf, 16);

        let res = interrupt_and_wait(&buf, &rx);
        assert!(matches!(res, Err(Error::Interrupted)));
        assert!(buf.is_empty());

        // A later drain is unaffected by the earlier interrupt
        buf.append(b"ok");
        assert_eq!(buf.drain(16).unwrap(), b"ok");
    }

    #[test]
    fn test_interrupt_with_data_returns_data() {
        let buf: Arc<ReceiveBuffer<16>> = Arc::new(ReceiveBuffer::new());
        buf.append(b"data");
        buf.interrupt();

        assert_eq!(buf.len(), 4);
        assert_eq!(buf.drain(16).unwrap(), b"data");

        // The interrupt was consumed along with the data
        let rx = spawn_drain(&buf, 16);
        assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());
        buf.append(b"more");
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap().unwrap(), b"more");
    }

    #[test]
    fn test_interrupt_before_drain_is_kept() {
        let buf: Arc<ReceiveBuffer<16>> = Arc::new(ReceiveBuffer::new());
        buf.interrupt();

        let rx = spawn_drain(&buf, 16);
        let res = rx.recv_timeout(Duration::from_millis(500)).unwrap();
        assert!(matches!(res, Err(Error::Interrupted)));

        // Only one drain is interrupted
        let rx = spawn_drain(&buf, 16);
        assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());
        buf.append(b"ok");
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap().unwrap(), b"ok");
    }

    #[test]
    fn test_close_wakes_reader() {
        let buf: Arc<ReceiveBuffer<16>> = Arc::new(ReceiveBuffer::new());
        let rx = spawn_drain(&buf, 16);
        thread::sleep(Duration::from_millis(20));

        buf.close();
        let res = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert!(matches!(res, Err(Error::NotAttached)));

        assert!(buf.is_closed());
        assert_eq!(buf.append(b"late"), 0);
        assert!(matches!(buf.drain(16), Err(Error::NotAttached)));
    }

    #[test]
    fn test_concurrent_producer_consumer() {
        let buf: Arc<ReceiveBuffer<64>> = Arc::new(ReceiveBuffer::new());
        let total: usize = 4096;

        let producer = {
            let buf = Arc::clone(&buf);
            thread::spawn(move || {
                let mut accepted = Vec::new();
                for i in 0..total {
                    let byte = (i % 251) as u8;
                    if buf.append(&[byte]) == 1 {
                        accepted.push(byte);
                    }
                }
                accepted
            })
        };

        let mut received = Vec::new();
        let accepted = loop {
            if !buf.is_empty() {
                received.extend(buf.drain(64).unwrap());
                continue;
            }
            if producer.is_finished() {
                let accepted = producer.join().unwrap();
                if !buf.is_empty() {
                    received.extend(buf.drain(64).unwrap());
                }
                break accepted;
            }
            thread::yield_now();
        };

        // No reordering and no duplication of accepted bytes
        assert_eq!(received, accepted);
    }

    proptest! {
        #[test]
        fn prop_appends_within_capacity_concatenate(
            chunks in proptest::collection::vec(proptest::collection::vec(any::<u8>(), 0..16), 0..16)
        ) {
            let buf: ReceiveBuffer<256> = ReceiveBuffer::new();
            let mut expected = Vec::new();
            for chunk in &chunks {
                prop_assert_eq!(buf.append(chunk), chunk.len());
                expected.extend_from_slice(chunk);
            }
            if !expected.is_empty() {
                prop_assert_eq!(buf.drain(256).unwrap(), expected);
            }
        }

        #[test]
        fn prop_overflow_accepts_remaining(
            first in 0usize..=64,
            second in 0usize..200,
        ) {
            let buf: ReceiveBuffer<64> = ReceiveBuffer::new();
            buf.append(&vec![1u8; first]);
            let before = buf.len();

            let accepted = buf.append(&vec![2u8; second]);
            prop_assert_eq!(accepted, core::cmp::min(second, 64 - before));
            if before + second >= 64 {
                prop_assert_eq!(buf.len(), 64);
            }
        }

        #[test]
        fn prop_drain_always_empties(len in 1usize..=32, max in 0usize..64) {
            let buf: ReceiveBuffer<32> = ReceiveBuffer::new();
            buf.append(&vec![9u8; len]);

            let out = buf.drain(max).unwrap();
            prop_assert_eq!(out.len(), core::cmp::min(max, len));
            prop_assert!(buf.is_empty());
        }
    }
}
