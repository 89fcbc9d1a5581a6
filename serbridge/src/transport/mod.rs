//! Transport layer abstraction.
//!
//! This module provides the `Transport` trait the bridge drives during
//! attach/detach and on every write, and the `ArrivalHandler` callback the
//! transport invokes whenever bytes come in.
//!
//! # Implementations
//!
//! - `LoopbackTransport`: in-memory transport that echoes sent bytes back
//!   through the arrival handler, with fault injection for tests
//! - `SerialPortTransport`: a real UART via the `serialport` crate (requires
//!   the `serial` feature)
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use serbridge::transport::{LoopbackTransport, Transport};
//! use serbridge::LineConfig;
//!
//! let mut transport = LoopbackTransport::new();
//! transport.open()?;
//! transport.configure(&LineConfig::HC06)?;
//! transport.set_arrival_handler(Arc::new(|data: &[u8]| data.len()))?;
//! transport.send(b"Hello")?;
//! ```

#[cfg(feature = "serial")]
pub mod serial;

use std::io;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::config::LineConfig;
use crate::error::{Error, Result};

/// Callback invoked by a transport when bytes physically arrive.
///
/// Implementations must not block. The return value is the number of bytes
/// that were kept; the transport does not act on it.
pub trait ArrivalHandler: Send + Sync {
    /// Handles newly arrived bytes.
    fn on_arrival(&self, data: &[u8]) -> usize;
}

impl<F> ArrivalHandler for F
where
    F: Fn(&[u8]) -> usize + Send + Sync,
{
    fn on_arrival(&self, data: &[u8]) -> usize {
        self(data)
    }
}

/// Transport trait for a serial link to the peripheral.
///
/// Implement this trait to put the bridge in front of a different link.
/// Arrivals are delivered one at a time through the registered handler.
pub trait Transport: Send {
    /// Opens the link.
    fn open(&mut self) -> Result<()>;

    /// Closes the link. Closing an already closed link is not an error.
    fn close(&mut self) -> Result<()>;

    /// Applies line parameters to an open link.
    fn configure(&mut self, line: &LineConfig) -> Result<()>;

    /// Sends bytes, returning how many the link accepted.
    fn send(&mut self, data: &[u8]) -> Result<usize>;

    /// Registers the callback that receives incoming bytes.
    fn set_arrival_handler(&mut self, handler: Arc<dyn ArrivalHandler>) -> Result<()>;

    /// Removes the registered callback, if any.
    fn clear_arrival_handler(&mut self);
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn open(&mut self) -> Result<()> {
        (**self).open()
    }

    fn close(&mut self) -> Result<()> {
        (**self).close()
    }

    fn configure(&mut self, line: &LineConfig) -> Result<()> {
        (**self).configure(line)
    }

    fn send(&mut self, data: &[u8]) -> Result<usize> {
        (**self).send(data)
    }

    fn set_arrival_handler(&mut self, handler: Arc<dyn ArrivalHandler>) -> Result<()> {
        (**self).set_arrival_handler(handler)
    }

    fn clear_arrival_handler(&mut self) {
        (**self).clear_arrival_handler()
    }
}

#[derive(Default)]
struct LoopbackState {
    open: bool,
    line: Option<LineConfig>,
    handler: Option<Arc<dyn ArrivalHandler>>,
    sent: Vec<u8>,
    opens: usize,
    closes: usize,
}

impl LoopbackState {
    fn handler(&self) -> Option<Arc<dyn ArrivalHandler>> {
        self.handler.clone()
    }
}

/// A loopback transport.
///
/// Bytes sent are handed straight back to the arrival handler, like an
/// adapter with TX wired to RX. Failures can be injected for testing.
pub struct LoopbackTransport {
    state: Arc<Mutex<LoopbackState>>,
    echo: bool,
    fail_open: bool,
    fail_configure: bool,
    fail_send: bool,
    accept_limit: Option<usize>,
}

impl LoopbackTransport {
    /// Creates a new loopback transport.
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(LoopbackState::default())),
            echo: true,
            fail_open: false,
            fail_configure: false,
            fail_send: false,
            accept_limit: None,
        }
    }

    /// Returns a probe that observes this transport after it has been moved.
    pub fn probe(&self) -> LoopbackProbe {
        LoopbackProbe {
            state: Arc::clone(&self.state),
        }
    }

    /// Enables or disables echoing sent bytes back.
    pub fn echo(mut self, echo: bool) -> Self {
        self.echo = echo;
        self
    }

    /// Makes `open` fail.
    pub fn fail_open(mut self) -> Self {
        self.fail_open = true;
        self
    }

    /// Makes `configure` fail.
    pub fn fail_configure(mut self) -> Self {
        self.fail_configure = true;
        self
    }

    /// Makes `send` fail.
    pub fn fail_send(mut self) -> Self {
        self.fail_send = true;
        self
    }

    /// Accepts at most `limit` bytes per `send`.
    pub fn accept_limit(mut self, limit: usize) -> Self {
        self.accept_limit = Some(limit);
        self
    }
}

impl Default for LoopbackTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for LoopbackTransport {
    fn open(&mut self) -> Result<()> {
        if self.fail_open {
            return Err(Error::Open(io::Error::new(
                io::ErrorKind::NotFound,
                "loopback: injected open failure",
            )));
        }
        let mut state = self.state.lock();
        state.open = true;
        state.opens += 1;
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        let mut state = self.state.lock();
        if state.open {
            state.open = false;
            state.closes += 1;
        }
        Ok(())
    }

    fn configure(&mut self, line: &LineConfig) -> Result<()> {
        if self.fail_configure {
            return Err(Error::Configure(io::Error::new(
                io::ErrorKind::InvalidInput,
                "loopback: injected configure failure",
            )));
        }
        self.state.lock().line = Some(*line);
        Ok(())
    }

    fn send(&mut self, data: &[u8]) -> Result<usize> {
        if self.fail_send {
            return Err(Error::Send(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "loopback: injected send failure",
            )));
        }

        let (accepted, handler) = {
            let mut state = self.state.lock();
            if !state.open {
                return Err(Error::Send(io::Error::new(
                    io::ErrorKind::NotConnected,
                    "loopback: not open",
                )));
            }
            let accepted = self.accept_limit.map_or(data.len(), |l| l.min(data.len()));
            state.sent.extend_from_slice(&data[..accepted]);
            (accepted, state.handler())
        };

        // Deliver outside the lock, the handler takes its own
        if self.echo {
            if let Some(handler) = handler {
                handler.on_arrival(&data[..accepted]);
            }
        }
        Ok(accepted)
    }

    fn set_arrival_handler(&mut self, handler: Arc<dyn ArrivalHandler>) -> Result<()> {
        self.state.lock().handler = Some(handler);
        Ok(())
    }

    fn clear_arrival_handler(&mut self) {
        self.state.lock().handler = None;
    }
}

/// Observes and drives a [`LoopbackTransport`] from the outside.
#[derive(Clone)]
pub struct LoopbackProbe {
    state: Arc<Mutex<LoopbackState>>,
}

impl LoopbackProbe {
    /// Returns true while the transport is open.
    pub fn is_open(&self) -> bool {
        self.state.lock().open
    }

    /// Returns true while an arrival handler is registered.
    pub fn has_handler(&self) -> bool {
        self.state.lock().handler.is_some()
    }

    /// Returns the last applied line configuration.
    pub fn line(&self) -> Option<LineConfig> {
        self.state.lock().line
    }

    /// Returns every byte accepted by `send` so far.
    pub fn sent(&self) -> Vec<u8> {
        self.state.lock().sent.clone()
    }

    /// Returns how many times the transport was opened and closed.
    pub fn open_close_counts(&self) -> (usize, usize) {
        let state = self.state.lock();
        (state.opens, state.closes)
    }

    /// Simulates bytes arriving from the peripheral.
    ///
    /// Returns what the handler accepted, or 0 if none is registered.
    pub fn inject(&self, data: &[u8]) -> usize {
        let handler = self.state.lock().handler();
        handler.map_or(0, |h| h.on_arrival(data))
    }
}
