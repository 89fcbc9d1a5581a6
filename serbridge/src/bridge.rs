//! Bridge state machine and main API.
//!
//! This module provides the `Bridge` struct that ties a transport, a
//! receive buffer and an exposed endpoint together.
//!
//! ```text
//!            attach ok                    detach
//! Unattached ─────────► Attaching ─► Attached ─────► Detaching ─► Unattached
//!     ▲                     │
//!     └─────── failure ─────┘ (full unwind)
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use log::{debug, error, info, trace, warn};
use parking_lot::Mutex;

use crate::buffer::ReceiveBuffer;
use crate::config::{BridgeConfig, LineConfig};
use crate::endpoint::{ByteStream, EndpointRegistry};
use crate::error::{Error, Result};
use crate::transport::{ArrivalHandler, Transport};
use crate::{DEFAULT_RX_CAPACITY, DRIVER_NAME};

/// Bridge lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeState {
    /// No transport bound.
    Unattached,

    /// Opening and configuring the transport, creating the endpoint.
    Attaching,

    /// Transport bound and endpoint live. Reads and writes are valid.
    Attached,

    /// Tearing down endpoint and transport.
    Detaching,
}

/// Statistics about bridge operation, accumulated over the bridge lifetime.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BridgeStats {
    /// Bytes accepted into the receive buffer.
    pub bytes_received: u64,

    /// Bytes dropped because the receive buffer was full.
    pub bytes_dropped: u64,

    /// Bytes accepted by the transport.
    pub bytes_sent: u64,

    /// Completed reads.
    pub reads: u64,

    /// Completed writes.
    pub writes: u64,
}

#[derive(Debug, Default)]
struct Counters {
    bytes_received: AtomicU64,
    bytes_dropped: AtomicU64,
    bytes_sent: AtomicU64,
    reads: AtomicU64,
    writes: AtomicU64,
}

impl Counters {
    fn record_arrival(&self, offered: usize, accepted: usize) {
        self.bytes_received.fetch_add(accepted as u64, Ordering::Relaxed);
        if offered > accepted {
            self.bytes_dropped
                .fetch_add((offered - accepted) as u64, Ordering::Relaxed);
        }
    }

    fn snapshot(&self) -> BridgeStats {
        BridgeStats {
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            bytes_dropped: self.bytes_dropped.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            reads: self.reads.load(Ordering::Relaxed),
            writes: self.writes.load(Ordering::Relaxed),
        }
    }
}

/// Appends `data` to `rx`, counting what was kept and what was dropped.
fn deliver<const C: usize>(rx: &ReceiveBuffer<C>, stats: &Counters, data: &[u8]) -> usize {
    let accepted = rx.append(data);
    stats.record_arrival(data.len(), accepted);
    if accepted < data.len() {
        trace!("{}: rx full, dropped {} bytes", DRIVER_NAME, data.len() - accepted);
    }
    accepted
}

/// Arrival handler registered with the transport: feeds the receive buffer.
struct RxSink<const C: usize> {
    rx: Arc<ReceiveBuffer<C>>,
    stats: Arc<Counters>,
}

impl<const C: usize> ArrivalHandler for RxSink<C> {
    fn on_arrival(&self, data: &[u8]) -> usize {
        deliver(&self.rx, &self.stats, data)
    }
}

/// State reachable from both the bridge and its endpoint.
struct Shared<T, const C: usize> {
    state: Mutex<BridgeState>,

    /// Present only while attached.
    transport: Mutex<Option<T>>,

    /// Present only while attached.
    rx: Mutex<Option<Arc<ReceiveBuffer<C>>>>,

    stats: Arc<Counters>,
}

impl<T: Transport, const C: usize> Shared<T, C> {
    fn set_state(&self, state: BridgeState) {
        *self.state.lock() = state;
    }

    fn buffer(&self) -> Option<Arc<ReceiveBuffer<C>>> {
        self.rx.lock().clone()
    }

    fn read(&self, max_count: usize) -> Result<Vec<u8>> {
        // The wait happens without holding the slot lock
        let rx = self.buffer().ok_or(Error::NotAttached)?;
        let data = rx.drain(max_count)?;
        self.stats.reads.fetch_add(1, Ordering::Relaxed);
        Ok(data)
    }

    fn write(&self, data: &[u8]) -> Result<usize> {
        let mut slot = self.transport.lock();
        let transport = slot.as_mut().ok_or(Error::NotAttached)?;
        if data.is_empty() {
            return Ok(0);
        }

        let accepted = transport.send(data)?;
        trace!("{}: tx {} of {} bytes", DRIVER_NAME, accepted, data.len());
        self.stats.bytes_sent.fetch_add(accepted as u64, Ordering::Relaxed);
        self.stats.writes.fetch_add(1, Ordering::Relaxed);
        Ok(accepted)
    }

    fn interrupt(&self) {
        if let Some(rx) = self.buffer() {
            rx.interrupt();
        }
    }
}

/// Handle to a bridge's read/write surface.
///
/// This is what an endpoint holds. It stays valid across detach; its
/// operations fail with [`Error::NotAttached`] while the bridge is not attached.
pub struct BridgePort<T, const C: usize> {
    shared: Arc<Shared<T, C>>,
}

impl<T, const C: usize> Clone for BridgePort<T, C> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T: Transport, const C: usize> BridgePort<T, C> {
    /// Returns the current bridge state.
    pub fn state(&self) -> BridgeState {
        *self.shared.state.lock()
    }
}

impl<T: Transport, const C: usize> ByteStream for BridgePort<T, C> {
    fn read(&self, max_count: usize) -> Result<Vec<u8>> {
        self.shared.read(max_count)
    }

    fn write(&self, data: &[u8]) -> Result<usize> {
        self.shared.write(data)
    }

    fn interrupt(&self) {
        self.shared.interrupt()
    }
}

/// An opened transport that is closed again unless the attach commits.
///
/// Releases in reverse order: arrival handler first, then the link.
struct OpenLink<T: Transport> {
    transport: Option<T>,
    registered: bool,
}

impl<T: Transport> OpenLink<T> {
    fn open(mut transport: T) -> Result<Self> {
        transport.open()?;
        Ok(Self {
            transport: Some(transport),
            registered: false,
        })
    }

    fn configure(&mut self, line: &LineConfig) -> Result<()> {
        match self.transport.as_mut() {
            Some(transport) => transport.configure(line),
            None => Err(Error::NotAttached),
        }
    }

    fn register(&mut self, handler: Arc<dyn ArrivalHandler>) -> Result<()> {
        match self.transport.as_mut() {
            Some(transport) => {
                transport.set_arrival_handler(handler)?;
                self.registered = true;
                Ok(())
            }
            None => Err(Error::NotAttached),
        }
    }

    fn commit(mut self) -> Option<T> {
        self.transport.take()
    }
}

impl<T: Transport> Drop for OpenLink<T> {
    fn drop(&mut self) {
        if let Some(mut transport) = self.transport.take() {
            if self.registered {
                transport.clear_arrival_handler();
            }
            if let Err(e) = transport.close() {
                warn!("{}: close during unwind failed: {}", DRIVER_NAME, e);
            }
            debug!("{}: attach unwound", DRIVER_NAME);
        }
    }
}

struct Control<R: EndpointRegistry> {
    registry: R,
    endpoint: Option<R::Endpoint>,
}

/// Buffered bridge between a transport and a blocking byte-stream endpoint.
///
/// `C` is the receive buffer capacity.
///
/// # Example
///
/// ```rust,ignore
/// use serbridge::{Bridge, LoopbackTransport};
/// use serbridge::endpoint::LocalRegistry;
///
/// let registry = LocalRegistry::new();
/// let bridge: Bridge<LoopbackTransport, LocalRegistry> = Bridge::new(registry.clone());
/// bridge.attach(LoopbackTransport::new())?;
///
/// let stream = registry.open("hc06_bt").unwrap();
/// stream.write(b"AT")?;
/// assert_eq!(stream.read(64)?, b"AT");
/// ```
pub struct Bridge<T, R, const C: usize = DEFAULT_RX_CAPACITY>
where
    T: Transport + 'static,
    R: EndpointRegistry,
{
    config: BridgeConfig,
    shared: Arc<Shared<T, C>>,

    /// Serializes attach and detach.
    control: Mutex<Control<R>>,
}

impl<T, R, const C: usize> Bridge<T, R, C>
where
    T: Transport + 'static,
    R: EndpointRegistry,
{
    /// Creates an unattached bridge with the default configuration.
    pub fn new(registry: R) -> Self {
        Self::with_config(registry, BridgeConfig::default())
    }

    /// Creates an unattached bridge.
    pub fn with_config(registry: R, config: BridgeConfig) -> Self {
        Self {
            config,
            shared: Arc::new(Shared {
                state: Mutex::new(BridgeState::Unattached),
                transport: Mutex::new(None),
                rx: Mutex::new(None),
                stats: Arc::new(Counters::default()),
            }),
            control: Mutex::new(Control {
                registry,
                endpoint: None,
            }),
        }
    }

    /// Returns the bridge configuration.
    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    /// Returns the current state.
    pub fn state(&self) -> BridgeState {
        *self.shared.state.lock()
    }

    /// Returns a snapshot of the counters.
    pub fn stats(&self) -> BridgeStats {
        self.shared.stats.snapshot()
    }

    /// Returns the number of bytes waiting to be read.
    pub fn buffered(&self) -> usize {
        self.shared.buffer().map_or(0, |rx| rx.len())
    }

    /// Returns a handle to the read/write surface.
    pub fn port(&self) -> BridgePort<T, C> {
        BridgePort {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Binds the bridge to `transport` and exposes the endpoint.
    ///
    /// Opens the transport, applies [`LineConfig::HC06`], registers the
    /// arrival callback and creates the endpoint. On any failure everything
    /// already acquired is released in reverse order and the bridge stays
    /// [`BridgeState::Unattached`].
    pub fn attach(&self, transport: T) -> Result<()> {
        let mut control = self.control.lock();
        {
            let mut state = self.shared.state.lock();
            if *state != BridgeState::Unattached {
                warn!("{}: attach while {:?}", DRIVER_NAME, *state);
                return Err(Error::AlreadyAttached);
            }
            *state = BridgeState::Attaching;
        }

        info!("{}: Probing", DRIVER_NAME);
        match self.bind(&mut control, transport) {
            Ok(()) => {
                self.shared.set_state(BridgeState::Attached);
                info!("{}: Probed successfully", DRIVER_NAME);
                Ok(())
            }
            Err(e) => {
                self.shared.set_state(BridgeState::Unattached);
                error!("{}: attach failed: {}", DRIVER_NAME, e);
                Err(e)
            }
        }
    }

    fn bind(&self, control: &mut Control<R>, transport: T) -> Result<()> {
        let rx = Arc::new(ReceiveBuffer::<C>::new());

        let mut link = OpenLink::open(transport)?;
        link.configure(&LineConfig::HC06)?;
        link.register(Arc::new(RxSink {
            rx: Arc::clone(&rx),
            stats: Arc::clone(&self.shared.stats),
        }))?;

        let stream: Arc<dyn ByteStream> = Arc::new(self.port());
        let endpoint = control
            .registry
            .create(&self.config.endpoint_name, stream)?;
        debug!("{}: endpoint '{}' created", DRIVER_NAME, self.config.endpoint_name);

        // Nothing below can fail
        *self.shared.rx.lock() = Some(rx);
        *self.shared.transport.lock() = link.commit();
        control.endpoint = Some(endpoint);
        Ok(())
    }

    /// Destroys the endpoint, then closes the transport.
    ///
    /// Blocked readers wake up with [`Error::NotAttached`]. Calling this on an
    /// unattached bridge does nothing.
    pub fn detach(&self) {
        let mut control = self.control.lock();
        {
            let mut state = self.shared.state.lock();
            if *state == BridgeState::Unattached {
                return;
            }
            *state = BridgeState::Detaching;
        }

        if let Some(endpoint) = control.endpoint.take() {
            drop(endpoint);
            debug!("{}: endpoint '{}' destroyed", DRIVER_NAME, self.config.endpoint_name);
        }

        if let Some(rx) = self.shared.rx.lock().take() {
            rx.close();
        }

        // Waits for an in-flight write to finish
        let transport = self.shared.transport.lock().take();
        if let Some(mut transport) = transport {
            transport.clear_arrival_handler();
            if let Err(e) = transport.close() {
                warn!("{}: close failed: {}", DRIVER_NAME, e);
            }
        }

        self.shared.set_state(BridgeState::Unattached);
        info!("{}: Removed", DRIVER_NAME);
    }

    /// Transport arrival entry point. Never blocks on a reader.
    ///
    /// Returns the number of bytes kept; 0 when not attached.
    pub fn on_arrival(&self, data: &[u8]) -> usize {
        match self.shared.buffer() {
            Some(rx) => deliver(&rx, &self.shared.stats, data),
            None => {
                warn!("{}: {} bytes arrived while not attached", DRIVER_NAME, data.len());
                0
            }
        }
    }

    /// Sends `data` to the transport, returning how many bytes it accepted.
    ///
    /// The unaccepted tail is not queued; resubmitting it is up to the caller.
    pub fn write(&self, data: &[u8]) -> Result<usize> {
        self.shared.write(data)
    }

    /// Waits for data and returns at most `max_count` bytes.
    ///
    /// Whatever was buffered beyond `max_count` is discarded.
    pub fn read(&self, max_count: usize) -> Result<Vec<u8>> {
        self.shared.read(max_count)
    }

    /// Interrupts a blocked [`read`](Self::read), or the next one to block
    /// if no reader is waiting yet.
    pub fn interrupt_reads(&self) {
        self.shared.interrupt()
    }
}

impl<T, R, const C: usize> Drop for Bridge<T, R, C>
where
    T: Transport + 'static,
    R: EndpointRegistry,
{
    fn drop(&mut self) {
        self.detach();
    }
}
