//! UART transport backed by the `serialport` crate.
//!
//! The port is opened at the HC-06 baud rate and polled by a reader thread
//! once an arrival handler is registered. The thread reads with a short
//! timeout so it notices a stop request promptly.

use std::io::{self, Read, Write};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::{debug, error, trace, warn};
use serialport::SerialPort;

use super::{ArrivalHandler, Transport};
use crate::config::{FlowControl, LineConfig, Parity};
use crate::error::{Error, Result};

/// Default poll timeout of the reader thread.
pub const DEFAULT_POLL_TIMEOUT_MS: u64 = 100;

/// Default size of a single read from the port.
pub const DEFAULT_CHUNK_SIZE: usize = 64;

/// Serial transport configuration.
#[derive(Debug, Clone)]
pub struct SerialPortConfig {
    /// Device path, e.g. `/dev/ttyS1` or `COM3`.
    pub path: String,
    /// How long a single read waits before re-checking for stop.
    pub poll_timeout: Duration,
    /// Maximum bytes handed to the arrival handler per read.
    pub chunk_size: usize,
}

impl SerialPortConfig {
    /// Creates a configuration for the given device path.
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            poll_timeout: Duration::from_millis(DEFAULT_POLL_TIMEOUT_MS),
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }

    /// Sets the reader poll timeout.
    pub fn with_poll_timeout(mut self, timeout: Duration) -> Self {
        self.poll_timeout = timeout;
        self
    }

    /// Sets the reader chunk size.
    pub fn with_chunk_size(mut self, size: usize) -> Self {
        self.chunk_size = size.max(1);
        self
    }
}

struct Reader {
    stop: Arc<AtomicBool>,
    thread: JoinHandle<()>,
}

impl Reader {
    fn shutdown(self) {
        self.stop.store(true, Ordering::Release);
        if self.thread.join().is_err() {
            warn!("serial reader thread panicked");
        }
    }
}

/// A transport over a local serial port.
pub struct SerialPortTransport {
    config: SerialPortConfig,
    port: Option<Box<dyn SerialPort>>,
    reader: Option<Reader>,
}

impl SerialPortTransport {
    /// Creates a closed transport for the configured device.
    pub fn new(config: SerialPortConfig) -> Self {
        Self {
            config,
            port: None,
            reader: None,
        }
    }

    /// Returns the device path.
    pub fn path(&self) -> &str {
        &self.config.path
    }

    fn port_mut(&mut self) -> io::Result<&mut Box<dyn SerialPort>> {
        self.port
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "serial port not open"))
    }

    fn stop_reader(&mut self) {
        if let Some(reader) = self.reader.take() {
            reader.shutdown();
            debug!("serial reader on {} stopped", self.config.path);
        }
    }
}

fn map_parity(parity: Parity) -> serialport::Parity {
    match parity {
        Parity::None => serialport::Parity::None,
        Parity::Odd => serialport::Parity::Odd,
        Parity::Even => serialport::Parity::Even,
    }
}

fn map_flow_control(flow: FlowControl) -> serialport::FlowControl {
    match flow {
        FlowControl::None => serialport::FlowControl::None,
        FlowControl::Software => serialport::FlowControl::Software,
        FlowControl::Hardware => serialport::FlowControl::Hardware,
    }
}

fn read_loop(
    mut port: Box<dyn SerialPort>,
    handler: Arc<dyn ArrivalHandler>,
    stop: Arc<AtomicBool>,
    chunk_size: usize,
) {
    let mut buf = vec![0u8; chunk_size];
    while !stop.load(Ordering::Acquire) {
        match port.read(&mut buf) {
            Ok(0) => continue,
            Ok(n) => {
                let accepted = handler.on_arrival(&buf[..n]);
                trace!("serial rx: {} bytes, {} kept", n, accepted);
            }
            Err(e) if matches!(e.kind(), io::ErrorKind::TimedOut | io::ErrorKind::Interrupted) => {
                continue;
            }
            Err(e) => {
                error!("serial read failed: {}", e);
                break;
            }
        }
    }
}

impl Transport for SerialPortTransport {
    fn open(&mut self) -> Result<()> {
        let port = serialport::new(&self.config.path, LineConfig::HC06.baud_rate)
            .timeout(self.config.poll_timeout)
            .open()
            .map_err(|e| Error::Open(e.into()))?;

        debug!("serial port {} opened", self.config.path);
        self.port = Some(port);
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.stop_reader();
        if self.port.take().is_some() {
            debug!("serial port {} closed", self.config.path);
        }
        Ok(())
    }

    fn configure(&mut self, line: &LineConfig) -> Result<()> {
        let port = self.port_mut().map_err(Error::Configure)?;
        port.set_baud_rate(line.baud_rate)
            .map_err(|e| Error::Configure(e.into()))?;
        port.set_flow_control(map_flow_control(line.flow_control))
            .map_err(|e| Error::Configure(e.into()))?;
        port.set_parity(map_parity(line.parity))
            .map_err(|e| Error::Configure(e.into()))?;
        Ok(())
    }

    /// Queues `data` in the driver's output buffer and returns how much was
    /// taken. Does not wait for the UART to shift the bytes out.
    fn send(&mut self, data: &[u8]) -> Result<usize> {
        let port = self.port_mut().map_err(Error::Send)?;
        port.write(data).map_err(Error::Send)
    }

    fn set_arrival_handler(&mut self, handler: Arc<dyn ArrivalHandler>) -> Result<()> {
        self.stop_reader();

        let port = self.port_mut()?.try_clone()?;
        let stop = Arc::new(AtomicBool::new(false));
        let chunk_size = self.config.chunk_size;

        let thread = {
            let stop = Arc::clone(&stop);
            thread::Builder::new()
                .name("serbridge-rx".into())
                .spawn(move || read_loop(port, handler, stop, chunk_size))?
        };

        self.reader = Some(Reader { stop, thread });
        debug!("serial reader on {} started", self.config.path);
        Ok(())
    }

    fn clear_arrival_handler(&mut self) {
        self.stop_reader();
    }
}

impl Drop for SerialPortTransport {
    fn drop(&mut self) {
        self.stop_reader();
    }
}
