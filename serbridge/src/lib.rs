//! # serbridge - Buffered Serial Transport Bridge
//!
//! serbridge connects a byte-oriented serial transport (for example an HC-06
//! Bluetooth-to-serial adapter on a UART) to a consumer doing plain blocking
//! byte-stream I/O:
//!
//! - **Bounded receive buffer**: bytes delivered by the transport are kept in a
//!   fixed-capacity store until the consumer drains them
//! - **Blocking reads**: a read waits for data without spinning and can be
//!   interrupted cooperatively
//! - **Direct writes**: writes go straight to the transport, no queueing
//! - **Attach/detach lifecycle**: opening, configuring and exposing a transport
//!   with full reverse-order unwind on failure
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │               Endpoint (socket, file, ...)               │
//! │            read(max) ▲            │ write(bytes)         │
//! ├──────────────────────┼────────────┼─────────────────────┤
//! │                      │  Bridge    ▼                      │
//! │  ┌────────────────────────┐   ┌──────────────────────┐  │
//! │  │ ReceiveBuffer<C>       │   │ write passthrough    │  │
//! │  │ mutex + condvar        │   │                      │  │
//! │  └──────────▲─────────────┘   └──────────┬───────────┘  │
//! ├─────────────┼────────────────────────────┼──────────────┤
//! │   arrival callback                   send(bytes)        │
//! │  ┌─────────────────────────────────────────────────┐    │
//! │  │         Transport (serial port, loopback)        │    │
//! │  └─────────────────────────────────────────────────┘    │
//! └─────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```rust,ignore
//! use serbridge::{Bridge, LoopbackTransport};
//!
//! let bridge: Bridge<_, _> = Bridge::new(registry);
//! bridge.attach(LoopbackTransport::new())?;
//!
//! bridge.write(b"AT")?;
//! let reply = bridge.read(64)?;
//!
//! bridge.detach();
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod bridge;
pub mod buffer;
pub mod config;
pub mod endpoint;
pub mod error;
pub mod transport;

// Re-export commonly used types
pub use bridge::{Bridge, BridgePort, BridgeState, BridgeStats};
pub use buffer::ReceiveBuffer;
pub use config::{BridgeConfig, FlowControl, LineConfig, Parity};
pub use endpoint::{ByteStream, EndpointRegistry, LocalEndpoint, LocalRegistry};
pub use error::{Error, Result};
pub use transport::{ArrivalHandler, LoopbackProbe, LoopbackTransport, Transport};

#[cfg(feature = "serial")]
pub use transport::serial::{SerialPortConfig, SerialPortTransport};

/// Driver name used in log messages.
pub const DRIVER_NAME: &str = "hc06_bt_serdev";

/// Default name of the exposed endpoint.
pub const DEFAULT_ENDPOINT_NAME: &str = "hc06_bt";

/// Class the exposed endpoint is grouped under.
pub const ENDPOINT_CLASS: &str = "bluetooth";

/// Default receive buffer capacity in bytes.
pub const DEFAULT_RX_CAPACITY: usize = 256;
