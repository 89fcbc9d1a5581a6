//! Error types for the bridge.

use std::io;

use thiserror::Error;

/// Errors produced by the bridge and its collaborators.
#[derive(Debug, Error)]
pub enum Error {
    /// A blocked read was interrupted before data arrived. Retry the read.
    #[error("Operation interrupted")]
    Interrupted,

    /// The bridge is not attached to a transport.
    #[error("Bridge is not attached")]
    NotAttached,

    /// `attach` was called on a bridge that is not unattached.
    #[error("Bridge is already attached")]
    AlreadyAttached,

    /// The transport could not be opened.
    #[error("Failed to open transport: {0}")]
    Open(#[source] io::Error),

    /// Line parameters could not be applied to an open transport.
    #[error("Failed to configure transport: {0}")]
    Configure(#[source] io::Error),

    /// The transport rejected a send.
    #[error("Failed to send to transport: {0}")]
    Send(#[source] io::Error),

    /// The exposed endpoint could not be created.
    #[error("Failed to create endpoint: {0}")]
    Endpoint(String),

    /// Any other I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Failure reported by the serial port driver.
    #[cfg(feature = "serial")]
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),
}

impl Error {
    /// Returns true if the operation can simply be retried.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Interrupted)
    }
}

impl From<Error> for io::Error {
    fn from(err: Error) -> io::Error {
        match err {
            Error::Io(e) | Error::Open(e) | Error::Configure(e) | Error::Send(e) => e,
            other => {
                let kind = match other {
                    Error::Interrupted => io::ErrorKind::Interrupted,
                    Error::NotAttached => io::ErrorKind::NotConnected,
                    Error::AlreadyAttached => io::ErrorKind::AlreadyExists,
                    _ => io::ErrorKind::Other,
                };
                io::Error::new(kind, other)
            }
        }
    }
}

/// Result alias used throughout the crate.
pub type Result<T> = core::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable() {
        assert!(Error::Interrupted.is_retryable());
        assert!(!Error::NotAttached.is_retryable());
        assert!(!Error::Send(io::Error::other("boom")).is_retryable());
    }

    #[test]
    fn test_into_io_error() {
        let e: io::Error = Error::Interrupted.into();
        assert_eq!(e.kind(), io::ErrorKind::Interrupted);

        let e: io::Error = Error::NotAttached.into();
        assert_eq!(e.kind(), io::ErrorKind::NotConnected);

        let e: io::Error = Error::Send(io::Error::new(io::ErrorKind::BrokenPipe, "gone")).into();
        assert_eq!(e.kind(), io::ErrorKind::BrokenPipe);
    }
}
