//! Error types for focuslink.

use std::io;
use thiserror::Error;

/// Result type for focuslink operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for focuslink operations.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error (serial port, USB enumeration, file operations).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Serial port error.
    #[cfg(feature = "native")]
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    /// No sentinel arrived within the idle interval while requests were pending.
    #[error("Communication timeout")]
    Timeout,

    /// The transport went away while requests were pending.
    #[error("Device disconnected")]
    Disconnected,

    /// A command was issued without an open connection.
    #[error("Device not connected")]
    NotConnected,

    /// Malformed arguments to an open or configuration call.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// No matching device is currently attached.
    #[error("Device not found")]
    DeviceNotFound,

    /// The embedding application asked the current operation to stop.
    #[error("Operation interrupted")]
    Interrupted,
}

/// Terminal failure applied to every pending request when a link dies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LinkFailure {
    Timeout,
    Disconnected,
}

impl From<LinkFailure> for Error {
    fn from(failure: LinkFailure) -> Self {
        match failure {
            LinkFailure::Timeout => Self::Timeout,
            LinkFailure::Disconnected => Self::Disconnected,
        }
    }
}
