//! Error types and handling.

use thiserror::Error;

/// Error type for detector communication and acquisition.
#[derive(Error, Debug)]
pub enum DetectorError {
    /// Device answered FAIL; carries the device text verbatim
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Peer closed the connection, short read, or connect failure
    #[error("Connection error: {0}")]
    Connection(String),

    /// Dynamic range or buffer length inconsistent with the element layout
    #[error("Decode error: {0}")]
    Decode(String),

    /// Device echoed a different frame/cycle count than requested
    #[error("Configuration mismatch: requested {field}={requested} but device has {echoed}")]
    ConfigurationMismatch {
        field: &'static str,
        requested: i64,
        echoed: i64,
    },

    /// Device communication timeout
    #[error("Timeout: {0}")]
    Timeout(String),

    /// Operation not allowed in the current session state
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Background acquisition task failed
    #[error("Worker error: {0}")]
    Worker(String),

    /// Socket I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for DetectorError
pub type Result<T> = std::result::Result<T, DetectorError>;

impl DetectorError {
    /// Create a protocol error with message
    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }

    /// Create a connection error with message
    pub fn connection(msg: impl Into<String>) -> Self {
        Self::Connection(msg.into())
    }

    /// Create a decode error with message
    pub fn decode(msg: impl Into<String>) -> Self {
        Self::Decode(msg.into())
    }
}
