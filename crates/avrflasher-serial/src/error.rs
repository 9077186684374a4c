//! Error types for the serial transport

use thiserror::Error;

/// Serial transport errors
#[derive(Debug, Error)]
pub enum SerialError {
    /// Serial port error
    #[error("Serial port error: {0}")]
    Port(#[from] serialport::Error),

    /// I/O error during communication
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid option value
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),
}

/// Result type for serial operations
pub type Result<T> = std::result::Result<T, SerialError>;

impl From<SerialError> for avrflasher_core::Error {
    fn from(e: SerialError) -> Self {
        avrflasher_core::Error::Transport(e.to_string())
    }
}
