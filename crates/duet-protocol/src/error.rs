//! Protocol error types

use thiserror::Error;

/// Protocol-specific errors
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// Not JSON, an unknown `msg`, a missing field, bad base64 or a bad color.
    #[error("Invalid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("Message too large: {size} > {max}")]
    MessageTooLarge { size: usize, max: usize },
}

/// Result type for protocol operations
pub type ProtocolResult<T> = Result<T, ProtocolError>;
