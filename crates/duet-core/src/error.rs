//! Error types for Duet Core

use thiserror::Error;

/// Core error types
#[derive(Error, Debug)]
pub enum Error {
    /// A binary delta could not be decoded or integrated. The replica is left
    /// in the state it had before the delta was offered.
    #[error("Merge error: {0}")]
    Merge(String),

    #[error("Invalid snapshot: {0}")]
    Snapshot(String),

    /// The anchor does not point into this document instance.
    #[error("Anchor resolution failed: {0}")]
    AnchorResolution(String),

    #[error("Invalid edit: {0}")]
    InvalidEdit(String),

    #[error("Invalid color: {0}")]
    InvalidColor(String),
}

/// Result type alias for Duet Core operations
pub type Result<T> = std::result::Result<T, Error>;
