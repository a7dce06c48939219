//! Transport error types

use thiserror::Error;

/// Errors raised by the relay server and the client session
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Protocol error: {0}")]
    Protocol(#[from] duet_protocol::ProtocolError),

    #[error("Core error: {0}")]
    Core(#[from] duet_core::Error),

    /// The connection is gone; the session no longer accepts commands.
    #[error("Session is inert")]
    Inert,

    #[error("Connection closed while waiting for {0}")]
    Closed(&'static str),
}

/// Result type for transport operations
pub type TransportResult<T> = Result<T, TransportError>;
