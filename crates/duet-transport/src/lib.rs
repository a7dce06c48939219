//! Duet Transport Layer
//!
//! Provides the network side of Duet:
//! - BroadcastHub: the relay holding the canonical document
//! - WebSocket server feeding connections into the hub
//! - Client: one editing session connected to a relay

pub mod client;
pub mod error;
pub mod handler;
pub mod hub;
pub mod websocket;

pub use client::{Client, SessionView};
pub use error::{TransportError, TransportResult};
pub use handler::{ConnectionHandler, Flow};
pub use hub::{BroadcastHub, ConnectionId, HubStats};
pub use websocket::WebSocketServer;
