//! Relay hub - canonical document and fan-out to connections

use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use duet_core::Document;
use duet_protocol::Message;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Identifies one live connection within the hub.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Snapshot of hub state, for logging
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HubStats {
    pub connections: usize,
    pub document_len: u32,
}

/// Server-side relay.
///
/// Holds the one canonical document and an outgoing queue per connection.
/// Applying a delta and queueing it for every other connection happens
/// under the document lock, so all recipients see deltas in apply order.
/// Queues are unbounded; a slow reader accumulates frames.
pub struct BroadcastHub {
    document: Mutex<Document>,
    connections: DashMap<ConnectionId, mpsc::UnboundedSender<String>>,
    next_id: AtomicU64,
}

impl BroadcastHub {
    /// Create a hub whose document starts as `seed`
    pub fn new(seed: &str) -> Self {
        Self {
            document: Mutex::new(Document::with_content(seed)),
            connections: DashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }

    /// Add a connection to the broadcast set. Frames for it arrive on the
    /// returned receiver.
    pub fn connect(&self) -> (ConnectionId, mpsc::UnboundedReceiver<String>) {
        let id = ConnectionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = mpsc::unbounded_channel();
        self.connections.insert(id, tx);
        debug!(conn = %id, live = self.connections.len(), "Connection added");
        (id, rx)
    }

    /// Remove a connection. Nothing is announced to the others.
    pub fn disconnect(&self, id: ConnectionId) {
        if self.connections.remove(&id).is_some() {
            debug!(conn = %id, live = self.connections.len(), "Connection removed");
        }
    }

    /// Handle one JSON frame from `from`. Malformed frames are logged and
    /// dropped.
    pub fn handle_frame(&self, from: ConnectionId, frame: &str) {
        let message = match Message::decode(frame) {
            Ok(message) => message,
            Err(e) => {
                warn!(conn = %from, error = %e, "Dropping malformed message");
                return;
            }
        };
        debug!(conn = %from, msg = message.kind(), "Message received");

        match message {
            Message::GetDocumentRequest => self.send_snapshot(from),
            Message::GetDocumentResponse { .. } => {
                warn!(conn = %from, "Client sent a document snapshot, dropping");
            }
            Message::Update(delta) => {
                let document = self.document.lock();
                if let Err(e) = document.apply_update(&delta.update, delta.from.origin()) {
                    warn!(conn = %from, origin = %delta.from, error = %e, "Dropping update that failed to apply");
                    return;
                }
                self.relay(from, frame);
            }
            Message::Awareness(_) => self.relay(from, frame),
        }
    }

    /// Current canonical text
    pub fn document_text(&self) -> String {
        self.document.lock().text()
    }

    pub fn stats(&self) -> HubStats {
        HubStats {
            connections: self.connections.len(),
            document_len: self.document.lock().len(),
        }
    }

    fn send_snapshot(&self, to: ConnectionId) {
        // Held until queued: relays that follow the snapshot are not in it
        let document = self.document.lock();
        let reply = Message::GetDocumentResponse {
            document: document.encode_state(),
        };
        match reply.encode() {
            Ok(text) => self.send_to(to, text),
            Err(e) => warn!(conn = %to, error = %e, "Failed to encode snapshot"),
        }
    }

    fn send_to(&self, to: ConnectionId, text: String) {
        if let Some(tx) = self.connections.get(&to) {
            if tx.send(text).is_err() {
                debug!(conn = %to, "Connection queue closed");
            }
        }
    }

    /// Queue `frame` for every live connection except `from`.
    fn relay(&self, from: ConnectionId, frame: &str) {
        let mut recipients = 0;
        for entry in self.connections.iter() {
            if *entry.key() == from {
                continue;
            }
            if entry.value().send(frame.to_string()).is_ok() {
                recipients += 1;
            }
        }
        debug!(conn = %from, recipients, "Relayed");
    }
}

impl Default for BroadcastHub {
    fn default() -> Self {
        Self::new("")
    }
}
