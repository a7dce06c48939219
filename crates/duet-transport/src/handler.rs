//! Connection handler - feeds one socket's frames into the hub

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message as Frame;
use tracing::{debug, warn};

use crate::hub::{BroadcastHub, ConnectionId};

/// What the read loop should do after a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Close,
}

/// Handles a single client connection
pub struct ConnectionHandler {
    /// Hub-assigned connection ID
    pub connection_id: ConnectionId,
    hub: Arc<BroadcastHub>,
}

impl ConnectionHandler {
    /// Register a new connection with `hub`. Frames to send to the client
    /// arrive on the returned receiver.
    pub fn new(hub: Arc<BroadcastHub>) -> (Self, mpsc::UnboundedReceiver<String>) {
        let (connection_id, outgoing) = hub.connect();
        (Self { connection_id, hub }, outgoing)
    }

    /// Process one incoming WebSocket frame
    pub fn process(&self, frame: Frame) -> Flow {
        match frame {
            Frame::Text(text) => self.hub.handle_frame(self.connection_id, &text),
            Frame::Binary(data) => match std::str::from_utf8(&data) {
                Ok(text) => self.hub.handle_frame(self.connection_id, text),
                Err(e) => {
                    warn!(conn = %self.connection_id, error = %e, "Dropping binary frame that is not UTF-8");
                }
            },
            Frame::Close(_) => return Flow::Close,
            // No heartbeats: pings are answered by tungstenite, nothing else to do
            other => {
                debug!(conn = %self.connection_id, frame = ?other, "Ignoring control frame");
            }
        }
        Flow::Continue
    }

}

impl Drop for ConnectionHandler {
    /// Leave the broadcast set, also when the read loop unwinds
    fn drop(&mut self) {
        self.hub.disconnect(self.connection_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc::error::TryRecvError;

    #[test]
    fn test_text_and_binary_frames() {
        let hub = Arc::new(BroadcastHub::new("abc"));
        let (handler, mut outgoing) = ConnectionHandler::new(hub.clone());

        let flow = handler.process(Frame::Text(r#"{"msg":"Get Document"}"#.into()));
        assert_eq!(flow, Flow::Continue);
        assert!(outgoing.try_recv().unwrap().contains("\"document\""));

        let flow = handler.process(Frame::Binary(br#"{"msg":"Get Document"}"#.to_vec().into()));
        assert_eq!(flow, Flow::Continue);
        assert!(outgoing.try_recv().unwrap().contains("\"document\""));
    }

    #[test]
    fn test_bad_binary_frame_keeps_connection() {
        let hub = Arc::new(BroadcastHub::new(""));
        let (handler, mut outgoing) = ConnectionHandler::new(hub);

        let flow = handler.process(Frame::Binary(vec![0xff, 0xfe, 0xfd].into()));
        assert_eq!(flow, Flow::Continue);
        assert!(matches!(outgoing.try_recv(), Err(TryRecvError::Empty)));
    }

    #[test]
    fn test_close_and_drop_leaves_hub() {
        let hub = Arc::new(BroadcastHub::new(""));
        let (handler, _outgoing) = ConnectionHandler::new(hub.clone());
        assert_eq!(hub.stats().connections, 1);

        assert_eq!(handler.process(Frame::Close(None)), Flow::Close);
        drop(handler);
        assert_eq!(hub.stats().connections, 0);
    }

    #[test]
    fn test_corrupt_update_keeps_connection_registered() {
        let hub = Arc::new(BroadcastHub::new("stable"));
        let (handler, _outgoing) = ConnectionHandler::new(hub.clone());
        let (_peer, mut peer_rx) = ConnectionHandler::new(hub.clone());

        let flow = handler.process(Frame::Text(
            r#"{"msg":"Update","update":"3q2+7w==","from":3}"#.into(),
        ));
        assert_eq!(flow, Flow::Continue);
        assert_eq!(hub.stats().connections, 2);
        assert_eq!(hub.document_text(), "stable");
        assert!(matches!(peer_rx.try_recv(), Err(TryRecvError::Empty)));
    }

    #[test]
    fn test_unwinding_reader_leaves_hub() {
        let hub = Arc::new(BroadcastHub::new(""));
        let unwound = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let (_handler, _outgoing) = ConnectionHandler::new(hub.clone());
            panic!("reader failed");
        }));
        assert!(unwound.is_err());
        assert_eq!(hub.stats().connections, 0);
    }
}
