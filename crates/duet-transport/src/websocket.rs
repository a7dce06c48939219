//! WebSocket transport for the Duet relay

use std::net::SocketAddr;
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::{accept_async, tungstenite::Message as Frame};
use tracing::{debug, error, info, warn};

use crate::error::TransportResult;
use crate::handler::{ConnectionHandler, Flow};
use crate::hub::BroadcastHub;

/// WebSocket Server for Duet
pub struct WebSocketServer {
    hub: Arc<BroadcastHub>,
    addr: SocketAddr,
}

impl WebSocketServer {
    pub fn new(hub: Arc<BroadcastHub>, addr: SocketAddr) -> Self {
        Self { hub, addr }
    }

    pub fn hub(&self) -> &Arc<BroadcastHub> {
        &self.hub
    }

    /// Bind the configured address and serve forever
    pub async fn run(&self) -> TransportResult<()> {
        let listener = TcpListener::bind(self.addr).await?;
        self.serve(listener).await
    }

    /// Serve connections accepted on an already bound listener
    pub async fn serve(&self, listener: TcpListener) -> TransportResult<()> {
        info!(addr = %listener.local_addr()?, "Duet WebSocket server listening");

        loop {
            match listener.accept().await {
                Ok((stream, peer_addr)) => {
                    let hub = self.hub.clone();
                    tokio::spawn(async move {
                        if let Err(e) = Self::handle_connection(stream, peer_addr, hub).await {
                            error!(peer = %peer_addr, error = %e, "WebSocket connection error");
                        }
                    });
                }
                Err(e) => {
                    error!(error = %e, "Failed to accept connection");
                }
            }
        }
    }

    /// One reader loop per connection, so a sender's messages are handled
    /// in arrival order; a writer task drains the connection's queue.
    async fn handle_connection(
        stream: TcpStream,
        peer_addr: SocketAddr,
        hub: Arc<BroadcastHub>,
    ) -> TransportResult<()> {
        let ws_stream = accept_async(stream).await?;
        let (mut write, mut read) = ws_stream.split();

        let (handler, mut outgoing) = ConnectionHandler::new(hub.clone());
        let conn = handler.connection_id;
        info!(conn = %conn, peer = %peer_addr, "WebSocket client connected");

        let writer = tokio::spawn(async move {
            while let Some(text) = outgoing.recv().await {
                if let Err(e) = write.send(Frame::Text(text.into())).await {
                    warn!(conn = %conn, error = %e, "WebSocket write error");
                    break;
                }
            }
            let _ = write.close().await;
        });

        while let Some(frame) = read.next().await {
            match frame {
                Ok(frame) => {
                    if handler.process(frame) == Flow::Close {
                        break;
                    }
                }
                Err(e) => {
                    warn!(conn = %conn, error = %e, "WebSocket read error");
                    break;
                }
            }
        }

        // Dropping the hub's sender ends the writer once its queue is drained
        drop(handler);
        if let Err(e) = writer.await {
            debug!(conn = %conn, error = %e, "Writer task ended abnormally");
        }

        let stats = hub.stats();
        info!(
            conn = %conn,
            live = stats.connections,
            document_len = stats.document_len,
            "WebSocket client disconnected"
        );
        Ok(())
    }
}
