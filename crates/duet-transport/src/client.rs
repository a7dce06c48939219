//! Client session connected to a relay
//!
//! The session is owned by one actor task. Local commands arrive over a
//! channel and relay frames over the socket; both are handled in the same
//! `select!` loop, so an edit and a remote delta never run concurrently.
//! When the socket goes away the actor exits and the client turns inert.

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message as Frame;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use duet_core::{ClientSession, Color, Decoration, EditBatch, OriginId, Selection};
use duet_protocol::{Message, ProtocolResult};

use crate::error::{TransportError, TransportResult};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// What the session looks like right now
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionView {
    pub text: String,
    pub selection: Selection,
    pub decorations: Vec<Decoration>,
}

impl SessionView {
    fn of(session: &ClientSession) -> Self {
        Self {
            text: session.text(),
            selection: session.selection(),
            decorations: session.decorations().to_vec(),
        }
    }
}

enum Operation {
    Edit(EditBatch),
    Select(Selection),
    Undo,
    Redo,
}

enum Command {
    Apply(Operation, oneshot::Sender<TransportResult<()>>),
    View(oneshot::Sender<SessionView>),
}

/// Handle to a running session
pub struct Client {
    local: OriginId,
    commands: mpsc::UnboundedSender<Command>,
    task: JoinHandle<()>,
}

impl Client {
    /// Connect with a fresh identity and a random color
    pub async fn connect(url: &str) -> TransportResult<Self> {
        Self::connect_with(url, OriginId::generate(), Color::random()).await
    }

    /// Connect, fetch the snapshot and start the session actor.
    ///
    /// Frames that arrive before the snapshot are already part of it and
    /// are dropped.
    pub async fn connect_with(url: &str, local: OriginId, color: Color) -> TransportResult<Self> {
        let (ws_stream, _) = connect_async(url).await?;
        let (mut write, mut read) = ws_stream.split();

        write
            .send(Frame::Text(Message::GetDocumentRequest.encode()?.into()))
            .await?;

        let snapshot = loop {
            let frame = match read.next().await {
                Some(Ok(Frame::Close(_))) | None => return Err(TransportError::Closed("snapshot")),
                Some(Ok(frame)) => frame,
                Some(Err(e)) => return Err(e.into()),
            };
            match decode_frame(&frame) {
                Some(Ok(Message::GetDocumentResponse { document })) => break document,
                Some(Ok(message)) => {
                    debug!(origin = %local, msg = message.kind(), "Dropping message received before the snapshot");
                }
                Some(Err(e)) => warn!(origin = %local, error = %e, "Dropping malformed message"),
                None => {}
            }
        };

        let session = ClientSession::from_snapshot(&snapshot, local, color)?;
        info!(origin = %local, url, "Connected to relay");

        let (commands, rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(run_session(session, write, read, rx));
        Ok(Self {
            local,
            commands,
            task,
        })
    }

    pub fn local(&self) -> OriginId {
        self.local
    }

    /// True once the connection is gone
    pub fn is_inert(&self) -> bool {
        self.commands.is_closed()
    }

    /// Apply a local edit batch and broadcast it
    pub async fn edit(&self, batch: EditBatch) -> TransportResult<()> {
        self.apply(Operation::Edit(batch)).await
    }

    /// Move the local selection and broadcast it
    pub async fn select(&self, selection: Selection) -> TransportResult<()> {
        self.apply(Operation::Select(selection)).await
    }

    pub async fn undo(&self) -> TransportResult<()> {
        self.apply(Operation::Undo).await
    }

    pub async fn redo(&self) -> TransportResult<()> {
        self.apply(Operation::Redo).await
    }

    pub async fn view(&self) -> TransportResult<SessionView> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(Command::View(reply))
            .map_err(|_| TransportError::Inert)?;
        rx.await.map_err(|_| TransportError::Inert)
    }

    pub async fn text(&self) -> TransportResult<String> {
        Ok(self.view().await?.text)
    }

    /// Close the connection and wait for the actor to finish
    pub async fn close(self) {
        drop(self.commands);
        if let Err(e) = self.task.await {
            warn!(origin = %self.local, error = %e, "Session task ended abnormally");
        }
    }

    async fn apply(&self, operation: Operation) -> TransportResult<()> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(Command::Apply(operation, reply))
            .map_err(|_| TransportError::Inert)?;
        rx.await.map_err(|_| TransportError::Inert)?
    }
}

fn decode_frame(frame: &Frame) -> Option<ProtocolResult<Message>> {
    match frame {
        Frame::Text(text) => Some(Message::decode(text)),
        Frame::Binary(data) => Some(Message::decode_bytes(data)),
        _ => None,
    }
}

async fn run_session(
    mut session: ClientSession,
    mut write: SplitSink<Socket, Frame>,
    mut read: SplitStream<Socket>,
    mut commands: mpsc::UnboundedReceiver<Command>,
) {
    let local = session.local();

    loop {
        tokio::select! {
            frame = read.next() => match frame {
                Some(Ok(Frame::Close(_))) | None => {
                    info!(origin = %local, "Relay closed the connection");
                    break;
                }
                Some(Ok(frame)) => match decode_frame(&frame) {
                    Some(Ok(message)) => receive(&mut session, message),
                    Some(Err(e)) => warn!(origin = %local, error = %e, "Dropping malformed message"),
                    None => {}
                },
                Some(Err(e)) => {
                    warn!(origin = %local, error = %e, "WebSocket read error");
                    break;
                }
            },

            command = commands.recv() => match command {
                Some(Command::Apply(operation, reply)) => {
                    let result = execute(&mut session, operation, &mut write).await;
                    let broken = matches!(result, Err(TransportError::WebSocket(_)));
                    let _ = reply.send(result);
                    if broken {
                        break;
                    }
                }
                Some(Command::View(reply)) => {
                    let _ = reply.send(SessionView::of(&session));
                }
                None => {
                    let _ = write.close().await;
                    break;
                }
            },
        }
    }

    debug!(origin = %local, "Session ended");
}

async fn execute(
    session: &mut ClientSession,
    operation: Operation,
    write: &mut SplitSink<Socket, Frame>,
) -> TransportResult<()> {
    let outbound = match operation {
        Operation::Edit(batch) => session.edit(&batch)?,
        Operation::Select(selection) => session.select(selection)?,
        Operation::Undo => session.undo()?,
        Operation::Redo => session.redo()?,
    };

    for item in outbound {
        let text = Message::from(item).encode()?;
        write.send(Frame::Text(text.into())).await?;
    }
    Ok(())
}

fn receive(session: &mut ClientSession, message: Message) {
    match message {
        Message::Update(delta) => {
            if let Err(e) = session.receive_update(&delta) {
                warn!(origin = %session.local(), from = %delta.from, error = %e, "Skipping update");
            }
        }
        Message::Awareness(update) => {
            session.receive_awareness(update);
        }
        other => {
            debug!(origin = %session.local(), msg = other.kind(), "Ignoring message");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::future::Future;
    use std::net::SocketAddr;
    use std::sync::Arc;
    use std::time::Duration;

    use duet_core::{Change, Document, Side};
    use tokio::net::TcpListener;
    use tokio::time::{sleep, Instant};
    use tokio_tungstenite::accept_async;

    use crate::hub::BroadcastHub;
    use crate::websocket::WebSocketServer;

    async fn start_relay(seed: &str) -> (Arc<BroadcastHub>, String) {
        let hub = Arc::new(BroadcastHub::new(seed));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr: SocketAddr = listener.local_addr().unwrap();

        let server = WebSocketServer::new(hub.clone(), addr);
        tokio::spawn(async move { server.serve(listener).await });
        (hub, format!("ws://{}", addr))
    }

    async fn eventually<F, Fut>(what: &str, mut check: F)
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = bool>,
    {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if check().await {
                return;
            }
            sleep(Duration::from_millis(10)).await;
        }
        panic!("timed out waiting for {}", what);
    }

    async fn has_text(client: &Client, expected: &str) -> bool {
        client.text().await.unwrap() == expected
    }

    #[tokio::test]
    async fn test_hello_world_scenario() {
        let (hub, url) = start_relay("").await;

        let hub = &hub;
        let client1 = Client::connect(&url).await.unwrap();
        client1
            .edit(EditBatch::single(Change::insert(0, "hello")))
            .await
            .unwrap();
        eventually("canonical hello", || async move { hub.document_text() == "hello" }).await;

        let client2 = Client::connect(&url).await.unwrap();
        assert_eq!(client2.text().await.unwrap(), "hello");
        client2
            .edit(EditBatch::single(Change::insert(5, " world")))
            .await
            .unwrap();

        let c1 = &client1;
        eventually("client1 hello world", || has_text(c1, "hello world")).await;
        eventually("canonical hello world", || async move {
            hub.document_text() == "hello world"
        })
        .await;
    }

    #[tokio::test]
    async fn test_concurrent_edits_converge() {
        let (hub, url) = start_relay("base").await;
        let a = Client::connect(&url).await.unwrap();
        let b = Client::connect(&url).await.unwrap();

        let (ra, rb) = tokio::join!(
            a.edit(EditBatch::single(Change::insert(0, "A"))),
            b.edit(EditBatch::single(Change::insert(4, "B"))),
        );
        ra.unwrap();
        rb.unwrap();
        a.edit(EditBatch::single(Change::delete(1, 2))).await.unwrap();

        let (a, b, hub) = (&a, &b, &hub);
        eventually("convergence", || async move {
            let (ta, tb) = (a.text().await.unwrap(), b.text().await.unwrap());
            ta == tb && ta == hub.document_text()
        })
        .await;

        // B's insert may land before or after A's, but both survive A's delete
        let text = a.text().await.unwrap();
        assert_eq!(text.len(), 5);
        assert!(text.starts_with("Aas"));
        assert!(text.contains('B'));
    }

    #[tokio::test]
    async fn test_remote_selection_is_rendered() {
        let (_hub, url) = start_relay("shared text").await;
        let a = Client::connect(&url).await.unwrap();
        let b = Client::connect(&url).await.unwrap();

        b.select(Selection::range(0, 6)).await.unwrap();

        let a = &a;
        eventually("remote cursor", || async move {
            a.view().await.unwrap().decorations.len() == 2
        })
        .await;

        let view = a.view().await.unwrap();
        assert_eq!(view.decorations[0].side, Side::Selection);
        assert_eq!((view.decorations[0].from, view.decorations[0].to), (0, 6));
        assert_eq!(view.decorations[1].side, Side::Caret);
        assert_eq!(view.decorations[1].from, 6);
        assert_eq!(view.decorations[1].peer, b.local());
    }

    #[tokio::test]
    async fn test_undo_reverts_only_own_edit() {
        let (hub, url) = start_relay("").await;
        let a = Client::connect(&url).await.unwrap();
        let b = Client::connect(&url).await.unwrap();
        let (a, b, hub) = (&a, &b, &hub);

        a.edit(EditBatch::single(Change::insert(0, "hello")))
            .await
            .unwrap();
        eventually("b sees hello", || has_text(b, "hello")).await;

        b.edit(EditBatch::single(Change::insert(5, " world")))
            .await
            .unwrap();
        eventually("a sees hello world", || has_text(a, "hello world")).await;

        a.undo().await.unwrap();
        assert_eq!(a.text().await.unwrap(), " world");
        eventually("b sees undo", || has_text(b, " world")).await;
        eventually("hub sees undo", || async move { hub.document_text() == " world" }).await;
    }

    #[tokio::test]
    async fn test_session_turns_inert_when_relay_closes() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(stream).await.unwrap();
            let _request = ws.next().await;

            let early = r##"{"msg":"Awareness","from":9,"color":"#000000","anchor":{"sticky":"AQ=="},"head":{"sticky":"AQ=="}}"##;
            ws.send(Frame::Text(early.to_string().into())).await.unwrap();
            let snapshot = Message::GetDocumentResponse {
                document: Document::with_content("bye").encode_state(),
            };
            ws.send(Frame::Text(snapshot.encode().unwrap().into()))
                .await
                .unwrap();
            ws.close(None).await.unwrap();
        });

        let client = Client::connect(&format!("ws://{}", addr)).await.unwrap();
        let c = &client;
        eventually("inert session", || async move { c.is_inert() }).await;

        let result = client
            .edit(EditBatch::single(Change::insert(0, "x")))
            .await;
        assert!(matches!(result, Err(TransportError::Inert)));
        assert!(matches!(client.text().await, Err(TransportError::Inert)));
    }

    #[tokio::test]
    async fn test_connect_fails_without_snapshot() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(stream).await.unwrap();
            let _request = ws.next().await;
            ws.close(None).await.unwrap();
        });

        let result = Client::connect(&format!("ws://{}", addr)).await;
        assert!(matches!(result, Err(TransportError::Closed(_))));
    }
}
