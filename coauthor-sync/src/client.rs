//! WebSocket client for the sync server.
//!
//! Connects, joins a document, sends version-stamped operations, and
//! surfaces everything the server pushes as a [`SyncEvent`] stream. The
//! caller owns conflict recovery: when an edit is sent at a stale version
//! the server stays silent, and the client learns the current version from
//! the next broadcast (or by re-joining for a fresh `INIT`).

use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, RwLock};
use tokio_tungstenite::tungstenite::Message;

use crate::protocol::{ClientMessage, Operation, Presence, ProtocolError, ServerMessage};

/// Client connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Events emitted by the sync client.
#[derive(Debug, Clone)]
pub enum SyncEvent {
    /// Connection established and JOIN sent
    Connected,
    /// Connection lost or closed
    Disconnected,
    /// Session snapshot for our document
    Init {
        content: String,
        version: u64,
        users: Vec<Presence>,
    },
    /// Another editor's accepted operation
    RemoteOperation {
        user_id: String,
        operation: Operation,
        server_version: u64,
    },
    /// Another editor joined the document
    UserJoined(Presence),
    /// An editor left the document
    UserLeft(Presence),
}

/// The sync client.
pub struct SyncClient {
    presence: Presence,
    document_id: String,
    server_url: String,
    state: Arc<RwLock<ConnectionState>>,
    outgoing_tx: Option<mpsc::Sender<String>>,
    event_tx: mpsc::Sender<SyncEvent>,
    event_rx: Option<mpsc::Receiver<SyncEvent>>,
}

impl SyncClient {
    /// Create a new sync client for one document.
    pub fn new(
        presence: Presence,
        document_id: impl Into<String>,
        server_url: impl Into<String>,
    ) -> Self {
        let (event_tx, event_rx) = mpsc::channel(256);
        Self {
            presence,
            document_id: document_id.into(),
            server_url: server_url.into(),
            state: Arc::new(RwLock::new(ConnectionState::Disconnected)),
            outgoing_tx: None,
            event_tx,
            event_rx: Some(event_rx),
        }
    }

    /// Take the event receiver (can only be called once).
    pub fn take_event_rx(&mut self) -> Option<mpsc::Receiver<SyncEvent>> {
        self.event_rx.take()
    }

    pub async fn connection_state(&self) -> ConnectionState {
        *self.state.read().await
    }

    /// Connect to the server and send the JOIN for our document.
    ///
    /// Spawns background tasks for reading and writing the socket.
    pub async fn connect(&mut self) -> Result<(), ProtocolError> {
        *self.state.write().await = ConnectionState::Connecting;

        let (ws_stream, _) = match tokio_tungstenite::connect_async(&self.server_url).await {
            Ok(pair) => pair,
            Err(e) => {
                *self.state.write().await = ConnectionState::Disconnected;
                return Err(ProtocolError::Connection(e.to_string()));
            }
        };

        let (mut ws_writer, mut ws_reader) = ws_stream.split();

        // Writer task: outgoing channel → socket
        let (out_tx, mut out_rx) = mpsc::channel::<String>(256);
        self.outgoing_tx = Some(out_tx);
        tokio::spawn(async move {
            while let Some(text) = out_rx.recv().await {
                if ws_writer.send(Message::Text(text.into())).await.is_err() {
                    break;
                }
            }
            let _ = ws_writer.close().await;
        });

        // Reader task: socket → events
        let event_tx = self.event_tx.clone();
        let state = self.state.clone();
        tokio::spawn(async move {
            while let Some(frame) = ws_reader.next().await {
                match frame {
                    Ok(Message::Text(text)) => match ServerMessage::decode(text.as_str()) {
                        Ok(msg) => {
                            let _ = event_tx.send(Self::event_for(msg)).await;
                        }
                        Err(e) => log::warn!("undecodable server message: {e}"),
                    },
                    Ok(Message::Close(_)) | Err(_) => break,
                    _ => {}
                }
            }
            *state.write().await = ConnectionState::Disconnected;
            let _ = event_tx.send(SyncEvent::Disconnected).await;
        });

        let join = ClientMessage::Join {
            document_id: self.document_id.clone(),
            user_id: self.presence.user_id.clone(),
            username: self.presence.username.clone(),
        };
        self.send(&join).await?;

        *self.state.write().await = ConnectionState::Connected;
        let _ = self.event_tx.send(SyncEvent::Connected).await;
        Ok(())
    }

    /// Send an edit stamped with the version we believe the server is at.
    pub async fn send_operation(
        &self,
        operation: Operation,
        client_version: u64,
    ) -> Result<(), ProtocolError> {
        let msg = ClientMessage::Operation {
            document_id: self.document_id.clone(),
            user_id: self.presence.user_id.clone(),
            operation,
            client_version,
        };
        self.send(&msg).await
    }

    /// Close the connection. The server will announce our departure to the
    /// remaining editors.
    pub async fn disconnect(&mut self) {
        // Dropping the outgoing sender ends the writer task, which closes
        // the socket.
        self.outgoing_tx = None;
        *self.state.write().await = ConnectionState::Disconnected;
    }

    pub fn document_id(&self) -> &str {
        &self.document_id
    }

    pub fn presence(&self) -> &Presence {
        &self.presence
    }

    async fn send(&self, msg: &ClientMessage) -> Result<(), ProtocolError> {
        let encoded = msg.encode()?;
        match &self.outgoing_tx {
            Some(tx) => tx
                .send(encoded)
                .await
                .map_err(|_| ProtocolError::ConnectionClosed),
            None => Err(ProtocolError::ConnectionClosed),
        }
    }

    fn event_for(msg: ServerMessage) -> SyncEvent {
        match msg {
            ServerMessage::Init {
                content,
                version,
                users,
            } => SyncEvent::Init {
                content,
                version,
                users,
            },
            ServerMessage::Operation {
                user_id,
                operation,
                server_version,
            } => SyncEvent::RemoteOperation {
                user_id,
                operation,
                server_version,
            },
            ServerMessage::UserJoined { user_id, username } => {
                SyncEvent::UserJoined(Presence { user_id, username })
            }
            ServerMessage::UserLeft { user_id, username } => {
                SyncEvent::UserLeft(Presence { user_id, username })
            }
        }
    }
}
