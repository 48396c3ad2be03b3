//! WebSocket sync server.
//!
//! Architecture:
//! ```text
//! Editor A ──┐
//!             ├── Session (documentId) ── content/version ── fan-out
//! Editor B ──┘                                │
//!                                             └── PersistentStore
//! ```
//!
//! Each connection gets an opaque [`ConnectionId`] and an outbound queue;
//! a per-connection task `select!`s between inbound frames (dispatched to
//! the [`SyncEngine`]) and the queue (flushed to the socket). When the
//! socket closes, the engine retracts the connection's presence from every
//! session it joined.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, RwLock};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;

use crate::engine::SyncEngine;
use crate::session::{ClientSink, ConnectionId};
use crate::storage::{MemoryStore, PersistentStore, RocksStore, StoreConfig, StoreError};

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to
    pub bind_addr: String,
    /// Outbound queue capacity per connection
    pub outbound_capacity: usize,
    /// Persistence storage path (None = in-memory only)
    pub storage_path: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:9090".to_string(),
            outbound_capacity: 256,
            storage_path: None,
        }
    }
}

/// Server statistics.
#[derive(Debug, Clone, Default)]
pub struct ServerStats {
    pub total_connections: u64,
    pub active_connections: u64,
    pub total_messages: u64,
    pub total_bytes: u64,
    pub active_sessions: usize,
}

/// Server errors.
#[derive(Debug)]
pub enum ServerError {
    Io(std::io::Error),
    WebSocket(tokio_tungstenite::tungstenite::Error),
    Store(StoreError),
}

impl std::fmt::Display for ServerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ServerError::Io(e) => write!(f, "i/o error: {e}"),
            ServerError::WebSocket(e) => write!(f, "websocket error: {e}"),
            ServerError::Store(e) => write!(f, "store error: {e}"),
        }
    }
}

impl std::error::Error for ServerError {}

impl From<std::io::Error> for ServerError {
    fn from(e: std::io::Error) -> Self {
        ServerError::Io(e)
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for ServerError {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        ServerError::WebSocket(e)
    }
}

impl From<StoreError> for ServerError {
    fn from(e: StoreError) -> Self {
        ServerError::Store(e)
    }
}

/// The sync server.
pub struct SyncServer {
    config: ServerConfig,
    engine: Arc<SyncEngine>,
    stats: Arc<RwLock<ServerStats>>,
}

impl SyncServer {
    /// Create a server, opening a [`RocksStore`] when a storage path is
    /// configured and an in-memory store otherwise.
    pub fn new(config: ServerConfig) -> Result<Self, ServerError> {
        let store: Arc<dyn PersistentStore> = match &config.storage_path {
            Some(path) => Arc::new(RocksStore::open(StoreConfig {
                path: path.clone(),
                ..StoreConfig::default()
            })?),
            None => Arc::new(MemoryStore::new()),
        };
        Ok(Self::with_store(config, store))
    }

    /// Create a server over an existing store.
    pub fn with_store(config: ServerConfig, store: Arc<dyn PersistentStore>) -> Self {
        Self {
            config,
            engine: Arc::new(SyncEngine::new(store)),
            stats: Arc::new(RwLock::new(ServerStats::default())),
        }
    }

    pub fn bind_addr(&self) -> &str {
        &self.config.bind_addr
    }

    pub fn engine(&self) -> &Arc<SyncEngine> {
        &self.engine
    }

    /// Get server statistics.
    pub async fn stats(&self) -> ServerStats {
        let mut stats = self.stats.read().await.clone();
        stats.active_sessions = self.engine.registry().session_count().await;
        stats
    }

    /// Listen for WebSocket connections. Runs the accept loop forever.
    pub async fn run(&self) -> Result<(), ServerError> {
        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        log::info!("sync server listening on {}", self.config.bind_addr);

        loop {
            let (stream, addr) = listener.accept().await?;
            log::debug!("new tcp connection from {addr}");

            let engine = self.engine.clone();
            let stats = self.stats.clone();
            let capacity = self.config.outbound_capacity;

            tokio::spawn(async move {
                if let Err(e) = Self::handle_connection(stream, addr, engine, stats, capacity).await
                {
                    log::error!("connection error from {addr}: {e}");
                }
            });
        }
    }

    /// Handle one WebSocket connection from accept to disconnect.
    async fn handle_connection(
        stream: TcpStream,
        addr: SocketAddr,
        engine: Arc<SyncEngine>,
        stats: Arc<RwLock<ServerStats>>,
        capacity: usize,
    ) -> Result<(), ServerError> {
        let ws_stream = tokio_tungstenite::accept_async(stream).await?;

        let conn = ConnectionId::new();
        let (out_tx, out_rx) = mpsc::channel::<Arc<String>>(capacity);
        let sink = ClientSink::new(out_tx);

        {
            let mut s = stats.write().await;
            s.total_connections += 1;
            s.active_connections += 1;
        }
        log::info!("websocket connection {conn} established from {addr}");

        let result =
            Self::connection_loop(ws_stream, conn, &sink, out_rx, &engine, &stats).await;

        // Presence retraction runs on every exit path, error or clean.
        engine.handle_disconnect(conn).await;
        {
            let mut s = stats.write().await;
            s.active_connections -= 1;
        }
        log::info!("websocket connection {conn} closed");

        result
    }

    async fn connection_loop(
        ws_stream: WebSocketStream<TcpStream>,
        conn: ConnectionId,
        sink: &ClientSink,
        mut out_rx: mpsc::Receiver<Arc<String>>,
        engine: &Arc<SyncEngine>,
        stats: &Arc<RwLock<ServerStats>>,
    ) -> Result<(), ServerError> {
        let (mut ws_sender, mut ws_receiver) = ws_stream.split();

        loop {
            tokio::select! {
                // Inbound frame from the editor
                msg = ws_receiver.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            {
                                let mut s = stats.write().await;
                                s.total_messages += 1;
                                s.total_bytes += text.len() as u64;
                            }
                            engine.handle_frame(conn, sink, text.as_str()).await;
                        }
                        Some(Ok(Message::Ping(data))) => {
                            ws_sender.send(Message::Pong(data)).await?;
                        }
                        Some(Ok(Message::Close(_))) | None => {
                            return Ok(());
                        }
                        Some(Err(e)) => {
                            log::warn!("websocket error on {conn}: {e}");
                            return Err(e.into());
                        }
                        // Binary and stray pong frames carry nothing for us.
                        _ => {}
                    }
                }

                // Outbound frame queued by the engine
                out = out_rx.recv() => {
                    match out {
                        Some(frame) => {
                            ws_sender.send(Message::Text(frame.as_str().into())).await?;
                        }
                        None => return Ok(()),
                    }
                }
            }
        }
    }
}
