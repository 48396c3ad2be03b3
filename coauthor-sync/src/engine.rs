//! Protocol logic: JOIN, OPERATION, and disconnect handling.
//!
//! One engine serves every document. Per-document mutual exclusion comes
//! from the session lock: the version check, content mutation, version
//! increment, and broadcast enqueue of an operation all happen inside it,
//! so no other operation or join for the same document can interleave.
//! Persistence runs after the lock is released — it is best-effort and a
//! failure never rolls back the in-memory session.
//!
//! Every failure path (malformed frame, unknown document, no live session,
//! stale version, store failure) drops the message without a response; the
//! drop is visible only in the logs and the stats counters.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::protocol::{ClientMessage, Operation, Presence, ServerMessage};
use crate::registry::{RegistryError, SessionRegistry};
use crate::session::{ClientSink, ConnectionId};
use crate::storage::PersistentStore;

/// Engine counters. Tracked with atomics so the hot path never takes a
/// stats lock.
#[derive(Default)]
pub struct SyncStats {
    joins: AtomicU64,
    operations_applied: AtomicU64,
    operations_rejected: AtomicU64,
    messages_dropped: AtomicU64,
    deliveries_sent: AtomicU64,
    deliveries_dropped: AtomicU64,
}

/// Point-in-time view of [`SyncStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub joins: u64,
    pub operations_applied: u64,
    pub operations_rejected: u64,
    pub messages_dropped: u64,
    pub deliveries_sent: u64,
    pub deliveries_dropped: u64,
}

impl SyncStats {
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            joins: self.joins.load(Ordering::Relaxed),
            operations_applied: self.operations_applied.load(Ordering::Relaxed),
            operations_rejected: self.operations_rejected.load(Ordering::Relaxed),
            messages_dropped: self.messages_dropped.load(Ordering::Relaxed),
            deliveries_sent: self.deliveries_sent.load(Ordering::Relaxed),
            deliveries_dropped: self.deliveries_dropped.load(Ordering::Relaxed),
        }
    }
}

/// The synchronization engine.
pub struct SyncEngine {
    registry: SessionRegistry,
    store: Arc<dyn PersistentStore>,
    stats: SyncStats,
}

impl SyncEngine {
    pub fn new(store: Arc<dyn PersistentStore>) -> Self {
        Self {
            registry: SessionRegistry::new(store.clone()),
            store,
            stats: SyncStats::default(),
        }
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Decode and dispatch one inbound frame from a connection.
    pub async fn handle_frame(&self, conn: ConnectionId, sink: &ClientSink, raw: &str) {
        match ClientMessage::decode(raw) {
            Ok(ClientMessage::Join {
                document_id,
                user_id,
                username,
            }) => {
                self.handle_join(conn, sink, &document_id, Presence::new(user_id, username))
                    .await;
            }
            Ok(ClientMessage::Operation {
                document_id,
                user_id,
                operation,
                client_version,
            }) => {
                self.handle_operation(conn, &document_id, &user_id, &operation, client_version)
                    .await;
            }
            Err(e) => {
                self.drop_message();
                log::warn!("dropping malformed frame from {conn}: {e}");
            }
        }
    }

    /// Attach a connection to a document session and announce it.
    ///
    /// The joiner's `INIT` and the other members' `USER_JOINED` are both
    /// derived from one snapshot taken with the joiner already attached,
    /// so the joiner appears in its own `users` list.
    pub async fn handle_join(
        &self,
        conn: ConnectionId,
        sink: &ClientSink,
        document_id: &str,
        presence: Presence,
    ) {
        let session = match self.registry.get_or_create(document_id).await {
            Ok(session) => session,
            Err(RegistryError::UnknownDocument(_)) => {
                self.drop_message();
                log::debug!("join for unknown document {document_id} dropped");
                return;
            }
            Err(RegistryError::Store(e)) => {
                self.drop_message();
                log::error!("loading document {document_id} failed: {e}");
                return;
            }
        };

        let mut session = session.lock().await;
        session.attach(conn, presence.clone(), sink.clone());

        let init = ServerMessage::Init {
            content: session.content().to_string(),
            version: session.version(),
            users: session.presences(),
        };
        self.deliver_one(sink, &init);

        let joined = ServerMessage::UserJoined {
            user_id: presence.user_id.clone(),
            username: presence.username.clone(),
        };
        self.deliver_many(session.sinks_except(conn), &joined);

        self.stats.joins.fetch_add(1, Ordering::Relaxed);
        log::info!(
            "{} ({}) joined document {document_id} at version {}",
            presence.username,
            presence.user_id,
            session.version()
        );
    }

    /// Version-gate, apply, broadcast, and persist one edit.
    pub async fn handle_operation(
        &self,
        conn: ConnectionId,
        document_id: &str,
        user_id: &str,
        operation: &Operation,
        client_version: u64,
    ) {
        let Some(session) = self.registry.get(document_id).await else {
            self.drop_message();
            log::debug!("operation for document {document_id} with no live session dropped");
            return;
        };

        // Check-and-apply is atomic under the session lock, and the
        // broadcast is enqueued before the lock drops so receivers see
        // version increments in order.
        let (content, version) = {
            let mut session = session.lock().await;
            if client_version != session.version() {
                self.stats.operations_rejected.fetch_add(1, Ordering::Relaxed);
                log::debug!(
                    "stale operation for document {document_id} dropped \
                     (client at {client_version}, session at {})",
                    session.version()
                );
                return;
            }

            let server_version = session.apply(operation);
            let broadcast = ServerMessage::Operation {
                user_id: user_id.to_string(),
                operation: operation.clone(),
                server_version,
            };
            self.deliver_many(session.sinks_except(conn), &broadcast);
            self.stats.operations_applied.fetch_add(1, Ordering::Relaxed);

            (session.content().to_string(), server_version)
        };

        // Best-effort persistence; the session has already advanced.
        if let Err(e) = self
            .store
            .save_document_state(document_id, &content, version)
            .await
        {
            log::error!("persisting document {document_id} at version {version} failed: {e}");
        }
    }

    /// Drop a closed connection from every session it belongs to,
    /// announcing the departure to the remaining members.
    pub async fn handle_disconnect(&self, conn: ConnectionId) {
        for departure in self.registry.remove_connection(conn).await {
            let left = ServerMessage::UserLeft {
                user_id: departure.presence.user_id.clone(),
                username: departure.presence.username.clone(),
            };
            self.deliver_many(departure.remaining, &left);
            log::info!(
                "{} ({}) left document {}",
                departure.presence.username,
                departure.presence.user_id,
                departure.document_id
            );
        }
    }

    fn drop_message(&self) {
        self.stats.messages_dropped.fetch_add(1, Ordering::Relaxed);
    }

    fn deliver_one(&self, sink: &ClientSink, msg: &ServerMessage) {
        if let Some(frame) = self.encode(msg) {
            self.deliver_frame(sink, &frame);
        }
    }

    /// Encode once, enqueue to every sink.
    fn deliver_many(&self, sinks: Vec<ClientSink>, msg: &ServerMessage) {
        if sinks.is_empty() {
            return;
        }
        if let Some(frame) = self.encode(msg) {
            for sink in &sinks {
                self.deliver_frame(sink, &frame);
            }
        }
    }

    fn deliver_frame(&self, sink: &ClientSink, frame: &Arc<String>) {
        if sink.deliver(frame) {
            self.stats.deliveries_sent.fetch_add(1, Ordering::Relaxed);
        } else {
            self.stats.deliveries_dropped.fetch_add(1, Ordering::Relaxed);
            log::warn!("outbound delivery skipped (connection closed or backpressured)");
        }
    }

    fn encode(&self, msg: &ServerMessage) -> Option<Arc<String>> {
        match msg.encode() {
            Ok(frame) => Some(Arc::new(frame)),
            Err(e) => {
                log::error!("failed to encode outbound message: {e}");
                None
            }
        }
    }
}
