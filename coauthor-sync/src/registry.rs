//! Live session registry: at most one authoritative [`Session`] per
//! document.
//!
//! Sessions are created lazily on the first join (loading the document
//! from the store) and looked up on every subsequent message. A session
//! outlives its last client — there is no eviction — so a later joiner
//! reuses the live in-memory copy instead of re-reading the store.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, RwLock};

use crate::protocol::Presence;
use crate::session::{ClientSink, ConnectionId, Session};
use crate::storage::{PersistentStore, StoreError};

/// Session resolution errors.
#[derive(Debug)]
pub enum RegistryError {
    /// No document with this id exists in the store; nothing was registered.
    UnknownDocument(String),
    /// The store failed while loading the document.
    Store(StoreError),
}

impl std::fmt::Display for RegistryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RegistryError::UnknownDocument(id) => write!(f, "unknown document: {id}"),
            RegistryError::Store(e) => write!(f, "store error: {e}"),
        }
    }
}

impl std::error::Error for RegistryError {}

impl From<StoreError> for RegistryError {
    fn from(e: StoreError) -> Self {
        RegistryError::Store(e)
    }
}

/// A connection's departure from one session, captured under that
/// session's lock so `remaining` is a consistent member snapshot.
pub struct Departure {
    pub document_id: String,
    pub presence: Presence,
    pub remaining: Vec<ClientSink>,
}

/// Maps document ids to live sessions.
pub struct SessionRegistry {
    sessions: RwLock<HashMap<String, Arc<Mutex<Session>>>>,
    store: Arc<dyn PersistentStore>,
}

impl SessionRegistry {
    pub fn new(store: Arc<dyn PersistentStore>) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            store,
        }
    }

    /// Resolve the live session for a document, creating it from the store
    /// on first use.
    ///
    /// Creation is atomic per document id: the load runs under the registry
    /// write lock after a double-check, so concurrent joins can neither
    /// produce two sessions nor load the document twice.
    pub async fn get_or_create(
        &self,
        document_id: &str,
    ) -> Result<Arc<Mutex<Session>>, RegistryError> {
        // Fast path: read lock
        {
            let sessions = self.sessions.read().await;
            if let Some(session) = sessions.get(document_id) {
                return Ok(session.clone());
            }
        }

        // Slow path: write lock to create
        let mut sessions = self.sessions.write().await;
        if let Some(session) = sessions.get(document_id) {
            return Ok(session.clone());
        }

        let record = self
            .store
            .load_document(document_id)
            .await?
            .ok_or_else(|| RegistryError::UnknownDocument(document_id.to_string()))?;

        log::info!(
            "session created for document {document_id} at version {}",
            record.version
        );
        let session = Arc::new(Mutex::new(Session::new(record.content, record.version)));
        sessions.insert(document_id.to_string(), session.clone());
        Ok(session)
    }

    /// Look up the live session for a document, if any.
    pub async fn get(&self, document_id: &str) -> Option<Arc<Mutex<Session>>> {
        self.sessions.read().await.get(document_id).cloned()
    }

    /// Remove a connection from every session that contains it.
    ///
    /// Normally a connection belongs to at most one session, but the sweep
    /// covers all of them so stray memberships are cleaned up too.
    pub async fn remove_connection(&self, conn: ConnectionId) -> Vec<Departure> {
        let sessions: Vec<(String, Arc<Mutex<Session>>)> = {
            let sessions = self.sessions.read().await;
            sessions
                .iter()
                .map(|(id, session)| (id.clone(), session.clone()))
                .collect()
        };

        let mut departures = Vec::new();
        for (document_id, session) in sessions {
            let mut session = session.lock().await;
            if let Some(handle) = session.detach(conn) {
                departures.push(Departure {
                    document_id,
                    presence: handle.presence,
                    remaining: session.sinks(),
                });
            }
        }
        departures
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn active_documents(&self) -> Vec<String> {
        self.sessions.read().await.keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;
    use tokio::sync::mpsc;

    async fn registry_with_doc() -> SessionRegistry {
        let store = Arc::new(MemoryStore::new());
        store.create_document("d1", "Doc", "hello").await.unwrap();
        SessionRegistry::new(store)
    }

    fn sink() -> (ClientSink, mpsc::Receiver<Arc<String>>) {
        let (tx, rx) = mpsc::channel(8);
        (ClientSink::new(tx), rx)
    }

    #[tokio::test]
    async fn test_get_or_create_loads_from_store() {
        let registry = registry_with_doc().await;
        let session = registry.get_or_create("d1").await.unwrap();
        let session = session.lock().await;
        assert_eq!(session.content(), "hello");
        assert_eq!(session.version(), 0);
    }

    #[tokio::test]
    async fn test_get_or_create_unknown_document() {
        let registry = registry_with_doc().await;
        assert!(matches!(
            registry.get_or_create("ghost").await,
            Err(RegistryError::UnknownDocument(_))
        ));
        // Nothing registered on failure.
        assert_eq!(registry.session_count().await, 0);
        assert!(registry.get("ghost").await.is_none());
    }

    #[tokio::test]
    async fn test_get_or_create_returns_same_session() {
        let registry = registry_with_doc().await;
        let a = registry.get_or_create("d1").await.unwrap();
        let b = registry.get_or_create("d1").await.unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(registry.session_count().await, 1);
    }

    #[tokio::test]
    async fn test_concurrent_get_or_create_single_session() {
        let registry = Arc::new(registry_with_doc().await);

        let mut handles = Vec::new();
        for _ in 0..16 {
            let registry = registry.clone();
            handles.push(tokio::spawn(async move {
                registry.get_or_create("d1").await.unwrap()
            }));
        }

        let mut sessions = Vec::new();
        for handle in handles {
            sessions.push(handle.await.unwrap());
        }
        for session in &sessions[1..] {
            assert!(Arc::ptr_eq(&sessions[0], session));
        }
        assert_eq!(registry.session_count().await, 1);
    }

    #[tokio::test]
    async fn test_remove_connection_reports_departure() {
        let registry = registry_with_doc().await;
        let session = registry.get_or_create("d1").await.unwrap();

        let conn_a = ConnectionId::new();
        let conn_b = ConnectionId::new();
        let (sink_a, _rx_a) = sink();
        let (sink_b, _rx_b) = sink();
        {
            let mut session = session.lock().await;
            session.attach(conn_a, Presence::new("u1", "Alice"), sink_a);
            session.attach(conn_b, Presence::new("u2", "Bob"), sink_b);
        }

        let departures = registry.remove_connection(conn_b).await;
        assert_eq!(departures.len(), 1);
        assert_eq!(departures[0].document_id, "d1");
        assert_eq!(departures[0].presence, Presence::new("u2", "Bob"));
        assert_eq!(departures[0].remaining.len(), 1);

        // The session stays registered even when it empties out.
        let departures = registry.remove_connection(conn_a).await;
        assert_eq!(departures[0].remaining.len(), 0);
        assert_eq!(registry.session_count().await, 1);
    }

    #[tokio::test]
    async fn test_remove_connection_not_a_member() {
        let registry = registry_with_doc().await;
        registry.get_or_create("d1").await.unwrap();
        assert!(registry.remove_connection(ConnectionId::new()).await.is_empty());
    }

    #[tokio::test]
    async fn test_remove_connection_spans_sessions() {
        let store = Arc::new(MemoryStore::new());
        store.create_document("d1", "A", "").await.unwrap();
        store.create_document("d2", "B", "").await.unwrap();
        let registry = SessionRegistry::new(store);

        let conn = ConnectionId::new();
        for id in ["d1", "d2"] {
            let session = registry.get_or_create(id).await.unwrap();
            let (s, _r) = sink();
            session
                .lock()
                .await
                .attach(conn, Presence::new("u1", "Alice"), s);
        }

        let mut docs: Vec<String> = registry
            .remove_connection(conn)
            .await
            .into_iter()
            .map(|d| d.document_id)
            .collect();
        docs.sort();
        assert_eq!(docs, vec!["d1", "d2"]);
    }

    #[tokio::test]
    async fn test_active_documents() {
        let registry = registry_with_doc().await;
        assert!(registry.active_documents().await.is_empty());
        registry.get_or_create("d1").await.unwrap();
        assert_eq!(registry.active_documents().await, vec!["d1"]);
    }
}
