//! Per-document session state: the authoritative content/version pair and
//! the set of connected editors.
//!
//! A `Session` is mutated only while its owner (the engine) holds its lock,
//! so the version check, content mutation, and version increment of one
//! operation are never interleaved with another operation or join for the
//! same document.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use tokio::sync::mpsc;
use uuid::Uuid;

use crate::protocol::{Operation, Presence};

/// Opaque handle identifying one transport connection.
///
/// Connection handles are the keys of a session's client table; user
/// identity is deliberately not part of the key, so the same user may be
/// attached through several connections at once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Outbound delivery handle for one connection.
///
/// Wraps the connection's outbound queue. Delivery is best-effort: a closed
/// or backpressured connection drops the message and the send never blocks,
/// so fan-out can run inside a session's critical section.
#[derive(Clone)]
pub struct ClientSink {
    tx: mpsc::Sender<Arc<String>>,
}

impl ClientSink {
    pub fn new(tx: mpsc::Sender<Arc<String>>) -> Self {
        Self { tx }
    }

    /// Enqueue a pre-encoded frame. Returns `false` if the connection is
    /// closed or its queue is full; such skips are not retried.
    pub fn deliver(&self, frame: &Arc<String>) -> bool {
        self.tx.try_send(frame.clone()).is_ok()
    }

    /// Whether the receiving side of the connection still exists.
    pub fn is_open(&self) -> bool {
        !self.tx.is_closed()
    }
}

/// A connected editor: identity plus its delivery handle.
#[derive(Clone)]
pub struct ClientHandle {
    pub presence: Presence,
    pub sink: ClientSink,
}

/// Authoritative in-memory state for one document.
pub struct Session {
    content: String,
    version: u64,
    clients: HashMap<ConnectionId, ClientHandle>,
}

impl Session {
    /// Create a session from the durable state of a document.
    pub fn new(content: String, version: u64) -> Self {
        Self {
            content,
            version,
            clients: HashMap::new(),
        }
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    pub fn contains(&self, conn: ConnectionId) -> bool {
        self.clients.contains_key(&conn)
    }

    /// Register a connection's presence, overwriting any prior entry for
    /// the same handle. No deduplication by user id.
    pub fn attach(&mut self, conn: ConnectionId, presence: Presence, sink: ClientSink) {
        self.clients.insert(conn, ClientHandle { presence, sink });
    }

    /// Remove a connection, returning its handle if it was a member.
    pub fn detach(&mut self, conn: ConnectionId) -> Option<ClientHandle> {
        self.clients.remove(&conn)
    }

    /// Presence list for every connected editor.
    pub fn presences(&self) -> Vec<Presence> {
        self.clients.values().map(|c| c.presence.clone()).collect()
    }

    /// Delivery handles for every member.
    pub fn sinks(&self) -> Vec<ClientSink> {
        self.clients.values().map(|c| c.sink.clone()).collect()
    }

    /// Delivery handles for every member except `skip` (the sender of an
    /// operation never receives its own echo).
    pub fn sinks_except(&self, skip: ConnectionId) -> Vec<ClientSink> {
        self.clients
            .iter()
            .filter(|(conn, _)| **conn != skip)
            .map(|(_, c)| c.sink.clone())
            .collect()
    }

    /// Apply an accepted operation and advance the version by exactly one.
    /// Returns the new version.
    pub fn apply(&mut self, op: &Operation) -> u64 {
        apply_operation(&mut self.content, op);
        self.version += 1;
        self.version
    }
}

/// Apply an operation to `content` in place.
///
/// Offsets are character offsets. Out-of-range positions clamp to the end
/// of the content and delete ranges truncate there, so application never
/// panics and never splits a UTF-8 scalar value.
pub fn apply_operation(content: &mut String, op: &Operation) {
    match op {
        Operation::Insert { position, text } => {
            let at = byte_offset(content, *position);
            content.insert_str(at, text);
        }
        Operation::Delete { position, length } => {
            let start = byte_offset(content, *position);
            let end = byte_offset(content, position.saturating_add(*length));
            content.replace_range(start..end, "");
        }
    }
}

/// Byte index of the `ch`-th character, clamped to the content length.
fn byte_offset(s: &str, ch: usize) -> usize {
    s.char_indices().nth(ch).map_or(s.len(), |(i, _)| i)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sink() -> (ClientSink, mpsc::Receiver<Arc<String>>) {
        let (tx, rx) = mpsc::channel(8);
        (ClientSink::new(tx), rx)
    }

    #[test]
    fn test_insert_middle() {
        let mut content = String::from("hello");
        apply_operation(
            &mut content,
            &Operation::Insert {
                position: 5,
                text: " world".into(),
            },
        );
        assert_eq!(content, "hello world");
    }

    #[test]
    fn test_insert_start_and_past_end() {
        let mut content = String::from("bc");
        apply_operation(
            &mut content,
            &Operation::Insert {
                position: 0,
                text: "a".into(),
            },
        );
        assert_eq!(content, "abc");

        // Past-end positions clamp to an append.
        apply_operation(
            &mut content,
            &Operation::Insert {
                position: 99,
                text: "d".into(),
            },
        );
        assert_eq!(content, "abcd");
    }

    #[test]
    fn test_delete_middle() {
        let mut content = String::from("hello world");
        apply_operation(
            &mut content,
            &Operation::Delete {
                position: 5,
                length: 6,
            },
        );
        assert_eq!(content, "hello");
    }

    #[test]
    fn test_delete_clamps_at_end() {
        let mut content = String::from("hello");
        apply_operation(
            &mut content,
            &Operation::Delete {
                position: 3,
                length: 100,
            },
        );
        assert_eq!(content, "hel");

        apply_operation(
            &mut content,
            &Operation::Delete {
                position: 50,
                length: 1,
            },
        );
        assert_eq!(content, "hel");
    }

    #[test]
    fn test_offsets_are_characters_not_bytes() {
        // 'é' and '✎' are multi-byte; offsets still count characters.
        let mut content = String::from("héllo");
        apply_operation(
            &mut content,
            &Operation::Insert {
                position: 2,
                text: "✎".into(),
            },
        );
        assert_eq!(content, "hé✎llo");

        apply_operation(
            &mut content,
            &Operation::Delete {
                position: 1,
                length: 2,
            },
        );
        assert_eq!(content, "hllo");
    }

    #[test]
    fn test_delete_overflow_length_saturates() {
        let mut content = String::from("abc");
        apply_operation(
            &mut content,
            &Operation::Delete {
                position: 1,
                length: usize::MAX,
            },
        );
        assert_eq!(content, "a");
    }

    #[test]
    fn test_apply_increments_version_by_one() {
        let mut session = Session::new("hello".into(), 0);
        let v = session.apply(&Operation::Insert {
            position: 5,
            text: " world".into(),
        });
        assert_eq!(v, 1);
        assert_eq!(session.version(), 1);
        assert_eq!(session.content(), "hello world");

        let v = session.apply(&Operation::Delete {
            position: 0,
            length: 6,
        });
        assert_eq!(v, 2);
        assert_eq!(session.content(), "world");
    }

    #[test]
    fn test_attach_overwrites_same_connection() {
        let mut session = Session::new(String::new(), 0);
        let conn = ConnectionId::new();
        let (s1, _r1) = sink();
        let (s2, _r2) = sink();

        session.attach(conn, Presence::new("u1", "Alice"), s1);
        session.attach(conn, Presence::new("u1", "Alice (renamed)"), s2);

        assert_eq!(session.client_count(), 1);
        assert_eq!(session.presences()[0].username, "Alice (renamed)");
    }

    #[test]
    fn test_no_dedup_by_user_id() {
        let mut session = Session::new(String::new(), 0);
        let (s1, _r1) = sink();
        let (s2, _r2) = sink();

        session.attach(ConnectionId::new(), Presence::new("u1", "Alice"), s1);
        session.attach(ConnectionId::new(), Presence::new("u1", "Alice"), s2);

        assert_eq!(session.client_count(), 2);
    }

    #[test]
    fn test_detach_returns_presence() {
        let mut session = Session::new(String::new(), 0);
        let conn = ConnectionId::new();
        let (s, _r) = sink();
        session.attach(conn, Presence::new("u1", "Alice"), s);
        assert!(session.contains(conn));

        let handle = session.detach(conn).unwrap();
        assert_eq!(handle.presence, Presence::new("u1", "Alice"));
        assert!(!session.contains(conn));
        assert!(session.detach(conn).is_none());
        assert_eq!(session.client_count(), 0);
    }

    #[test]
    fn test_sinks_except_skips_sender() {
        let mut session = Session::new(String::new(), 0);
        let sender = ConnectionId::new();
        let (s1, _r1) = sink();
        let (s2, _r2) = sink();
        let (s3, _r3) = sink();

        session.attach(sender, Presence::new("u1", "Alice"), s1);
        session.attach(ConnectionId::new(), Presence::new("u2", "Bob"), s2);
        session.attach(ConnectionId::new(), Presence::new("u3", "Carol"), s3);

        assert_eq!(session.sinks_except(sender).len(), 2);
        assert_eq!(session.sinks().len(), 3);
    }

    #[test]
    fn test_sink_delivery_best_effort() {
        let (tx, rx) = mpsc::channel(1);
        let sink = ClientSink::new(tx);
        let frame = Arc::new(String::from("{}"));

        assert!(sink.deliver(&frame));
        // Queue full: dropped, not blocked.
        assert!(!sink.deliver(&frame));

        drop(rx);
        assert!(!sink.is_open());
        assert!(!sink.deliver(&frame));
    }
}
