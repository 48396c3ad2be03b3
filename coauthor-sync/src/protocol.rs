//! JSON wire protocol between editors and the sync server.
//!
//! Inbound (editor → server):
//! ```text
//! {"type":"JOIN","documentId":"d1","userId":"u1","username":"Alice"}
//! {"type":"OPERATION","documentId":"d1","userId":"u1",
//!  "operation":{"type":"insert","position":5,"text":" world"},"clientVersion":0}
//! ```
//!
//! Outbound (server → editor): `INIT` to the joiner, `USER_JOINED`,
//! `OPERATION` (with `serverVersion`), `USER_LEFT` to the rest of the
//! session. Field names are camelCase on the wire.

use serde::{Deserialize, Serialize};

/// A user's identity while attached to a document session.
///
/// Identities are accepted as supplied by the editor; two connections may
/// carry the same `user_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Presence {
    pub user_id: String,
    pub username: String,
}

impl Presence {
    pub fn new(user_id: impl Into<String>, username: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            username: username.into(),
        }
    }
}

/// An atomic edit to document content.
///
/// `position` and `length` are character offsets/counts, not bytes.
/// Out-of-range values clamp to the end of the content when applied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Operation {
    Insert { position: usize, text: String },
    Delete { position: usize, length: usize },
}

/// Messages an editor sends to the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientMessage {
    #[serde(rename = "JOIN", rename_all = "camelCase")]
    Join {
        document_id: String,
        user_id: String,
        username: String,
    },
    #[serde(rename = "OPERATION", rename_all = "camelCase")]
    Operation {
        document_id: String,
        user_id: String,
        operation: Operation,
        client_version: u64,
    },
}

/// Messages the server sends to editors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerMessage {
    /// Sent once to a joining editor: the session snapshot taken after the
    /// joiner was attached, so `users` includes the joiner itself.
    #[serde(rename = "INIT")]
    Init {
        content: String,
        version: u64,
        users: Vec<Presence>,
    },
    #[serde(rename = "USER_JOINED", rename_all = "camelCase")]
    UserJoined { user_id: String, username: String },
    /// An accepted edit, fanned out to every session member except its
    /// sender. `server_version` is the session version after application.
    #[serde(rename = "OPERATION", rename_all = "camelCase")]
    Operation {
        user_id: String,
        operation: Operation,
        server_version: u64,
    },
    #[serde(rename = "USER_LEFT", rename_all = "camelCase")]
    UserLeft { user_id: String, username: String },
}

impl ClientMessage {
    /// Parse an inbound frame.
    pub fn decode(raw: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(raw).map_err(|e| ProtocolError::Malformed(e.to_string()))
    }

    /// Serialize to wire JSON.
    pub fn encode(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(|e| ProtocolError::Serialization(e.to_string()))
    }
}

impl ServerMessage {
    /// Parse a server frame (client side).
    pub fn decode(raw: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(raw).map_err(|e| ProtocolError::Malformed(e.to_string()))
    }

    /// Serialize to wire JSON.
    pub fn encode(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(|e| ProtocolError::Serialization(e.to_string()))
    }
}

/// Protocol errors.
#[derive(Debug, Clone)]
pub enum ProtocolError {
    /// Inbound payload was not a valid protocol message.
    Malformed(String),
    /// Outbound message could not be serialized.
    Serialization(String),
    /// Connecting to the server failed.
    Connection(String),
    /// The connection is gone.
    ConnectionClosed,
}

impl std::fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Malformed(e) => write!(f, "malformed message: {e}"),
            Self::Serialization(e) => write!(f, "serialization error: {e}"),
            Self::Connection(e) => write!(f, "connection error: {e}"),
            Self::ConnectionClosed => write!(f, "connection closed"),
        }
    }
}

impl std::error::Error for ProtocolError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_join() {
        let raw = r#"{"type":"JOIN","documentId":"d1","userId":"u1","username":"Alice"}"#;
        let msg = ClientMessage::decode(raw).unwrap();
        assert_eq!(
            msg,
            ClientMessage::Join {
                document_id: "d1".into(),
                user_id: "u1".into(),
                username: "Alice".into(),
            }
        );
    }

    #[test]
    fn test_decode_insert_operation() {
        let raw = r#"{"type":"OPERATION","documentId":"d1","userId":"u1",
                      "operation":{"type":"insert","position":5,"text":" world"},
                      "clientVersion":0}"#;
        let msg = ClientMessage::decode(raw).unwrap();
        match msg {
            ClientMessage::Operation {
                operation: Operation::Insert { position, text },
                client_version,
                ..
            } => {
                assert_eq!(position, 5);
                assert_eq!(text, " world");
                assert_eq!(client_version, 0);
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn test_decode_delete_operation() {
        let raw = r#"{"type":"OPERATION","documentId":"d1","userId":"u1",
                      "operation":{"type":"delete","position":2,"length":3},
                      "clientVersion":7}"#;
        let msg = ClientMessage::decode(raw).unwrap();
        match msg {
            ClientMessage::Operation {
                operation: Operation::Delete { position, length },
                client_version,
                ..
            } => {
                assert_eq!(position, 2);
                assert_eq!(length, 3);
                assert_eq!(client_version, 7);
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(ClientMessage::decode("not json").is_err());
        assert!(ClientMessage::decode(r#"{"type":"NOPE"}"#).is_err());
        assert!(ClientMessage::decode(r#"{"type":"JOIN"}"#).is_err());
    }

    #[test]
    fn test_init_wire_shape() {
        let msg = ServerMessage::Init {
            content: "hello".into(),
            version: 3,
            users: vec![Presence::new("u1", "Alice")],
        };
        let value: serde_json::Value = serde_json::from_str(&msg.encode().unwrap()).unwrap();
        assert_eq!(value["type"], "INIT");
        assert_eq!(value["content"], "hello");
        assert_eq!(value["version"], 3);
        assert_eq!(value["users"][0]["userId"], "u1");
        assert_eq!(value["users"][0]["username"], "Alice");
    }

    #[test]
    fn test_operation_broadcast_wire_shape() {
        let msg = ServerMessage::Operation {
            user_id: "u1".into(),
            operation: Operation::Insert {
                position: 0,
                text: "x".into(),
            },
            server_version: 4,
        };
        let value: serde_json::Value = serde_json::from_str(&msg.encode().unwrap()).unwrap();
        assert_eq!(value["type"], "OPERATION");
        assert_eq!(value["userId"], "u1");
        assert_eq!(value["serverVersion"], 4);
        assert_eq!(value["operation"]["type"], "insert");
        assert_eq!(value["operation"]["position"], 0);
    }

    #[test]
    fn test_presence_wire_shape() {
        let msg = ServerMessage::UserJoined {
            user_id: "u2".into(),
            username: "Bob".into(),
        };
        let value: serde_json::Value = serde_json::from_str(&msg.encode().unwrap()).unwrap();
        assert_eq!(value["type"], "USER_JOINED");
        assert_eq!(value["userId"], "u2");

        let msg = ServerMessage::UserLeft {
            user_id: "u2".into(),
            username: "Bob".into(),
        };
        let value: serde_json::Value = serde_json::from_str(&msg.encode().unwrap()).unwrap();
        assert_eq!(value["type"], "USER_LEFT");
        assert_eq!(value["username"], "Bob");
    }

    #[test]
    fn test_client_message_roundtrip() {
        let msg = ClientMessage::Operation {
            document_id: "d1".into(),
            user_id: "u1".into(),
            operation: Operation::Delete {
                position: 1,
                length: 2,
            },
            client_version: 9,
        };
        let decoded = ClientMessage::decode(&msg.encode().unwrap()).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn test_server_message_roundtrip() {
        let msg = ServerMessage::Init {
            content: "héllo ✎".into(),
            version: 1,
            users: vec![Presence::new("u1", "Alice"), Presence::new("u2", "Bob")],
        };
        let decoded = ServerMessage::decode(&msg.encode().unwrap()).unwrap();
        assert_eq!(decoded, msg);
    }
}
