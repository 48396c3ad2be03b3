//! # coauthor-sync — live synchronization for shared text documents
//!
//! Keeps every remote editor of a document consistent by serializing edits
//! through a single authoritative in-memory copy, versioning each accepted
//! edit, and fanning accepted edits out to every other connected editor.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     WebSocket      ┌─────────────┐
//! │ SyncClient  │ ◄─────────────────► │ SyncServer  │
//! │ (per editor)│     JSON frames     │             │
//! └─────────────┘                     └──────┬──────┘
//!                                            │
//!                                     ┌──────┴──────┐
//!                                     │ SyncEngine  │
//!                                     │ join / op / │
//!                                     │ disconnect  │
//!                                     └──────┬──────┘
//!                                            │
//!                              ┌─────────────┼─────────────┐
//!                              ▼             ▼             ▼
//!                       ┌───────────┐ ┌────────────┐ ┌───────────┐
//!                       │  Session  │ │ Session    │ │ Persistent│
//!                       │ Registry  │ │ (per doc)  │ │ Store     │
//!                       └───────────┘ └────────────┘ └───────────┘
//! ```
//!
//! Concurrency is optimistic and strict: an operation carries the version
//! its sender was at, and is accepted only if that matches the session's
//! current version. Stale operations are dropped, not rebased — the client
//! catches up from the next broadcast or by re-joining.
//!
//! ## Modules
//!
//! - [`protocol`] — JSON wire protocol (JOIN/OPERATION in, INIT/USER_JOINED/
//!   OPERATION/USER_LEFT out)
//! - [`session`] — per-document authoritative state and operation application
//! - [`registry`] — documentId → live session mapping
//! - [`engine`] — the synchronization protocol itself
//! - [`server`] / [`client`] — WebSocket transport on both ends
//! - [`storage`] — durable document store (in-memory or RocksDB)

pub mod client;
pub mod engine;
pub mod protocol;
pub mod registry;
pub mod server;
pub mod session;
pub mod storage;

// Re-exports for convenience
pub use client::{ConnectionState, SyncClient, SyncEvent};
pub use engine::{StatsSnapshot, SyncEngine, SyncStats};
pub use protocol::{ClientMessage, Operation, Presence, ProtocolError, ServerMessage};
pub use registry::{Departure, RegistryError, SessionRegistry};
pub use server::{ServerConfig, ServerError, ServerStats, SyncServer};
pub use session::{apply_operation, ClientHandle, ClientSink, ConnectionId, Session};
pub use storage::{
    MemoryStore, PersistentStore, RocksStore, StoreConfig, StoreError, StoredDocument,
};
