//! Durable document storage behind the sync engine.
//!
//! The engine touches the store in exactly two places: loading a document
//! when its first editor joins, and saving `{content, version}` after each
//! accepted operation. Document CRUD (`create`/`list`/`delete`) exists for
//! the surrounding management layer and is never called from the sync path.
//!
//! Two implementations:
//! - [`MemoryStore`] — `HashMap` behind a lock; tests and storage-less
//!   deployments.
//! - [`RocksStore`] — RocksDB column families with LZ4-compressed content.

pub mod memory;
pub mod rocks;

pub use memory::MemoryStore;
pub use rocks::{RocksStore, StoreConfig};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Durable record for one document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredDocument {
    pub id: String,
    pub title: String,
    pub content: String,
    /// Count of operations accepted over the document's lifetime.
    pub version: u64,
}

/// Storage errors.
#[derive(Debug, Clone)]
pub enum StoreError {
    /// Backend failure (RocksDB, I/O).
    Database(String),
    /// No document with this id.
    NotFound(String),
    /// A document with this id already exists.
    AlreadyExists(String),
    /// Encoding or decoding a stored record failed.
    Serialization(String),
    /// Compressed content could not be decompressed.
    Compression(String),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::Database(e) => write!(f, "database error: {e}"),
            StoreError::NotFound(id) => write!(f, "document not found: {id}"),
            StoreError::AlreadyExists(id) => write!(f, "document already exists: {id}"),
            StoreError::Serialization(e) => write!(f, "serialization error: {e}"),
            StoreError::Compression(e) => write!(f, "compression error: {e}"),
        }
    }
}

impl std::error::Error for StoreError {}

impl From<rocksdb::Error> for StoreError {
    fn from(e: rocksdb::Error) -> Self {
        StoreError::Database(e.to_string())
    }
}

/// Durable storage consumed by the sync core.
#[async_trait]
pub trait PersistentStore: Send + Sync {
    /// Load a document's durable state. `Ok(None)` means no such document.
    async fn load_document(&self, id: &str) -> Result<Option<StoredDocument>, StoreError>;

    /// Persist the current content and version of a document. Fails with
    /// [`StoreError::NotFound`] if the document record no longer exists.
    async fn save_document_state(
        &self,
        id: &str,
        content: &str,
        version: u64,
    ) -> Result<(), StoreError>;

    /// Create a document at version 0.
    async fn create_document(
        &self,
        id: &str,
        title: &str,
        content: &str,
    ) -> Result<(), StoreError>;

    /// Ids of all stored documents.
    async fn list_documents(&self) -> Result<Vec<String>, StoreError>;

    /// Delete a document record.
    async fn delete_document(&self, id: &str) -> Result<(), StoreError>;
}
