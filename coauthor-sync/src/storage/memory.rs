//! In-memory document store.
//!
//! Backs servers started without a storage path, and keeps engine tests
//! free of disk state.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{PersistentStore, StoreError, StoredDocument};

/// `HashMap`-backed store. Contents live as long as the process.
#[derive(Default)]
pub struct MemoryStore {
    documents: RwLock<HashMap<String, StoredDocument>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn document_count(&self) -> usize {
        self.documents.read().await.len()
    }
}

#[async_trait]
impl PersistentStore for MemoryStore {
    async fn load_document(&self, id: &str) -> Result<Option<StoredDocument>, StoreError> {
        Ok(self.documents.read().await.get(id).cloned())
    }

    async fn save_document_state(
        &self,
        id: &str,
        content: &str,
        version: u64,
    ) -> Result<(), StoreError> {
        let mut documents = self.documents.write().await;
        let doc = documents
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        doc.content = content.to_string();
        doc.version = version;
        Ok(())
    }

    async fn create_document(
        &self,
        id: &str,
        title: &str,
        content: &str,
    ) -> Result<(), StoreError> {
        let mut documents = self.documents.write().await;
        if documents.contains_key(id) {
            return Err(StoreError::AlreadyExists(id.to_string()));
        }
        documents.insert(
            id.to_string(),
            StoredDocument {
                id: id.to_string(),
                title: title.to_string(),
                content: content.to_string(),
                version: 0,
            },
        );
        Ok(())
    }

    async fn list_documents(&self) -> Result<Vec<String>, StoreError> {
        Ok(self.documents.read().await.keys().cloned().collect())
    }

    async fn delete_document(&self, id: &str) -> Result<(), StoreError> {
        let mut documents = self.documents.write().await;
        documents
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }
}
