//! RocksDB-backed document store.
//!
//! Column families:
//! - `documents` — full document content, LZ4 compressed
//! - `metadata`  — per-document record (title, version, sizes, timestamps),
//!   bincode encoded
//!
//! Content and metadata are written in one `WriteBatch`, so a reader never
//! observes a version without its matching content.

use std::path::PathBuf;
use std::time::SystemTime;

use async_trait::async_trait;
use rocksdb::{
    BlockBasedOptions, Cache, ColumnFamilyDescriptor, DBCompressionType, DBWithThreadMode,
    IteratorMode, Options, SingleThreaded, WriteBatch, WriteOptions,
};
use serde::{Deserialize, Serialize};

use super::{PersistentStore, StoreError, StoredDocument};

const CF_DOCUMENTS: &str = "documents";
const CF_METADATA: &str = "metadata";

const COLUMN_FAMILIES: &[&str] = &[CF_DOCUMENTS, CF_METADATA];

/// Store configuration.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Database directory path
    pub path: PathBuf,
    /// Block cache size in bytes (default: 64MB)
    pub block_cache_size: usize,
    /// Bloom filter bits per key (default: 10)
    pub bloom_filter_bits: i32,
    /// Enable fsync on every write (default: false)
    pub sync_writes: bool,
    /// Max open files for RocksDB (default: 512)
    pub max_open_files: i32,
    /// Write buffer size per column family (default: 16MB)
    pub write_buffer_size: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("coauthor_data"),
            block_cache_size: 64 * 1024 * 1024,
            bloom_filter_bits: 10,
            sync_writes: false,
            max_open_files: 512,
            write_buffer_size: 16 * 1024 * 1024,
        }
    }
}

impl StoreConfig {
    /// Config for testing (small caches, temp directory).
    pub fn for_testing(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            block_cache_size: 8 * 1024 * 1024,
            bloom_filter_bits: 10,
            sync_writes: false,
            max_open_files: 64,
            write_buffer_size: 4 * 1024 * 1024,
        }
    }
}

/// Per-document record stored in the `metadata` column family.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct DocumentMeta {
    title: String,
    version: u64,
    content_size: u64,
    compressed_size: u64,
    created_at: u64,
    updated_at: u64,
}

impl DocumentMeta {
    fn new(title: &str) -> Self {
        let now = unix_seconds();
        Self {
            title: title.to_string(),
            version: 0,
            content_size: 0,
            compressed_size: 0,
            created_at: now,
            updated_at: now,
        }
    }

    fn encode(&self) -> Result<Vec<u8>, StoreError> {
        bincode::serde::encode_to_vec(self, bincode::config::standard())
            .map_err(|e| StoreError::Serialization(e.to_string()))
    }

    fn decode(bytes: &[u8]) -> Result<Self, StoreError> {
        let (meta, _) = bincode::serde::decode_from_slice(bytes, bincode::config::standard())
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        Ok(meta)
    }
}

fn unix_seconds() -> u64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

fn num_cpus() -> i32 {
    std::thread::available_parallelism()
        .map(|n| n.get() as i32)
        .unwrap_or(1)
}

/// RocksDB-backed document store.
pub struct RocksStore {
    /// RocksDB instance (single-threaded mode — concurrency via tokio)
    db: DBWithThreadMode<SingleThreaded>,
    config: StoreConfig,
}

impl RocksStore {
    /// Open the store at the configured path, creating the database and
    /// column families if they don't exist.
    pub fn open(config: StoreConfig) -> Result<Self, StoreError> {
        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);
        db_opts.set_max_open_files(config.max_open_files);
        db_opts.set_keep_log_file_num(5);
        db_opts.increase_parallelism(num_cpus());

        let cf_descriptors: Vec<ColumnFamilyDescriptor> = COLUMN_FAMILIES
            .iter()
            .map(|name| ColumnFamilyDescriptor::new(*name, Self::cf_options(name, &config)))
            .collect();

        let db = DBWithThreadMode::<SingleThreaded>::open_cf_descriptors(
            &db_opts,
            &config.path,
            cf_descriptors,
        )?;

        Ok(Self { db, config })
    }

    fn cf_options(name: &str, config: &StoreConfig) -> Options {
        let mut opts = Options::default();

        let mut block_opts = BlockBasedOptions::default();
        let cache = Cache::new_lru_cache(config.block_cache_size);
        block_opts.set_block_cache(&cache);
        block_opts.set_bloom_filter(config.bloom_filter_bits as f64, false);
        block_opts.set_block_size(16 * 1024);
        opts.set_block_based_table_factory(&block_opts);

        opts.set_write_buffer_size(config.write_buffer_size);
        opts.set_max_write_buffer_number(2);
        opts.optimize_for_point_lookup(config.block_cache_size as u64);

        match name {
            // Content values are already LZ4 compressed by us.
            CF_DOCUMENTS => opts.set_compression_type(DBCompressionType::None),
            _ => opts.set_compression_type(DBCompressionType::Lz4),
        }

        opts
    }

    fn cf(&self, name: &str) -> Result<&rocksdb::ColumnFamily, StoreError> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| StoreError::Database(format!("missing column family {name}")))
    }

    fn load_meta(&self, id: &str) -> Result<Option<DocumentMeta>, StoreError> {
        let cf = self.cf(CF_METADATA)?;
        match self.db.get_cf(&cf, id.as_bytes())? {
            Some(bytes) => Ok(Some(DocumentMeta::decode(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Write compressed content + metadata in one atomic batch.
    fn write_record(&self, id: &str, content: &str, meta: &mut DocumentMeta) -> Result<(), StoreError> {
        let cf_docs = self.cf(CF_DOCUMENTS)?;
        let cf_meta = self.cf(CF_METADATA)?;

        let compressed = lz4_flex::compress_prepend_size(content.as_bytes());
        meta.content_size = content.len() as u64;
        meta.compressed_size = compressed.len() as u64;
        meta.updated_at = unix_seconds();

        let mut batch = WriteBatch::default();
        batch.put_cf(&cf_docs, id.as_bytes(), &compressed);
        batch.put_cf(&cf_meta, id.as_bytes(), &meta.encode()?);

        let mut write_opts = WriteOptions::default();
        write_opts.set_sync(self.config.sync_writes);
        self.db.write_opt(batch, &write_opts)?;
        Ok(())
    }

    fn load_content(&self, id: &str) -> Result<Option<String>, StoreError> {
        let cf = self.cf(CF_DOCUMENTS)?;
        match self.db.get_cf(&cf, id.as_bytes())? {
            Some(compressed) => {
                let bytes = lz4_flex::decompress_size_prepended(&compressed)
                    .map_err(|e| StoreError::Compression(e.to_string()))?;
                let content = String::from_utf8(bytes)
                    .map_err(|e| StoreError::Serialization(e.to_string()))?;
                Ok(Some(content))
            }
            None => Ok(None),
        }
    }
}

#[async_trait]
impl PersistentStore for RocksStore {
    async fn load_document(&self, id: &str) -> Result<Option<StoredDocument>, StoreError> {
        let Some(meta) = self.load_meta(id)? else {
            return Ok(None);
        };
        let content = self
            .load_content(id)?
            .ok_or_else(|| StoreError::Database(format!("metadata without content for {id}")))?;
        Ok(Some(StoredDocument {
            id: id.to_string(),
            title: meta.title,
            content,
            version: meta.version,
        }))
    }

    async fn save_document_state(
        &self,
        id: &str,
        content: &str,
        version: u64,
    ) -> Result<(), StoreError> {
        let mut meta = self
            .load_meta(id)?
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        meta.version = version;
        self.write_record(id, content, &mut meta)
    }

    async fn create_document(
        &self,
        id: &str,
        title: &str,
        content: &str,
    ) -> Result<(), StoreError> {
        if self.load_meta(id)?.is_some() {
            return Err(StoreError::AlreadyExists(id.to_string()));
        }
        let mut meta = DocumentMeta::new(title);
        self.write_record(id, content, &mut meta)
    }

    async fn list_documents(&self) -> Result<Vec<String>, StoreError> {
        let cf = self.cf(CF_METADATA)?;
        let mut ids = Vec::new();
        for item in self.db.iterator_cf(&cf, IteratorMode::Start) {
            let (key, _) = item.map_err(|e| StoreError::Database(e.to_string()))?;
            let id = String::from_utf8(key.to_vec())
                .map_err(|e| StoreError::Serialization(e.to_string()))?;
            ids.push(id);
        }
        Ok(ids)
    }

    async fn delete_document(&self, id: &str) -> Result<(), StoreError> {
        if self.load_meta(id)?.is_none() {
            return Err(StoreError::NotFound(id.to_string()));
        }
        let cf_docs = self.cf(CF_DOCUMENTS)?;
        let cf_meta = self.cf(CF_METADATA)?;

        let mut batch = WriteBatch::default();
        batch.delete_cf(&cf_docs, id.as_bytes());
        batch.delete_cf(&cf_meta, id.as_bytes());
        self.db.write(batch)?;
        Ok(())
    }
}
