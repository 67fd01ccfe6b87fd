use std::collections::{HashMap, HashSet};

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub mod io;
pub mod json_doc_status;
pub mod json_kv;
pub mod json_records;
pub mod manager;

pub use io::*;
pub use json_doc_status::JsonDocStatusStorage;
pub use json_kv::JsonKvStorage;
pub use json_records::JsonRecordStore;
pub use manager::{StorageManager, StoragesStatus};

pub type StorageResult<T> = Result<T>;

/// One droppable partition of engine state.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    fn namespace(&self) -> &str;

    async fn drop_all(&self) -> StorageResult<()>;

    /// True while in-memory writes have not been flushed to disk.
    fn has_pending_update(&self) -> bool;
}

#[async_trait]
pub trait KvStorage: StorageBackend {
    async fn initialize(&self) -> StorageResult<()>;
    async fn finalize(&self) -> StorageResult<()>;

    async fn upsert(&self, records: HashMap<String, serde_json::Value>) -> StorageResult<()>;
    async fn delete(&self, ids: &[String]) -> StorageResult<()>;

    async fn get_by_id(&self, id: &str) -> StorageResult<Option<serde_json::Value>>;
    async fn get_all(&self) -> StorageResult<HashMap<String, serde_json::Value>>;

    /// Returns the subset of `keys` that is not stored yet.
    async fn filter_keys(&self, keys: &HashSet<String>) -> StorageResult<HashSet<String>>;

    async fn sync_if_dirty(&self) -> StorageResult<()>;
}

#[derive(
    Debug, Default, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Hash, Ord, PartialOrd,
)]
#[allow(clippy::upper_case_acronyms)]
pub enum DocStatus {
    #[default]
    PENDING,
    PROCESSING,
    PROCESSED,
    FAILED,
}

impl DocStatus {
    pub const ALL: [DocStatus; 4] = [
        DocStatus::PENDING,
        DocStatus::PROCESSING,
        DocStatus::PROCESSED,
        DocStatus::FAILED,
    ];
}

/// Document unit as tracked by the status store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocProcessingStatus {
    #[serde(default)]
    pub id: Option<String>,
    pub status: DocStatus,
    pub content_summary: Option<String>,
    pub content_length: Option<i64>,
    pub created_at: Option<String>,
    pub updated_at: Option<String>,
    pub file_path: Option<String>,
    pub track_id: Option<String>,
    pub chunks_count: Option<usize>,
    pub chunks_list: Option<Vec<String>>,
    pub metadata: Option<serde_json::Value>,
    pub error: Option<String>,
}

#[async_trait]
pub trait DocStatusStorage: StorageBackend {
    async fn initialize(&self) -> StorageResult<()>;
    async fn finalize(&self) -> StorageResult<()>;

    async fn upsert(&self, records: HashMap<String, DocProcessingStatus>) -> StorageResult<()>;
    async fn delete(&self, ids: &[String]) -> StorageResult<()>;

    async fn get_by_id(&self, id: &str) -> StorageResult<Option<DocProcessingStatus>>;

    /// Returns the subset of `keys` that is not stored yet.
    async fn filter_keys(&self, keys: &HashSet<String>) -> StorageResult<HashSet<String>>;

    async fn status_counts(&self) -> StorageResult<HashMap<DocStatus, usize>>;

    async fn docs_by_status(
        &self,
        status: &DocStatus,
    ) -> StorageResult<HashMap<String, DocProcessingStatus>>;

    async fn sync_if_dirty(&self) -> StorageResult<()>;
}
