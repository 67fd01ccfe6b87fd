//! Retrieval engine seam.
//!
//! The ingestion pipeline only talks to [`RetrievalEngine`]. [`LocalEngine`] is the
//! in-process implementation backed by the JSON storages: it owns document units,
//! chunks them into token windows and tracks their status.

use std::{
    collections::{BTreeMap, HashMap},
    sync::Arc,
};

use anyhow::Result;
use async_trait::async_trait;
use tracing::debug;

use crate::storage::{DocProcessingStatus, DocStatus, StorageBackend};

pub mod chunker;
pub mod local;
pub mod status_service;
pub mod tokenizer;

pub use chunker::{Chunk, ChunkConfig, Chunker, TokenizerChunker};
pub use local::{LocalEngine, LocalStorages};
pub use status_service::{DocStatusService, PendingDocument};
pub use tokenizer::{TiktokenTokenizer, Tokenizer};

/// Content handed to the engine. Without an explicit id the id is derived from the content.
#[derive(Debug, Clone, Default)]
pub struct NewDocument {
    pub id: Option<String>,
    pub content: String,
    pub file_path: String,
    pub track_id: Option<String>,
}

impl NewDocument {
    pub fn new(content: impl Into<String>, file_path: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            file_path: file_path.into(),
            ..Self::default()
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_track_id(mut self, track_id: impl Into<String>) -> Self {
        self.track_id = Some(track_id.into());
        self
    }
}

/// Receives progress from long engine calls. Implementations must not block.
pub trait ProgressSink: Send + Sync {
    fn message(&self, message: String);
    fn set_counts(&self, docs: usize, batchs: usize);
    fn set_current_batch(&self, cur_batch: usize);
}

/// Progress sink for calls made outside a pipeline job.
pub struct LogProgress;

impl ProgressSink for LogProgress {
    fn message(&self, message: String) {
        debug!(%message, "engine progress");
    }

    fn set_counts(&self, _docs: usize, _batchs: usize) {}

    fn set_current_batch(&self, _cur_batch: usize) {}
}

#[async_trait]
pub trait RetrievalEngine: Send + Sync {
    /// Stores new documents as PENDING; returns the ids that were actually new.
    async fn enqueue(&self, docs: Vec<NewDocument>) -> Result<Vec<String>>;

    /// Processes every queued document.
    async fn process_enqueued(&self, progress: &dyn ProgressSink) -> Result<()>;

    /// Enqueues and processes `docs` in one call; fails if any of them failed.
    async fn insert(&self, docs: Vec<NewDocument>) -> Result<Vec<String>>;

    async fn delete_documents(&self, ids: &[String]) -> Result<()>;

    async fn docs_by_status(&self, status: DocStatus)
    -> Result<HashMap<String, DocProcessingStatus>>;

    /// Partitions dropped by a clear.
    fn backends(&self) -> Vec<Arc<dyn StorageBackend>>;

    /// `None` drops the whole response cache.
    async fn clear_cache(&self, modes: Option<&[String]>) -> Result<()>;

    /// Per-namespace "has pending update" flags.
    fn update_flags(&self) -> BTreeMap<String, Vec<bool>>;

    async fn record_failure(
        &self,
        file_name: &str,
        track_id: &str,
        error_type: &str,
        message: &str,
    ) -> Result<String>;
}
