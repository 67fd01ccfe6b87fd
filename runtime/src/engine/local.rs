use std::{
    collections::{BTreeMap, HashMap, HashSet},
    path::Path,
    sync::Arc,
};

use anyhow::{Context, Result, anyhow, bail};
use async_trait::async_trait;
use futures::future::join_all;
use serde_json::{Value, json};
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use super::{
    ChunkConfig, Chunker, DocStatusService, NewDocument, PendingDocument, ProgressSink,
    RetrievalEngine, TiktokenTokenizer, TokenizerChunker,
};
use crate::storage::{
    DocProcessingStatus, DocStatus, DocStatusStorage, JsonDocStatusStorage, JsonKvStorage,
    JsonStoreConfig, KvStorage, StorageBackend, StorageManager, StorageResult,
};
use crate::utils::{compute_mdhash_id, generate_track_id, sanitize_text, summarize_content};

const UNKNOWN_SOURCE: &str = "unknown_source";

#[derive(Clone)]
pub struct LocalStorages {
    pub full_docs: Arc<JsonKvStorage>,
    pub text_chunks: Arc<JsonKvStorage>,
    pub llm_response_cache: Arc<JsonKvStorage>,
    pub doc_status: Arc<JsonDocStatusStorage>,
}

impl LocalStorages {
    pub fn new(working_dir: &Path, workspace: Option<String>) -> Self {
        let config = |namespace: &str| JsonStoreConfig {
            working_dir: working_dir.to_path_buf(),
            namespace: namespace.into(),
            workspace: workspace.clone(),
        };

        Self {
            full_docs: Arc::new(JsonKvStorage::new(config("full_docs"))),
            text_chunks: Arc::new(JsonKvStorage::new(config("text_chunks"))),
            llm_response_cache: Arc::new(JsonKvStorage::new(config("llm_response_cache"))),
            doc_status: Arc::new(JsonDocStatusStorage::new(config("doc_status"))),
        }
    }

    pub fn register(&self, manager: &mut StorageManager) {
        manager.register_kv(self.full_docs.clone());
        manager.register_kv(self.text_chunks.clone());
        manager.register_kv(self.llm_response_cache.clone());
        manager.register_doc_status(self.doc_status.clone());
    }

    async fn persist_all(&self) -> StorageResult<()> {
        self.full_docs.sync_if_dirty().await?;
        self.text_chunks.sync_if_dirty().await?;
        self.llm_response_cache.sync_if_dirty().await?;
        self.doc_status.sync_if_dirty().await?;
        Ok(())
    }
}

pub struct LocalEngine {
    storages: LocalStorages,
    status_service: DocStatusService,
    chunker: Arc<dyn Chunker>,
    chunk_config: ChunkConfig,
    max_parallel_insert: usize,
    processing_lock: Mutex<()>,
}

impl LocalEngine {
    pub fn new(
        storages: LocalStorages,
        chunk_config: ChunkConfig,
        max_parallel_insert: usize,
    ) -> Result<Self> {
        let tokenizer = Arc::new(TiktokenTokenizer::new()?);
        let chunker = Arc::new(TokenizerChunker::new(tokenizer));
        Ok(Self::with_chunker(
            storages,
            chunker,
            chunk_config,
            max_parallel_insert,
        ))
    }

    pub fn with_chunker(
        storages: LocalStorages,
        chunker: Arc<dyn Chunker>,
        chunk_config: ChunkConfig,
        max_parallel_insert: usize,
    ) -> Self {
        let status_service =
            DocStatusService::new(storages.doc_status.clone(), storages.full_docs.clone());

        Self {
            storages,
            status_service,
            chunker,
            chunk_config,
            max_parallel_insert: max_parallel_insert.max(1),
            processing_lock: Mutex::new(()),
        }
    }

    pub fn storages(&self) -> &LocalStorages {
        &self.storages
    }

    /// Removes documents created by a failed `insert`.
    async fn discard(&self, ids: &[String]) {
        if let Err(err) = self.delete_documents(ids).await {
            error!(error = %err, count = ids.len(), "failed to discard inserted documents");
        }
    }

    /// Interrupted and failed documents are retried along with pending ones.
    async fn collect_queue(
        &self,
        only: Option<&HashSet<String>>,
    ) -> Result<Vec<(String, DocProcessingStatus)>> {
        let mut queue = Vec::new();
        for status in [DocStatus::PROCESSING, DocStatus::FAILED, DocStatus::PENDING] {
            let docs = self.storages.doc_status.docs_by_status(&status).await?;
            for (doc_id, doc) in docs {
                if only.is_some_and(|ids| !ids.contains(&doc_id)) {
                    continue;
                }
                // error records of rejected files carry no content
                if self.storages.full_docs.get_by_id(&doc_id).await?.is_none() {
                    continue;
                }
                queue.push((doc_id, doc));
            }
        }

        queue.sort_by(|(id_a, a), (id_b, b)| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| id_a.cmp(id_b))
        });
        Ok(queue)
    }

    /// Returns the ids that ended up FAILED.
    async fn process_queue(
        &self,
        only: Option<&HashSet<String>>,
        progress: &dyn ProgressSink,
    ) -> Result<Vec<String>> {
        let _guard = self.processing_lock.lock().await;

        let queue = self.collect_queue(only).await?;
        if queue.is_empty() {
            info!("no pending documents to process");
            progress.message("No documents to process".to_string());
            return Ok(Vec::new());
        }

        let groups: Vec<&[(String, DocProcessingStatus)]> =
            queue.chunks(self.max_parallel_insert).collect();
        let total = groups.len();
        progress.set_counts(queue.len(), total);
        progress.message(format!(
            "Processing {} document(s) in {} batches",
            queue.len(),
            total
        ));

        let mut failed = Vec::new();
        for (index, group) in groups.into_iter().enumerate() {
            progress.set_current_batch(index + 1);
            progress.message(format!("Start processing batch {} of {}", index + 1, total));

            let results = join_all(
                group
                    .iter()
                    .map(|(doc_id, status)| self.process_document(doc_id, status)),
            )
            .await;

            for ((doc_id, status), result) in group.iter().zip(results) {
                let Err(err) = result else {
                    continue;
                };

                error!(error = %err, doc_id = %doc_id, "failed to process document");
                for (depth, cause) in err.chain().skip(1).enumerate() {
                    error!(
                        doc_id = %doc_id,
                        cause_depth = depth + 1,
                        cause = %cause,
                        "caused by"
                    );
                }
                progress.message(format!("Failed to process document {doc_id}: {err}"));

                if let Err(status_err) = self.status_service.mark_failed(doc_id, status, &err).await
                {
                    error!(error = %status_err, doc_id = %doc_id, "failed to mark document as failed");
                }
                failed.push(doc_id.clone());
            }

            progress.message(format!("Completed batch {} of {}", index + 1, total));
        }

        self.storages.persist_all().await?;
        Ok(failed)
    }

    async fn process_document(&self, doc_id: &str, status: &DocProcessingStatus) -> Result<()> {
        self.status_service.mark_processing(doc_id, status).await?;

        let content = self
            .storages
            .full_docs
            .get_by_id(doc_id)
            .await?
            .and_then(|value| value.get("content").and_then(Value::as_str).map(String::from))
            .ok_or_else(|| anyhow!("document content missing"))?;

        let chunker = Arc::clone(&self.chunker);
        let config = self.chunk_config;
        let chunks = tokio::task::spawn_blocking(move || chunker.chunk(&content, &config))
            .await
            .context("chunking task panicked")??;

        if chunks.is_empty() {
            warn!(doc_id = %doc_id, "no chunks created for document");
        }

        let file_path = status.file_path.clone().unwrap_or_default();
        let chunk_map: HashMap<String, Value> = chunks
            .iter()
            .map(|chunk| {
                (
                    chunk.id.clone(),
                    json!({
                        "content": chunk.content,
                        "full_doc_id": doc_id,
                        "chunk_order_index": chunk.order,
                        "file_path": file_path,
                        "tokens": chunk.token_count,
                    }),
                )
            })
            .collect();

        if !chunk_map.is_empty() {
            self.storages.text_chunks.upsert(chunk_map).await?;
            self.storages.text_chunks.sync_if_dirty().await?;
        }

        let chunk_ids: Vec<String> = chunks.into_iter().map(|chunk| chunk.id).collect();
        self.status_service
            .mark_processed(doc_id, status, &chunk_ids)
            .await
    }
}

#[async_trait]
impl RetrievalEngine for LocalEngine {
    async fn enqueue(&self, docs: Vec<NewDocument>) -> Result<Vec<String>> {
        let mut seen = HashSet::new();
        let mut candidates = Vec::new();

        for doc in docs {
            let content = sanitize_text(&doc.content);
            if content.is_empty() {
                warn!(file = %doc.file_path, "skipping document with empty content");
                continue;
            }
            let doc_id = doc
                .id
                .map(|id| id.trim().to_string())
                .filter(|id| !id.is_empty())
                .unwrap_or_else(|| compute_mdhash_id(&content, "doc-"));
            if !seen.insert(doc_id.clone()) {
                continue;
            }
            candidates.push((doc_id, content, doc.file_path, doc.track_id));
        }

        if candidates.is_empty() {
            return Ok(Vec::new());
        }

        let new_ids = self.status_service.filter_new_ids(&seen).await?;
        let now = chrono::Utc::now().to_rfc3339();
        let mut pending = Vec::new();

        for (doc_id, content, file_path, track_id) in candidates {
            if !new_ids.contains(&doc_id) {
                info!(doc_id = %doc_id, "document already enqueued");
                continue;
            }
            let file_path = if file_path.trim().is_empty() {
                UNKNOWN_SOURCE.to_string()
            } else {
                file_path
            };
            pending.push(PendingDocument {
                summary: summarize_content(&content),
                length: content.chars().count() as i64,
                id: doc_id,
                content,
                file_path,
                track_id: track_id.unwrap_or_else(|| generate_track_id("enqueue")),
                created_at: now.clone(),
            });
        }

        let enqueued: Vec<String> = pending.iter().map(|doc| doc.id.clone()).collect();
        self.status_service.enqueue_pending(pending).await?;
        info!(count = enqueued.len(), "documents enqueued");
        Ok(enqueued)
    }

    async fn process_enqueued(&self, progress: &dyn ProgressSink) -> Result<()> {
        self.process_queue(None, progress).await.map(|_| ())
    }

    async fn insert(&self, docs: Vec<NewDocument>) -> Result<Vec<String>> {
        let ids = self.enqueue(docs).await?;
        if ids.is_empty() {
            return Ok(ids);
        }

        let only: HashSet<String> = ids.iter().cloned().collect();
        let failed = match self.process_queue(Some(&only), &super::LogProgress).await {
            Ok(failed) => failed,
            Err(err) => {
                self.discard(&ids).await;
                return Err(err);
            }
        };
        if !failed.is_empty() {
            self.discard(&ids).await;
            bail!("failed to process document(s): {}", failed.join(", "));
        }
        Ok(ids)
    }

    async fn delete_documents(&self, ids: &[String]) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }

        let mut chunk_ids = Vec::new();
        for id in ids {
            if let Some(status) = self.storages.doc_status.get_by_id(id).await? {
                chunk_ids.extend(status.chunks_list.unwrap_or_default());
            }
        }

        self.storages.text_chunks.delete(&chunk_ids).await?;
        self.storages.full_docs.delete(ids).await?;
        self.storages.doc_status.delete(ids).await?;
        self.storages.persist_all().await?;
        info!(count = ids.len(), "documents deleted");
        Ok(())
    }

    async fn docs_by_status(
        &self,
        status: DocStatus,
    ) -> Result<HashMap<String, DocProcessingStatus>> {
        self.storages.doc_status.docs_by_status(&status).await
    }

    fn backends(&self) -> Vec<Arc<dyn StorageBackend>> {
        let full_docs: Arc<dyn StorageBackend> = self.storages.full_docs.clone();
        let text_chunks: Arc<dyn StorageBackend> = self.storages.text_chunks.clone();
        let doc_status: Arc<dyn StorageBackend> = self.storages.doc_status.clone();
        vec![full_docs, text_chunks, doc_status]
    }

    async fn clear_cache(&self, modes: Option<&[String]>) -> Result<()> {
        match modes {
            None => self.storages.llm_response_cache.drop_all().await,
            Some(modes) => self
                .storages
                .llm_response_cache
                .drop_cache_modes(modes)
                .await
                .map(|_| ()),
        }
    }

    fn update_flags(&self) -> BTreeMap<String, Vec<bool>> {
        let backends: [&dyn StorageBackend; 4] = [
            self.storages.full_docs.as_ref(),
            self.storages.text_chunks.as_ref(),
            self.storages.llm_response_cache.as_ref(),
            self.storages.doc_status.as_ref(),
        ];
        backends
            .into_iter()
            .map(|backend| {
                (
                    backend.namespace().to_string(),
                    vec![backend.has_pending_update()],
                )
            })
            .collect()
    }

    async fn record_failure(
        &self,
        file_name: &str,
        track_id: &str,
        error_type: &str,
        message: &str,
    ) -> Result<String> {
        self.status_service
            .record_rejected(file_name, track_id, error_type, message)
            .await
    }
}
