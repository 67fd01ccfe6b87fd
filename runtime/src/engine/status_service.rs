use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
};

use serde_json::json;

use crate::storage::{DocProcessingStatus, DocStatus, DocStatusStorage, KvStorage, StorageResult};
use crate::utils::compute_mdhash_id;

#[derive(Debug, Clone)]
pub struct PendingDocument {
    pub id: String,
    pub content: String,
    pub summary: String,
    pub length: i64,
    pub file_path: String,
    pub track_id: String,
    pub created_at: String,
}

/// Writes document units and their status transitions.
pub struct DocStatusService {
    doc_status: Arc<dyn DocStatusStorage>,
    docs_storage: Arc<dyn KvStorage>,
}

fn unit(id: &str, status: DocStatus, file_path: &str, track_id: &str) -> DocProcessingStatus {
    let now = chrono::Utc::now().to_rfc3339();
    DocProcessingStatus {
        id: Some(id.to_string()),
        status,
        content_summary: None,
        content_length: None,
        created_at: Some(now.clone()),
        updated_at: Some(now),
        file_path: Some(file_path.to_string()),
        track_id: Some(track_id.to_string()),
        chunks_count: None,
        chunks_list: Some(Vec::new()),
        metadata: None,
        error: None,
    }
}

impl DocStatusService {
    pub fn new(doc_status: Arc<dyn DocStatusStorage>, docs_storage: Arc<dyn KvStorage>) -> Self {
        Self {
            doc_status,
            docs_storage,
        }
    }

    pub async fn filter_new_ids(
        &self,
        doc_ids: &HashSet<String>,
    ) -> StorageResult<HashSet<String>> {
        self.doc_status.filter_keys(doc_ids).await
    }

    /// Stores content first so a PENDING unit always has something to process.
    pub async fn enqueue_pending(&self, documents: Vec<PendingDocument>) -> StorageResult<()> {
        if documents.is_empty() {
            return Ok(());
        }

        let mut contents = HashMap::with_capacity(documents.len());
        let mut units = HashMap::with_capacity(documents.len());
        for doc in documents {
            let pending = DocProcessingStatus {
                content_summary: Some(doc.summary),
                content_length: Some(doc.length),
                created_at: Some(doc.created_at.clone()),
                updated_at: Some(doc.created_at),
                ..unit(&doc.id, DocStatus::PENDING, &doc.file_path, &doc.track_id)
            };
            contents.insert(
                doc.id.clone(),
                json!({ "content": doc.content, "file_path": doc.file_path }),
            );
            units.insert(doc.id, pending);
        }

        self.docs_storage.upsert(contents).await?;
        self.docs_storage.sync_if_dirty().await?;
        self.doc_status.upsert(units).await
    }

    /// Records a file that never made it into the queue as a FAILED unit without content.
    /// The id is stable per track and file, so repeating the failure overwrites the record.
    pub async fn record_rejected(
        &self,
        file_name: &str,
        track_id: &str,
        error_type: &str,
        message: &str,
    ) -> StorageResult<String> {
        let doc_id = compute_mdhash_id(&format!("{track_id}-{file_name}"), "error-");
        let rejected = DocProcessingStatus {
            content_summary: Some(format!("{error_type} failed for {file_name}")),
            content_length: Some(0),
            chunks_count: Some(0),
            metadata: Some(json!({
                "error_type": error_type,
                "error_message": message,
            })),
            error: Some(message.to_string()),
            ..unit(&doc_id, DocStatus::FAILED, file_name, track_id)
        };

        self.doc_status
            .upsert(HashMap::from([(doc_id.clone(), rejected)]))
            .await?;
        Ok(doc_id)
    }

    pub async fn mark_processing(
        &self,
        doc_id: &str,
        status: &DocProcessingStatus,
    ) -> StorageResult<()> {
        self.transition(doc_id, status, DocStatus::PROCESSING, |_| {})
            .await
    }

    pub async fn mark_processed(
        &self,
        doc_id: &str,
        status: &DocProcessingStatus,
        chunk_ids: &[String],
    ) -> StorageResult<()> {
        self.transition(doc_id, status, DocStatus::PROCESSED, |next| {
            next.chunks_count = Some(chunk_ids.len());
            next.chunks_list = Some(chunk_ids.to_vec());
        })
        .await
    }

    pub async fn mark_failed(
        &self,
        doc_id: &str,
        status: &DocProcessingStatus,
        err: &anyhow::Error,
    ) -> StorageResult<()> {
        self.transition(doc_id, status, DocStatus::FAILED, |next| {
            next.chunks_list = Some(vec![]);
            next.error = Some(format!("{err:#}"));
        })
        .await
    }

    async fn transition(
        &self,
        doc_id: &str,
        status: &DocProcessingStatus,
        to: DocStatus,
        patch: impl FnOnce(&mut DocProcessingStatus),
    ) -> StorageResult<()> {
        let mut next = DocProcessingStatus {
            id: Some(doc_id.to_string()),
            status: to,
            updated_at: Some(chrono::Utc::now().to_rfc3339()),
            error: None,
            ..status.clone()
        };
        patch(&mut next);

        self.doc_status
            .upsert(HashMap::from([(doc_id.to_string(), next)]))
            .await
    }
}
