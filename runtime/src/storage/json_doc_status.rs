use std::collections::{HashMap, HashSet};

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::io::{JsonSnapshot, JsonStoreConfig};
use super::{DocProcessingStatus, DocStatus, DocStatusStorage, StorageBackend};

const NO_FILE_PATH: &str = "no-file-path";

/// Persisted form of a [`DocProcessingStatus`]; the id is the map key.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredStatus {
    status: DocStatus,
    #[serde(default)]
    content_summary: Option<String>,
    #[serde(default)]
    content_length: Option<i64>,
    #[serde(default)]
    created_at: Option<String>,
    #[serde(default)]
    updated_at: Option<String>,
    #[serde(default = "no_file_path")]
    file_path: String,
    #[serde(default)]
    track_id: Option<String>,
    #[serde(default)]
    chunks_count: Option<usize>,
    #[serde(default)]
    chunks_list: Vec<String>,
    #[serde(default, deserialize_with = "object_or_empty")]
    metadata: Map<String, Value>,
    #[serde(default)]
    error: Option<String>,
}

fn no_file_path() -> String {
    NO_FILE_PATH.to_string()
}

fn object_or_empty<'de, D>(deserializer: D) -> Result<Map<String, Value>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::Object(map) => map,
        _ => Map::new(),
    })
}

impl From<DocProcessingStatus> for StoredStatus {
    fn from(doc: DocProcessingStatus) -> Self {
        let metadata = match doc.metadata {
            Some(Value::Object(map)) => map,
            _ => Map::new(),
        };
        Self {
            status: doc.status,
            content_summary: doc.content_summary,
            content_length: doc.content_length,
            created_at: doc.created_at,
            updated_at: doc.updated_at,
            file_path: doc.file_path.unwrap_or_else(no_file_path),
            track_id: doc.track_id,
            chunks_count: doc.chunks_count,
            chunks_list: doc.chunks_list.unwrap_or_default(),
            metadata,
            error: doc.error,
        }
    }
}

impl StoredStatus {
    fn to_doc(&self, id: &str) -> DocProcessingStatus {
        DocProcessingStatus {
            id: Some(id.to_string()),
            status: self.status,
            content_summary: self.content_summary.clone(),
            content_length: self.content_length,
            created_at: self.created_at.clone(),
            updated_at: self.updated_at.clone(),
            file_path: Some(self.file_path.clone()),
            track_id: self.track_id.clone(),
            chunks_count: self.chunks_count,
            chunks_list: Some(self.chunks_list.clone()),
            metadata: Some(Value::Object(self.metadata.clone())),
            error: self.error.clone(),
        }
    }
}

pub struct JsonDocStatusStorage {
    store: JsonSnapshot<StoredStatus>,
}

impl JsonDocStatusStorage {
    pub fn new(config: JsonStoreConfig) -> Self {
        Self {
            store: JsonSnapshot::new(&config),
        }
    }
}

#[async_trait]
impl StorageBackend for JsonDocStatusStorage {
    fn namespace(&self) -> &str {
        self.store.namespace()
    }

    async fn drop_all(&self) -> Result<()> {
        self.store.clear().await
    }

    fn has_pending_update(&self) -> bool {
        self.store.is_dirty()
    }
}

#[async_trait]
impl DocStatusStorage for JsonDocStatusStorage {
    async fn initialize(&self) -> Result<()> {
        self.store.load().await
    }

    async fn finalize(&self) -> Result<()> {
        self.store.flush().await
    }

    async fn upsert(&self, records: HashMap<String, DocProcessingStatus>) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }

        self.store
            .update(|data| {
                data.extend(records.into_iter().map(|(id, doc)| (id, doc.into())));
                ((), true)
            })
            .await;

        // flushed eagerly so a crash mid-run is visible on restart
        self.store.flush().await
    }

    async fn delete(&self, ids: &[String]) -> Result<()> {
        self.store
            .update(|data| {
                let before = data.len();
                data.retain(|id, _| !ids.contains(id));
                ((), data.len() != before)
            })
            .await;
        Ok(())
    }

    async fn get_by_id(&self, id: &str) -> Result<Option<DocProcessingStatus>> {
        Ok(self.store.read().await.get(id).map(|stored| stored.to_doc(id)))
    }

    async fn filter_keys(&self, keys: &HashSet<String>) -> Result<HashSet<String>> {
        Ok(self.store.missing(keys).await)
    }

    async fn status_counts(&self) -> Result<HashMap<DocStatus, usize>> {
        let data = self.store.read().await;
        Ok(data.values().fold(HashMap::new(), |mut counts, stored| {
            *counts.entry(stored.status).or_default() += 1;
            counts
        }))
    }

    async fn docs_by_status(
        &self,
        status: &DocStatus,
    ) -> Result<HashMap<String, DocProcessingStatus>> {
        let data = self.store.read().await;
        Ok(data
            .iter()
            .filter(|(_, stored)| stored.status == *status)
            .map(|(id, stored)| (id.clone(), stored.to_doc(id)))
            .collect())
    }

    async fn sync_if_dirty(&self) -> Result<()> {
        self.store.flush().await
    }
}
