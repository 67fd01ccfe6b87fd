use std::collections::{HashMap, HashSet};

use anyhow::Result;
use async_trait::async_trait;
use serde_json::{Map, Value, map::Entry};
use tracing::debug;

use super::io::{JsonSnapshot, JsonStoreConfig};
use super::{KvStorage, StorageBackend};

/// Json object per key. Every record carries `_id`, `create_time` and `update_time`.
pub struct JsonKvStorage {
    store: JsonSnapshot<Value>,
}

impl JsonKvStorage {
    pub fn new(config: JsonStoreConfig) -> Self {
        Self {
            store: JsonSnapshot::new(&config),
        }
    }

    /// Removes cached responses whose `mode:cache_type:hash` key starts with one of `modes`.
    pub async fn drop_cache_modes(&self, modes: &[String]) -> Result<usize> {
        let removed = self
            .store
            .update(|data| {
                let before = data.len();
                data.retain(|key, _| {
                    let mode = key.split(':').next().unwrap_or_default();
                    !modes.iter().any(|m| m == mode)
                });
                let removed = before - data.len();
                (removed, removed > 0)
            })
            .await;

        self.store.flush().await?;
        debug!(namespace = self.store.namespace(), removed, "dropped cache modes");
        Ok(removed)
    }
}

fn stamp(key: &str, value: Value, now: i64) -> Value {
    let mut record = match value {
        Value::Object(map) => map,
        other => Map::from_iter([("value".to_string(), other)]),
    };

    if let Entry::Vacant(entry) = record.entry("create_time") {
        entry.insert(now.into());
    }
    record.insert("update_time".into(), now.into());
    record.insert("_id".into(), Value::String(key.to_string()));
    Value::Object(record)
}

#[async_trait]
impl StorageBackend for JsonKvStorage {
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
impl KvStorage for JsonKvStorage {
    async fn initialize(&self) -> Result<()> {
        self.store.load().await
    }

    async fn finalize(&self) -> Result<()> {
        self.store.flush().await
    }

    async fn upsert(&self, records: HashMap<String, Value>) -> Result<()> {
        let now = chrono::Utc::now().timestamp();
        self.store
            .update(|data| {
                let changed = !records.is_empty();
                for (key, value) in records {
                    let record = stamp(&key, value, now);
                    data.insert(key, record);
                }
                ((), changed)
            })
            .await;
        Ok(())
    }

    async fn delete(&self, ids: &[String]) -> Result<()> {
        self.store
            .update(|data| {
                let before = data.len();
                for id in ids {
                    data.remove(id);
                }
                ((), data.len() != before)
            })
            .await;
        Ok(())
    }

    async fn get_by_id(&self, id: &str) -> Result<Option<Value>> {
        Ok(self.store.read().await.get(id).cloned())
    }

    async fn get_all(&self) -> Result<HashMap<String, Value>> {
        Ok(self.store.read().await.clone())
    }

    async fn filter_keys(&self, keys: &HashSet<String>) -> Result<HashSet<String>> {
        Ok(self.store.missing(keys).await)
    }

    async fn sync_if_dirty(&self) -> Result<()> {
        self.store.flush().await
    }
}
