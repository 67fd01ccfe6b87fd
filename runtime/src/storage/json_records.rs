use std::{collections::BTreeMap, path::PathBuf, sync::Arc};

use anyhow::{Result, bail};
use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;

use super::io::{ensure_parent_dir, load_or_default, write_json_file};
use crate::import::{RecordStore, RecordTransaction, Regulation};

/// Regulation metadata persisted next to the engine storages.
pub struct JsonRecordStore {
    file_path: PathBuf,
    data: Arc<RwLock<BTreeMap<String, Regulation>>>,
}

impl JsonRecordStore {
    pub fn new(working_dir: impl Into<PathBuf>, workspace: Option<&str>) -> Self {
        let working_dir = working_dir.into();
        let dir = match workspace {
            Some(ws) if !ws.is_empty() => working_dir.join(ws),
            _ => working_dir,
        };
        Self {
            file_path: dir.join("regulations.json"),
            data: Arc::new(RwLock::new(BTreeMap::new())),
        }
    }

    pub async fn initialize(&self) -> Result<()> {
        ensure_parent_dir(&self.file_path).await?;
        let data: BTreeMap<String, Regulation> = load_or_default(&self.file_path).await?;
        *self.data.write().await = data;
        Ok(())
    }

    /// Commits write through immediately, so there is nothing left to flush.
    pub async fn finalize(&self) -> Result<()> {
        Ok(())
    }

    pub async fn get(&self, identifier: &str) -> Option<Regulation> {
        self.data.read().await.get(identifier).cloned()
    }

    pub async fn len(&self) -> usize {
        self.data.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.data.read().await.is_empty()
    }
}

#[async_trait]
impl RecordStore for JsonRecordStore {
    async fn exists(&self, identifier: &str) -> Result<bool> {
        Ok(self.data.read().await.contains_key(identifier))
    }

    async fn begin(&self) -> Result<Box<dyn RecordTransaction>> {
        Ok(Box::new(JsonRecordTransaction {
            file_path: self.file_path.clone(),
            data: Arc::clone(&self.data),
            staged: Vec::new(),
        }))
    }
}

/// Staged writes; dropping the transaction without committing discards them.
struct JsonRecordTransaction {
    file_path: PathBuf,
    data: Arc<RwLock<BTreeMap<String, Regulation>>>,
    staged: Vec<Regulation>,
}

#[async_trait]
impl RecordTransaction for JsonRecordTransaction {
    fn bulk_create(&mut self, records: Vec<Regulation>) {
        self.staged.extend(records);
    }

    async fn commit(self: Box<Self>) -> Result<usize> {
        let Self {
            file_path,
            data,
            staged,
        } = *self;

        if staged.is_empty() {
            return Ok(0);
        }

        let mut guard = data.write().await;
        let mut seen = std::collections::HashSet::new();
        for record in &staged {
            if guard.contains_key(&record.identifier) || !seen.insert(record.identifier.as_str()) {
                bail!("record {} already exists", record.identifier);
            }
        }

        for record in &staged {
            guard.insert(record.identifier.clone(), record.clone());
        }

        if let Err(err) = write_json_file(&file_path, &*guard).await {
            for record in &staged {
                guard.remove(&record.identifier);
            }
            return Err(err);
        }

        debug!(count = staged.len(), "committed regulation records");
        Ok(staged.len())
    }
}
