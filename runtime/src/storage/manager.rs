use std::sync::Arc;

use anyhow::Context;
use tracing::debug;

use super::{DocStatusStorage, JsonRecordStore, KvStorage, StorageResult};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum StoragesStatus {
    #[default]
    Created,
    Initialized,
    Finalized,
}

enum ManagedStorage {
    Kv(Arc<dyn KvStorage>),
    DocStatus(Arc<dyn DocStatusStorage>),
    Records(Arc<JsonRecordStore>),
}

impl ManagedStorage {
    fn label(&self) -> &str {
        match self {
            ManagedStorage::Kv(storage) => storage.namespace(),
            ManagedStorage::DocStatus(storage) => storage.namespace(),
            ManagedStorage::Records(_) => "records",
        }
    }

    async fn initialize(&self) -> StorageResult<()> {
        match self {
            ManagedStorage::Kv(storage) => storage.initialize().await,
            ManagedStorage::DocStatus(storage) => storage.initialize().await,
            ManagedStorage::Records(storage) => storage.initialize().await,
        }
    }

    async fn finalize(&self) -> StorageResult<()> {
        match self {
            ManagedStorage::Kv(storage) => storage.finalize().await,
            ManagedStorage::DocStatus(storage) => storage.finalize().await,
            ManagedStorage::Records(storage) => storage.finalize().await,
        }
    }
}

/// sequentially initializes registered storages to avoid deadlocks
#[derive(Default)]
pub struct StorageManager {
    status: StoragesStatus,
    storages: Vec<ManagedStorage>,
}

impl StorageManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(&self) -> StoragesStatus {
        self.status
    }

    pub fn register_kv<T>(&mut self, storage: Arc<T>)
    where
        T: KvStorage + 'static,
    {
        let storage: Arc<dyn KvStorage> = storage;
        self.storages.push(ManagedStorage::Kv(storage));
    }

    pub fn register_doc_status<T>(&mut self, storage: Arc<T>)
    where
        T: DocStatusStorage + 'static,
    {
        let storage: Arc<dyn DocStatusStorage> = storage;
        self.storages.push(ManagedStorage::DocStatus(storage));
    }

    pub fn register_records(&mut self, storage: Arc<JsonRecordStore>) {
        self.storages.push(ManagedStorage::Records(storage));
    }

    pub fn len(&self) -> usize {
        self.storages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.storages.is_empty()
    }

    pub async fn initialize_all(&mut self) -> StorageResult<()> {
        if self.status == StoragesStatus::Initialized {
            return Ok(());
        }

        for storage in &self.storages {
            storage
                .initialize()
                .await
                .with_context(|| format!("failed to initialize storage {}", storage.label()))?;
            debug!(storage = storage.label(), "storage initialized");
        }

        self.status = StoragesStatus::Initialized;
        Ok(())
    }

    /// Flushes every storage. All storages are attempted; the first error is returned.
    pub async fn finalize_all(&mut self) -> StorageResult<()> {
        let mut first_error = None;
        for storage in &self.storages {
            if let Err(err) = storage.finalize().await {
                tracing::error!(storage = storage.label(), error = %err, "failed to finalize storage");
                first_error.get_or_insert(err);
            }
        }
        self.status = StoragesStatus::Finalized;

        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}
