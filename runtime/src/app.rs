use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::{
    config::AppConfig,
    engine::{LocalEngine, LocalStorages, RetrievalEngine},
    extract::ContentExtractor,
    import::{BulkImporter, RecordStore},
    pipeline::{DocumentManager, IngestionPipeline, PipelineStatusStore},
    storage::{JsonRecordStore, StorageManager},
};

/// Wired application: storages initialised, engine and pipeline ready.
pub struct App {
    pub config: Arc<AppConfig>,
    pub engine: Arc<LocalEngine>,
    pub records: Arc<JsonRecordStore>,
    pub pipeline: Arc<IngestionPipeline>,
    storage_manager: StorageManager,
}

impl App {
    pub async fn bootstrap(config: AppConfig) -> Result<Self> {
        config.validate()?;
        let workspace = config.workspace.clone();

        let storages = LocalStorages::new(&config.working_dir, workspace.clone());
        let records = Arc::new(JsonRecordStore::new(
            &config.working_dir,
            workspace.as_deref(),
        ));

        let mut storage_manager = StorageManager::new();
        storages.register(&mut storage_manager);
        storage_manager.register_records(records.clone());
        storage_manager
            .initialize_all()
            .await
            .context("Failed to initialize storages")?;

        let engine = Arc::new(LocalEngine::new(
            storages,
            config.engine.chunk_config(),
            config.engine.max_parallel_insert,
        )?);

        let extractor = Arc::new(
            ContentExtractor::new(config.supported_extensions.as_slice())
                .context("Invalid supported_extensions")?,
        );
        let documents =
            DocumentManager::new(&config.input_dir, workspace.as_deref(), extractor).await?;

        let engine_handle: Arc<dyn RetrievalEngine> = engine.clone();
        let pipeline = Arc::new(IngestionPipeline::new(
            engine_handle,
            documents,
            PipelineStatusStore::new(config.pipeline.max_history_messages),
        ));

        info!(
            working_dir = %config.working_dir.display(),
            input_dir = %pipeline.documents().input_dir().display(),
            storages = storage_manager.len(),
            "application ready"
        );

        Ok(Self {
            config: Arc::new(config),
            engine,
            records,
            pipeline,
            storage_manager,
        })
    }

    pub fn importer(&self) -> BulkImporter {
        let engine: Arc<dyn RetrievalEngine> = self.engine.clone();
        let records: Arc<dyn RecordStore> = self.records.clone();
        BulkImporter::new(engine, records)
    }

    /// Flushes every storage.
    pub async fn shutdown(mut self) -> Result<()> {
        if let Err(err) = self.storage_manager.finalize_all().await {
            warn!(error = %err, "Failed to finalize storages");
            return Err(err);
        }
        Ok(())
    }
}
