#![allow(dead_code)]

use std::{
    collections::{BTreeMap, HashMap, HashSet},
    path::{Path, PathBuf},
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
};

use anyhow::{Result, anyhow, bail};
use async_trait::async_trait;
use ingest_runtime::{
    engine::{NewDocument, ProgressSink, RetrievalEngine},
    extract::ContentExtractor,
    pipeline::{
        DocumentManager, FileRepository, FsFileRepository, IngestionPipeline,
        PipelineStatusStore,
    },
    storage::{DocProcessingStatus, DocStatus, StorageBackend},
};
use parking_lot::Mutex;
use tokio::sync::Semaphore;

/// Backend whose drop succeeds or fails on demand.
pub struct FakeBackend {
    namespace: String,
    fail: bool,
    pub drops: AtomicUsize,
}

impl FakeBackend {
    pub fn new(namespace: &str, fail: bool) -> Arc<Self> {
        Arc::new(Self {
            namespace: namespace.to_string(),
            fail,
            drops: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl StorageBackend for FakeBackend {
    fn namespace(&self) -> &str {
        &self.namespace
    }

    async fn drop_all(&self) -> Result<()> {
        self.drops.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            bail!("{} is unavailable", self.namespace);
        }
        Ok(())
    }

    fn has_pending_update(&self) -> bool {
        false
    }
}

/// In-memory engine that records every call.
#[derive(Default)]
pub struct FakeEngine {
    pub documents: Mutex<Vec<NewDocument>>,
    pub deleted: Mutex<Vec<String>>,
    pub failures: Mutex<Vec<(String, String)>>,
    pub backends: Mutex<Vec<Arc<FakeBackend>>>,
    pub process_calls: AtomicUsize,
    pub fail_enqueue: AtomicBool,
    pub fail_insert: AtomicBool,
    /// When set, processing waits for a permit.
    pub gate: Mutex<Option<Arc<Semaphore>>>,
}

impl FakeEngine {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_backends(backends: Vec<Arc<FakeBackend>>) -> Arc<Self> {
        let engine = Self::default();
        *engine.backends.lock() = backends;
        Arc::new(engine)
    }

    pub fn document_sources(&self) -> Vec<String> {
        self.documents
            .lock()
            .iter()
            .map(|doc| doc.file_path.clone())
            .collect()
    }

    pub fn process_calls(&self) -> usize {
        self.process_calls.load(Ordering::SeqCst)
    }

    fn store(&self, docs: Vec<NewDocument>) -> Vec<String> {
        let mut stored = self.documents.lock();
        let mut known: HashSet<String> = stored.iter().filter_map(|d| d.id.clone()).collect();
        let mut created = Vec::new();
        for doc in docs {
            let Some(id) = doc.id.clone() else {
                continue;
            };
            if known.insert(id.clone()) {
                created.push(id);
                stored.push(doc);
            }
        }
        created
    }
}

#[async_trait]
impl RetrievalEngine for FakeEngine {
    async fn enqueue(&self, docs: Vec<NewDocument>) -> Result<Vec<String>> {
        if self.fail_enqueue.load(Ordering::SeqCst) {
            return Err(anyhow!("document store offline").context("failed to write doc status"));
        }
        Ok(self.store(docs))
    }

    async fn process_enqueued(&self, progress: &dyn ProgressSink) -> Result<()> {
        self.process_calls.fetch_add(1, Ordering::SeqCst);
        let gate = self.gate.lock().clone();
        if let Some(gate) = gate {
            let _permit = gate.acquire().await?;
        }
        let docs = self.documents.lock().len();
        progress.set_counts(docs, 1);
        progress.message(format!("Processed {docs} document(s)"));
        Ok(())
    }

    async fn insert(&self, docs: Vec<NewDocument>) -> Result<Vec<String>> {
        if self.fail_insert.load(Ordering::SeqCst) {
            bail!("embedding service unavailable");
        }
        Ok(self.store(docs))
    }

    async fn delete_documents(&self, ids: &[String]) -> Result<()> {
        let ids: HashSet<&String> = ids.iter().collect();
        self.documents
            .lock()
            .retain(|doc| doc.id.as_ref().is_none_or(|id| !ids.contains(id)));
        self.deleted.lock().extend(ids.into_iter().cloned());
        Ok(())
    }

    async fn docs_by_status(
        &self,
        status: DocStatus,
    ) -> Result<HashMap<String, DocProcessingStatus>> {
        if status != DocStatus::PROCESSED {
            return Ok(HashMap::new());
        }
        Ok(self
            .documents
            .lock()
            .iter()
            .filter_map(|doc| {
                let id = doc.id.clone()?;
                Some((
                    id.clone(),
                    DocProcessingStatus {
                        id: Some(id),
                        status,
                        content_summary: None,
                        content_length: Some(doc.content.chars().count() as i64),
                        created_at: None,
                        updated_at: None,
                        file_path: Some(doc.file_path.clone()),
                        track_id: doc.track_id.clone(),
                        chunks_count: None,
                        chunks_list: None,
                        metadata: None,
                        error: None,
                    },
                ))
            })
            .collect())
    }

    fn backends(&self) -> Vec<Arc<dyn StorageBackend>> {
        self.backends
            .lock()
            .iter()
            .map(|backend| {
                let backend: Arc<dyn StorageBackend> = backend.clone();
                backend
            })
            .collect()
    }

    async fn clear_cache(&self, _modes: Option<&[String]>) -> Result<()> {
        Ok(())
    }

    fn update_flags(&self) -> BTreeMap<String, Vec<bool>> {
        BTreeMap::from([("full_docs".to_string(), vec![false])])
    }

    async fn record_failure(
        &self,
        file_name: &str,
        _track_id: &str,
        error_type: &str,
        _message: &str,
    ) -> Result<String> {
        self.failures
            .lock()
            .push((file_name.to_string(), error_type.to_string()));
        Ok(format!("error-{file_name}"))
    }
}

/// Filesystem repository that records removals and refuses to delete chosen file names.
#[derive(Default)]
pub struct RecordingRepository {
    inner: FsFileRepository,
    pub locked: Mutex<HashSet<String>>,
    pub removed: Mutex<Vec<PathBuf>>,
}

impl RecordingRepository {
    pub fn locking(names: &[&str]) -> Arc<Self> {
        let repo = Self::default();
        repo.locked
            .lock()
            .extend(names.iter().map(|name| name.to_string()));
        Arc::new(repo)
    }

    fn is_locked(&self, path: &Path) -> bool {
        path.file_name()
            .and_then(|name| name.to_str())
            .is_some_and(|name| self.locked.lock().contains(name))
    }
}

#[async_trait]
impl FileRepository for RecordingRepository {
    async fn create_dir_all(&self, path: &Path) -> Result<()> {
        self.inner.create_dir_all(path).await
    }

    async fn read(&self, path: &Path) -> Result<Vec<u8>> {
        self.inner.read(path).await
    }

    async fn write(&self, path: &Path, bytes: &[u8]) -> Result<()> {
        self.inner.write(path, bytes).await
    }

    async fn remove(&self, path: &Path) -> Result<()> {
        if self.is_locked(path) {
            bail!("{} is locked", path.display());
        }
        self.inner.remove(path).await?;
        self.removed.lock().push(path.to_path_buf());
        Ok(())
    }

    async fn list_files(&self, root: &Path) -> Result<Vec<PathBuf>> {
        self.inner.list_files(root).await
    }

    fn exists(&self, path: &Path) -> bool {
        self.inner.exists(path)
    }
}

pub async fn pipeline_with(engine: Arc<FakeEngine>, root: &Path) -> Result<IngestionPipeline> {
    pipeline_with_repository(engine, root, Arc::new(FsFileRepository)).await
}

pub async fn pipeline_with_repository(
    engine: Arc<FakeEngine>,
    root: &Path,
    repo: Arc<dyn FileRepository>,
) -> Result<IngestionPipeline> {
    let documents = DocumentManager::with_repository(
        root.join("inputs"),
        None,
        Arc::new(ContentExtractor::with_all_formats()),
        repo,
    )
    .await?;
    let engine: Arc<dyn RetrievalEngine> = engine;
    Ok(IngestionPipeline::new(
        engine,
        documents,
        PipelineStatusStore::new(100),
    ))
}

pub fn write_file(path: &Path, contents: &str) {
    std::fs::create_dir_all(path.parent().expect("file has a parent")).expect("create dirs");
    std::fs::write(path, contents).expect("write file");
}

pub fn count_files(root: &Path) -> usize {
    walkdir::WalkDir::new(root)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .count()
}
