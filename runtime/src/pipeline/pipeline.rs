use std::{
    collections::{BTreeMap, HashSet},
    path::{Path, PathBuf},
    sync::Arc,
};

use tracing::{debug, error, info, warn};

use super::{
    clear,
    document_manager::{DocumentManager, TempFile},
    registry::FileRegistry,
    status::{Admission, JobGuard, PipelineStatus, PipelineStatusStore},
    types::{
        ClearResponse, ContentItem, IngestReport, InsertResponse, OperationStatus, RejectedItem,
    },
};
use crate::{
    engine::{NewDocument, RetrievalEngine},
    error::{ExtractError, PipelineError, PipelineResult},
    storage::{DocProcessingStatus, DocStatus},
    utils::{compute_mdhash_id, generate_track_id, sanitize_text, sort_collated_by},
};

const JOB_NAME: &str = "Indexing Documents";
const UNKNOWN_SOURCE: &str = "unknown_source";
const CACHE_MODES: [&str; 6] = ["default", "naive", "local", "global", "hybrid", "mix"];

/// A file waiting for extraction. `temp` keeps an upload copy alive until it is read.
struct FileCandidate {
    path: PathBuf,
    label: String,
    temp: Option<TempFile>,
}

pub struct IngestionPipeline {
    engine: Arc<dyn RetrievalEngine>,
    documents: DocumentManager,
    registry: Arc<FileRegistry>,
    status: PipelineStatusStore,
}

impl IngestionPipeline {
    pub fn new(
        engine: Arc<dyn RetrievalEngine>,
        documents: DocumentManager,
        status: PipelineStatusStore,
    ) -> Self {
        Self {
            engine,
            documents,
            registry: Arc::new(FileRegistry::new()),
            status,
        }
    }

    pub fn status_store(&self) -> &PipelineStatusStore {
        &self.status
    }

    pub fn documents(&self) -> &DocumentManager {
        &self.documents
    }

    pub fn registry(&self) -> &FileRegistry {
        &self.registry
    }

    /// Extracts, enqueues and processes `items` under one track id.
    ///
    /// Extraction failures reject single items. Engine failures abort the call and
    /// surface as [`PipelineError::Engine`]; the pipeline status is released either way.
    pub async fn enqueue_and_process(
        &self,
        items: Vec<ContentItem>,
        track_id: &str,
    ) -> PipelineResult<IngestReport> {
        let (mut owner, writer) = match self.status.admit_indexing(JOB_NAME) {
            Admission::Owner(job) => (Some(job), None),
            Admission::Follower(writer) => (None, Some(writer)),
            Admission::Busy => return Err(PipelineError::Busy),
        };

        let mut report = IngestReport {
            track_id: track_id.to_string(),
            ..IngestReport::default()
        };
        let (docs, indexed_paths) = self.prepare(items, &mut report).await;
        report.accepted = docs.len();

        if !docs.is_empty() {
            self.status.log(format!("Enqueueing {} document(s)", docs.len()));
            report.enqueued = match self.engine.enqueue(docs).await {
                Ok(ids) => ids,
                Err(err) => {
                    log_chain(&err, "failed to enqueue documents");
                    let message = format!("Failed to enqueue documents: {err}");
                    match owner.as_mut() {
                        Some(job) => job.fail(message),
                        None => self.status.log(message),
                    }
                    return Err(PipelineError::engine("enqueue", err));
                }
            };
        }

        for path in &indexed_paths {
            self.registry.mark_indexed(path);
        }

        let has_new = !report.enqueued.is_empty();
        if !has_new && report.accepted > 0 {
            info!(track_id, "all documents were already enqueued");
        }

        let job = match (owner, writer) {
            (Some(job), _) => Some(job),
            (None, Some(writer)) if has_new => writer.hand_off(JOB_NAME),
            _ => None,
        };
        if let Some(job) = job {
            report.processed = self.drive(job, has_new).await?;
        }

        Ok(report)
    }

    /// Runs processing until no caller is waiting on it, then releases the job.
    async fn drive(&self, mut job: JobGuard, mut run: bool) -> PipelineResult<bool> {
        let mut processed = false;
        loop {
            if run {
                let result = self.engine.process_enqueued(&job).await;
                self.status.set_update_status(self.engine.update_flags());
                if let Err(err) = result {
                    log_chain(&err, "document processing failed");
                    job.fail(format!("Document processing failed: {err}"));
                    return Err(PipelineError::engine("process_enqueued", err));
                }
                processed = true;
            }

            if job.try_release() {
                return Ok(processed);
            }
            job.log("Processing additional documents due to pending request");
            run = true;
        }
    }

    async fn prepare(
        &self,
        items: Vec<ContentItem>,
        report: &mut IngestReport,
    ) -> (Vec<NewDocument>, Vec<PathBuf>) {
        let mut files = Vec::new();
        let mut texts = Vec::new();
        let mut seen = HashSet::new();

        for item in items {
            match item {
                ContentItem::File { path } => {
                    if self.registry.is_indexed(&path) || !seen.insert(path.clone()) {
                        debug!(file = %path.display(), "file already indexed");
                        continue;
                    }
                    files.push(FileCandidate {
                        label: file_label(&path),
                        path,
                        temp: None,
                    });
                }
                ContentItem::Temp { file, name } => files.push(FileCandidate {
                    path: file.path().to_path_buf(),
                    label: name,
                    temp: Some(file),
                }),
                ContentItem::Text {
                    content,
                    id,
                    source,
                } => texts.push((content, id, source)),
            }
        }

        sort_collated_by(&mut files, |file| file.path.as_path());

        let mut docs = Vec::new();
        let mut indexed_paths = Vec::new();

        for file in files {
            let FileCandidate { path, label, temp } = file;
            let is_temp = temp.is_some();
            let extracted = self.extract_file(&path, &label).await;
            // the upload copy goes away whether or not extraction worked
            if let Some(temp) = temp {
                if let Err(err) = temp.remove().await {
                    warn!(file = %path.display(), error = %err, "failed to remove temporary file");
                }
            }

            match extracted {
                Ok(content) => {
                    let id = compute_mdhash_id(&sanitize_text(&content), "doc-");
                    docs.push(
                        NewDocument::new(content, label)
                            .with_id(id)
                            .with_track_id(report.track_id.as_str()),
                    );
                    if !is_temp {
                        indexed_paths.push(path);
                    }
                }
                Err((reason, message)) => self.reject(report, label, reason, message).await,
            }
        }

        for (content, id, source) in texts {
            let source = source
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| UNKNOWN_SOURCE.to_string());
            let content = sanitize_text(&content);
            if content.is_empty() {
                let err = ExtractError::EmptyContent {
                    filename: source.clone(),
                };
                self.reject(report, source, err.kind(), err.to_string()).await;
                continue;
            }
            let id = id
                .map(|id| id.trim().to_string())
                .filter(|id| !id.is_empty())
                .unwrap_or_else(|| compute_mdhash_id(&content, "doc-"));
            docs.push(
                NewDocument::new(content, source)
                    .with_id(id)
                    .with_track_id(report.track_id.as_str()),
            );
        }

        (docs, indexed_paths)
    }

    async fn extract_file(
        &self,
        path: &Path,
        label: &str,
    ) -> Result<String, (&'static str, String)> {
        let bytes = self
            .documents
            .read(path)
            .await
            .map_err(|err| ("file_read_error", format!("{err:#}")))?;

        let extractor = self.documents.extractor();
        let filename = label.to_string();
        tokio::task::spawn_blocking(move || extractor.extract(&filename, &bytes))
            .await
            .map_err(|err| ("extraction_error", format!("extraction task failed: {err}")))?
            .map_err(|err| (err.kind(), err.to_string()))
    }

    async fn reject(
        &self,
        report: &mut IngestReport,
        source: String,
        reason: &str,
        message: String,
    ) {
        warn!(file = %source, reason, error = %message, "content item rejected");
        self.status.log(format!("Failed to ingest {source}: {message}"));
        if let Err(err) = self
            .engine
            .record_failure(&source, &report.track_id, reason, &message)
            .await
        {
            error!(error = %err, file = %source, "failed to record rejected item");
        }
        report.rejected.push(RejectedItem {
            source,
            reason: reason.to_string(),
            message,
        });
    }

    /// Indexes files in the input directory that were not queued before.
    pub async fn scan_for_new_files(&self) -> PipelineResult<InsertResponse> {
        let track_id = generate_track_id("scan");
        let root = self.documents.input_dir().to_path_buf();
        let extensions: HashSet<String> = self
            .documents
            .extractor()
            .extensions()
            .map(String::from)
            .collect();

        let registry = Arc::clone(&self.registry);
        let scan_root = root.clone();
        let found = tokio::task::spawn_blocking(move || registry.scan(&scan_root, &extensions))
            .await
            .map_err(|err| PipelineError::io(&root, err))?
            .map_err(|err| PipelineError::io(&root, err))?;
        self.status.set_autoscanned();

        info!(count = found.len(), "found new files to index");
        if found.is_empty() {
            return Ok(InsertResponse {
                status: OperationStatus::Success,
                message: "No new files to index".to_string(),
                track_id,
            });
        }

        let items = found
            .into_iter()
            .map(|path| ContentItem::File { path })
            .collect();
        self.respond(items, track_id, |report| {
            format!(
                "Indexed {} of {} new file(s)",
                report.accepted,
                report.accepted + report.rejected.len()
            )
        })
        .await
    }

    pub async fn enqueue_file(&self, path: PathBuf) -> PipelineResult<InsertResponse> {
        let label = file_label(&path);
        if !self.documents.is_supported_file(&label) {
            return Err(ExtractError::UnsupportedFormat { filename: label }.into());
        }
        let track_id = generate_track_id("insert");
        self.respond(vec![ContentItem::File { path }], track_id, |report| {
            single_file_message(report, &label)
        })
        .await
    }

    /// Stores an upload in the input directory and indexes it.
    pub async fn upload_file(&self, filename: &str, bytes: &[u8]) -> PipelineResult<InsertResponse> {
        let name = self.checked_filename(filename)?;
        if self.documents.path_is_duplicate(&name) {
            return Ok(InsertResponse {
                status: OperationStatus::Duplicated,
                message: format!("File '{name}' already exists in the input directory."),
                track_id: String::new(),
            });
        }

        let path = self
            .documents
            .save_upload(&name, bytes)
            .await
            .map_err(|err| PipelineError::io(self.documents.input_dir().join(&name), err))?;
        let track_id = generate_track_id("upload");
        self.respond(vec![ContentItem::File { path }], track_id, |report| {
            single_file_message(report, &name)
        })
        .await
    }

    /// Indexes bytes through a temporary copy that is removed after extraction.
    pub async fn insert_file(&self, filename: &str, bytes: &[u8]) -> PipelineResult<InsertResponse> {
        let name = self.checked_filename(filename)?;
        let file = self
            .documents
            .save_temp(&name, bytes)
            .await
            .map_err(|err| PipelineError::io(self.documents.temp_dir(), err))?;
        let track_id = generate_track_id("insert");
        let items = vec![ContentItem::Temp {
            file,
            name: name.clone(),
        }];
        self.respond(items, track_id, |report| single_file_message(report, &name))
            .await
    }

    pub async fn insert_files(
        &self,
        files: Vec<(String, Vec<u8>)>,
    ) -> PipelineResult<InsertResponse> {
        let total = files.len();
        let track_id = generate_track_id("insert");
        let mut items = Vec::new();

        for (filename, bytes) in files {
            let name = match self.checked_filename(&filename) {
                Ok(name) => name,
                Err(err) => {
                    warn!(file = %filename, error = %err, "skipping file");
                    continue;
                }
            };
            match self.documents.save_temp(&name, &bytes).await {
                Ok(file) => items.push(ContentItem::Temp { file, name }),
                Err(err) => warn!(file = %name, error = %err, "failed to store temporary file"),
            }
        }

        if items.is_empty() {
            return Ok(InsertResponse {
                status: OperationStatus::Fail,
                message: "No files were successfully inserted".to_string(),
                track_id,
            });
        }

        let report = match self.enqueue_and_process(items, &track_id).await {
            Ok(report) => report,
            Err(err) => return fold_error(err, track_id),
        };

        let inserted = report.accepted;
        let (status, message) = if inserted == total {
            (
                OperationStatus::Success,
                format!("Successfully inserted all {total} files"),
            )
        } else if inserted > 0 {
            (
                OperationStatus::PartialSuccess,
                format!("Partially inserted: {inserted} of {total} files"),
            )
        } else {
            (
                OperationStatus::Fail,
                "No files were successfully inserted".to_string(),
            )
        };
        Ok(InsertResponse {
            status,
            message,
            track_id,
        })
    }

    /// Indexes raw texts. Sources are padded with `unknown_source`; ids must be unique.
    pub async fn enqueue_texts(
        &self,
        texts: Vec<String>,
        sources: Option<Vec<String>>,
        ids: Option<Vec<String>>,
    ) -> PipelineResult<InsertResponse> {
        if texts.is_empty() {
            return Err(PipelineError::InvalidRequest(
                "at least one text is required".to_string(),
            ));
        }

        let mut sources: Vec<String> = sources
            .unwrap_or_default()
            .into_iter()
            .map(|s| s.trim().to_string())
            .collect();
        if sources.len() > texts.len() {
            return Err(PipelineError::InvalidRequest(
                "more sources than texts were provided".to_string(),
            ));
        }
        sources.resize(texts.len(), UNKNOWN_SOURCE.to_string());

        let ids: Vec<Option<String>> = match ids {
            None => vec![None; texts.len()],
            Some(ids) => {
                let ids: Vec<String> = ids.into_iter().map(|id| id.trim().to_string()).collect();
                if ids.len() != texts.len() {
                    return Err(PipelineError::InvalidRequest(
                        "number of ids must match the number of texts".to_string(),
                    ));
                }
                let unique: HashSet<&str> = ids.iter().map(String::as_str).collect();
                if unique.len() != ids.len() {
                    return Err(PipelineError::InvalidRequest("ids must be unique".to_string()));
                }
                ids.into_iter().map(Some).collect()
            }
        };

        let total = texts.len();
        let items = texts
            .into_iter()
            .zip(sources)
            .zip(ids)
            .map(|((content, source), id)| ContentItem::Text {
                content: content.trim().to_string(),
                id,
                source: Some(source),
            })
            .collect();

        let track_id = generate_track_id("insert");
        self.respond(items, track_id, |report| {
            format!("Inserted {} of {} text(s)", report.accepted, total)
        })
        .await
    }

    /// Snapshot with refreshed per-namespace update flags.
    pub fn get_status(&self) -> PipelineStatus {
        self.status.set_update_status(self.engine.update_flags());
        self.status.snapshot()
    }

    /// Document units grouped by status, oldest first.
    pub async fn list_documents(
        &self,
    ) -> PipelineResult<BTreeMap<DocStatus, Vec<DocProcessingStatus>>> {
        let mut grouped = BTreeMap::new();
        for status in DocStatus::ALL {
            let docs = self
                .engine
                .docs_by_status(status)
                .await
                .map_err(|err| PipelineError::engine("docs_by_status", err))?;
            let mut docs: Vec<DocProcessingStatus> = docs.into_values().collect();
            docs.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
            grouped.insert(status, docs);
        }
        Ok(grouped)
    }

    pub async fn clear_all(&self) -> ClearResponse {
        clear::clear_all(
            &self.status,
            self.engine.as_ref(),
            &self.documents,
            &self.registry,
        )
        .await
    }

    /// `None` or an empty list clears the whole response cache.
    pub async fn clear_cache(&self, modes: Option<Vec<String>>) -> PipelineResult<ClearResponse> {
        let modes = modes.filter(|modes| !modes.is_empty());
        if let Some(modes) = &modes {
            let invalid: Vec<String> = modes
                .iter()
                .filter(|mode| !CACHE_MODES.contains(&mode.as_str()))
                .cloned()
                .collect();
            if !invalid.is_empty() {
                return Err(PipelineError::InvalidCacheMode { invalid });
            }
        }

        self.engine
            .clear_cache(modes.as_deref())
            .await
            .map_err(|err| PipelineError::engine("clear_cache", err))?;

        let message = match &modes {
            Some(modes) => format!("Successfully cleared cache for modes: {modes:?}"),
            None => "Successfully cleared all cache".to_string(),
        };
        info!(%message, "llm response cache cleared");
        Ok(ClearResponse::new(OperationStatus::Success, message))
    }

    fn checked_filename(&self, filename: &str) -> PipelineResult<String> {
        let name = self
            .documents
            .sanitize_filename(filename)
            .map_err(|err| PipelineError::InvalidRequest(err.to_string()))?;
        if !self.documents.is_supported_file(&name) {
            return Err(ExtractError::UnsupportedFormat { filename: name }.into());
        }
        Ok(name)
    }

    /// Runs an ingestion call and folds busy and engine failures into a response.
    async fn respond<F>(
        &self,
        items: Vec<ContentItem>,
        track_id: String,
        describe: F,
    ) -> PipelineResult<InsertResponse>
    where
        F: FnOnce(&IngestReport) -> String,
    {
        match self.enqueue_and_process(items, &track_id).await {
            Ok(report) => {
                let status = report.status();
                let message = match status {
                    OperationStatus::Fail => failure_message(&report),
                    _ => describe(&report),
                };
                Ok(InsertResponse {
                    status,
                    message,
                    track_id,
                })
            }
            Err(err) => fold_error(err, track_id),
        }
    }
}

fn fold_error(err: PipelineError, track_id: String) -> PipelineResult<InsertResponse> {
    match err {
        PipelineError::Busy => Ok(InsertResponse {
            status: OperationStatus::Busy,
            message: "Pipeline is busy clearing documents, try again later".to_string(),
            track_id,
        }),
        err @ PipelineError::Engine { .. } => Ok(InsertResponse {
            status: OperationStatus::Fail,
            message: err.to_string(),
            track_id,
        }),
        err => Err(err),
    }
}

fn file_label(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// Nothing enqueued means the file was deduplicated, by the registry or by the engine.
fn single_file_message(report: &IngestReport, name: &str) -> String {
    if report.enqueued.is_empty() {
        format!("File '{name}' was already indexed")
    } else {
        format!("File '{name}' indexed successfully")
    }
}

fn failure_message(report: &IngestReport) -> String {
    match report.rejected.as_slice() {
        [only] => format!("Failed to ingest {}: {}", only.source, only.message),
        rejected => format!("All {} item(s) were rejected", rejected.len()),
    }
}

fn log_chain(err: &anyhow::Error, message: &str) {
    error!(error = %err, "{message}");
    for (depth, cause) in err.chain().skip(1).enumerate() {
        error!(cause_depth = depth + 1, cause = %cause, "caused by");
    }
}
