use std::path::PathBuf;

use serde::Serialize;

use super::document_manager::TempFile;

/// Closed set of outcomes reported to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationStatus {
    Success,
    PartialSuccess,
    Busy,
    Fail,
    Duplicated,
}

/// One unit of content handed to the orchestrator.
#[derive(Debug)]
pub enum ContentItem {
    /// A file inside the input directory; tracked by the file registry.
    File { path: PathBuf },
    /// An upload copy, deleted once its content has been extracted.
    Temp { file: TempFile, name: String },
    Text {
        content: String,
        id: Option<String>,
        source: Option<String>,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct RejectedItem {
    pub source: String,
    pub reason: String,
    pub message: String,
}

/// What happened to one `enqueue_and_process` call.
#[derive(Debug, Clone, Default, Serialize)]
pub struct IngestReport {
    pub track_id: String,
    /// Items that survived extraction and validation.
    pub accepted: usize,
    /// Ids that were new to the engine.
    pub enqueued: Vec<String>,
    pub rejected: Vec<RejectedItem>,
    /// Whether this call ran the engine's processing step.
    pub processed: bool,
}

impl IngestReport {
    pub fn status(&self) -> OperationStatus {
        if self.rejected.is_empty() {
            OperationStatus::Success
        } else if self.accepted > 0 {
            OperationStatus::PartialSuccess
        } else {
            OperationStatus::Fail
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct InsertResponse {
    pub status: OperationStatus,
    pub message: String,
    pub track_id: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ClearResponse {
    pub status: OperationStatus,
    pub message: String,
}

impl ClearResponse {
    pub fn new(status: OperationStatus, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }
}
