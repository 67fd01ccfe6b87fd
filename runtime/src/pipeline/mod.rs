pub mod clear;
pub mod document_manager;
pub mod pipeline;
pub mod registry;
pub mod status;
pub mod types;
pub mod worker;

pub use document_manager::{DocumentManager, FileRepository, FsFileRepository, TempFile};
pub use pipeline::IngestionPipeline;
pub use registry::{FileRegistry, TEMP_PREFIX};
pub use status::{Admission, JobGuard, JobKind, PipelineStatus, PipelineStatusStore, WriterGuard};
pub use types::{
    ClearResponse, ContentItem, IngestReport, InsertResponse, OperationStatus, RejectedItem,
};
pub use worker::{IngestJob, IngestionWorker, JobOutcome, JobOutput};
