//! Drops every engine partition and empties the input directory.
//!
//! Runs only while holding the exclusive job. Backend drops are attempted
//! concurrently and their failures collected; files are deleted only when at least
//! one backend dropped, or when there was nothing to drop.

use futures::future::join_all;
use tracing::{error, info, warn};

use super::{
    document_manager::DocumentManager,
    registry::FileRegistry,
    status::{JobKind, PipelineStatusStore},
    types::{ClearResponse, OperationStatus},
};
use crate::{engine::RetrievalEngine, error::PipelineError};

const JOB_NAME: &str = "Clearing Documents";

pub async fn clear_all(
    status: &PipelineStatusStore,
    engine: &dyn RetrievalEngine,
    documents: &DocumentManager,
    registry: &FileRegistry,
) -> ClearResponse {
    let Some(mut job) = status.try_begin(JobKind::Clearing, JOB_NAME) else {
        warn!("clear requested while the pipeline is busy");
        return ClearResponse::new(
            OperationStatus::Busy,
            "Cannot clear documents while pipeline is busy",
        );
    };

    job.log("Starting document clearing process");
    info!("starting document clearing process");

    let backends = engine.backends();
    let mut errors = Vec::new();

    if !backends.is_empty() {
        job.log("Starting to drop storage components");
        let results = join_all(backends.iter().map(|backend| backend.drop_all())).await;

        let mut dropped = 0;
        for (backend, result) in backends.iter().zip(results) {
            match result {
                Ok(()) => {
                    dropped += 1;
                    info!(namespace = backend.namespace(), "storage dropped");
                }
                Err(err) => {
                    let message = format!("Error dropping {}: {err:#}", backend.namespace());
                    error!(namespace = backend.namespace(), error = %err, "failed to drop storage");
                    job.log(message.clone());
                    errors.push(message);
                }
            }
        }

        if dropped == 0 {
            let err = PipelineError::AllBackendsFailed { errors };
            error!(error = %err, "aborting document clearing");
            job.fail("All storage drop operations failed. Aborting document clearing process.");
            return ClearResponse::new(
                OperationStatus::Fail,
                "All storage drop operations failed. Aborting document clearing process.",
            );
        }

        if errors.is_empty() {
            job.log(format!(
                "Successfully dropped all {} storage components",
                backends.len()
            ));
        } else {
            job.log(format!(
                "Dropped {dropped} storage components with {} errors",
                errors.len()
            ));
        }
    }

    job.log("Starting to delete files in input directory");
    let mut deleted = 0usize;
    let mut failed = 0usize;

    match documents.list_input_files().await {
        Ok(files) => {
            for path in files {
                match documents.remove(&path).await {
                    Ok(()) => deleted += 1,
                    Err(err) => {
                        failed += 1;
                        warn!(file = %path.display(), error = %err, "failed to delete input file");
                    }
                }
            }
        }
        Err(err) => {
            let message = format!("Error listing input directory: {err:#}");
            error!(error = %err, "failed to list input directory");
            job.log(message.clone());
            errors.push(message);
        }
    }

    if failed > 0 {
        job.log(format!("Deleted {deleted} files with {failed} errors"));
        errors.push(format!("Failed to delete {failed} files"));
    } else {
        job.log(format!("Successfully deleted {deleted} files"));
    }

    registry.reset();

    let response = if errors.is_empty() {
        ClearResponse::new(
            OperationStatus::Success,
            format!("All documents cleared successfully. Deleted {deleted} files."),
        )
    } else {
        ClearResponse::new(
            OperationStatus::PartialSuccess,
            format!("Cleared documents with some errors. Deleted {deleted} files."),
        )
    };
    info!(deleted, errors = errors.len(), "document clearing finished");
    job.log(response.message.clone());
    response
}
