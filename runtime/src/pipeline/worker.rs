//! Channel-fed background worker around [`IngestionPipeline`].
//!
//! Every submitted job is answered on its own oneshot channel, so callers can await
//! completion and observe failures instead of firing and forgetting.

use std::{path::PathBuf, sync::Arc};

use anyhow::{Context, Result, anyhow};
use serde::Serialize;
use tokio::{
    sync::{mpsc, oneshot},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{
    pipeline::IngestionPipeline,
    types::{ClearResponse, InsertResponse},
};
use crate::error::PipelineResult;

#[derive(Debug, Clone)]
pub enum IngestJob {
    Scan,
    Files(Vec<PathBuf>),
    Texts {
        texts: Vec<String>,
        sources: Option<Vec<String>>,
        ids: Option<Vec<String>>,
    },
    Clear,
}

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum JobOutput {
    Insert(Vec<InsertResponse>),
    Clear(ClearResponse),
}

pub type JobOutcome = PipelineResult<JobOutput>;

struct Envelope {
    job: IngestJob,
    reply: oneshot::Sender<JobOutcome>,
}

pub struct IngestionWorker {
    sender: mpsc::Sender<Envelope>,
    token: CancellationToken,
    handle: JoinHandle<()>,
}

impl IngestionWorker {
    pub fn spawn(
        pipeline: Arc<IngestionPipeline>,
        token: CancellationToken,
        capacity: usize,
    ) -> Self {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let handle = tokio::spawn(run(pipeline, receiver, token.clone()));
        Self {
            sender,
            token,
            handle,
        }
    }

    /// Queues `job`; the returned receiver resolves once the job finished.
    pub async fn submit(&self, job: IngestJob) -> Result<oneshot::Receiver<JobOutcome>> {
        let (reply, receiver) = oneshot::channel();
        self.sender
            .send(Envelope { job, reply })
            .await
            .map_err(|_| anyhow!("ingestion worker has stopped"))?;
        Ok(receiver)
    }

    /// Submits `job` and waits for its outcome.
    pub async fn execute(&self, job: IngestJob) -> Result<JobOutcome> {
        self.submit(job)
            .await?
            .await
            .context("ingestion worker dropped the job")
    }

    /// Stops taking jobs, runs the ones already queued and waits for the worker to exit.
    ///
    /// Cancelling the token instead stops after the job in flight and drops the queue.
    pub async fn shutdown(self) -> Result<()> {
        drop(self.sender);
        let stopped = self.handle.await.context("ingestion worker panicked");
        self.token.cancel();
        stopped
    }
}

async fn run(
    pipeline: Arc<IngestionPipeline>,
    mut receiver: mpsc::Receiver<Envelope>,
    token: CancellationToken,
) {
    info!("ingestion worker started");
    loop {
        let envelope = tokio::select! {
            biased;
            _ = token.cancelled() => break,
            envelope = receiver.recv() => match envelope {
                Some(envelope) => envelope,
                None => break,
            },
        };

        let Envelope { job, reply } = envelope;
        debug!(?job, "running ingestion job");
        let outcome = execute(&pipeline, job).await;
        if reply.send(outcome).is_err() {
            warn!("caller stopped waiting for ingestion job");
        }
    }
    info!("ingestion worker stopped");
}

async fn execute(pipeline: &IngestionPipeline, job: IngestJob) -> JobOutcome {
    match job {
        IngestJob::Scan => Ok(JobOutput::Insert(vec![
            pipeline.scan_for_new_files().await?,
        ])),
        IngestJob::Files(paths) => {
            let mut responses = Vec::with_capacity(paths.len());
            for path in paths {
                responses.push(pipeline.enqueue_file(path).await?);
            }
            Ok(JobOutput::Insert(responses))
        }
        IngestJob::Texts {
            texts,
            sources,
            ids,
        } => Ok(JobOutput::Insert(vec![
            pipeline.enqueue_texts(texts, sources, ids).await?,
        ])),
        IngestJob::Clear => Ok(JobOutput::Clear(pipeline.clear_all().await)),
    }
}
