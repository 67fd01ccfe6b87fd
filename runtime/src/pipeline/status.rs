//! Process-wide pipeline status with busy-guard semantics.
//!
//! The store is a cheap handle around one lock. Every operation takes the lock for a
//! single read or mutation; nothing holds it across an await. Exclusive jobs are
//! represented by a [`JobGuard`] that flips `busy` back to false when dropped, so the
//! status is released on every exit path of the owning task, including panics and
//! cancellation.

use std::{
    collections::{BTreeMap, VecDeque},
    sync::Arc,
};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tracing::debug;

use crate::engine::ProgressSink;

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct PipelineStatus {
    pub autoscanned: bool,
    pub busy: bool,
    pub job_name: String,
    pub job_start: Option<DateTime<Utc>>,
    pub docs: usize,
    pub batchs: usize,
    pub cur_batch: usize,
    pub request_pending: bool,
    pub latest_message: String,
    pub history_messages: VecDeque<String>,
    pub update_status: BTreeMap<String, Vec<bool>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobKind {
    Indexing,
    Clearing,
}

#[derive(Debug)]
struct Inner {
    status: PipelineStatus,
    job: Option<JobKind>,
    /// Callers enqueueing next to a running indexing job.
    writers: usize,
}

#[derive(Clone)]
pub struct PipelineStatusStore {
    inner: Arc<Mutex<Inner>>,
    max_history: usize,
}

/// Outcome of asking to take part in indexing.
pub enum Admission {
    /// Indexing was idle; the caller now owns the job.
    Owner(JobGuard),
    /// Another indexing job runs; the caller may enqueue and then hand off.
    Follower(WriterGuard),
    /// A clear is running.
    Busy,
}

impl PipelineStatusStore {
    pub fn new(max_history: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                status: PipelineStatus::default(),
                job: None,
                writers: 0,
            })),
            max_history: max_history.max(1),
        }
    }

    pub fn snapshot(&self) -> PipelineStatus {
        self.inner.lock().status.clone()
    }

    pub fn is_busy(&self) -> bool {
        self.inner.lock().status.busy
    }

    /// Try-lock: returns `None` immediately when any job runs.
    ///
    /// A clear additionally waits for no caller to be in the middle of an enqueue.
    pub fn try_begin(&self, kind: JobKind, job_name: &str) -> Option<JobGuard> {
        let mut inner = self.inner.lock();
        if inner.status.busy || (kind == JobKind::Clearing && inner.writers > 0) {
            return None;
        }
        self.start_locked(&mut inner, kind, job_name);
        drop(inner);
        Some(self.guard(kind))
    }

    pub fn admit_indexing(&self, job_name: &str) -> Admission {
        let mut inner = self.inner.lock();
        match inner.job {
            None => {
                self.start_locked(&mut inner, JobKind::Indexing, job_name);
                drop(inner);
                Admission::Owner(self.guard(JobKind::Indexing))
            }
            Some(JobKind::Indexing) => {
                inner.writers += 1;
                drop(inner);
                Admission::Follower(WriterGuard {
                    store: self.clone(),
                })
            }
            Some(JobKind::Clearing) => Admission::Busy,
        }
    }

    /// Appends to the history and updates `latest_message`.
    pub fn log(&self, message: impl Into<String>) {
        let message = message.into();
        let mut inner = self.inner.lock();
        Self::push_locked(&mut inner.status, message, self.max_history);
    }

    pub fn set_autoscanned(&self) {
        self.inner.lock().status.autoscanned = true;
    }

    pub fn set_update_status(&self, flags: BTreeMap<String, Vec<bool>>) {
        self.inner.lock().status.update_status = flags;
    }

    fn guard(&self, kind: JobKind) -> JobGuard {
        JobGuard {
            store: self.clone(),
            kind,
            failure: None,
            released: false,
        }
    }

    fn start_locked(&self, inner: &mut Inner, kind: JobKind, job_name: &str) {
        inner.job = Some(kind);
        let status = &mut inner.status;
        status.busy = true;
        status.job_name = job_name.to_string();
        status.job_start = Some(Utc::now());
        status.docs = 0;
        status.batchs = 0;
        status.cur_batch = 0;
        status.request_pending = false;
        status.history_messages.clear();
        Self::push_locked(status, format!("{job_name} started"), self.max_history);
        debug!(job = job_name, "pipeline job started");
    }

    fn push_locked(status: &mut PipelineStatus, message: String, max_history: usize) {
        while status.history_messages.len() >= max_history {
            status.history_messages.pop_front();
        }
        status.latest_message.clone_from(&message);
        status.history_messages.push_back(message);
    }

    /// The closing message names the failure, if the job recorded one.
    fn release_locked(&self, inner: &mut Inner, kind: JobKind, failure: Option<&str>) {
        if inner.job != Some(kind) {
            return;
        }
        inner.job = None;
        inner.status.busy = false;
        inner.status.request_pending = false;
        let job = match kind {
            JobKind::Indexing => "Document processing pipeline",
            JobKind::Clearing => "Document clearing process",
        };
        let message = match failure {
            Some(reason) => format!("{job} failed: {reason}"),
            None => format!("{job} completed"),
        };
        Self::push_locked(&mut inner.status, message, self.max_history);
    }
}

/// Ownership of the running job.
pub struct JobGuard {
    store: PipelineStatusStore,
    kind: JobKind,
    failure: Option<String>,
    released: bool,
}

impl JobGuard {
    pub fn kind(&self) -> JobKind {
        self.kind
    }

    pub fn log(&self, message: impl Into<String>) {
        self.store.log(message);
    }

    /// Logs `message` and marks the run as failed; the release message reports it.
    pub fn fail(&mut self, message: impl Into<String>) {
        let message = message.into();
        self.store.log(message.clone());
        self.failure = Some(message);
    }

    /// Releases the job unless another caller asked for a re-run meanwhile.
    ///
    /// Returns `false` (and consumes the request) when a re-run is pending; the
    /// owner must process again and retry.
    pub fn try_release(&mut self) -> bool {
        let mut inner = self.store.inner.lock();
        if inner.status.request_pending {
            inner.status.request_pending = false;
            return false;
        }
        self.store
            .release_locked(&mut inner, self.kind, self.failure.as_deref());
        self.released = true;
        true
    }
}

impl ProgressSink for JobGuard {
    fn message(&self, message: String) {
        self.store.log(message);
    }

    fn set_counts(&self, docs: usize, batchs: usize) {
        let mut inner = self.store.inner.lock();
        inner.status.docs = docs;
        inner.status.batchs = batchs;
        inner.status.cur_batch = 0;
    }

    fn set_current_batch(&self, cur_batch: usize) {
        self.store.inner.lock().status.cur_batch = cur_batch;
    }
}

impl Drop for JobGuard {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        let mut inner = self.store.inner.lock();
        self.store
            .release_locked(&mut inner, self.kind, self.failure.as_deref());
    }
}

/// Held while enqueueing next to a running job. Blocks a clear from starting.
pub struct WriterGuard {
    store: PipelineStatusStore,
}

impl WriterGuard {
    /// Asks the running owner to process again, or takes over if it already finished.
    pub fn hand_off(self, job_name: &str) -> Option<JobGuard> {
        let mut inner = self.store.inner.lock();
        if inner.status.busy {
            inner.status.request_pending = true;
            return None;
        }
        self.store
            .start_locked(&mut inner, JobKind::Indexing, job_name);
        drop(inner);
        Some(self.store.guard(JobKind::Indexing))
    }
}

impl Drop for WriterGuard {
    fn drop(&mut self) {
        let mut inner = self.store.inner.lock();
        inner.writers = inner.writers.saturating_sub(1);
    }
}
