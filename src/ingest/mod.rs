// In-process ingestion queue: a bounded channel feeding a small worker
// pool. Task identity is derived from the record's natural key, so one
// external record can only be in flight once; tasks that exhaust their
// retry budget land on the dead-letter list instead of disappearing.

mod worker;

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{Notify, mpsc, oneshot};

use crate::enrich::{Embedder, EnrichError, Matcher};
use crate::models::job::ParsedJob;
use crate::store::{JobStore, StoreError};

const CHANNEL_CAPACITY: usize = 256;

/// Deterministic task identity from the record's natural key.
pub fn task_id(external_id: &str, source: &str) -> String {
    format!("{source}:{external_id}")
}

#[derive(Debug, Clone)]
pub struct IngestConfig {
    pub workers: usize,
    pub max_attempts: u32,
    pub backoff_base: Duration,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            max_attempts: 3,
            backoff_base: Duration::from_secs(2),
        }
    }
}

/// Collaborators each task needs.
pub struct IngestContext {
    pub jobs: Arc<dyn JobStore>,
    pub embedder: Arc<dyn Embedder>,
    pub matcher: Arc<dyn Matcher>,
}

#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("enrichment failed: {0}")]
    Enrichment(#[from] EnrichError),

    #[error("ingestion queue is not accepting tasks")]
    QueueClosed,
}

/// Terminal disposition of one task.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskOutcome {
    /// New canonical record persisted.
    Inserted { job_id: i32 },
    /// Record already existed; freshness timestamp refreshed.
    AlreadyExists { job_id: i32 },
    /// Persisted as a content duplicate of an existing canonical record.
    DuplicateContent { job_id: i32, canonical_id: i32 },
    /// Retry budget exhausted; retained on the dead-letter list.
    DeadLettered { error: String },
}

/// Result of submitting one parsed job.
pub enum Submission {
    /// Accepted; the ticket resolves once the task reaches a terminal
    /// outcome.
    Queued(TaskTicket),
    /// A task for the same external record is already pending.
    Duplicate,
}

pub struct TaskTicket {
    pub task_id: String,
    #[allow(dead_code)]
    pub outcome: oneshot::Receiver<TaskOutcome>,
}

/// A task that exhausted its retries, kept queryable for inspection.
#[derive(Debug, Clone, Serialize)]
pub struct DeadLetter {
    pub task_id: String,
    pub title: String,
    pub company: String,
    pub error: String,
    pub attempts: u32,
    pub failed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct QueueSnapshot {
    pub depth: usize,
    pub submitted: u64,
    pub inserted: u64,
    pub already_seen: u64,
    pub duplicates: u64,
    pub retries: u64,
    pub dead_lettered: u64,
}

struct IngestTask {
    id: String,
    job: ParsedJob,
    attempt: u32,
}

struct QueuedTask {
    task: IngestTask,
    outcome_tx: oneshot::Sender<TaskOutcome>,
}

#[derive(Default)]
struct QueueState {
    pending: Mutex<HashSet<String>>,
    dead_letters: Mutex<Vec<DeadLetter>>,
    drained: Notify,
    submitted: AtomicU64,
    inserted: AtomicU64,
    already_seen: AtomicU64,
    duplicates: AtomicU64,
    retries: AtomicU64,
    dead_lettered: AtomicU64,
}

pub struct IngestQueue {
    tx: mpsc::Sender<QueuedTask>,
    state: Arc<QueueState>,
}

impl IngestQueue {
    /// Spawn the worker pool and return the submission handle. Workers
    /// exit when the last handle is dropped.
    pub fn start(ctx: IngestContext, config: IngestConfig) -> Arc<IngestQueue> {
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let state = Arc::new(QueueState::default());
        let rx = Arc::new(tokio::sync::Mutex::new(rx));
        let ctx = Arc::new(ctx);
        for worker_id in 0..config.workers.max(1) {
            tokio::spawn(worker::run(
                worker_id,
                Arc::clone(&rx),
                Arc::clone(&ctx),
                config.clone(),
                Arc::clone(&state),
            ));
        }
        Arc::new(IngestQueue { tx, state })
    }

    /// Queue one parsed job. Collapses to `Duplicate` when a task for
    /// the same external record is already pending.
    pub async fn submit(&self, job: ParsedJob) -> Result<Submission, IngestError> {
        let id = task_id(&job.external_id, &job.source);
        {
            let mut pending = self.state.pending.lock().unwrap();
            if !pending.insert(id.clone()) {
                tracing::debug!("task {id} already pending, collapsing duplicate submission");
                return Ok(Submission::Duplicate);
            }
        }

        let (outcome_tx, outcome) = oneshot::channel();
        let queued = QueuedTask {
            task: IngestTask {
                id: id.clone(),
                job,
                attempt: 0,
            },
            outcome_tx,
        };
        if self.tx.send(queued).await.is_err() {
            self.state.pending.lock().unwrap().remove(&id);
            return Err(IngestError::QueueClosed);
        }
        self.state.submitted.fetch_add(1, Ordering::SeqCst);
        Ok(Submission::Queued(TaskTicket { task_id: id, outcome }))
    }

    /// Tasks submitted but not yet terminally resolved.
    pub fn depth(&self) -> usize {
        self.state.pending.lock().unwrap().len()
    }

    /// Wait until every pending task has resolved.
    pub async fn drain(&self) {
        loop {
            let notified = self.state.drained.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.depth() == 0 {
                return;
            }
            notified.await;
        }
    }

    pub fn dead_letters(&self) -> Vec<DeadLetter> {
        self.state.dead_letters.lock().unwrap().clone()
    }

    pub fn snapshot(&self) -> QueueSnapshot {
        QueueSnapshot {
            depth: self.depth(),
            submitted: self.state.submitted.load(Ordering::SeqCst),
            inserted: self.state.inserted.load(Ordering::SeqCst),
            already_seen: self.state.already_seen.load(Ordering::SeqCst),
            duplicates: self.state.duplicates.load(Ordering::SeqCst),
            retries: self.state.retries.load(Ordering::SeqCst),
            dead_lettered: self.state.dead_lettered.load(Ordering::SeqCst),
        }
    }
}
