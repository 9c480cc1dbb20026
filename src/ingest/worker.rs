use std::sync::Arc;
use std::sync::atomic::Ordering;

use chrono::Utc;
use tokio::sync::mpsc;

use super::{
    DeadLetter, IngestConfig, IngestContext, IngestError, IngestTask, QueueState, QueuedTask,
    TaskOutcome,
};
use crate::models::job::{CreateJob, JobRecord, ParsedJob};

pub(super) async fn run(
    worker_id: usize,
    rx: Arc<tokio::sync::Mutex<mpsc::Receiver<QueuedTask>>>,
    ctx: Arc<IngestContext>,
    config: IngestConfig,
    state: Arc<QueueState>,
) {
    loop {
        let queued = { rx.lock().await.recv().await };
        let Some(QueuedTask {
            mut task,
            outcome_tx,
        }) = queued
        else {
            tracing::debug!("ingest worker {worker_id} shutting down");
            return;
        };

        let outcome = run_task(&ctx, &config, &state, &mut task).await;
        finish(&state, &task, &outcome);
        // the submitter may have dropped its ticket
        let _ = outcome_tx.send(outcome);
    }
}

fn finish(state: &QueueState, task: &IngestTask, outcome: &TaskOutcome) {
    let counter = match outcome {
        TaskOutcome::Inserted { .. } => &state.inserted,
        TaskOutcome::AlreadyExists { .. } => &state.already_seen,
        TaskOutcome::DuplicateContent { .. } => &state.duplicates,
        TaskOutcome::DeadLettered { .. } => &state.dead_lettered,
    };
    counter.fetch_add(1, Ordering::SeqCst);

    let mut pending = state.pending.lock().unwrap();
    pending.remove(&task.id);
    if pending.is_empty() {
        state.drained.notify_waiters();
    }
}

/// Drive one task through its retry budget. The task only ever leaves
/// with a terminal outcome; exhausted tasks are retained as dead
/// letters.
async fn run_task(
    ctx: &IngestContext,
    config: &IngestConfig,
    state: &QueueState,
    task: &mut IngestTask,
) -> TaskOutcome {
    loop {
        task.attempt += 1;
        match process(ctx, &task.job).await {
            Ok(outcome) => return outcome,
            Err(e) => {
                if task.attempt >= config.max_attempts {
                    tracing::error!(
                        "task {} dead-lettered after {} attempts: {e}",
                        task.id,
                        task.attempt
                    );
                    state.dead_letters.lock().unwrap().push(DeadLetter {
                        task_id: task.id.clone(),
                        title: task.job.title.clone(),
                        company: task.job.company.clone(),
                        error: e.to_string(),
                        attempts: task.attempt,
                        failed_at: Utc::now(),
                    });
                    return TaskOutcome::DeadLettered {
                        error: e.to_string(),
                    };
                }
                state.retries.fetch_add(1, Ordering::SeqCst);
                let wait = config.backoff_base * 2u32.pow(task.attempt - 1);
                tracing::warn!(
                    "task {} attempt {} failed ({e}), retrying in {}ms",
                    task.id,
                    task.attempt,
                    wait.as_millis()
                );
                tokio::time::sleep(wait).await;
            }
        }
    }
}

async fn process(ctx: &IngestContext, job: &ParsedJob) -> Result<TaskOutcome, IngestError> {
    if let Some(existing) = ctx
        .jobs
        .find_by_external_id(&job.external_id, &job.source)
        .await?
    {
        ctx.jobs.touch_last_seen(existing.id).await?;
        tracing::debug!(
            "job {} already ingested as #{}, refreshed last_seen",
            job.external_id,
            existing.id
        );
        return Ok(TaskOutcome::AlreadyExists {
            job_id: existing.id,
        });
    }

    let embedding = ctx.embedder.embed(&job.embedding_text()).await?;

    match ctx.jobs.find_canonical(&job.dedup_key).await? {
        Some(canonical) => {
            let record = insert_or_compensate(ctx, job, &embedding, Some(canonical.id)).await?;
            tracing::info!(
                "job {} persisted as #{}, content duplicate of #{}",
                job.external_id,
                record.id,
                canonical.id
            );
            Ok(TaskOutcome::DuplicateContent {
                job_id: record.id,
                canonical_id: canonical.id,
            })
        }
        None => {
            let record = insert_or_compensate(ctx, job, &embedding, None).await?;
            if let Err(e) = ctx.matcher.match_job(record.id, &embedding).await {
                tracing::warn!("matching failed for job #{} (non-fatal): {e}", record.id);
            }
            tracing::info!("job {} persisted as #{}", job.external_id, record.id);
            Ok(TaskOutcome::Inserted { job_id: record.id })
        }
    }
}

/// Insert, and on failure remove any row the failed call may still have
/// left behind so the retry path starts from a clean slate.
async fn insert_or_compensate(
    ctx: &IngestContext,
    job: &ParsedJob,
    embedding: &[f32],
    canonical_id: Option<i32>,
) -> Result<JobRecord, IngestError> {
    let create = CreateJob {
        job: job.clone(),
        embedding: embedding.to_vec(),
        is_duplicate: canonical_id.is_some(),
        canonical_id,
    };
    match ctx.jobs.insert(create).await {
        Ok(record) => Ok(record),
        Err(e) => {
            if let Ok(Some(partial)) = ctx
                .jobs
                .find_by_external_id(&job.external_id, &job.source)
                .await
            {
                match ctx.jobs.delete(partial.id).await {
                    Ok(()) => tracing::info!(
                        "removed partially persisted job #{} after failed insert",
                        partial.id
                    ),
                    Err(del) => tracing::error!(
                        "could not remove partially persisted job #{}: {del}",
                        partial.id
                    ),
                }
            }
            Err(e.into())
        }
    }
}
