// Scrape orchestration. One run at a time walks the spec list, skipping
// fresh keywords, gating every search on the monthly budget, and feeding
// parsed records to the ingestion queue. Per-search failures are
// isolated; failures of the usage accounting itself abort the run.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::Utc;

use crate::client::SearchApi;
use crate::ingest::{IngestQueue, Submission};
use crate::keywords::KeywordCache;
use crate::models::run::ScrapeKind;
use crate::store::{RunStore, StoreError};
use crate::usage::UsageTracker;

use super::{parse, specs};

/// Clears the single-flight slot when a run ends, however it ends.
struct RunGuard {
    flag: Arc<AtomicBool>,
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::SeqCst);
    }
}

pub struct Orchestrator {
    api: Arc<dyn SearchApi>,
    usage: Arc<UsageTracker>,
    keywords: Arc<KeywordCache>,
    queue: Arc<IngestQueue>,
    runs: Arc<dyn RunStore>,
    running: Arc<AtomicBool>,
}

impl Orchestrator {
    pub fn new(
        api: Arc<dyn SearchApi>,
        usage: Arc<UsageTracker>,
        keywords: Arc<KeywordCache>,
        queue: Arc<IngestQueue>,
        runs: Arc<dyn RunStore>,
    ) -> Arc<Self> {
        Arc::new(Self {
            api,
            usage,
            keywords,
            queue,
            runs,
            running: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn try_acquire(&self) -> Option<RunGuard> {
        self.running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .ok()
            .map(|_| RunGuard {
                flag: Arc::clone(&self.running),
            })
    }

    /// Run a scrape and wait for it to finish. Returns the run id, or
    /// `None` when another run already holds the slot.
    pub async fn run_to_completion(&self, kind: ScrapeKind) -> Result<Option<i32>, StoreError> {
        let Some(guard) = self.try_acquire() else {
            return Ok(None);
        };
        let run = self.runs.create(kind).await?;
        self.execute(run.id, kind, guard).await;
        Ok(Some(run.id))
    }

    /// Start a scrape in the background. Returns the new run id, or
    /// `None` when another run already holds the slot.
    pub async fn spawn_run(
        self: &Arc<Self>,
        kind: ScrapeKind,
    ) -> Result<Option<i32>, StoreError> {
        let Some(guard) = self.try_acquire() else {
            return Ok(None);
        };
        let run = self.runs.create(kind).await?;
        let run_id = run.id;
        let this = Arc::clone(self);
        tokio::spawn(async move {
            this.execute(run_id, kind, guard).await;
        });
        Ok(Some(run_id))
    }

    async fn execute(&self, run_id: i32, kind: ScrapeKind, guard: RunGuard) {
        let _guard = guard;

        let mut specs = specs::predefined();
        if kind == ScrapeKind::Subset {
            specs.truncate(specs::SUBSET_LEN);
        }
        tracing::info!(
            "scrape run {run_id} ({}) started, {} searches",
            kind.as_str(),
            specs.len()
        );

        let mut jobs_found: i32 = 0;
        let mut jobs_queued: i32 = 0;
        let mut errors: Vec<String> = Vec::new();

        for (i, spec) in specs.iter().enumerate() {
            if self.keywords.is_fresh(&spec.query).await {
                tracing::info!(
                    "skipping '{}', fetched within the refresh window",
                    spec.query
                );
                continue;
            }

            let budget = match self.usage.can_make_request().await {
                Ok(budget) => budget,
                Err(e) => {
                    errors.push(format!("usage state unavailable: {e}"));
                    self.finalize(run_id, "failed", jobs_found, jobs_queued, &errors)
                        .await;
                    return;
                }
            };
            if !budget.allowed {
                let reason = budget
                    .reason
                    .unwrap_or_else(|| "request budget exhausted".to_string());
                let skipped: Vec<&str> = specs[i..].iter().map(|s| s.query.as_str()).collect();
                tracing::warn!(
                    "run {run_id} stopping early: {reason}; {} searches skipped",
                    skipped.len()
                );
                errors.push(format!(
                    "{reason}; skipped {} searches: {}",
                    skipped.len(),
                    skipped.join(", ")
                ));
                break;
            }

            let raw = match self.api.search(spec).await {
                Ok(raw) => raw,
                Err(e) => {
                    tracing::warn!("search '{}' failed: {e}", spec.query);
                    errors.push(format!("search '{}' failed: {e}", spec.query));
                    continue;
                }
            };

            // Budget and freshness accounting must land on disk before
            // the records are used; a run that cannot account for its
            // own spend must not keep calling out.
            if let Err(e) = self.usage.record_request(Some(&spec.query)).await {
                tracing::error!("usage accounting failed, aborting run {run_id}: {e}");
                errors.push(format!("usage accounting failed after '{}': {e}", spec.query));
                self.finalize(run_id, "failed", jobs_found, jobs_queued, &errors)
                    .await;
                return;
            }
            if let Err(e) = self.keywords.record_fetch(&spec.query, raw.len()).await {
                tracing::error!("keyword accounting failed, aborting run {run_id}: {e}");
                errors.push(format!(
                    "keyword accounting failed after '{}': {e}",
                    spec.query
                ));
                self.finalize(run_id, "failed", jobs_found, jobs_queued, &errors)
                    .await;
                return;
            }

            jobs_found += raw.len() as i32;

            for job in parse::parse_batch(&raw, Utc::now()) {
                match self.queue.submit(job).await {
                    Ok(Submission::Queued(ticket)) => {
                        tracing::debug!("queued {}", ticket.task_id);
                        jobs_queued += 1;
                    }
                    Ok(Submission::Duplicate) => {}
                    Err(e) => {
                        tracing::warn!("could not queue job from '{}': {e}", spec.query);
                        errors.push(format!("queueing from '{}' failed: {e}", spec.query));
                    }
                }
            }
        }

        let status = if errors.is_empty() { "success" } else { "partial" };
        self.finalize(run_id, status, jobs_found, jobs_queued, &errors)
            .await;
    }

    async fn finalize(
        &self,
        run_id: i32,
        status: &str,
        jobs_found: i32,
        jobs_queued: i32,
        errors: &[String],
    ) {
        tracing::info!(
            "scrape run {run_id} finished ({status}): {jobs_found} found, {jobs_queued} queued, {} errors",
            errors.len()
        );
        if let Err(e) = self
            .runs
            .finalize(run_id, status, jobs_found, jobs_queued, errors)
            .await
        {
            tracing::error!("could not finalize run {run_id}: {e}");
        }
    }
}
