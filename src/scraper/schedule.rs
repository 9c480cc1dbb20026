// Cron-driven scrapes and run-history cleanup. Each tick goes through
// the orchestrator, so a tick that overlaps a run in progress is skipped
// rather than stacked.

use std::sync::Arc;

use chrono::Utc;
use tokio_cron_scheduler::{Job, JobScheduler};

use crate::models::run::ScrapeKind;
use crate::store::RunStore;

use super::orchestrator::Orchestrator;

#[derive(Debug, Clone)]
pub struct ScheduleConfig {
    pub full_cron: String,
    pub subset_cron: String,
    pub cleanup_cron: String,
    pub run_retention_days: i64,
}

/// Start all scheduled tasks. The returned handle must stay alive for
/// the jobs to keep firing.
pub async fn start(
    config: ScheduleConfig,
    orchestrator: Arc<Orchestrator>,
    runs: Arc<dyn RunStore>,
) -> anyhow::Result<JobScheduler> {
    let scheduler = JobScheduler::new().await?;

    let full = Arc::clone(&orchestrator);
    let full_job = Job::new_async(config.full_cron.as_str(), move |_uuid, _lock| {
        let orchestrator = Arc::clone(&full);
        Box::pin(async move {
            run_scheduled(&orchestrator, ScrapeKind::Full).await;
        })
    })?;
    scheduler.add(full_job).await?;

    let subset = Arc::clone(&orchestrator);
    let subset_job = Job::new_async(config.subset_cron.as_str(), move |_uuid, _lock| {
        let orchestrator = Arc::clone(&subset);
        Box::pin(async move {
            run_scheduled(&orchestrator, ScrapeKind::Subset).await;
        })
    })?;
    scheduler.add(subset_job).await?;

    let retention_days = config.run_retention_days;
    let cleanup_job = Job::new_async(config.cleanup_cron.as_str(), move |_uuid, _lock| {
        let runs = Arc::clone(&runs);
        Box::pin(async move {
            let cutoff = Utc::now() - chrono::Duration::days(retention_days);
            match runs.delete_finished_before(cutoff).await {
                Ok(0) => tracing::debug!("run history cleanup: nothing to delete"),
                Ok(n) => tracing::info!("run history cleanup deleted {n} finished runs"),
                Err(e) => tracing::error!("run history cleanup failed: {e}"),
            }
        })
    })?;
    scheduler.add(cleanup_job).await?;

    scheduler.start().await?;
    tracing::info!(
        "Scheduler started (full: '{}', subset: '{}', cleanup: '{}')",
        config.full_cron,
        config.subset_cron,
        config.cleanup_cron
    );
    Ok(scheduler)
}

async fn run_scheduled(orchestrator: &Arc<Orchestrator>, kind: ScrapeKind) {
    match orchestrator.run_to_completion(kind).await {
        Ok(Some(run_id)) => {
            tracing::info!("scheduled {} scrape finished as run {run_id}", kind.as_str());
        }
        Ok(None) => {
            tracing::info!(
                "scheduled {} scrape skipped, another run in progress",
                kind.as_str()
            );
        }
        Err(e) => {
            tracing::error!("scheduled {} scrape could not start: {e}", kind.as_str());
        }
    }
}
