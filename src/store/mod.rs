// Record store seam. The Postgres implementation is the production
// backend; tests swap in the in-memory stores behind the same traits.

#[cfg(test)]
pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::models::job::{CreateJob, JobRecord};
use crate::models::run::{ScrapeKind, ScrapeRun};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("store backend error: {0}")]
    #[allow(dead_code)]
    Backend(String),
}

/// Persisted job records, keyed by `(external_id, source)` with a
/// secondary content-hash uniqueness among canonical rows.
#[async_trait]
pub trait JobStore: Send + Sync {
    async fn find_by_external_id(
        &self,
        external_id: &str,
        source: &str,
    ) -> Result<Option<JobRecord>, StoreError>;

    /// Look up the canonical (non-duplicate) record carrying this dedup key.
    async fn find_canonical(&self, dedup_key: &str) -> Result<Option<JobRecord>, StoreError>;

    /// Refresh `last_seen_at` on a record that was reported again.
    async fn touch_last_seen(&self, id: i32) -> Result<(), StoreError>;

    async fn insert(&self, input: CreateJob) -> Result<JobRecord, StoreError>;

    async fn delete(&self, id: i32) -> Result<(), StoreError>;
}

/// Scrape run audit log.
#[async_trait]
pub trait RunStore: Send + Sync {
    /// Insert a new run in `running` status.
    async fn create(&self, kind: ScrapeKind) -> Result<ScrapeRun, StoreError>;

    async fn get(&self, id: i32) -> Result<Option<ScrapeRun>, StoreError>;

    /// Set the terminal status and counters, stamping `completed_at`.
    async fn finalize(
        &self,
        id: i32,
        status: &str,
        jobs_found: i32,
        jobs_queued: i32,
        errors: &[String],
    ) -> Result<(), StoreError>;

    async fn recent(&self, limit: i64) -> Result<Vec<ScrapeRun>, StoreError>;

    /// Mark runs abandoned by a crash or shutdown as failed. Returns the
    /// number of runs recovered.
    async fn fail_abandoned(&self) -> Result<u64, StoreError>;

    /// Drop finished runs older than the cutoff. Returns the number deleted.
    async fn delete_finished_before(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError>;
}
