use chrono::{DateTime, Utc};
use serde::Serialize;

/// Which spec list a scrape covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScrapeKind {
    Full,
    Subset,
}

impl ScrapeKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ScrapeKind::Full => "full",
            ScrapeKind::Subset => "subset",
        }
    }
}

/// Audit record for one orchestrator execution. Finalized exactly once;
/// never mutated after `completed_at` is set.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct ScrapeRun {
    pub id: i32,
    pub run_kind: String,
    pub status: String,
    pub jobs_found: i32,
    pub jobs_queued: i32,
    pub errors: Vec<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}
