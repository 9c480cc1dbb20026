use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Salary bounds as reported by the source API. Either bound may be
/// missing; a range with neither bound is not stored at all.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SalaryRange {
    pub min: Option<i64>,
    pub max: Option<i64>,
    pub currency: String,
    pub period: String,
}

/// Normalized projection of one raw provider record, ready for ingestion.
/// `external_id` + `source` form the natural key; `dedup_key` is the
/// content hash used to catch syndicated reposts under different ids.
#[derive(Debug, Clone, Serialize)]
pub struct ParsedJob {
    pub title: String,
    pub company: String,
    pub location: String,
    pub salary: Option<SalaryRange>,
    pub description: String,
    pub requirements: Vec<String>,
    pub preferred_skills: Vec<String>,
    pub employment_type: String,
    pub is_remote: bool,
    pub apply_url: String,
    pub external_id: String,
    pub source: String,
    pub scraped_at: DateTime<Utc>,
    pub extraction_confidence: i32,
    pub dedup_key: String,
    pub raw: serde_json::Value,
}

impl ParsedJob {
    /// Text fed to the embedding capability.
    pub fn embedding_text(&self) -> String {
        format!("{} {}", self.title, self.description)
    }
}

/// Insert payload for the record store: the parsed job plus everything
/// the ingestion worker resolved for it.
#[derive(Debug, Clone)]
pub struct CreateJob {
    pub job: ParsedJob,
    pub embedding: Vec<f32>,
    pub is_duplicate: bool,
    pub canonical_id: Option<i32>,
}

/// One persisted row of the jobs table.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct JobRecord {
    pub id: i32,
    pub external_id: String,
    pub source: String,
    pub title: String,
    pub company: String,
    pub location: String,
    pub salary_min: Option<i64>,
    pub salary_max: Option<i64>,
    pub salary_currency: Option<String>,
    pub salary_period: Option<String>,
    pub description: String,
    pub requirements: Vec<String>,
    pub preferred_skills: Vec<String>,
    pub employment_type: String,
    pub is_remote: bool,
    pub apply_url: String,
    pub extraction_confidence: i32,
    pub scraped_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
    pub raw_data: Option<serde_json::Value>,
    pub embedding: Vec<f32>,
    pub is_duplicate: bool,
    pub canonical_id: Option<i32>,
    pub dedup_key: String,
    pub match_count: i32,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
