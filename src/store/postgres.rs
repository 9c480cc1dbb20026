use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::models::job::{CreateJob, JobRecord};
use crate::models::run::{ScrapeKind, ScrapeRun};
use crate::store::{JobStore, RunStore, StoreError};

pub struct PgJobStore {
    pool: PgPool,
}

impl PgJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl JobStore for PgJobStore {
    async fn find_by_external_id(
        &self,
        external_id: &str,
        source: &str,
    ) -> Result<Option<JobRecord>, StoreError> {
        let job = sqlx::query_as::<_, JobRecord>(
            "SELECT * FROM jobs WHERE external_id = $1 AND source = $2",
        )
        .bind(external_id)
        .bind(source)
        .fetch_optional(&self.pool)
        .await?;
        Ok(job)
    }

    async fn find_canonical(&self, dedup_key: &str) -> Result<Option<JobRecord>, StoreError> {
        let job = sqlx::query_as::<_, JobRecord>(
            "SELECT * FROM jobs WHERE dedup_key = $1 AND NOT is_duplicate",
        )
        .bind(dedup_key)
        .fetch_optional(&self.pool)
        .await?;
        Ok(job)
    }

    async fn touch_last_seen(&self, id: i32) -> Result<(), StoreError> {
        sqlx::query("UPDATE jobs SET last_seen_at = NOW(), updated_at = NOW() WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn insert(&self, input: CreateJob) -> Result<JobRecord, StoreError> {
        let j = &input.job;
        let salary = j.salary.as_ref();
        let record = sqlx::query_as::<_, JobRecord>(
            "INSERT INTO jobs (external_id, source, title, company, location, salary_min, salary_max, salary_currency, salary_period, description, requirements, preferred_skills, employment_type, is_remote, apply_url, extraction_confidence, scraped_at, raw_data, embedding, is_duplicate, canonical_id, dedup_key) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19, $20, $21, $22) RETURNING *",
        )
        .bind(&j.external_id)
        .bind(&j.source)
        .bind(&j.title)
        .bind(&j.company)
        .bind(&j.location)
        .bind(salary.and_then(|s| s.min))
        .bind(salary.and_then(|s| s.max))
        .bind(salary.map(|s| s.currency.clone()))
        .bind(salary.map(|s| s.period.clone()))
        .bind(&j.description)
        .bind(&j.requirements)
        .bind(&j.preferred_skills)
        .bind(&j.employment_type)
        .bind(j.is_remote)
        .bind(&j.apply_url)
        .bind(j.extraction_confidence)
        .bind(j.scraped_at)
        .bind(&j.raw)
        .bind(&input.embedding)
        .bind(input.is_duplicate)
        .bind(input.canonical_id)
        .bind(&j.dedup_key)
        .fetch_one(&self.pool)
        .await?;
        Ok(record)
    }

    async fn delete(&self, id: i32) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM jobs WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

pub struct PgRunStore {
    pool: PgPool,
}

impl PgRunStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RunStore for PgRunStore {
    async fn create(&self, kind: ScrapeKind) -> Result<ScrapeRun, StoreError> {
        let run = sqlx::query_as::<_, ScrapeRun>(
            "INSERT INTO scrape_runs (run_kind) VALUES ($1) RETURNING *",
        )
        .bind(kind.as_str())
        .fetch_one(&self.pool)
        .await?;
        Ok(run)
    }

    async fn get(&self, id: i32) -> Result<Option<ScrapeRun>, StoreError> {
        let run = sqlx::query_as::<_, ScrapeRun>("SELECT * FROM scrape_runs WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(run)
    }

    async fn finalize(
        &self,
        id: i32,
        status: &str,
        jobs_found: i32,
        jobs_queued: i32,
        errors: &[String],
    ) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE scrape_runs SET status = $2, jobs_found = $3, jobs_queued = $4, errors = $5, completed_at = NOW() WHERE id = $1",
        )
        .bind(id)
        .bind(status)
        .bind(jobs_found)
        .bind(jobs_queued)
        .bind(errors)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn recent(&self, limit: i64) -> Result<Vec<ScrapeRun>, StoreError> {
        let runs = sqlx::query_as::<_, ScrapeRun>(
            "SELECT * FROM scrape_runs ORDER BY started_at DESC LIMIT $1",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(runs)
    }

    async fn fail_abandoned(&self) -> Result<u64, StoreError> {
        let result = sqlx::query(
            "UPDATE scrape_runs SET status = 'failed', errors = array_append(errors, 'abandoned: process restarted mid-run'), completed_at = NOW() WHERE status = 'running'",
        )
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn delete_finished_before(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
        let result = sqlx::query(
            "DELETE FROM scrape_runs WHERE started_at < $1 AND status <> 'running'",
        )
        .bind(cutoff)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}
