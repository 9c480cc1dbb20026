// In-memory stores used by the queue and orchestrator tests. The job
// store can inject insert failures, including "torn" failures where the
// row lands but the call still reports an error.

use std::sync::Mutex;
use std::sync::atomic::{AtomicI32, AtomicU32, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::models::job::{CreateJob, JobRecord};
use crate::models::run::{ScrapeKind, ScrapeRun};
use crate::store::{JobStore, RunStore, StoreError};

#[derive(Default)]
pub struct MemoryJobStore {
    rows: Mutex<Vec<JobRecord>>,
    next_id: AtomicI32,
    fail_inserts: AtomicU32,
    torn_inserts: AtomicU32,
}

impl MemoryJobStore {
    /// The next `n` inserts fail before writing anything.
    pub fn fail_next_inserts(&self, n: u32) {
        self.fail_inserts.store(n, Ordering::SeqCst);
    }

    /// The next `n` inserts write the row and then report failure anyway.
    pub fn torn_next_inserts(&self, n: u32) {
        self.torn_inserts.store(n, Ordering::SeqCst);
    }

    pub fn records(&self) -> Vec<JobRecord> {
        self.rows.lock().unwrap().clone()
    }

    fn materialize(&self, input: &CreateJob) -> JobRecord {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let j = &input.job;
        let now = Utc::now();
        let salary = j.salary.as_ref();
        JobRecord {
            id,
            external_id: j.external_id.clone(),
            source: j.source.clone(),
            title: j.title.clone(),
            company: j.company.clone(),
            location: j.location.clone(),
            salary_min: salary.and_then(|s| s.min),
            salary_max: salary.and_then(|s| s.max),
            salary_currency: salary.map(|s| s.currency.clone()),
            salary_period: salary.map(|s| s.period.clone()),
            description: j.description.clone(),
            requirements: j.requirements.clone(),
            preferred_skills: j.preferred_skills.clone(),
            employment_type: j.employment_type.clone(),
            is_remote: j.is_remote,
            apply_url: j.apply_url.clone(),
            extraction_confidence: j.extraction_confidence,
            scraped_at: j.scraped_at,
            last_seen_at: now,
            raw_data: Some(j.raw.clone()),
            embedding: input.embedding.clone(),
            is_duplicate: input.is_duplicate,
            canonical_id: input.canonical_id,
            dedup_key: j.dedup_key.clone(),
            match_count: 0,
            status: "active".to_string(),
            created_at: now,
            updated_at: now,
        }
    }

    fn take(counter: &AtomicU32) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn find_by_external_id(
        &self,
        external_id: &str,
        source: &str,
    ) -> Result<Option<JobRecord>, StoreError> {
        let rows = self.rows.lock().unwrap();
        Ok(rows
            .iter()
            .find(|r| r.external_id == external_id && r.source == source)
            .cloned())
    }

    async fn find_canonical(&self, dedup_key: &str) -> Result<Option<JobRecord>, StoreError> {
        let rows = self.rows.lock().unwrap();
        Ok(rows
            .iter()
            .find(|r| r.dedup_key == dedup_key && !r.is_duplicate)
            .cloned())
    }

    async fn touch_last_seen(&self, id: i32) -> Result<(), StoreError> {
        let mut rows = self.rows.lock().unwrap();
        if let Some(row) = rows.iter_mut().find(|r| r.id == id) {
            row.last_seen_at = Utc::now();
            row.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn insert(&self, input: CreateJob) -> Result<JobRecord, StoreError> {
        if Self::take(&self.fail_inserts) {
            return Err(StoreError::Backend("injected insert failure".to_string()));
        }
        let record = self.materialize(&input);
        self.rows.lock().unwrap().push(record.clone());
        if Self::take(&self.torn_inserts) {
            return Err(StoreError::Backend("injected torn insert".to_string()));
        }
        Ok(record)
    }

    async fn delete(&self, id: i32) -> Result<(), StoreError> {
        self.rows.lock().unwrap().retain(|r| r.id != id);
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryRunStore {
    runs: Mutex<Vec<ScrapeRun>>,
    next_id: AtomicI32,
}

impl MemoryRunStore {
    pub fn runs(&self) -> Vec<ScrapeRun> {
        self.runs.lock().unwrap().clone()
    }
}

#[async_trait]
impl RunStore for MemoryRunStore {
    async fn create(&self, kind: ScrapeKind) -> Result<ScrapeRun, StoreError> {
        let run = ScrapeRun {
            id: self.next_id.fetch_add(1, Ordering::SeqCst) + 1,
            run_kind: kind.as_str().to_string(),
            status: "running".to_string(),
            jobs_found: 0,
            jobs_queued: 0,
            errors: Vec::new(),
            started_at: Utc::now(),
            completed_at: None,
        };
        self.runs.lock().unwrap().push(run.clone());
        Ok(run)
    }

    async fn get(&self, id: i32) -> Result<Option<ScrapeRun>, StoreError> {
        Ok(self.runs.lock().unwrap().iter().find(|r| r.id == id).cloned())
    }

    async fn finalize(
        &self,
        id: i32,
        status: &str,
        jobs_found: i32,
        jobs_queued: i32,
        errors: &[String],
    ) -> Result<(), StoreError> {
        let mut runs = self.runs.lock().unwrap();
        let run = runs
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or_else(|| StoreError::Backend(format!("run {id} not found")))?;
        run.status = status.to_string();
        run.jobs_found = jobs_found;
        run.jobs_queued = jobs_queued;
        run.errors = errors.to_vec();
        run.completed_at = Some(Utc::now());
        Ok(())
    }

    async fn recent(&self, limit: i64) -> Result<Vec<ScrapeRun>, StoreError> {
        let mut runs = self.runs.lock().unwrap().clone();
        runs.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        runs.truncate(limit.max(0) as usize);
        Ok(runs)
    }

    async fn fail_abandoned(&self) -> Result<u64, StoreError> {
        let mut runs = self.runs.lock().unwrap();
        let mut recovered = 0;
        for run in runs.iter_mut().filter(|r| r.status == "running") {
            run.status = "failed".to_string();
            run.completed_at = Some(Utc::now());
            recovered += 1;
        }
        Ok(recovered)
    }

    async fn delete_finished_before(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
        let mut runs = self.runs.lock().unwrap();
        let before = runs.len();
        runs.retain(|r| r.started_at >= cutoff || r.status == "running");
        Ok((before - runs.len()) as u64)
    }
}
