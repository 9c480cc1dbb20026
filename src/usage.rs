// Monthly API budget accounting. One counter per calendar month with a
// latched warning threshold and a latched hard stop; every mutation is
// followed by an atomic write of the full document.

use std::collections::BTreeMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::persist::{self, PersistError};

#[derive(Debug, Clone)]
pub struct UsageLimits {
    pub budget: u32,
    pub warning_threshold: u32,
    pub hard_stop_threshold: u32,
}

impl Default for UsageLimits {
    fn default() -> Self {
        Self {
            budget: 200,
            warning_threshold: 160,
            hard_stop_threshold: 180,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct MonthCounter {
    month: String,
    budget: u32,
    total_requests: u32,
    warning_triggered: bool,
    hard_stop_triggered: bool,
    requests_by_date: BTreeMap<String, u32>,
    requests_by_keyword: BTreeMap<String, u32>,
}

impl MonthCounter {
    fn fresh(month: String, budget: u32) -> Self {
        Self {
            month,
            budget,
            total_requests: 0,
            warning_triggered: false,
            hard_stop_triggered: false,
            requests_by_date: BTreeMap::new(),
            requests_by_keyword: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct UsageDocument {
    current: MonthCounter,
    #[serde(default)]
    archive: Vec<MonthCounter>,
}

/// Verdict for one prospective outbound call.
#[derive(Debug, Clone, Serialize)]
pub struct RequestBudget {
    pub allowed: bool,
    pub used: u32,
    pub remaining: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Point-in-time view of the current month for the operator surface.
#[derive(Debug, Clone, Serialize)]
pub struct UsageSnapshot {
    pub month: String,
    pub used: u32,
    pub budget: u32,
    pub remaining: u32,
    pub warning_triggered: bool,
    pub hard_stop_triggered: bool,
    pub by_date: BTreeMap<String, u32>,
    pub by_keyword: BTreeMap<String, u32>,
    pub archived_months: usize,
}

pub struct UsageTracker {
    path: PathBuf,
    limits: UsageLimits,
    state: Mutex<UsageDocument>,
}

impl UsageTracker {
    /// Load the durable counter, creating a fresh one when no document
    /// exists yet. Rolls the month over immediately if the document is
    /// from an earlier month.
    pub async fn load(path: PathBuf, limits: UsageLimits) -> Result<Self, PersistError> {
        Self::load_at(path, limits, Utc::now()).await
    }

    async fn load_at(
        path: PathBuf,
        limits: UsageLimits,
        now: DateTime<Utc>,
    ) -> Result<Self, PersistError> {
        let mut doc = match persist::read_json::<UsageDocument>(&path).await? {
            Some(doc) => doc,
            None => UsageDocument {
                current: MonthCounter::fresh(month_key(now), limits.budget),
                archive: Vec::new(),
            },
        };
        if roll_over(&mut doc, &limits, now) {
            persist::write_json(&path, &doc).await?;
        }
        tracing::info!(
            "Usage tracker loaded: {}/{} requests used in {}",
            doc.current.total_requests,
            limits.budget,
            doc.current.month
        );
        Ok(Self {
            path,
            limits,
            state: Mutex::new(doc),
        })
    }

    pub async fn can_make_request(&self) -> Result<RequestBudget, PersistError> {
        self.can_make_request_at(Utc::now()).await
    }

    async fn can_make_request_at(&self, now: DateTime<Utc>) -> Result<RequestBudget, PersistError> {
        let mut doc = self.state.lock().await;
        if roll_over(&mut doc, &self.limits, now) {
            persist::write_json(&self.path, &*doc).await?;
        }
        let used = doc.current.total_requests;
        let remaining = self.limits.budget.saturating_sub(used);
        if used >= self.limits.hard_stop_threshold {
            return Ok(RequestBudget {
                allowed: false,
                used,
                remaining,
                reason: Some(format!(
                    "hard stop: {used} of {} budgeted requests used this month",
                    self.limits.budget
                )),
            });
        }
        Ok(RequestBudget {
            allowed: true,
            used,
            remaining,
            reason: None,
        })
    }

    /// Count one successful outbound call against the month, attributed
    /// to `keyword` when given.
    pub async fn record_request(&self, keyword: Option<&str>) -> Result<(), PersistError> {
        self.record_request_at(keyword, Utc::now()).await
    }

    async fn record_request_at(
        &self,
        keyword: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<(), PersistError> {
        let mut doc = self.state.lock().await;
        roll_over(&mut doc, &self.limits, now);

        let current = &mut doc.current;
        current.total_requests += 1;
        *current.requests_by_date.entry(date_key(now)).or_insert(0) += 1;
        if let Some(keyword) = keyword {
            *current
                .requests_by_keyword
                .entry(keyword.to_string())
                .or_insert(0) += 1;
        }

        if current.total_requests >= self.limits.warning_threshold && !current.warning_triggered {
            current.warning_triggered = true;
            tracing::warn!(
                "API usage warning: {} of {} budgeted requests used in {}",
                current.total_requests,
                self.limits.budget,
                current.month
            );
        }
        if current.total_requests >= self.limits.hard_stop_threshold
            && !current.hard_stop_triggered
        {
            current.hard_stop_triggered = true;
            tracing::error!(
                "API usage hard stop: {} requests used in {}, blocking outbound calls until month rollover",
                current.total_requests,
                current.month
            );
        }

        persist::write_json(&self.path, &*doc).await
    }

    pub async fn snapshot(&self) -> Result<UsageSnapshot, PersistError> {
        self.snapshot_at(Utc::now()).await
    }

    async fn snapshot_at(&self, now: DateTime<Utc>) -> Result<UsageSnapshot, PersistError> {
        let mut doc = self.state.lock().await;
        if roll_over(&mut doc, &self.limits, now) {
            persist::write_json(&self.path, &*doc).await?;
        }
        let current = &doc.current;
        Ok(UsageSnapshot {
            month: current.month.clone(),
            used: current.total_requests,
            budget: self.limits.budget,
            remaining: self.limits.budget.saturating_sub(current.total_requests),
            warning_triggered: current.warning_triggered,
            hard_stop_triggered: current.hard_stop_triggered,
            by_date: current.requests_by_date.clone(),
            by_keyword: current.requests_by_keyword.clone(),
            archived_months: doc.archive.len(),
        })
    }
}

fn month_key(t: DateTime<Utc>) -> String {
    t.format("%Y-%m").to_string()
}

fn date_key(t: DateTime<Utc>) -> String {
    t.format("%Y-%m-%d").to_string()
}

/// Archive the current counter and start a fresh one when the wall-clock
/// month has moved past the stored one. Returns true when a rollover
/// happened and the document needs saving.
fn roll_over(doc: &mut UsageDocument, limits: &UsageLimits, now: DateTime<Utc>) -> bool {
    let month = month_key(now);
    if doc.current.month == month {
        return false;
    }
    tracing::info!(
        "Usage month rolled over {} -> {month}, archiving {} requests",
        doc.current.month,
        doc.current.total_requests
    );
    let finished = std::mem::replace(&mut doc.current, MonthCounter::fresh(month, limits.budget));
    doc.archive.push(finished);
    true
}
