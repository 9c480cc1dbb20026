// Keyword refresh cache. Remembers when each search keyword was last
// fetched so the scheduler can run more often than keywords actually
// need refreshing without burning API budget.

use std::collections::BTreeMap;
use std::path::PathBuf;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::persist::{self, PersistError};

/// Fetch history for one normalized keyword.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeywordRecord {
    pub keyword: String,
    pub normalized: String,
    pub last_fetched_at: DateTime<Utc>,
    pub next_refresh_at: DateTime<Utc>,
    pub jobs_returned: usize,
    pub request_count: u32,
    pub status: String,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct KeywordDocument {
    #[serde(default)]
    keywords: BTreeMap<String, KeywordRecord>,
}

#[derive(Debug, Clone, Serialize)]
pub struct KeywordStats {
    pub tracked: usize,
    pub fresh: usize,
    pub stale: usize,
    pub total_requests: u32,
}

/// Case-fold and collapse whitespace so "Rust  Developer" and
/// "rust developer" share one cache entry.
pub fn normalize(keyword: &str) -> String {
    keyword
        .trim()
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("-")
}

pub struct KeywordCache {
    path: PathBuf,
    refresh_window: Duration,
    state: Mutex<KeywordDocument>,
}

impl KeywordCache {
    pub async fn load(path: PathBuf, refresh_window: Duration) -> Result<Self, PersistError> {
        let doc = persist::read_json::<KeywordDocument>(&path)
            .await?
            .unwrap_or_default();
        tracing::info!("Keyword cache loaded with {} tracked keywords", doc.keywords.len());
        Ok(Self {
            path,
            refresh_window,
            state: Mutex::new(doc),
        })
    }

    /// A keyword is fresh (skippable) while `now < next_refresh_at`.
    /// Unknown keywords are never fresh.
    pub async fn is_fresh(&self, keyword: &str) -> bool {
        self.is_fresh_at(keyword, Utc::now()).await
    }

    async fn is_fresh_at(&self, keyword: &str, now: DateTime<Utc>) -> bool {
        let doc = self.state.lock().await;
        match doc.keywords.get(&normalize(keyword)) {
            Some(record) => now < record.next_refresh_at,
            None => false,
        }
    }

    /// Upsert the keyword after a successful fetch, pushing its next
    /// refresh out by the configured window.
    pub async fn record_fetch(&self, keyword: &str, jobs_returned: usize) -> Result<(), PersistError> {
        self.record_fetch_at(keyword, jobs_returned, Utc::now()).await
    }

    async fn record_fetch_at(
        &self,
        keyword: &str,
        jobs_returned: usize,
        now: DateTime<Utc>,
    ) -> Result<(), PersistError> {
        let mut doc = self.state.lock().await;
        let normalized = normalize(keyword);
        let record = doc
            .keywords
            .entry(normalized.clone())
            .or_insert_with(|| KeywordRecord {
                keyword: keyword.trim().to_string(),
                normalized,
                last_fetched_at: now,
                next_refresh_at: now,
                jobs_returned: 0,
                request_count: 0,
                status: "active".to_string(),
            });
        record.last_fetched_at = now;
        record.next_refresh_at = now + self.refresh_window;
        record.jobs_returned = jobs_returned;
        record.request_count += 1;
        persist::write_json(&self.path, &*doc).await
    }

    /// Active keywords whose refresh window has elapsed.
    pub async fn stale(&self) -> Vec<KeywordRecord> {
        self.stale_at(Utc::now()).await
    }

    async fn stale_at(&self, now: DateTime<Utc>) -> Vec<KeywordRecord> {
        let doc = self.state.lock().await;
        doc.keywords
            .values()
            .filter(|r| r.status == "active" && now >= r.next_refresh_at)
            .cloned()
            .collect()
    }

    pub async fn stats(&self) -> KeywordStats {
        self.stats_at(Utc::now()).await
    }

    async fn stats_at(&self, now: DateTime<Utc>) -> KeywordStats {
        let doc = self.state.lock().await;
        let fresh = doc
            .keywords
            .values()
            .filter(|r| now < r.next_refresh_at)
            .count();
        KeywordStats {
            tracked: doc.keywords.len(),
            fresh,
            stale: doc.keywords.len() - fresh,
            total_requests: doc.keywords.values().map(|r| r.request_count).sum(),
        }
    }
}
