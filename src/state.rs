use std::sync::Arc;

use crate::client::SearchApi;
use crate::ingest::IngestQueue;
use crate::keywords::KeywordCache;
use crate::scraper::orchestrator::Orchestrator;
use crate::store::RunStore;
use crate::usage::UsageTracker;

/// Shared handles for the operator routes.
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
    pub api: Arc<dyn SearchApi>,
    pub usage: Arc<UsageTracker>,
    pub keywords: Arc<KeywordCache>,
    pub queue: Arc<IngestQueue>,
    pub runs: Arc<dyn RunStore>,
}
