// Search API client layer. The orchestrator and tests talk to the
// SearchApi trait; jsearch provides the production implementation.

pub mod jsearch;

use async_trait::async_trait;

/// One search to run against the provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchSpec {
    pub query: String,
    pub country: String,
}

impl SearchSpec {
    pub fn new(query: impl Into<String>, country: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            country: country.into(),
        }
    }
}

/// Unparsed provider payload for one job, retained verbatim as provenance.
pub type RawRecord = serde_json::Value;

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("network error: {0}")]
    Network(String),

    #[error("provider returned HTTP {0}")]
    Http(u16),

    #[error("rate limited by provider")]
    RateLimited,

    #[error("provider rejected the request with status '{0}'")]
    ApiStatus(String),

    #[error("could not decode provider response: {0}")]
    Decode(String),

    #[error("monthly request budget exhausted: {0}")]
    BudgetExhausted(String),

    #[error("usage tracking unavailable: {0}")]
    Usage(String),

    #[error("gave up after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: Box<ClientError> },
}

impl ClientError {
    /// Transient failures are retried; everything else is permanent for
    /// the current call.
    pub fn is_transient(&self) -> bool {
        match self {
            ClientError::Network(_) | ClientError::RateLimited => true,
            ClientError::Http(status) => *status >= 500,
            _ => false,
        }
    }
}

/// Job search provider seam.
#[async_trait]
pub trait SearchApi: Send + Sync {
    /// Run one search and return the raw provider records.
    async fn search(&self, spec: &SearchSpec) -> Result<Vec<RawRecord>, ClientError>;

    /// Fetch the full payload for a single posting.
    async fn details(&self, external_id: &str, country: &str) -> Result<RawRecord, ClientError>;

    /// Probe that the provider is reachable and answering.
    async fn health_check(&self) -> bool;
}
