use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::client::{ClientError, RawRecord, SearchApi, SearchSpec};
use crate::usage::UsageTracker;

// Request defaults sent with every search.
const PAGE: u32 = 1;
const NUM_PAGES: u32 = 1;
const DATE_POSTED: &str = "month";
const EMPLOYMENT_TYPES: &str = "FULLTIME";

const USER_AGENT: &str = concat!("jobintel/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Clone)]
pub struct JSearchConfig {
    pub api_key: String,
    pub base_url: String,
    pub min_interval: Duration,
    pub backoff_base: Duration,
    pub max_attempts: u32,
    pub timeout: Duration,
}

/// Rate-limited client for the jsearch API. All outbound calls pass the
/// usage gate and then pace through a single shared slot, so concurrent
/// callers keep the minimum interval globally.
pub struct JSearchClient {
    http: reqwest::Client,
    config: JSearchConfig,
    usage: Arc<UsageTracker>,
    last_call: Mutex<Option<Instant>>,
}

#[derive(Debug, Deserialize)]
struct ApiEnvelope {
    status: String,
    #[serde(default)]
    data: Vec<RawRecord>,
}

impl JSearchClient {
    pub fn new(config: JSearchConfig, usage: Arc<UsageTracker>) -> Result<Self, ClientError> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| ClientError::Network(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            http,
            config,
            usage,
            last_call: Mutex::new(None),
        })
    }

    /// Refuse outright when the monthly budget is spent.
    async fn gate(&self) -> Result<(), ClientError> {
        let budget = self
            .usage
            .can_make_request()
            .await
            .map_err(|e| ClientError::Usage(e.to_string()))?;
        if !budget.allowed {
            return Err(ClientError::BudgetExhausted(
                budget
                    .reason
                    .unwrap_or_else(|| "no requests remaining".to_string()),
            ));
        }
        Ok(())
    }

    /// Suspend until at least `min_interval` has passed since the previous
    /// call started. The lock is held across the sleep so concurrent
    /// callers serialize and each gets its own slot.
    async fn pace(&self) {
        let mut last = self.last_call.lock().await;
        if let Some(prev) = *last {
            let elapsed = prev.elapsed();
            if elapsed < self.config.min_interval {
                tokio::time::sleep(self.config.min_interval - elapsed).await;
            }
        }
        *last = Some(Instant::now());
    }

    async fn request(
        &self,
        endpoint: &str,
        params: &[(&str, String)],
    ) -> Result<Vec<RawRecord>, ClientError> {
        let mut attempt = 0u32;
        loop {
            self.gate().await?;
            self.pace().await;
            match self.request_once(endpoint, params).await {
                Ok(data) => return Ok(data),
                Err(e) if e.is_transient() => {
                    attempt += 1;
                    if attempt >= self.config.max_attempts {
                        return Err(ClientError::Exhausted {
                            attempts: attempt,
                            last: Box::new(e),
                        });
                    }
                    let wait = self.config.backoff_base * 2u32.pow(attempt - 1);
                    tracing::warn!(
                        "jsearch {endpoint} attempt {attempt} failed ({e}), retrying in {}ms",
                        wait.as_millis()
                    );
                    tokio::time::sleep(wait).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn request_once(
        &self,
        endpoint: &str,
        params: &[(&str, String)],
    ) -> Result<Vec<RawRecord>, ClientError> {
        let url = format!("{}/{endpoint}", self.config.base_url);
        let resp = self
            .http
            .get(&url)
            .query(&[("apikey", self.config.api_key.as_str())])
            .query(params)
            .send()
            .await
            .map_err(|e| ClientError::Network(e.to_string()))?;

        let status = resp.status().as_u16();
        if status == 429 {
            return Err(ClientError::RateLimited);
        }
        if !resp.status().is_success() {
            return Err(ClientError::Http(status));
        }

        let envelope: ApiEnvelope = resp
            .json()
            .await
            .map_err(|e| ClientError::Decode(e.to_string()))?;
        if !envelope.status.eq_ignore_ascii_case("ok") {
            return Err(ClientError::ApiStatus(envelope.status));
        }
        Ok(envelope.data)
    }
}

#[async_trait]
impl SearchApi for JSearchClient {
    async fn search(&self, spec: &SearchSpec) -> Result<Vec<RawRecord>, ClientError> {
        let params = [
            ("query", spec.query.clone()),
            ("country", spec.country.clone()),
            ("page", PAGE.to_string()),
            ("num_pages", NUM_PAGES.to_string()),
            ("date_posted", DATE_POSTED.to_string()),
            ("employment_types", EMPLOYMENT_TYPES.to_string()),
        ];
        let data = self.request("search", &params).await?;
        tracing::info!("jsearch returned {} records for '{}'", data.len(), spec.query);
        Ok(data)
    }

    async fn details(&self, external_id: &str, country: &str) -> Result<RawRecord, ClientError> {
        let params = [
            ("job_id", external_id.to_string()),
            ("country", country.to_string()),
        ];
        let mut data = self.request("job-details", &params).await?;
        if data.is_empty() {
            return Err(ClientError::Decode(format!(
                "no details returned for job {external_id}"
            )));
        }
        Ok(data.remove(0))
    }

    async fn health_check(&self) -> bool {
        match self.search(&SearchSpec::new("test", "in")).await {
            Ok(_) => true,
            Err(e) => {
                tracing::warn!("search API health check failed: {e}");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use axum::Router;
    use axum::extract::State;
    use axum::http::StatusCode;
    use axum::response::IntoResponse;
    use axum::routing::get;
    use serde_json::json;

    use super::*;
    use crate::usage::UsageLimits;

    enum Canned {
        Http(u16),
        ApiError,
    }

    struct Script {
        hits: AtomicU32,
        plan: Vec<Canned>,
    }

    impl Script {
        fn new(plan: Vec<Canned>) -> Arc<Self> {
            Arc::new(Self {
                hits: AtomicU32::new(0),
                plan,
            })
        }

        fn hits(&self) -> u32 {
            self.hits.load(Ordering::SeqCst)
        }
    }

    async fn handler(State(script): State<Arc<Script>>) -> axum::response::Response {
        let hit = script.hits.fetch_add(1, Ordering::SeqCst) as usize;
        match script.plan.get(hit) {
            Some(Canned::Http(status)) => StatusCode::from_u16(*status).unwrap().into_response(),
            Some(Canned::ApiError) => {
                axum::Json(json!({ "status": "error", "data": [] })).into_response()
            }
            None => axum::Json(json!({
                "status": "ok",
                "data": [{ "job_id": "j1", "job_title": "Backend Engineer" }]
            }))
            .into_response(),
        }
    }

    /// Serve the canned script on an ephemeral port, returning a base URL.
    async fn serve(script: Arc<Script>) -> String {
        let app = Router::new()
            .route("/jsearch/search", get(handler))
            .route("/jsearch/job-details", get(handler))
            .with_state(script);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}/jsearch")
    }

    fn config(base_url: String) -> JSearchConfig {
        JSearchConfig {
            api_key: "test-key".to_string(),
            base_url,
            min_interval: Duration::from_millis(10),
            backoff_base: Duration::from_millis(20),
            max_attempts: 3,
            timeout: Duration::from_secs(5),
        }
    }

    async fn usage(dir: &tempfile::TempDir) -> Arc<UsageTracker> {
        Arc::new(
            UsageTracker::load(dir.path().join("usage.json"), UsageLimits::default())
                .await
                .unwrap(),
        )
    }

    #[tokio::test]
    async fn search_parses_ok_envelope() {
        let dir = tempfile::tempdir().unwrap();
        let script = Script::new(vec![]);
        let client = JSearchClient::new(config(serve(script.clone()).await), usage(&dir).await).unwrap();

        let records = client
            .search(&SearchSpec::new("backend developer", "in"))
            .await
            .unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0]["job_id"], "j1");
        assert_eq!(script.hits(), 1);
    }

    #[tokio::test]
    async fn consecutive_calls_keep_min_interval() {
        let dir = tempfile::tempdir().unwrap();
        let script = Script::new(vec![]);
        let mut cfg = config(serve(script.clone()).await);
        cfg.min_interval = Duration::from_millis(200);
        let client = JSearchClient::new(cfg, usage(&dir).await).unwrap();

        let spec = SearchSpec::new("devops engineer", "in");
        let started = std::time::Instant::now();
        client.search(&spec).await.unwrap();
        client.search(&spec).await.unwrap();
        assert!(started.elapsed() >= Duration::from_millis(200));
        assert_eq!(script.hits(), 2);
    }

    #[tokio::test]
    async fn transient_errors_retry_until_success() {
        let dir = tempfile::tempdir().unwrap();
        let script = Script::new(vec![Canned::Http(500), Canned::Http(503)]);
        let client = JSearchClient::new(config(serve(script.clone()).await), usage(&dir).await).unwrap();

        let records = client
            .search(&SearchSpec::new("data scientist", "in"))
            .await
            .unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(script.hits(), 3);
    }

    #[tokio::test]
    async fn rate_limit_is_retried() {
        let dir = tempfile::tempdir().unwrap();
        let script = Script::new(vec![Canned::Http(429)]);
        let client = JSearchClient::new(config(serve(script.clone()).await), usage(&dir).await).unwrap();

        client
            .search(&SearchSpec::new("cloud engineer", "in"))
            .await
            .unwrap();
        assert_eq!(script.hits(), 2);
    }

    #[tokio::test]
    async fn api_error_status_is_permanent() {
        let dir = tempfile::tempdir().unwrap();
        let script = Script::new(vec![Canned::ApiError]);
        let client = JSearchClient::new(config(serve(script.clone()).await), usage(&dir).await).unwrap();

        let err = client
            .search(&SearchSpec::new("qa engineer", "in"))
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::ApiStatus(_)));
        assert_eq!(script.hits(), 1);
    }

    #[tokio::test]
    async fn exhausts_after_attempt_ceiling() {
        let dir = tempfile::tempdir().unwrap();
        let script = Script::new(vec![Canned::Http(500), Canned::Http(500), Canned::Http(500)]);
        let client = JSearchClient::new(config(serve(script.clone()).await), usage(&dir).await).unwrap();

        let err = client
            .search(&SearchSpec::new("ml engineer", "in"))
            .await
            .unwrap_err();
        match err {
            ClientError::Exhausted { attempts, last } => {
                assert_eq!(attempts, 3);
                assert!(matches!(*last, ClientError::Http(500)));
            }
            other => panic!("expected Exhausted, got {other:?}"),
        }
        assert_eq!(script.hits(), 3);
    }

    #[tokio::test]
    async fn backoff_spacing_grows() {
        let dir = tempfile::tempdir().unwrap();
        let script = Script::new(vec![Canned::Http(500), Canned::Http(500)]);
        let mut cfg = config(serve(script.clone()).await);
        cfg.min_interval = Duration::from_millis(1);
        cfg.backoff_base = Duration::from_millis(100);
        let client = JSearchClient::new(cfg, usage(&dir).await).unwrap();

        let started = std::time::Instant::now();
        client
            .search(&SearchSpec::new("python developer", "in"))
            .await
            .unwrap();
        // waits: 100ms after the first failure, 200ms after the second
        assert!(started.elapsed() >= Duration::from_millis(300));
        assert_eq!(script.hits(), 3);
    }

    #[tokio::test]
    async fn budget_gate_blocks_before_any_call() {
        let dir = tempfile::tempdir().unwrap();
        let tracker = Arc::new(
            UsageTracker::load(
                dir.path().join("usage.json"),
                UsageLimits {
                    budget: 3,
                    warning_threshold: 1,
                    hard_stop_threshold: 2,
                },
            )
            .await
            .unwrap(),
        );
        tracker.record_request(None).await.unwrap();
        tracker.record_request(None).await.unwrap();

        let script = Script::new(vec![]);
        let client = JSearchClient::new(config(serve(script.clone()).await), tracker).unwrap();

        let err = client
            .search(&SearchSpec::new("systems engineer", "in"))
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::BudgetExhausted(_)));
        assert_eq!(script.hits(), 0);
    }

    #[tokio::test]
    async fn details_returns_first_record() {
        let dir = tempfile::tempdir().unwrap();
        let script = Script::new(vec![]);
        let client = JSearchClient::new(config(serve(script.clone()).await), usage(&dir).await).unwrap();

        let record = client.details("j1", "in").await.unwrap();
        assert_eq!(record["job_title"], "Backend Engineer");
    }
}
