// Enrichment collaborators: the embedding capability each new record
// needs before persistence, and the downstream matching trigger fired
// after it lands.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;

#[derive(Debug, thiserror::Error)]
pub enum EnrichError {
    #[error("network error: {0}")]
    Network(String),

    #[error("embedding endpoint returned HTTP {0}")]
    Http(u16),

    #[error("could not decode embedding response: {0}")]
    Decode(String),

    #[error("matcher endpoint returned HTTP {0}")]
    Matcher(u16),
}

#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EnrichError>;
}

#[async_trait]
pub trait Matcher: Send + Sync {
    async fn match_job(&self, job_id: i32, embedding: &[f32]) -> Result<(), EnrichError>;
}

#[derive(Debug, Clone)]
pub struct EmbedderConfig {
    pub base_url: String,
    pub api_key: String,
    pub model: String,
}

/// OpenAI-compatible embeddings client.
pub struct OpenAiEmbedder {
    http: reqwest::Client,
    config: EmbedderConfig,
}

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a str,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

impl OpenAiEmbedder {
    pub fn new(config: EmbedderConfig) -> Result<Self, EnrichError> {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .map_err(|e| EnrichError::Network(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { http, config })
    }
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EnrichError> {
        let url = format!("{}/embeddings", self.config.base_url);
        let resp = self
            .http
            .post(&url)
            .bearer_auth(&self.config.api_key)
            .json(&EmbeddingRequest {
                model: &self.config.model,
                input: text,
            })
            .send()
            .await
            .map_err(|e| EnrichError::Network(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(EnrichError::Http(resp.status().as_u16()));
        }

        let body: EmbeddingResponse = resp
            .json()
            .await
            .map_err(|e| EnrichError::Decode(e.to_string()))?;
        body.data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| EnrichError::Decode("empty embedding data".to_string()))
    }
}

/// Posts `{job_id, embedding}` to an external matching endpoint.
pub struct HttpMatcher {
    http: reqwest::Client,
    endpoint: String,
}

impl HttpMatcher {
    pub fn new(endpoint: String) -> Result<Self, EnrichError> {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .map_err(|e| EnrichError::Network(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { http, endpoint })
    }
}

#[async_trait]
impl Matcher for HttpMatcher {
    async fn match_job(&self, job_id: i32, embedding: &[f32]) -> Result<(), EnrichError> {
        let resp = self
            .http
            .post(&self.endpoint)
            .json(&json!({ "job_id": job_id, "embedding": embedding }))
            .send()
            .await
            .map_err(|e| EnrichError::Network(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(EnrichError::Matcher(resp.status().as_u16()));
        }
        Ok(())
    }
}

/// Stand-in used when no matcher endpoint is configured.
pub struct NoopMatcher;

#[async_trait]
impl Matcher for NoopMatcher {
    async fn match_job(&self, job_id: i32, _embedding: &[f32]) -> Result<(), EnrichError> {
        tracing::debug!("no matcher configured, skipping match trigger for job {job_id}");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use axum::Router;
    use axum::routing::post;
    use serde_json::json;

    use super::*;

    async fn serve(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    #[tokio::test]
    async fn embedder_parses_openai_shape() {
        let app = Router::new().route(
            "/v1/embeddings",
            post(|| async {
                axum::Json(json!({
                    "data": [{ "embedding": [0.25, -0.5, 1.0] }]
                }))
            }),
        );
        let base = serve(app).await;

        let embedder = OpenAiEmbedder::new(EmbedderConfig {
            base_url: format!("{base}/v1"),
            api_key: "test".to_string(),
            model: "text-embedding-3-small".to_string(),
        })
        .unwrap();

        let vector = embedder.embed("senior rust engineer").await.unwrap();
        assert_eq!(vector, vec![0.25, -0.5, 1.0]);
    }

    #[tokio::test]
    async fn embedder_surfaces_http_failure() {
        let app = Router::new().route(
            "/v1/embeddings",
            post(|| async { axum::http::StatusCode::INTERNAL_SERVER_ERROR }),
        );
        let base = serve(app).await;

        let embedder = OpenAiEmbedder::new(EmbedderConfig {
            base_url: format!("{base}/v1"),
            api_key: "test".to_string(),
            model: "text-embedding-3-small".to_string(),
        })
        .unwrap();

        let err = embedder.embed("anything").await.unwrap_err();
        assert!(matches!(err, EnrichError::Http(500)));
    }
}
