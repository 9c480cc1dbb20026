mod client;
mod config;
mod db;
mod enrich;
mod error;
mod ingest;
mod keywords;
mod models;
mod persist;
mod routes;
mod scraper;
mod state;
mod store;
mod usage;

use std::sync::Arc;

use axum::Router;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use clap::Parser;
use sqlx::PgPool;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use crate::client::SearchApi;
use crate::client::jsearch::JSearchClient;
use crate::config::{Command, Config};
use crate::enrich::{HttpMatcher, Matcher, NoopMatcher, OpenAiEmbedder};
use crate::ingest::{IngestContext, IngestQueue};
use crate::keywords::KeywordCache;
use crate::models::run::ScrapeKind;
use crate::scraper::orchestrator::Orchestrator;
use crate::scraper::schedule;
use crate::state::AppState;
use crate::store::postgres::{PgJobStore, PgRunStore};
use crate::store::{JobStore, RunStore};
use crate::usage::UsageTracker;

async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

async fn readyz(pool: PgPool) -> impl IntoResponse {
    let result: Result<(i32,), _> = sqlx::query_as("SELECT 1").fetch_one(&pool).await;
    match result {
        Ok(_) => (StatusCode::OK, "ready"),
        Err(_) => (StatusCode::SERVICE_UNAVAILABLE, "not ready"),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("jobintel=info,tower_http=info")),
        )
        .init();

    let config = Config::parse();

    tracing::info!("Connecting to database...");
    let pool = db::create_pool(&config.database_url).await?;

    if config.run_migrations {
        tracing::info!("Running database migrations...");
        db::run_migrations(&pool).await?;
        tracing::info!("Migrations complete");
    }

    let usage = Arc::new(
        UsageTracker::load(
            config.data_dir.join("api-usage.json"),
            config.usage_limits(),
        )
        .await?,
    );
    let keywords = Arc::new(
        KeywordCache::load(
            config.data_dir.join("keywords.json"),
            chrono::Duration::days(config.keyword_refresh_days),
        )
        .await?,
    );

    let api = Arc::new(JSearchClient::new(config.client_config(), usage.clone())?);

    let jobs: Arc<dyn JobStore> = Arc::new(PgJobStore::new(pool.clone()));
    let runs: Arc<dyn RunStore> = Arc::new(PgRunStore::new(pool.clone()));

    let recovered = runs.fail_abandoned().await?;
    if recovered > 0 {
        tracing::warn!("Marked {recovered} abandoned scrape runs as failed");
    }

    let embedder = Arc::new(OpenAiEmbedder::new(config.embedder_config())?);
    let matcher: Arc<dyn Matcher> = match &config.matcher_url {
        Some(url) => Arc::new(HttpMatcher::new(url.clone())?),
        None => Arc::new(NoopMatcher),
    };

    let queue = IngestQueue::start(
        IngestContext {
            jobs,
            embedder,
            matcher,
        },
        config.ingest_config(),
    );

    let orchestrator = Orchestrator::new(
        api.clone(),
        usage.clone(),
        keywords.clone(),
        queue.clone(),
        runs.clone(),
    );

    match config.resolved_command() {
        Command::Serve { listen_addr } => {
            let _scheduler = if config.scheduler_enabled {
                Some(
                    schedule::start(config.schedule_config(), orchestrator.clone(), runs.clone())
                        .await?,
                )
            } else {
                tracing::info!("Scheduler disabled");
                None
            };

            let state = AppState {
                orchestrator,
                api: api.clone(),
                usage,
                keywords,
                queue,
                runs,
            };

            let readyz_pool = pool.clone();
            let app = Router::new()
                .route("/healthz", get(healthz))
                .route("/readyz", get(move || readyz(readyz_pool.clone())))
                .merge(routes::router(state))
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive());

            let listener = tokio::net::TcpListener::bind(&listen_addr).await?;
            tracing::info!("Listening on {listen_addr}");
            axum::serve(listener, app).await?;
        }
        Command::Scrape { subset } => {
            let kind = if subset {
                ScrapeKind::Subset
            } else {
                ScrapeKind::Full
            };
            match orchestrator.run_to_completion(kind).await? {
                Some(run_id) => {
                    tracing::info!("Scrape run {run_id} finished, draining ingestion queue");
                    queue.drain().await;
                    tracing::info!("Ingestion queue drained");
                }
                None => tracing::warn!("A scrape run is already in progress"),
            }
        }
        Command::Health => {
            let provider_ok = api.health_check().await;
            let db_ok = sqlx::query_as::<_, (i32,)>("SELECT 1")
                .fetch_one(&pool)
                .await
                .is_ok();
            tracing::info!("Provider: {}", if provider_ok { "ok" } else { "unreachable" });
            tracing::info!("Database: {}", if db_ok { "ok" } else { "unreachable" });
            if !provider_ok || !db_ok {
                anyhow::bail!("health check failed");
            }
        }
    }

    Ok(())
}
