use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use serde::Deserialize;

use crate::client::{ClientError, RawRecord};
use crate::error::AppError;
use crate::models::run::{ScrapeKind, ScrapeRun};
use crate::scraper::specs;
use crate::state::AppState;
use crate::usage::UsageSnapshot;

#[derive(Debug, Deserialize)]
pub struct TriggerParams {
    /// Run only the subset spec list instead of the full one.
    #[serde(default)]
    pub subset: bool,
}

/// Kick off a scrape in the background. 202 with the run id, or 409
/// when a run is already in progress.
pub async fn trigger(
    State(state): State<AppState>,
    Query(params): Query<TriggerParams>,
) -> Result<(StatusCode, Json<serde_json::Value>), AppError> {
    let kind = if params.subset {
        ScrapeKind::Subset
    } else {
        ScrapeKind::Full
    };
    match state.orchestrator.spawn_run(kind).await? {
        Some(run_id) => Ok((
            StatusCode::ACCEPTED,
            Json(serde_json::json!({
                "status": "started",
                "run_id": run_id,
                "kind": kind.as_str(),
            })),
        )),
        None => Err(AppError::Conflict(
            "a scrape run is already in progress".to_string(),
        )),
    }
}

pub async fn status(State(state): State<AppState>) -> Result<Json<serde_json::Value>, AppError> {
    let usage = state.usage.snapshot().await?;
    let recent = state.runs.recent(5).await?;
    Ok(Json(serde_json::json!({
        "running": state.orchestrator.is_running(),
        "usage": {
            "month": usage.month,
            "used": usage.used,
            "remaining": usage.remaining,
            "hard_stop_triggered": usage.hard_stop_triggered,
        },
        "queue": state.queue.snapshot(),
        "recent_runs": recent,
    })))
}

#[derive(Debug, Deserialize)]
pub struct RunsParams {
    pub limit: Option<i64>,
}

pub async fn runs(
    State(state): State<AppState>,
    Query(params): Query<RunsParams>,
) -> Result<Json<Vec<ScrapeRun>>, AppError> {
    let limit = params.limit.unwrap_or(20);
    if !(1..=100).contains(&limit) {
        return Err(AppError::BadRequest(
            "limit must be between 1 and 100".to_string(),
        ));
    }
    let runs = state.runs.recent(limit).await?;
    Ok(Json(runs))
}

pub async fn run_detail(
    State(state): State<AppState>,
    Path(id): Path<i32>,
) -> Result<Json<ScrapeRun>, AppError> {
    state
        .runs
        .get(id)
        .await?
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("run {id} not found")))
}

#[derive(Debug, Deserialize)]
pub struct DetailsParams {
    pub job_id: String,
    #[serde(default = "default_country")]
    pub country: String,
}

fn default_country() -> String {
    specs::COUNTRY.to_string()
}

/// Fetch one posting straight from the provider, bypassing the store.
/// Costs a billable request, so the budget gate applies.
pub async fn details(
    State(state): State<AppState>,
    Query(params): Query<DetailsParams>,
) -> Result<Json<RawRecord>, AppError> {
    match state.api.details(&params.job_id, &params.country).await {
        Ok(record) => {
            state.usage.record_request(None).await?;
            Ok(Json(record))
        }
        Err(e @ ClientError::BudgetExhausted(_)) => Err(AppError::Conflict(e.to_string())),
        Err(e) => Err(AppError::Upstream(e.to_string())),
    }
}

pub async fn usage(State(state): State<AppState>) -> Result<Json<UsageSnapshot>, AppError> {
    Ok(Json(state.usage.snapshot().await?))
}

pub async fn keywords(State(state): State<AppState>) -> Result<Json<serde_json::Value>, AppError> {
    let stats = state.keywords.stats().await;
    let stale = state.keywords.stale().await;
    Ok(Json(serde_json::json!({
        "stats": stats,
        "stale": stale,
    })))
}

pub async fn queue(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "stats": state.queue.snapshot(),
        "dead_letters": state.queue.dead_letters(),
    }))
}
