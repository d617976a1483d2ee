//! Run API Handlers
//!
//! HTTP endpoints for triggering, inspecting and cancelling runs.

use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use keel_core::domain::{LogEntry, PipelineRun};
use keel_core::dto::run::{RunSteps, RunSummary, TriggerRun};
use serde::Deserialize;
use uuid::Uuid;

use crate::api::error::ApiResult;
use crate::service::run_service;
use crate::state::AppState;

const DEFAULT_LIMIT: u32 = 50;
const MAX_LIMIT: u32 = 500;

#[derive(Debug, Deserialize)]
pub struct ListRunsQuery {
    pub pipeline: Option<String>,
    pub limit: Option<u32>,
}

// =============================================================================
// Run Lifecycle Endpoints
// =============================================================================

/// POST /api/runs
/// Trigger a run; it executes in the background
pub async fn trigger_run(
    State(state): State<AppState>,
    Json(req): Json<TriggerRun>,
) -> ApiResult<(StatusCode, Json<PipelineRun>)> {
    tracing::info!("Triggering {} on {}", req.pipeline, req.branch);

    let run = run_service::trigger_run(&state, req).await?;

    Ok((StatusCode::ACCEPTED, Json(run)))
}

/// POST /api/runs/{id}/cancel
pub async fn cancel_run(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<(StatusCode, Json<RunSummary>)> {
    tracing::info!("Cancelling run: {}", id);

    let run = run_service::cancel_run(&state, id).await?;

    Ok((StatusCode::ACCEPTED, Json(run)))
}

// =============================================================================
// Query Endpoints
// =============================================================================

/// GET /api/runs
///
/// Query parameters:
/// - `pipeline` (optional): only runs of this pipeline
/// - `limit` (optional): at most this many runs, newest first
pub async fn list_runs(
    State(state): State<AppState>,
    Query(params): Query<ListRunsQuery>,
) -> ApiResult<Json<Vec<RunSummary>>> {
    tracing::debug!("Listing runs");

    let limit = params.limit.unwrap_or(DEFAULT_LIMIT).min(MAX_LIMIT);
    let runs = run_service::list_runs(&state.pool, params.pipeline.as_deref(), limit).await?;

    Ok(Json(runs))
}

/// GET /api/runs/{id}
pub async fn get_run(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<PipelineRun>> {
    tracing::debug!("Getting run: {}", id);

    let run = run_service::get_run(&state.pool, id).await?;

    Ok(Json(run))
}

/// GET /api/runs/{id}/steps
pub async fn get_run_steps(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<RunSteps>> {
    let steps = run_service::run_steps(&state.pool, id).await?;
    Ok(Json(steps))
}

/// GET /api/runs/{id}/logs
pub async fn get_run_logs(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Vec<LogEntry>>> {
    let logs = run_service::run_logs(&state.pool, id).await?;
    Ok(Json(logs))
}
