//! Pipeline API Handlers

use axum::{
    Json,
    extract::{Path, State},
};
use keel_core::domain::PipelineDefinition;
use keel_core::dto::pipeline::PipelineInfo;

use crate::api::error::ApiResult;
use crate::service::pipeline_service;
use crate::state::AppState;

/// GET /api/pipelines
/// List definitions and whether each one loads
pub async fn list_pipelines(State(state): State<AppState>) -> ApiResult<Json<Vec<PipelineInfo>>> {
    tracing::debug!("Listing pipelines in {}", state.pipelines_dir.display());

    let config = state.engine.config().loader_config();
    let pipelines = pipeline_service::list_pipelines(&state.pipelines_dir, &config)?;

    Ok(Json(pipelines))
}

/// GET /api/pipelines/{name}
/// Get a validated definition
pub async fn get_pipeline(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> ApiResult<Json<PipelineDefinition>> {
    tracing::debug!("Getting pipeline: {}", name);

    let config = state.engine.config().loader_config();
    let definition = pipeline_service::load_pipeline(&state.pipelines_dir, &name, &config)?;

    Ok(Json(definition))
}
