//! Run Service
//!
//! Triggering hands the prepared run to a background task and returns
//! immediately; everything else reads the engine's run store.

use keel_core::KeelError;
use keel_core::domain::{LogEntry, PipelineRun};
use keel_core::dto::run::{RunSteps, RunSummary, TriggerRun};
use keel_engine::{Trigger, cancellation, store};
use sqlx::SqlitePool;
use std::sync::Arc;
use uuid::Uuid;

use super::pipeline_service::{self, PipelineError};
use crate::state::AppState;

/// Service error type
#[derive(Debug)]
pub enum RunError {
    NotFound(Uuid),
    PipelineNotFound(String),
    InvalidDefinition(String),
    NoEnvironment(String),
    NotActive(Uuid),
    ValidationError(String),
    Engine(KeelError),
    Io(std::io::Error),
    DatabaseError(sqlx::Error),
}

impl From<sqlx::Error> for RunError {
    fn from(err: sqlx::Error) -> Self {
        RunError::DatabaseError(err)
    }
}

impl From<PipelineError> for RunError {
    fn from(err: PipelineError) -> Self {
        match err {
            PipelineError::NotFound(name) => RunError::PipelineNotFound(name),
            PipelineError::Invalid(msg) => RunError::InvalidDefinition(msg),
            PipelineError::Io(err) => RunError::Io(err),
        }
    }
}

pub type Result<T> = std::result::Result<T, RunError>;

/// Prepare a run and start executing it in the background
///
/// The returned run is still pending.
pub async fn trigger_run(state: &AppState, req: TriggerRun) -> Result<PipelineRun> {
    if req.branch.trim().is_empty() {
        return Err(RunError::ValidationError("branch must not be empty".to_string()));
    }

    let config = state.engine.config().loader_config();
    let definition = pipeline_service::load_pipeline(&state.pipelines_dir, &req.pipeline, &config)?;

    let trigger = Trigger {
        branch: req.branch,
        parameters: req.parameters,
    };
    let prepared = state
        .engine
        .prepare(Arc::new(definition), trigger)
        .await
        .map_err(|e| match e {
            KeelError::NoEnvironmentMatch { branch } => RunError::NoEnvironment(branch),
            other => RunError::Engine(other),
        })?;

    let run = prepared.run.clone();
    let (handle, signal) = cancellation();
    state.register(run.id, handle);

    let task_state = state.clone();
    state.spawn_run(async move {
        let run_id = prepared.id();
        let finished = task_state.engine.execute(prepared, signal).await;
        task_state.finish(run_id);
        tracing::info!("Run {} finished: {}", run_id, finished.status);
    });

    tracing::info!("Run triggered: {} #{} ({})", run.pipeline, run.number, run.id);

    Ok(run)
}

/// Get a run with its step results
pub async fn get_run(pool: &SqlitePool, id: Uuid) -> Result<PipelineRun> {
    store::find_run(pool, id).await?.ok_or(RunError::NotFound(id))
}

/// List runs newest first
pub async fn list_runs(pool: &SqlitePool, pipeline: Option<&str>, limit: u32) -> Result<Vec<RunSummary>> {
    let runs = store::list_runs(pool, pipeline, limit).await?;
    Ok(runs.iter().map(RunSummary::from).collect())
}

pub async fn run_steps(pool: &SqlitePool, id: Uuid) -> Result<RunSteps> {
    let run = get_run(pool, id).await?;
    Ok(RunSteps::from(&run))
}

pub async fn run_logs(pool: &SqlitePool, id: Uuid) -> Result<Vec<LogEntry>> {
    // Verify run exists
    get_run(pool, id).await?;
    Ok(store::logs(pool, id).await?)
}

/// Request cancellation of an active run
pub async fn cancel_run(state: &AppState, id: Uuid) -> Result<RunSummary> {
    let run = get_run(&state.pool, id).await?;
    if run.status.is_terminal() || !state.cancel(id) {
        return Err(RunError::NotActive(id));
    }

    tracing::info!("Cancellation requested for run {}", id);
    Ok(RunSummary::from(&run))
}
