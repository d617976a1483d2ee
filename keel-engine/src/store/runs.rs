//! Run Repository
//!
//! Handles database operations on the `runs` table. Step results and logs
//! live in their own repositories.

use chrono::{DateTime, Utc};
use keel_core::ErrorKind;
use keel_core::domain::{PipelineRun, RunFailure, RunStatus};
use sqlx::SqlitePool;
use sqlx::types::Json;
use std::collections::BTreeMap;
use uuid::Uuid;

use super::steps;

/// Next build number of a pipeline, starting at 1
pub async fn next_run_number(pool: &SqlitePool, pipeline: &str) -> Result<u64, sqlx::Error> {
    let (next,): (i64,) =
        sqlx::query_as("SELECT COALESCE(MAX(number), 0) + 1 FROM runs WHERE pipeline = ?")
            .bind(pipeline)
            .fetch_one(pool)
            .await?;
    Ok(next as u64)
}

/// Insert a freshly prepared run
pub async fn insert_run(pool: &SqlitePool, run: &PipelineRun) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO runs (id, number, pipeline, branch, environment, status, parameters, started_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(run.id.to_string())
    .bind(run.number as i64)
    .bind(&run.pipeline)
    .bind(&run.branch)
    .bind(&run.environment)
    .bind(run.status.as_str())
    .bind(Json(&run.parameters))
    .bind(run.started_at)
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn mark_running(pool: &SqlitePool, run_id: Uuid) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE runs SET status = ? WHERE id = ?")
        .bind(RunStatus::Running.as_str())
        .bind(run_id.to_string())
        .execute(pool)
        .await?;

    Ok(())
}

/// Record the terminal status and failure of a run
pub async fn finalize_run(pool: &SqlitePool, run: &PipelineRun) -> Result<(), sqlx::Error> {
    let failure = run.failure.as_ref();

    sqlx::query(
        r#"
        UPDATE runs
        SET status = ?, completed_at = ?, failed_step = ?, failure_kind = ?, failure_message = ?
        WHERE id = ?
        "#,
    )
    .bind(run.status.as_str())
    .bind(run.completed_at)
    .bind(failure.map(|f| f.step.clone()))
    .bind(failure.map(|f| f.kind.as_str()))
    .bind(failure.map(|f| f.message.clone()))
    .bind(run.id.to_string())
    .execute(pool)
    .await?;

    Ok(())
}

/// Find a run with its step results
pub async fn find_run(pool: &SqlitePool, run_id: Uuid) -> Result<Option<PipelineRun>, sqlx::Error> {
    let row = sqlx::query_as::<_, RunRow>(
        r#"
        SELECT id, number, pipeline, branch, environment, status, parameters,
               started_at, completed_at, failed_step, failure_kind, failure_message
        FROM runs
        WHERE id = ?
        "#,
    )
    .bind(run_id.to_string())
    .fetch_optional(pool)
    .await?;

    let Some(row) = row else {
        return Ok(None);
    };

    let mut run = PipelineRun::from(row);
    let results = steps::step_results(pool, run.id).await?;
    for (rollback, result) in results {
        if rollback {
            run.rollback.push(result);
        } else {
            run.steps.push(result);
        }
    }
    Ok(Some(run))
}

/// List runs newest first, without step results
pub async fn list_runs(
    pool: &SqlitePool,
    pipeline: Option<&str>,
    limit: u32,
) -> Result<Vec<PipelineRun>, sqlx::Error> {
    let rows = sqlx::query_as::<_, RunRow>(
        r#"
        SELECT id, number, pipeline, branch, environment, status, parameters,
               started_at, completed_at, failed_step, failure_kind, failure_message
        FROM runs
        WHERE ?1 IS NULL OR pipeline = ?1
        ORDER BY started_at DESC, number DESC
        LIMIT ?2
        "#,
    )
    .bind(pipeline)
    .bind(limit as i64)
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(PipelineRun::from).collect())
}

// =============================================================================
// Helper Functions
// =============================================================================

fn string_to_status(s: &str) -> RunStatus {
    s.parse().unwrap_or(RunStatus::Failed)
}

// =============================================================================
// Database Row Types
// =============================================================================

#[derive(sqlx::FromRow)]
struct RunRow {
    id: String,
    number: i64,
    pipeline: String,
    branch: String,
    environment: String,
    status: String,
    parameters: Json<BTreeMap<String, String>>,
    started_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
    failed_step: Option<String>,
    failure_kind: Option<String>,
    failure_message: Option<String>,
}

impl From<RunRow> for PipelineRun {
    fn from(row: RunRow) -> Self {
        let failure = row.failed_step.map(|step| RunFailure {
            step,
            kind: row
                .failure_kind
                .as_deref()
                .and_then(ErrorKind::parse)
                .unwrap_or(ErrorKind::StepExecutionFailed),
            message: row.failure_message.unwrap_or_default(),
        });

        PipelineRun {
            id: Uuid::parse_str(&row.id).unwrap_or_default(),
            number: row.number as u64,
            pipeline: row.pipeline,
            branch: row.branch,
            environment: row.environment,
            parameters: row.parameters.0,
            status: string_to_status(&row.status),
            started_at: row.started_at,
            completed_at: row.completed_at,
            steps: Vec::new(),
            rollback: Vec::new(),
            failure,
        }
    }
}
