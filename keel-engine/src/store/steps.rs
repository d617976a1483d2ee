//! Step Result Repository

use chrono::{DateTime, Utc};
use keel_core::ErrorKind;
use keel_core::domain::{StepError, StepResult, StepStatus};
use sqlx::SqlitePool;
use sqlx::types::Json;
use std::collections::BTreeMap;
use uuid::Uuid;

/// Append a terminal step result; `rollback` marks results of rollback steps
pub async fn append_step_result(
    pool: &SqlitePool,
    run_id: Uuid,
    result: &StepResult,
    rollback: bool,
) -> Result<(), sqlx::Error> {
    let error = result.error.as_ref();

    sqlx::query(
        r#"
        INSERT INTO step_results
            (run_id, rollback, ordinal, step, status, attempts, outputs, started_at,
             duration_ms, error_kind, error_message)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(run_id.to_string())
    .bind(rollback)
    .bind(result.ordinal as i64)
    .bind(&result.step)
    .bind(status_to_string(result.status))
    .bind(result.attempts as i64)
    .bind(Json(&result.outputs))
    .bind(result.started_at)
    .bind(result.duration_ms as i64)
    .bind(error.map(|e| e.kind.as_str()))
    .bind(error.map(|e| e.message.clone()))
    .execute(pool)
    .await?;

    Ok(())
}

/// Results of a run in execution order, each flagged as rollback or not
pub async fn step_results(
    pool: &SqlitePool,
    run_id: Uuid,
) -> Result<Vec<(bool, StepResult)>, sqlx::Error> {
    let rows = sqlx::query_as::<_, StepRow>(
        r#"
        SELECT rollback, ordinal, step, status, attempts, outputs, started_at,
               duration_ms, error_kind, error_message
        FROM step_results
        WHERE run_id = ?
        ORDER BY rollback ASC, ordinal ASC
        "#,
    )
    .bind(run_id.to_string())
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(|r| (r.rollback, r.into())).collect())
}

// =============================================================================
// Helper Functions
// =============================================================================

fn status_to_string(status: StepStatus) -> &'static str {
    status.as_str()
}

fn string_to_status(s: &str) -> StepStatus {
    match s {
        "pending" => StepStatus::Pending,
        "running" => StepStatus::Running,
        "retrying" => StepStatus::Retrying,
        "succeeded" => StepStatus::Succeeded,
        "succeeded_with_warning" => StepStatus::SucceededWithWarning,
        "skipped" => StepStatus::Skipped,
        "aborted" => StepStatus::Aborted,
        _ => StepStatus::Failed,
    }
}

// =============================================================================
// Database Row Types
// =============================================================================

#[derive(sqlx::FromRow)]
struct StepRow {
    rollback: bool,
    ordinal: i64,
    step: String,
    status: String,
    attempts: i64,
    outputs: Json<BTreeMap<String, String>>,
    started_at: DateTime<Utc>,
    duration_ms: i64,
    error_kind: Option<String>,
    error_message: Option<String>,
}

impl From<StepRow> for StepResult {
    fn from(row: StepRow) -> Self {
        let error = row.error_kind.map(|kind| StepError {
            kind: ErrorKind::parse(&kind).unwrap_or(ErrorKind::StepExecutionFailed),
            message: row.error_message.unwrap_or_default(),
        });

        StepResult {
            step: row.step,
            ordinal: row.ordinal as usize,
            status: string_to_status(&row.status),
            attempts: row.attempts as u32,
            outputs: row.outputs.0,
            started_at: row.started_at,
            duration_ms: row.duration_ms as u64,
            error,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::db::test_pool;
    use crate::store::runs::insert_run;
    use keel_core::domain::PipelineRun;

    fn result(step: &str, ordinal: usize, status: StepStatus) -> StepResult {
        StepResult {
            step: step.to_string(),
            ordinal,
            status,
            attempts: 1,
            outputs: BTreeMap::new(),
            started_at: Utc::now(),
            duration_ms: 12,
            error: None,
        }
    }

    #[tokio::test]
    async fn test_results_come_back_in_order() {
        let pool = test_pool().await;
        let run = PipelineRun::new(1, "petclinic", "main", "prod", BTreeMap::new());
        insert_run(&pool, &run).await.unwrap();

        let mut build = result("Build", 0, StepStatus::Succeeded);
        build.outputs.insert("artifact".to_string(), "target/app.jar".to_string());
        let mut deploy = result("Deploy", 1, StepStatus::Failed);
        deploy.attempts = 4;
        deploy.error = Some(StepError {
            kind: ErrorKind::DeploymentUnhealthy,
            message: "deployment unhealthy: rollout stalled".to_string(),
        });
        let undo = result("Undo", 2, StepStatus::Succeeded);

        append_step_result(&pool, run.id, &deploy, false).await.unwrap();
        append_step_result(&pool, run.id, &undo, true).await.unwrap();
        append_step_result(&pool, run.id, &build, false).await.unwrap();

        let results = step_results(&pool, run.id).await.unwrap();
        let names: Vec<_> = results.iter().map(|(_, r)| r.step.as_str()).collect();
        assert_eq!(names, ["Build", "Deploy", "Undo"]);
        assert!(results[2].0);

        let (_, stored_deploy) = &results[1];
        assert_eq!(stored_deploy.status, StepStatus::Failed);
        assert_eq!(stored_deploy.attempts, 4);
        assert_eq!(stored_deploy.error, deploy.error);
        assert_eq!(
            results[0].1.outputs.get("artifact").map(String::as_str),
            Some("target/app.jar")
        );
    }

    #[test]
    fn test_status_strings() {
        for status in [
            StepStatus::Succeeded,
            StepStatus::SucceededWithWarning,
            StepStatus::Skipped,
            StepStatus::Aborted,
        ] {
            assert_eq!(string_to_status(status_to_string(status)), status);
        }
    }
}
