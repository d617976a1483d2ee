//! Log Repository

use keel_core::domain::{LogEntry, LogLevel};
use sqlx::SqlitePool;
use uuid::Uuid;

/// Add log entries for a run
pub async fn append_logs(
    pool: &SqlitePool,
    run_id: Uuid,
    entries: &[LogEntry],
) -> Result<(), sqlx::Error> {
    if entries.is_empty() {
        return Ok(());
    }

    let mut tx = pool.begin().await?;
    for entry in entries {
        sqlx::query(
            r#"
            INSERT INTO run_logs (run_id, timestamp, level, step, message)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(run_id.to_string())
        .bind(entry.timestamp)
        .bind(entry.level.as_str())
        .bind(entry.step.as_deref())
        .bind(&entry.message)
        .execute(&mut *tx)
        .await?;
    }
    tx.commit().await?;

    Ok(())
}

/// Get all log entries for a run, in insertion order
pub async fn logs(pool: &SqlitePool, run_id: Uuid) -> Result<Vec<LogEntry>, sqlx::Error> {
    let rows = sqlx::query_as::<_, LogRow>(
        r#"
        SELECT timestamp, level, step, message
        FROM run_logs
        WHERE run_id = ?
        ORDER BY id ASC
        "#,
    )
    .bind(run_id.to_string())
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(|r| r.into()).collect())
}

// =============================================================================
// Helper Functions
// =============================================================================

fn string_to_level(s: &str) -> LogLevel {
    match s {
        "debug" => LogLevel::Debug,
        "warning" => LogLevel::Warning,
        "error" => LogLevel::Error,
        _ => LogLevel::Info,
    }
}

// =============================================================================
// Database Row Types
// =============================================================================

#[derive(sqlx::FromRow)]
struct LogRow {
    timestamp: chrono::DateTime<chrono::Utc>,
    level: String,
    step: Option<String>,
    message: String,
}

impl From<LogRow> for LogEntry {
    fn from(row: LogRow) -> Self {
        LogEntry {
            timestamp: row.timestamp,
            level: string_to_level(&row.level),
            step: row.step,
            message: row.message,
        }
    }
}
