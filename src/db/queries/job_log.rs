//! Job log queries

use anyhow::Result;
use sqlx::PgPool;
use uuid::Uuid;

use crate::types::{JobLog, LogLevel};

/// Append a log line to a job
pub async fn append(pool: &PgPool, job_id: Uuid, level: LogLevel, message: &str) -> Result<JobLog> {
    let log = sqlx::query_as::<_, JobLog>(
        r#"
        INSERT INTO job_logs (id, job_id, level, message)
        VALUES ($1, $2, $3, $4)
        RETURNING id, job_id, level, message, created_at
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(job_id)
    .bind(level.as_str())
    .bind(message)
    .fetch_one(pool)
    .await?;

    Ok(log)
}

/// All log lines for a job, oldest first
pub async fn list_for_job(pool: &PgPool, job_id: Uuid) -> Result<Vec<JobLog>> {
    let logs = sqlx::query_as::<_, JobLog>(
        r#"
        SELECT id, job_id, level, message, created_at
        FROM job_logs
        WHERE job_id = $1
        ORDER BY created_at ASC
        "#,
    )
    .bind(job_id)
    .fetch_all(pool)
    .await?;

    Ok(logs)
}
