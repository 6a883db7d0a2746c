//! Import job queries
//!
//! The job row is the durable state machine record. Counter updates are
//! single-statement deltas and status transitions are guarded in SQL so a
//! terminal job can never move again, whatever order messages arrive in.

use anyhow::Result;
use sqlx::PgPool;
use uuid::Uuid;

use crate::types::{ImportJob, ImportJobStatus};

const JOB_COLUMNS: &str = "id, filename, status, total_rows, processed_rows, error_rows, \
                           started_at, finished_at, created_at, template_id, mapping_config";

/// Create a new job in `pending`, optionally snapshotting the mapping
pub async fn create_job(
    pool: &PgPool,
    filename: &str,
    template_id: Option<Uuid>,
    mapping_config: Option<&serde_json::Value>,
) -> Result<ImportJob> {
    let job = sqlx::query_as::<_, ImportJob>(&format!(
        r#"
        INSERT INTO import_jobs (id, filename, status, template_id, mapping_config)
        VALUES ($1, $2, 'pending', $3, $4)
        RETURNING {JOB_COLUMNS}
        "#
    ))
    .bind(Uuid::new_v4())
    .bind(filename)
    .bind(template_id)
    .bind(mapping_config)
    .fetch_one(pool)
    .await?;

    Ok(job)
}

pub async fn get_job(pool: &PgPool, job_id: Uuid) -> Result<Option<ImportJob>> {
    let job = sqlx::query_as::<_, ImportJob>(&format!(
        "SELECT {JOB_COLUMNS} FROM import_jobs WHERE id = $1"
    ))
    .bind(job_id)
    .fetch_optional(pool)
    .await?;

    Ok(job)
}

/// List jobs newest first, with optional status filter
pub async fn list_jobs(
    pool: &PgPool,
    skip: i64,
    limit: i64,
    status: Option<ImportJobStatus>,
) -> Result<Vec<ImportJob>> {
    let jobs = sqlx::query_as::<_, ImportJob>(&format!(
        r#"
        SELECT {JOB_COLUMNS} FROM import_jobs
        WHERE ($1::text IS NULL OR status = $1)
        ORDER BY created_at DESC
        OFFSET $2 LIMIT $3
        "#
    ))
    .bind(status.map(|s| s.as_str()))
    .bind(skip)
    .bind(limit)
    .fetch_all(pool)
    .await?;

    Ok(jobs)
}

/// Store the pre-counted row total
pub async fn set_total_rows(pool: &PgPool, job_id: Uuid, total_rows: i32) -> Result<()> {
    sqlx::query("UPDATE import_jobs SET total_rows = $2 WHERE id = $1")
        .bind(job_id)
        .bind(total_rows)
        .execute(pool)
        .await?;

    Ok(())
}

/// Transition to `processing`, stamping `started_at` on the first entry.
///
/// Returns false when the job was already terminal; the caller must then
/// treat the message as a duplicate delivery.
pub async fn mark_processing(pool: &PgPool, job_id: Uuid) -> Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE import_jobs
        SET status = 'processing',
            started_at = COALESCE(started_at, NOW())
        WHERE id = $1 AND status NOT IN ('completed', 'failed')
        "#,
    )
    .bind(job_id)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Transition to a terminal state, stamping `finished_at`.
///
/// Guarded the same way: a job that already finished stays as it is.
pub async fn mark_finished(pool: &PgPool, job_id: Uuid, status: ImportJobStatus) -> Result<bool> {
    debug_assert!(status.is_terminal());

    let result = sqlx::query(
        r#"
        UPDATE import_jobs
        SET status = $2,
            finished_at = NOW()
        WHERE id = $1 AND status NOT IN ('completed', 'failed')
        "#,
    )
    .bind(job_id)
    .bind(status.as_str())
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Add chunk deltas to the progress counters in one statement.
///
/// Delta form keeps the counters monotone under concurrent deliveries.
pub async fn add_progress(
    pool: &PgPool,
    job_id: Uuid,
    processed_delta: i32,
    error_delta: i32,
) -> Result<ImportJob> {
    let job = sqlx::query_as::<_, ImportJob>(&format!(
        r#"
        UPDATE import_jobs
        SET processed_rows = processed_rows + $2,
            error_rows = error_rows + $3
        WHERE id = $1
        RETURNING {JOB_COLUMNS}
        "#
    ))
    .bind(job_id)
    .bind(processed_delta)
    .bind(error_delta)
    .fetch_one(pool)
    .await?;

    Ok(job)
}
