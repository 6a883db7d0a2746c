//! Import job and job log types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::postgres::PgRow;
use sqlx::Row;
use uuid::Uuid;

/// Import job lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImportJobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl ImportJobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ImportJobStatus::Pending => "pending",
            ImportJobStatus::Processing => "processing",
            ImportJobStatus::Completed => "completed",
            ImportJobStatus::Failed => "failed",
        }
    }

    /// Terminal states never transition again
    pub fn is_terminal(&self) -> bool {
        matches!(self, ImportJobStatus::Completed | ImportJobStatus::Failed)
    }
}

impl std::str::FromStr for ImportJobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ImportJobStatus::Pending),
            "processing" => Ok(ImportJobStatus::Processing),
            "completed" => Ok(ImportJobStatus::Completed),
            "failed" => Ok(ImportJobStatus::Failed),
            other => Err(format!("unknown job status '{}'", other)),
        }
    }
}

impl std::fmt::Display for ImportJobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One ingestion of one file
#[derive(Debug, Clone, Serialize)]
pub struct ImportJob {
    pub id: Uuid,
    pub filename: String,
    pub status: ImportJobStatus,
    pub total_rows: Option<i32>,
    pub processed_rows: i32,
    pub error_rows: i32,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub template_id: Option<Uuid>,
    /// Mapping snapshot persisted at submission; absent for the vehicle preset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mapping_config: Option<serde_json::Value>,
}

impl<'r> sqlx::FromRow<'r, PgRow> for ImportJob {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        let status: String = row.try_get("status")?;
        let status = status
            .parse()
            .map_err(|e: String| sqlx::Error::ColumnDecode {
                index: "status".into(),
                source: e.into(),
            })?;

        Ok(Self {
            id: row.try_get("id")?,
            filename: row.try_get("filename")?,
            status,
            total_rows: row.try_get("total_rows")?,
            processed_rows: row.try_get("processed_rows")?,
            error_rows: row.try_get("error_rows")?,
            started_at: row.try_get("started_at")?,
            finished_at: row.try_get("finished_at")?,
            created_at: row.try_get("created_at")?,
            template_id: row.try_get("template_id")?,
            mapping_config: row.try_get("mapping_config")?,
        })
    }
}

/// Log severity for job log lines
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Warning,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Info => "info",
            LogLevel::Warning => "warning",
            LogLevel::Error => "error",
        }
    }
}

impl std::str::FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "info" => Ok(LogLevel::Info),
            "warning" => Ok(LogLevel::Warning),
            "error" => Ok(LogLevel::Error),
            other => Err(format!("unknown log level '{}'", other)),
        }
    }
}

/// Append-only log line attached to a job
#[derive(Debug, Clone, Serialize)]
pub struct JobLog {
    pub id: Uuid,
    pub job_id: Uuid,
    pub level: LogLevel,
    pub message: String,
    pub created_at: DateTime<Utc>,
}

impl<'r> sqlx::FromRow<'r, PgRow> for JobLog {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        let level: String = row.try_get("level")?;
        let level = level
            .parse()
            .map_err(|e: String| sqlx::Error::ColumnDecode {
                index: "level".into(),
                source: e.into(),
            })?;

        Ok(Self {
            id: row.try_get("id")?,
            job_id: row.try_get("job_id")?,
            level,
            message: row.try_get("message")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

/// Response returned on job submission
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportJobCreateResponse {
    pub job_id: Uuid,
    pub status: ImportJobStatus,
}

/// Job summary plus its full log trail
#[derive(Debug, Clone, Serialize)]
pub struct ImportJobDetail {
    #[serde(flatten)]
    pub job: ImportJob,
    pub logs: Vec<JobLog>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trip() {
        for status in [
            ImportJobStatus::Pending,
            ImportJobStatus::Processing,
            ImportJobStatus::Completed,
            ImportJobStatus::Failed,
        ] {
            let parsed: ImportJobStatus = status.as_str().parse().unwrap();
            assert_eq!(parsed, status);
        }
    }

    #[test]
    fn test_status_rejects_unknown() {
        assert!("cancelled".parse::<ImportJobStatus>().is_err());
    }

    #[test]
    fn test_terminal_states() {
        assert!(!ImportJobStatus::Pending.is_terminal());
        assert!(!ImportJobStatus::Processing.is_terminal());
        assert!(ImportJobStatus::Completed.is_terminal());
        assert!(ImportJobStatus::Failed.is_terminal());
    }

    #[test]
    fn test_status_serializes_lowercase() {
        let json = serde_json::to_string(&ImportJobStatus::Processing).unwrap();
        assert_eq!(json, r#""processing""#);
    }

    #[test]
    fn test_log_level_round_trip() {
        for level in [LogLevel::Info, LogLevel::Warning, LogLevel::Error] {
            let parsed: LogLevel = level.as_str().parse().unwrap();
            assert_eq!(parsed, level);
        }
    }
}
