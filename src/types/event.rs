//! In-memory job events delivered over the event bus

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use super::job::{ImportJob, LogLevel};

/// Kind of a job event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobEventType {
    StatusUpdate,
    ProgressUpdate,
    Log,
    Connected,
}

impl JobEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobEventType::StatusUpdate => "status_update",
            JobEventType::ProgressUpdate => "progress_update",
            JobEventType::Log => "log",
            JobEventType::Connected => "connected",
        }
    }

    /// Named SSE event the transport maps this type to
    pub fn sse_event_name(&self) -> &'static str {
        match self {
            JobEventType::StatusUpdate => "job_status",
            JobEventType::ProgressUpdate => "job_progress",
            JobEventType::Log => "job_log",
            JobEventType::Connected => "connected",
        }
    }
}

/// An event published for one job; never persisted
#[derive(Debug, Clone, Serialize)]
pub struct JobEvent {
    pub job_id: Uuid,
    pub event_type: JobEventType,
    pub data: serde_json::Value,
}

impl JobEvent {
    /// Status snapshot after a lifecycle transition
    pub fn status(job: &ImportJob) -> Self {
        Self {
            job_id: job.id,
            event_type: JobEventType::StatusUpdate,
            data: json!({
                "job_id": job.id,
                "status": job.status,
                "filename": job.filename,
                "total_rows": job.total_rows,
                "processed_rows": job.processed_rows,
                "error_rows": job.error_rows,
                "started_at": job.started_at,
                "finished_at": job.finished_at,
                "timestamp": Utc::now(),
            }),
        }
    }

    /// Counter snapshot after a chunk lands
    pub fn progress(job_id: Uuid, processed_rows: i32, error_rows: i32, total_rows: Option<i32>) -> Self {
        Self {
            job_id,
            event_type: JobEventType::ProgressUpdate,
            data: json!({
                "job_id": job_id,
                "processed_rows": processed_rows,
                "error_rows": error_rows,
                "total_rows": total_rows,
                "timestamp": Utc::now(),
            }),
        }
    }

    /// A log line mirrored onto the bus
    pub fn log(job_id: Uuid, level: LogLevel, message: &str, created_at: DateTime<Utc>) -> Self {
        Self {
            job_id,
            event_type: JobEventType::Log,
            data: json!({
                "job_id": job_id,
                "level": level,
                "message": message,
                "created_at": created_at,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_type_names() {
        assert_eq!(JobEventType::StatusUpdate.as_str(), "status_update");
        assert_eq!(JobEventType::ProgressUpdate.as_str(), "progress_update");
        assert_eq!(JobEventType::Log.as_str(), "log");
        assert_eq!(JobEventType::Connected.as_str(), "connected");
    }

    #[test]
    fn test_sse_event_name_mapping() {
        assert_eq!(JobEventType::StatusUpdate.sse_event_name(), "job_status");
        assert_eq!(JobEventType::ProgressUpdate.sse_event_name(), "job_progress");
        assert_eq!(JobEventType::Log.sse_event_name(), "job_log");
        assert_eq!(JobEventType::Connected.sse_event_name(), "connected");
    }

    #[test]
    fn test_progress_event_payload() {
        let job_id = Uuid::new_v4();
        let event = JobEvent::progress(job_id, 10, 2, Some(20));
        assert_eq!(event.event_type, JobEventType::ProgressUpdate);
        assert_eq!(event.data["processed_rows"], 10);
        assert_eq!(event.data["error_rows"], 2);
        assert_eq!(event.data["total_rows"], 20);
    }

    #[test]
    fn test_log_event_payload() {
        let job_id = Uuid::new_v4();
        let event = JobEvent::log(job_id, LogLevel::Warning, "Linha 3: duplicada", Utc::now());
        assert_eq!(event.data["level"], "warning");
        assert_eq!(event.data["message"], "Linha 3: duplicada");
    }
}
