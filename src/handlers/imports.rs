//! Import routes: submission, listing, detail, and the SSE event stream

use std::convert::Infallible;

use axum::extract::{Multipart, Path, Query, State};
use axum::http::header::{self, HeaderName};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::IntoResponse;
use axum::Json;
use futures::stream::{self, StreamExt};
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use crate::db::queries;
use crate::error::{AppError, AppResult};
use crate::services::import_service::SubmitError;
use crate::types::{
    ImportJob, ImportJobCreateResponse, ImportJobDetail, ImportJobStatus, JobEvent, MappingConfig,
};

use super::AppState;

/// POST /imports
///
/// Multipart form: `file` (required), `mapping_config` (JSON text),
/// `template_id`. Returns 201 with the pending job.
pub async fn create_import(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> AppResult<(StatusCode, Json<ImportJobCreateResponse>)> {
    let mut filename: Option<String> = None;
    let mut bytes: Option<Vec<u8>> = None;
    let mut mapping: Option<MappingConfig> = None;
    let mut template_id: Option<Uuid> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::BadRequest(e.to_string()))?
    {
        let name = field.name().map(str::to_string);
        match name.as_deref() {
            Some("file") => {
                filename = field.file_name().map(str::to_string);
                let data = field
                    .bytes()
                    .await
                    .map_err(|e| AppError::BadRequest(e.to_string()))?;
                bytes = Some(data.to_vec());
            }
            Some("mapping_config") => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| AppError::BadRequest(e.to_string()))?;
                let config: MappingConfig = serde_json::from_str(&text)
                    .map_err(|e| AppError::BadRequest(format!("mapping_config inválido: {}", e)))?;
                mapping = Some(config);
            }
            Some("template_id") => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| AppError::BadRequest(e.to_string()))?;
                let id = Uuid::parse_str(text.trim())
                    .map_err(|_| AppError::BadRequest(format!("template_id inválido: {}", text)))?;
                template_id = Some(id);
            }
            _ => {}
        }
    }

    let filename = filename.ok_or_else(|| AppError::BadRequest("Campo 'file' é obrigatório".into()))?;
    let bytes = bytes.ok_or_else(|| AppError::BadRequest("Campo 'file' é obrigatório".into()))?;

    match state
        .import_service
        .submit(&filename, &bytes, mapping, template_id)
        .await
    {
        Ok(response) => Ok((StatusCode::CREATED, Json(response))),
        Err(SubmitError::TemplateNotFound(id)) => {
            Err(AppError::NotFound(format!("Template não encontrado: {}", id)))
        }
        Err(SubmitError::Internal(e)) => Err(AppError::Internal(e.to_string())),
        Err(e) => Err(AppError::BadRequest(e.to_string())),
    }
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    #[serde(default)]
    pub skip: i64,
    #[serde(default = "default_limit")]
    pub limit: i64,
    pub status: Option<String>,
}

fn default_limit() -> i64 {
    100
}

/// GET /imports — job summaries, newest first
pub async fn list_imports(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> AppResult<Json<Vec<ImportJob>>> {
    let status = match &query.status {
        Some(raw) => Some(
            raw.parse::<ImportJobStatus>()
                .map_err(AppError::BadRequest)?,
        ),
        None => None,
    };

    let jobs = queries::job::list_jobs(
        &state.pool,
        query.skip.max(0),
        query.limit.clamp(1, 1000),
        status,
    )
    .await?;

    Ok(Json(jobs))
}

/// GET /imports/:id — job summary plus all log lines
pub async fn get_import(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> AppResult<Json<ImportJobDetail>> {
    let job = queries::job::get_job(&state.pool, job_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Job não encontrado: {}", job_id)))?;
    let logs = queries::job_log::list_for_job(&state.pool, job_id).await?;

    Ok(Json(ImportJobDetail { job, logs }))
}

#[derive(Debug, Deserialize)]
pub struct StreamQuery {
    pub job_id: Option<Uuid>,
}

/// GET /imports/stream — Server-Sent Events
///
/// Sends the current job snapshot first (when `job_id` is given), then a
/// `connected` marker, then live events as the processor publishes them.
/// Silence is covered by a `:heartbeat` comment at the configured interval.
pub async fn stream_events(
    State(state): State<AppState>,
    Query(query): Query<StreamQuery>,
) -> AppResult<impl IntoResponse> {
    // Subscribe before the snapshot so no transition can fall in between.
    let subscription = state.events.subscribe(query.job_id);

    let mut initial: Vec<Event> = Vec::new();
    if let Some(job_id) = query.job_id {
        if let Some(job) = queries::job::get_job(&state.pool, job_id).await? {
            let logs = queries::job_log::list_for_job(&state.pool, job_id).await?;
            // Same wire shape as live status_update events, plus the log
            // trail alongside.
            let mut snapshot = JobEvent::status(&job).data;
            if let serde_json::Value::Object(ref mut fields) = snapshot {
                fields.insert(
                    "logs".to_string(),
                    serde_json::to_value(&logs).map_err(|e| AppError::Internal(e.to_string()))?,
                );
            }
            initial.push(
                Event::default()
                    .event("job_status")
                    .json_data(&snapshot)
                    .map_err(|e| AppError::Internal(e.to_string()))?,
            );
        }
    }
    initial.push(
        Event::default()
            .event("connected")
            .json_data(json!({
                "job_id": query.job_id,
                "message": "Connected to job events stream",
            }))
            .map_err(|e| AppError::Internal(e.to_string()))?,
    );

    let live = stream::unfold(subscription, |mut subscription| async move {
        let event = subscription.recv().await?;
        let frame = Event::default()
            .event(event.event_type.sse_event_name())
            .json_data(&event.data)
            .ok()?;
        Some((frame, subscription))
    });

    let frames = stream::iter(initial)
        .chain(live)
        .map(Ok::<Event, Infallible>);

    let sse = Sse::new(frames).keep_alive(
        KeepAlive::new()
            .interval(state.sse_heartbeat)
            .text("heartbeat"),
    );

    Ok((
        [
            (header::CACHE_CONTROL, "no-cache"),
            (header::CONNECTION, "keep-alive"),
            (HeaderName::from_static("x-accel-buffering"), "no"),
        ],
        sse,
    ))
}
