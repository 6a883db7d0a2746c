//! HTTP handlers

pub mod imports;
pub mod templates;

use std::sync::Arc;
use std::time::Duration;

use axum::extract::{DefaultBodyLimit, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;
use sqlx::PgPool;
use tower_http::cors::CorsLayer;

use crate::services::events::EventBus;
use crate::services::import_service::ImportService;

/// Shared state for HTTP handlers
#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub events: EventBus,
    pub import_service: Arc<ImportService>,
    pub sse_heartbeat: Duration,
}

/// Build the application router
pub fn router(state: AppState, max_upload_bytes: u64) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/imports", post(imports::create_import).get(imports::list_imports))
        .route("/imports/stream", get(imports::stream_events))
        .route("/imports/:id", get(imports::get_import))
        .route("/templates", post(templates::create_template).get(templates::list_templates))
        .route("/templates/:id", get(templates::get_template))
        // Multipart bodies carry the whole upload plus form overhead
        .layer(DefaultBodyLimit::max(max_upload_bytes as usize + 64 * 1024))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Liveness check with a database ping
async fn health(State(state): State<AppState>) -> impl IntoResponse {
    match sqlx::query("SELECT 1").fetch_one(&state.pool).await {
        Ok(_) => (
            StatusCode::OK,
            Json(json!({"status": "healthy", "database": "connected"})),
        ),
        Err(e) => {
            tracing::error!("Database health check failed: {:?}", e);
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({"status": "unhealthy", "database": "unavailable"})),
            )
        }
    }
}
