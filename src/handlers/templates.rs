//! Import template routes

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;
use uuid::Uuid;

use crate::db::queries;
use crate::error::{AppError, AppResult};
use crate::types::{ImportTemplate, MappingConfig};

use super::AppState;

#[derive(Debug, Deserialize)]
pub struct CreateTemplateRequest {
    pub name: String,
    pub mapping_config: MappingConfig,
}

/// POST /templates — persist a reusable mapping configuration
pub async fn create_template(
    State(state): State<AppState>,
    Json(request): Json<CreateTemplateRequest>,
) -> AppResult<(StatusCode, Json<ImportTemplate>)> {
    let name = request.name.trim();
    if name.is_empty() {
        return Err(AppError::BadRequest("Campo 'name' é obrigatório".into()));
    }
    request
        .mapping_config
        .validate()
        .map_err(|errors| AppError::BadRequest(errors.join("; ")))?;

    // Names are unique; a UNIQUE index backs this against concurrent inserts.
    if queries::template::get_by_name(&state.pool, name).await?.is_some() {
        return Err(AppError::BadRequest(format!(
            "Template com nome '{}' já existe",
            name
        )));
    }

    let mapping_json = serde_json::to_value(&request.mapping_config)
        .map_err(|e| AppError::Internal(e.to_string()))?;

    let template = queries::template::create(
        &state.pool,
        name,
        &request.mapping_config.target_table,
        request.mapping_config.create_table,
        &mapping_json,
    )
    .await?;

    Ok((StatusCode::CREATED, Json(template)))
}

#[derive(Debug, Deserialize)]
pub struct ListTemplatesQuery {
    #[serde(default)]
    pub skip: i64,
    #[serde(default = "default_limit")]
    pub limit: i64,
}

fn default_limit() -> i64 {
    100
}

/// GET /templates
pub async fn list_templates(
    State(state): State<AppState>,
    Query(query): Query<ListTemplatesQuery>,
) -> AppResult<Json<Vec<ImportTemplate>>> {
    let templates =
        queries::template::list(&state.pool, query.skip.max(0), query.limit.clamp(1, 1000)).await?;
    Ok(Json(templates))
}

/// GET /templates/:id
pub async fn get_template(
    State(state): State<AppState>,
    Path(template_id): Path<Uuid>,
) -> AppResult<Json<ImportTemplate>> {
    let template = queries::template::get_by_id(&state.pool, template_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Template não encontrado: {}", template_id)))?;
    Ok(Json(template))
}
