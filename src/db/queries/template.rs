//! Import template queries

use anyhow::Result;
use sqlx::PgPool;
use uuid::Uuid;

use crate::types::ImportTemplate;

const TEMPLATE_COLUMNS: &str =
    "id, name, target_table, create_table, mapping_config, created_at, updated_at";

pub async fn create(
    pool: &PgPool,
    name: &str,
    target_table: &str,
    create_table: bool,
    mapping_config: &serde_json::Value,
) -> Result<ImportTemplate> {
    let template = sqlx::query_as::<_, ImportTemplate>(&format!(
        r#"
        INSERT INTO import_templates (id, name, target_table, create_table, mapping_config)
        VALUES ($1, $2, $3, $4, $5)
        RETURNING {TEMPLATE_COLUMNS}
        "#
    ))
    .bind(Uuid::new_v4())
    .bind(name)
    .bind(target_table)
    .bind(create_table)
    .bind(mapping_config)
    .fetch_one(pool)
    .await?;

    Ok(template)
}

pub async fn get_by_name(pool: &PgPool, name: &str) -> Result<Option<ImportTemplate>> {
    let template = sqlx::query_as::<_, ImportTemplate>(&format!(
        "SELECT {TEMPLATE_COLUMNS} FROM import_templates WHERE name = $1"
    ))
    .bind(name)
    .fetch_optional(pool)
    .await?;

    Ok(template)
}

pub async fn get_by_id(pool: &PgPool, template_id: Uuid) -> Result<Option<ImportTemplate>> {
    let template = sqlx::query_as::<_, ImportTemplate>(&format!(
        "SELECT {TEMPLATE_COLUMNS} FROM import_templates WHERE id = $1"
    ))
    .bind(template_id)
    .fetch_optional(pool)
    .await?;

    Ok(template)
}

pub async fn list(pool: &PgPool, skip: i64, limit: i64) -> Result<Vec<ImportTemplate>> {
    let templates = sqlx::query_as::<_, ImportTemplate>(&format!(
        r#"
        SELECT {TEMPLATE_COLUMNS} FROM import_templates
        ORDER BY created_at DESC
        OFFSET $1 LIMIT $2
        "#
    ))
    .bind(skip)
    .bind(limit)
    .fetch_all(pool)
    .await?;

    Ok(templates)
}
