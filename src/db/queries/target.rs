//! Dynamic target-table queries for mapped imports
//!
//! Table and column names come from a validated MappingConfig (plain
//! identifiers only), so they are spliced into runtime SQL; every value
//! still goes through a bind parameter.

use std::collections::HashSet;

use anyhow::{bail, Result};
use sqlx::{Acquire, PgPool, Postgres, QueryBuilder};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::types::{ColumnType, FieldValue, FkConfig, MappedRow, MappingConfig, OnMissing};

/// Provision the target table when the mapping asks for it.
///
/// Created tables get a UUID primary key, a `job_id` column, timestamps,
/// and a UNIQUE constraint per uniqueness key.
pub async fn create_table_if_needed(pool: &PgPool, mapping: &MappingConfig) -> Result<()> {
    if !mapping.create_table {
        return Ok(());
    }

    let bare_table = mapping
        .target_table
        .rsplit('.')
        .next()
        .unwrap_or(&mapping.target_table);

    let exists: bool = sqlx::query_scalar(
        "SELECT EXISTS (SELECT 1 FROM information_schema.tables WHERE table_name = $1)",
    )
    .bind(bare_table)
    .fetch_one(pool)
    .await?;

    if exists {
        debug!("Target table {} already exists", mapping.target_table);
        return Ok(());
    }

    let mut column_defs = vec![
        "id UUID PRIMARY KEY DEFAULT gen_random_uuid()".to_string(),
        "job_id UUID NOT NULL".to_string(),
    ];
    for col in &mapping.columns {
        let nullable = if col.required { "NOT NULL" } else { "NULL" };
        let unique = if col.unique { " UNIQUE" } else { "" };
        column_defs.push(format!(
            "{} {} {}{}",
            col.db_column,
            col.column_type.sql_type(),
            nullable,
            unique
        ));
    }
    column_defs.push("created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()".to_string());
    column_defs.push("updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()".to_string());

    let create_sql = format!(
        "CREATE TABLE {} ({})",
        mapping.target_table,
        column_defs.join(", ")
    );
    sqlx::query(&create_sql).execute(pool).await?;

    info!("Target table {} created", mapping.target_table);
    Ok(())
}

/// Which of the given keys already exist in `table.column`.
///
/// Values are compared through their SQL text form; textual keys are
/// case-folded to upper case to match the harvest normalization.
pub async fn existing_keys(
    pool: &PgPool,
    table: &str,
    column: &str,
    column_type: ColumnType,
    keys: &[String],
) -> Result<HashSet<String>> {
    if keys.is_empty() {
        return Ok(HashSet::new());
    }

    let expr = match column_type {
        ColumnType::String => format!("UPPER(({})::text)", column),
        _ => format!("({})::text", column),
    };

    let sql = format!("SELECT {expr} FROM {table} WHERE {expr} = ANY($1)");
    let rows: Vec<(String,)> = sqlx::query_as(&sql).bind(keys).fetch_all(pool).await?;

    Ok(rows.into_iter().map(|(key,)| key).collect())
}

/// Outcome of a foreign-key lookup
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FkOutcome {
    /// Target row found or created
    Resolved(Uuid),
    /// Missing and policy says null the field
    Ignored,
    /// Missing and policy says fail the row
    Missing,
}

/// Resolve a foreign key per the mapping's `on_missing` policy.
///
/// Infrastructure errors propagate as `Err`; a plain lookup miss is data,
/// not failure, and comes back as an [`FkOutcome`].
pub async fn resolve_fk(pool: &PgPool, fk: &FkConfig, value: &str) -> Result<FkOutcome> {
    let select_sql = format!(
        "SELECT id FROM {} WHERE {} = $1 LIMIT 1",
        fk.table, fk.lookup_column
    );
    let found: Option<(Uuid,)> = sqlx::query_as(&select_sql)
        .bind(value)
        .fetch_optional(pool)
        .await?;

    if let Some((id,)) = found {
        return Ok(FkOutcome::Resolved(id));
    }

    match fk.on_missing {
        OnMissing::Create => {
            let insert_sql = format!(
                "INSERT INTO {} ({}) VALUES ($1) RETURNING id",
                fk.table, fk.lookup_column
            );
            let (id,): (Uuid,) = sqlx::query_as(&insert_sql).bind(value).fetch_one(pool).await?;
            debug!("Created placeholder {} row for '{}'", fk.table, value);
            Ok(FkOutcome::Resolved(id))
        }
        OnMissing::Ignore => Ok(FkOutcome::Ignored),
        OnMissing::Error => Ok(FkOutcome::Missing),
    }
}

/// Bulk-insert mapped rows inside one transaction, with per-row savepoint
/// fallback on constraint violation.
///
/// Returns `(inserted, failures)`; failures carry the source row number and
/// the database error text.
pub async fn insert_rows(
    pool: &PgPool,
    mapping: &MappingConfig,
    job_id: Uuid,
    rows: &[MappedRow],
) -> Result<(usize, Vec<(usize, String)>)> {
    if rows.is_empty() {
        return Ok((0, Vec::new()));
    }

    for row in rows {
        if row.values.len() != mapping.columns.len() {
            bail!(
                "Mapped row {} has {} values for {} columns",
                row.row_number,
                row.values.len(),
                mapping.columns.len()
            );
        }
    }

    let column_list = insert_column_list(mapping);
    let mut tx = pool.begin().await?;

    let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(format!(
        "INSERT INTO {} ({}) ",
        mapping.target_table, column_list
    ));
    builder.push_values(rows, |mut b, row| {
        b.push_bind(Uuid::new_v4());
        b.push_bind(job_id);
        for (value, col) in row.values.iter().zip(&mapping.columns) {
            push_field(&mut b, value, col.column_type);
        }
    });

    match builder.build().execute(&mut *tx).await {
        Ok(result) => {
            tx.commit().await?;
            debug!("Bulk inserted {} rows into {}", result.rows_affected(), mapping.target_table);
            Ok((rows.len(), Vec::new()))
        }
        Err(e) => {
            warn!(
                "Bulk insert into {} failed, falling back to per-row: {}",
                mapping.target_table, e
            );
            tx.rollback().await?;
            insert_per_row(pool, mapping, job_id, rows, &column_list).await
        }
    }
}

async fn insert_per_row(
    pool: &PgPool,
    mapping: &MappingConfig,
    job_id: Uuid,
    rows: &[MappedRow],
    column_list: &str,
) -> Result<(usize, Vec<(usize, String)>)> {
    let mut inserted = 0usize;
    let mut failures = Vec::new();

    let mut tx = pool.begin().await?;
    for row in rows {
        let mut savepoint = tx.begin().await?;

        let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(format!(
            "INSERT INTO {} ({}) VALUES (",
            mapping.target_table, column_list
        ));
        let mut b = builder.separated(", ");
        b.push_bind(Uuid::new_v4());
        b.push_bind(job_id);
        for (value, col) in row.values.iter().zip(&mapping.columns) {
            push_field(&mut b, value, col.column_type);
        }
        builder.push(")");

        match builder.build().execute(&mut *savepoint).await {
            Ok(_) => {
                savepoint.commit().await?;
                inserted += 1;
            }
            Err(e) => {
                savepoint.rollback().await?;
                failures.push((row.row_number, e.to_string()));
            }
        }
    }
    tx.commit().await?;

    Ok((inserted, failures))
}

fn insert_column_list(mapping: &MappingConfig) -> String {
    let mut columns = vec!["id".to_string(), "job_id".to_string()];
    columns.extend(mapping.columns.iter().map(|c| c.db_column.clone()));
    columns.join(", ")
}

/// Bind one coerced value with its native Postgres type; NULLs are typed
/// after the declared column type so the planner can infer them.
fn push_field<'qb, Sep: std::fmt::Display>(
    b: &mut sqlx::query_builder::Separated<'_, 'qb, Postgres, Sep>,
    value: &FieldValue,
    column_type: ColumnType,
) {
    match value {
        FieldValue::Text(s) => {
            b.push_bind(s.clone());
        }
        FieldValue::Int(i) => {
            b.push_bind(*i);
        }
        FieldValue::Float(f) => {
            b.push_bind(*f);
        }
        FieldValue::Decimal(d) => {
            b.push_bind(*d);
        }
        FieldValue::Date(d) => {
            b.push_bind(*d);
        }
        FieldValue::DateTime(dt) => {
            b.push_bind(*dt);
        }
        FieldValue::Bool(v) => {
            b.push_bind(*v);
        }
        FieldValue::Uuid(u) => {
            b.push_bind(*u);
        }
        FieldValue::Null => match column_type {
            ColumnType::String => {
                b.push_bind(Option::<String>::None);
            }
            ColumnType::Int => {
                b.push_bind(Option::<i64>::None);
            }
            ColumnType::Float => {
                b.push_bind(Option::<f64>::None);
            }
            ColumnType::Decimal => {
                b.push_bind(Option::<rust_decimal::Decimal>::None);
            }
            ColumnType::Date => {
                b.push_bind(Option::<chrono::NaiveDate>::None);
            }
            ColumnType::DateTime => {
                b.push_bind(Option::<chrono::NaiveDateTime>::None);
            }
            ColumnType::Boolean => {
                b.push_bind(Option::<bool>::None);
            }
            ColumnType::Fk => {
                b.push_bind(Option::<Uuid>::None);
            }
        },
    }
}
