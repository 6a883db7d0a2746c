//! Imported vehicle queries (fixed-schema target table)

use std::collections::HashSet;

use anyhow::Result;
use sqlx::{Acquire, PgPool, Postgres, QueryBuilder};
use tracing::{debug, warn};

use crate::types::NewVehicle;

/// Which of the given plates already exist in the target table.
///
/// One batched lookup per chunk; the unique constraint stays authoritative.
pub async fn existing_placas(pool: &PgPool, placas: &[String]) -> Result<HashSet<String>> {
    if placas.is_empty() {
        return Ok(HashSet::new());
    }

    let rows: Vec<(String,)> =
        sqlx::query_as("SELECT placa FROM imported_vehicles WHERE placa = ANY($1)")
            .bind(placas)
            .fetch_all(pool)
            .await?;

    Ok(rows.into_iter().map(|(placa,)| placa).collect())
}

/// Bulk-insert a chunk of vehicles inside one transaction.
///
/// On a constraint violation the whole chunk falls back to per-row inserts
/// within savepoints, so one bad row only costs that row.
/// Returns `(inserted, failures)` where each failure carries the plate and
/// the database error text.
pub async fn insert_bulk(
    pool: &PgPool,
    vehicles: &[NewVehicle],
) -> Result<(usize, Vec<(String, String)>)> {
    if vehicles.is_empty() {
        return Ok((0, Vec::new()));
    }

    let mut tx = pool.begin().await?;

    let mut builder: QueryBuilder<Postgres> =
        QueryBuilder::new("INSERT INTO imported_vehicles (id, job_id, modelo, placa, ano, valor_fipe) ");
    builder.push_values(vehicles, |mut b, v| {
        b.push_bind(uuid::Uuid::new_v4())
            .push_bind(v.job_id)
            .push_bind(&v.modelo)
            .push_bind(&v.placa)
            .push_bind(v.ano)
            .push_bind(v.valor_fipe);
    });

    match builder.build().execute(&mut *tx).await {
        Ok(result) => {
            tx.commit().await?;
            debug!("Bulk inserted {} vehicles", result.rows_affected());
            Ok((vehicles.len(), Vec::new()))
        }
        Err(e) => {
            warn!("Bulk vehicle insert failed, falling back to per-row: {}", e);
            tx.rollback().await?;
            insert_per_row(pool, vehicles).await
        }
    }
}

async fn insert_per_row(
    pool: &PgPool,
    vehicles: &[NewVehicle],
) -> Result<(usize, Vec<(String, String)>)> {
    let mut inserted = 0usize;
    let mut failures = Vec::new();

    let mut tx = pool.begin().await?;
    for vehicle in vehicles {
        // Nested transaction = savepoint; a failed row rolls back alone.
        let mut savepoint = tx.begin().await?;
        let result = sqlx::query(
            r#"
            INSERT INTO imported_vehicles (id, job_id, modelo, placa, ano, valor_fipe)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(uuid::Uuid::new_v4())
        .bind(vehicle.job_id)
        .bind(&vehicle.modelo)
        .bind(&vehicle.placa)
        .bind(vehicle.ano)
        .bind(vehicle.valor_fipe)
        .execute(&mut *savepoint)
        .await;

        match result {
            Ok(_) => {
                savepoint.commit().await?;
                inserted += 1;
            }
            Err(e) => {
                savepoint.rollback().await?;
                failures.push((vehicle.placa.clone(), e.to_string()));
            }
        }
    }
    tx.commit().await?;

    Ok((inserted, failures))
}
