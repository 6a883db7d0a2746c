//! Row processor
//!
//! Drives one import job from the queue through validated, deduplicated,
//! chunked bulk insertion to its terminal state, publishing status,
//! progress and log events along the way. Re-entry is idempotent: a second
//! delivery of a finished job is a no-op, and the cross-file duplicate
//! probe keeps a mid-flight redelivery from inserting rows twice.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::{anyhow, bail, Context, Result};
use sqlx::PgPool;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::db::queries;
use crate::services::events::EventBus;
use crate::services::planner::{self, RowPlan};
use crate::services::validation;
use crate::spreadsheet;
use crate::storage::{file_extension, FileStorage};
use crate::types::{
    ColumnMapping, ImportJob, ImportJobStatus, JobEvent, LogLevel, MappedRow, MappingConfig,
    NewVehicle,
};

/// Header columns the vehicle preset requires
const VEHICLE_REQUIRED_COLUMNS: [&str; 4] = ["modelo", "placa", "ano", "valor_fipe"];

pub struct JobProcessor {
    pool: PgPool,
    storage: FileStorage,
    events: EventBus,
    batch_size: usize,
    progress_throttle: Duration,
}

impl JobProcessor {
    pub fn new(
        pool: PgPool,
        storage: FileStorage,
        events: EventBus,
        batch_size: usize,
        progress_throttle: Duration,
    ) -> Self {
        Self {
            pool,
            storage,
            events,
            batch_size,
            progress_throttle,
        }
    }

    /// Process one job end to end.
    ///
    /// Returns `Err` only for job-level failures; the job is then already
    /// marked `failed` and the caller decides whether to acknowledge the
    /// queue message (it should not — redelivery retries, and the terminal
    /// status makes the retry a no-op).
    pub async fn process(&self, job_id: Uuid) -> Result<()> {
        let job = queries::job::get_job(&self.pool, job_id)
            .await?
            .ok_or_else(|| anyhow!("Job não encontrado: {}", job_id))?;

        if job.status.is_terminal() {
            info!("Job {} already {}, skipping", job.id, job.status);
            return Ok(());
        }

        let ext = file_extension(&job.filename).unwrap_or_else(|| ".csv".to_string());

        if !queries::job::mark_processing(&self.pool, job.id).await? {
            info!("Job {} finished concurrently, skipping", job.id);
            return Ok(());
        }

        let job = self.reload(job.id).await?;
        self.events.publish(JobEvent::status(&job));
        self.log_and_emit(
            job.id,
            LogLevel::Info,
            &format!("Starting processing of {}", job.filename),
        )
        .await?;

        match self.run(&job, &ext).await {
            Ok((processed, errors)) => {
                queries::job::mark_finished(&self.pool, job.id, ImportJobStatus::Completed).await?;
                self.log_and_emit(
                    job.id,
                    LogLevel::Info,
                    &format!("Processing completed. Processed: {}, Errors: {}", processed, errors),
                )
                .await?;

                let finished = self.reload(job.id).await?;
                self.events.publish(JobEvent::status(&finished));
                self.storage.delete(job.id, &ext).await;

                info!(
                    "Job {} completed: processed={} errors={}",
                    job.id, processed, errors
                );
                Ok(())
            }
            Err(e) => {
                error!("Job {} processing failed: {:#}", job.id, e);
                self.fail_job(job.id, &ext, &e).await;
                Err(e)
            }
        }
    }

    /// Mark the job failed and surface it everywhere, best-effort
    async fn fail_job(&self, job_id: Uuid, ext: &str, cause: &anyhow::Error) {
        if let Err(e) = queries::job::mark_finished(&self.pool, job_id, ImportJobStatus::Failed).await {
            error!("Failed to mark job {} as failed: {}", job_id, e);
        }

        if let Err(e) = self
            .log_and_emit(job_id, LogLevel::Error, &format!("Processing failed: {:#}", cause))
            .await
        {
            warn!("Failed to append failure log for job {}: {}", job_id, e);
        }

        match self.reload(job_id).await {
            Ok(job) => self.events.publish(JobEvent::status(&job)),
            Err(e) => warn!("Failed to reload job {} after failure: {}", job_id, e),
        }

        self.storage.delete(job_id, ext).await;
    }

    async fn run(&self, job: &ImportJob, ext: &str) -> Result<(i64, i64)> {
        let path = self.storage.file_path(job.id, ext);
        if !self.storage.exists(job.id, ext).await {
            bail!("Arquivo não encontrado: {}", path.display());
        }

        let mapping = match &job.mapping_config {
            Some(value) => {
                let config: MappingConfig = serde_json::from_value(value.clone())
                    .context("Configuração de mapeamento inválida no job")?;
                config
                    .validate()
                    .map_err(|errors| anyhow!("Configuração de mapeamento inválida: {}", errors.join("; ")))?;
                Some(config)
            }
            None => None,
        };

        self.check_header(&path, mapping.as_ref()).await?;

        match mapping {
            Some(config) => self.run_mapped(job, &path, &config).await,
            None => self.run_vehicle(job, &path).await,
        }
    }

    /// Fail fast when the header is missing required columns
    async fn check_header(&self, path: &Path, mapping: Option<&MappingConfig>) -> Result<()> {
        let header = {
            let path = path.to_path_buf();
            tokio::task::spawn_blocking(move || spreadsheet::read_header(&path)).await??
        };

        let required: Vec<String> = match mapping {
            Some(config) => config.required_source_columns(),
            None => VEHICLE_REQUIRED_COLUMNS.iter().map(|c| c.to_string()).collect(),
        };

        let missing = spreadsheet::validate_header(&header, &required);
        if !missing.is_empty() {
            bail!("Colunas obrigatórias ausentes: {}", missing.join(", "));
        }
        Ok(())
    }

    /// Fixed-schema path: the vehicle preset over `imported_vehicles`
    async fn run_vehicle(&self, job: &ImportJob, path: &PathBuf) -> Result<(i64, i64)> {
        let mut chunks = spreadsheet::read_chunks(path, self.batch_size)?;
        let mut throttle = ProgressThrottle::new(self.progress_throttle);
        let mut last_progress: Option<(i32, i32, Option<i32>)> = None;
        let mut total_processed = 0i64;
        let mut total_errors = 0i64;
        let mut row_offset = 0usize;

        while let Some(chunk) = chunks.next() {
            let chunk = chunk?;
            let chunk_len = chunk.len();

            // One batched probe per chunk, not per row.
            let placas: Vec<String> = chunk
                .iter()
                .filter_map(|row| row.get("placa"))
                .map(|p| p.trim().to_uppercase())
                .filter(|p| !p.is_empty())
                .collect();
            let existing = queries::vehicle::existing_placas(&self.pool, &placas).await?;

            let mut seen: HashSet<String> = HashSet::new();
            let mut to_insert: Vec<NewVehicle> = Vec::new();
            let mut row_for_placa: HashMap<String, usize> = HashMap::new();
            let mut chunk_errors = 0i64;

            for (i, row) in chunk.iter().enumerate() {
                let row_number = row_offset + i;
                match planner::plan_vehicle_row(row, &existing, &seen) {
                    RowPlan::Insert(vehicle) => {
                        seen.insert(vehicle.placa.clone());
                        row_for_placa.insert(vehicle.placa.clone(), row_number);
                        to_insert.push(NewVehicle {
                            job_id: job.id,
                            modelo: vehicle.modelo,
                            placa: vehicle.placa,
                            ano: vehicle.ano,
                            valor_fipe: vehicle.valor_fipe,
                        });
                    }
                    RowPlan::Duplicate(message) => {
                        chunk_errors += 1;
                        self.log_and_emit(
                            job.id,
                            LogLevel::Warning,
                            &format!("Linha {}: {}", row_number, message),
                        )
                        .await?;
                    }
                    RowPlan::Invalid(reasons) => {
                        chunk_errors += 1;
                        self.log_and_emit(
                            job.id,
                            LogLevel::Error,
                            &format!("Linha {}: {}", row_number, reasons.join(", ")),
                        )
                        .await?;
                    }
                }
            }

            let (inserted, failures) = queries::vehicle::insert_bulk(&self.pool, &to_insert).await?;
            for (placa, db_error) in &failures {
                chunk_errors += 1;
                let prefix = row_for_placa
                    .get(placa)
                    .map(|n| format!("Linha {}: ", n))
                    .unwrap_or_default();
                self.log_and_emit(
                    job.id,
                    LogLevel::Error,
                    &format!("{}Falha ao inserir placa '{}': {}", prefix, placa, db_error),
                )
                .await?;
            }

            let updated = queries::job::add_progress(
                &self.pool,
                job.id,
                inserted as i32,
                chunk_errors as i32,
            )
            .await?;
            total_processed += inserted as i64;
            total_errors += chunk_errors;

            last_progress = Some((updated.processed_rows, updated.error_rows, updated.total_rows));
            if throttle.should_emit() {
                self.events.publish(JobEvent::progress(
                    job.id,
                    updated.processed_rows,
                    updated.error_rows,
                    updated.total_rows,
                ));
                last_progress = None;
            }

            row_offset += chunk_len;
        }

        // The final chunk's progress always reaches subscribers, even when
        // the throttle would have suppressed it.
        if let Some((processed_rows, error_rows, total_rows)) = last_progress {
            self.events
                .publish(JobEvent::progress(job.id, processed_rows, error_rows, total_rows));
        }

        Ok((total_processed, total_errors))
    }

    /// Mapped path: interpret the Mapping Configuration per row against the
    /// dynamic target table
    async fn run_mapped(
        &self,
        job: &ImportJob,
        path: &PathBuf,
        mapping: &MappingConfig,
    ) -> Result<(i64, i64)> {
        queries::target::create_table_if_needed(&self.pool, mapping).await?;

        let unique_cols: Vec<ColumnMapping> = mapping.unique_columns().cloned().collect();

        let mut chunks = spreadsheet::read_chunks(path, self.batch_size)?;
        let mut throttle = ProgressThrottle::new(self.progress_throttle);
        let mut last_progress: Option<(i32, i32, Option<i32>)> = None;
        let mut total_processed = 0i64;
        let mut total_errors = 0i64;
        let mut row_offset = 0usize;

        while let Some(chunk) = chunks.next() {
            let chunk = chunk?;
            let chunk_len = chunk.len();

            let mut existing: HashMap<String, HashSet<String>> = HashMap::new();
            for col in &unique_cols {
                let keys: Vec<String> = chunk
                    .iter()
                    .filter_map(|row| row.get(&col.source_column))
                    .filter_map(|raw| validation::coerce(raw, col.column_type).ok())
                    .filter_map(|value| value.key_string())
                    .collect();
                let found = queries::target::existing_keys(
                    &self.pool,
                    &mapping.target_table,
                    &col.db_column,
                    col.column_type,
                    &keys,
                )
                .await?;
                existing.insert(col.db_column.clone(), found);
            }

            let mut seen: HashMap<String, HashSet<String>> = unique_cols
                .iter()
                .map(|c| (c.db_column.clone(), HashSet::new()))
                .collect();
            let mut to_insert: Vec<MappedRow> = Vec::new();
            let mut chunk_errors = 0i64;

            for (i, row) in chunk.iter().enumerate() {
                let row_number = row_offset + i;

                // Resolve this row's foreign keys, then decide purely.
                let mut fk_outcomes = HashMap::new();
                for (idx, lookup) in planner::fk_lookups(row, mapping) {
                    if let Some(fk) = mapping.columns[idx].fk.as_ref() {
                        let outcome = queries::target::resolve_fk(&self.pool, fk, &lookup).await?;
                        fk_outcomes.insert(idx, outcome);
                    }
                }

                match planner::plan_mapped_row(row, mapping, &fk_outcomes, &existing, &seen) {
                    RowPlan::Insert(values) => {
                        planner::register_keys(mapping, &values, &mut seen);
                        to_insert.push(MappedRow { row_number, values });
                    }
                    RowPlan::Duplicate(message) => {
                        chunk_errors += 1;
                        self.log_and_emit(
                            job.id,
                            LogLevel::Warning,
                            &format!("Linha {}: {}", row_number, message),
                        )
                        .await?;
                    }
                    RowPlan::Invalid(reasons) => {
                        chunk_errors += 1;
                        self.log_and_emit(
                            job.id,
                            LogLevel::Error,
                            &format!("Linha {}: {}", row_number, reasons.join(", ")),
                        )
                        .await?;
                    }
                }
            }

            let (inserted, failures) =
                queries::target::insert_rows(&self.pool, mapping, job.id, &to_insert).await?;
            for (row_number, db_error) in &failures {
                chunk_errors += 1;
                self.log_and_emit(
                    job.id,
                    LogLevel::Error,
                    &format!("Linha {}: Falha ao inserir - {}", row_number, db_error),
                )
                .await?;
            }

            let updated = queries::job::add_progress(
                &self.pool,
                job.id,
                inserted as i32,
                chunk_errors as i32,
            )
            .await?;
            total_processed += inserted as i64;
            total_errors += chunk_errors;

            last_progress = Some((updated.processed_rows, updated.error_rows, updated.total_rows));
            if throttle.should_emit() {
                self.events.publish(JobEvent::progress(
                    job.id,
                    updated.processed_rows,
                    updated.error_rows,
                    updated.total_rows,
                ));
                last_progress = None;
            }

            row_offset += chunk_len;
        }

        // The final chunk's progress always reaches subscribers, even when
        // the throttle would have suppressed it.
        if let Some((processed_rows, error_rows, total_rows)) = last_progress {
            self.events
                .publish(JobEvent::progress(job.id, processed_rows, error_rows, total_rows));
        }

        Ok((total_processed, total_errors))
    }

    /// Persist a log line and mirror it onto the event bus
    async fn log_and_emit(&self, job_id: Uuid, level: LogLevel, message: &str) -> Result<()> {
        let log = queries::job_log::append(&self.pool, job_id, level, message).await?;
        self.events
            .publish(JobEvent::log(job_id, level, &log.message, log.created_at));
        Ok(())
    }

    async fn reload(&self, job_id: Uuid) -> Result<ImportJob> {
        queries::job::get_job(&self.pool, job_id)
            .await?
            .ok_or_else(|| anyhow!("Job desapareceu durante o processamento: {}", job_id))
    }
}

/// Per-job minimum interval between progress emissions
struct ProgressThrottle {
    min_interval: Duration,
    last_emit: Option<Instant>,
}

impl ProgressThrottle {
    fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_emit: None,
        }
    }

    fn should_emit(&mut self) -> bool {
        match self.last_emit {
            Some(last) if last.elapsed() < self.min_interval => false,
            _ => {
                self.last_emit = Some(Instant::now());
                true
            }
        }
    }
}
