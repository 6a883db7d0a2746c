//! Job intake
//!
//! Accepts an uploaded spreadsheet, creates the durable job record, stages
//! the bytes, pre-counts rows, and enqueues the work item. The ordering is
//! deliberate: the queue message goes out only once durable state and bytes
//! exist, so a received message always refers to a loadable job.

use anyhow::Result;
use sqlx::PgPool;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use crate::db::queries;
use crate::queue::QueueClient;
use crate::spreadsheet::{self, SheetFormat};
use crate::storage::{file_extension, FileStorage};
use crate::types::{ImportJobCreateResponse, ImportJobStatus, MappingConfig};

/// Intake failures surfaced synchronously to the submitter
#[derive(Debug, Error)]
pub enum SubmitError {
    #[error("Formato de arquivo não suportado: {0}")]
    UnsupportedFormat(String),

    #[error("Arquivo excede o limite de {max} bytes (recebido {size})")]
    TooLarge { size: u64, max: u64 },

    #[error("Configuração de mapeamento inválida: {}", .0.join("; "))]
    InvalidMapping(Vec<String>),

    #[error("Template não encontrado: {0}")]
    TemplateNotFound(Uuid),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

pub struct ImportService {
    pool: PgPool,
    storage: FileStorage,
    queue: QueueClient,
    max_upload_bytes: u64,
}

impl ImportService {
    pub fn new(pool: PgPool, storage: FileStorage, queue: QueueClient, max_upload_bytes: u64) -> Self {
        Self {
            pool,
            storage,
            queue,
            max_upload_bytes,
        }
    }

    /// Accept a file and create a pending import job.
    ///
    /// Effects, in order, each checkpointed before the next: job row,
    /// staged bytes, row total, queue message. A failure partway leaves the
    /// job in `pending`; the worker tolerates a missing file or total.
    pub async fn submit(
        &self,
        filename: &str,
        bytes: &[u8],
        mapping: Option<MappingConfig>,
        template_id: Option<Uuid>,
    ) -> Result<ImportJobCreateResponse, SubmitError> {
        let ext = file_extension(filename)
            .filter(|ext| SheetFormat::from_extension(ext).is_some())
            .ok_or_else(|| SubmitError::UnsupportedFormat(filename.to_string()))?;

        let size = bytes.len() as u64;
        if size > self.max_upload_bytes {
            return Err(SubmitError::TooLarge {
                size,
                max: self.max_upload_bytes,
            });
        }

        let mapping = self.resolve_mapping(mapping, template_id).await?;
        let mapping_json = match &mapping {
            Some(config) => {
                Some(serde_json::to_value(config).map_err(|e| SubmitError::Internal(e.into()))?)
            }
            None => None,
        };

        let job = queries::job::create_job(&self.pool, filename, template_id, mapping_json.as_ref())
            .await?;

        self.storage
            .put(job.id, &ext, bytes)
            .await
            .map_err(SubmitError::Internal)?;

        // A failed pre-count is not fatal; progress events then omit the total.
        let path = self.storage.file_path(job.id, &ext);
        let counted = tokio::task::spawn_blocking(move || spreadsheet::count_rows(&path))
            .await
            .map_err(|e| SubmitError::Internal(e.into()))?;
        match counted {
            Ok(total) => {
                queries::job::set_total_rows(&self.pool, job.id, total as i32).await?;
            }
            Err(e) => {
                warn!("Failed to count rows for job {}: {}", job.id, e);
            }
        }

        self.queue.publish_job(job.id).await?;

        info!("Import job {} created for '{}'", job.id, filename);
        Ok(ImportJobCreateResponse {
            job_id: job.id,
            status: ImportJobStatus::Pending,
        })
    }

    /// Validate an inline mapping, or load the referenced template's
    async fn resolve_mapping(
        &self,
        mapping: Option<MappingConfig>,
        template_id: Option<Uuid>,
    ) -> Result<Option<MappingConfig>, SubmitError> {
        let mapping = match (mapping, template_id) {
            (Some(config), _) => Some(config),
            (None, Some(template_id)) => {
                let template = queries::template::get_by_id(&self.pool, template_id)
                    .await?
                    .ok_or(SubmitError::TemplateNotFound(template_id))?;
                let config: MappingConfig = serde_json::from_value(template.mapping_config)
                    .map_err(|e| SubmitError::InvalidMapping(vec![e.to_string()]))?;
                Some(config)
            }
            (None, None) => None,
        };

        if let Some(config) = &mapping {
            config.validate().map_err(SubmitError::InvalidMapping)?;
        }
        Ok(mapping)
    }
}
