//! Blob staging for uploaded spreadsheets
//!
//! Files are keyed by `(job_id, extension)` and live from submission until
//! the job reaches a terminal state.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tokio::io::AsyncWriteExt;
use tracing::{info, warn};
use uuid::Uuid;

/// Local-filesystem byte store keyed by job id plus extension
#[derive(Debug, Clone)]
pub struct FileStorage {
    upload_dir: PathBuf,
}

impl FileStorage {
    pub fn new(upload_dir: impl Into<PathBuf>) -> Self {
        Self {
            upload_dir: upload_dir.into(),
        }
    }

    /// Create the upload directory if it does not exist
    pub async fn init(&self) -> Result<()> {
        tokio::fs::create_dir_all(&self.upload_dir)
            .await
            .with_context(|| format!("Failed to create upload dir {}", self.upload_dir.display()))?;
        Ok(())
    }

    /// Deterministic path for a staged file, e.g. `uploads/{job_id}.csv`
    pub fn file_path(&self, job_id: Uuid, ext: &str) -> PathBuf {
        self.upload_dir.join(format!("{}{}", job_id, ext))
    }

    /// Write the uploaded bytes; each job writes exactly once
    pub async fn put(&self, job_id: Uuid, ext: &str, bytes: &[u8]) -> Result<PathBuf> {
        self.init().await?;
        let path = self.file_path(job_id, ext);

        let mut file = tokio::fs::File::create(&path)
            .await
            .with_context(|| format!("Failed to create staged file {}", path.display()))?;
        file.write_all(bytes).await?;
        file.flush().await?;

        info!("Staged file saved: job_id={} path={}", job_id, path.display());
        Ok(path)
    }

    pub async fn exists(&self, job_id: Uuid, ext: &str) -> bool {
        tokio::fs::try_exists(self.file_path(job_id, ext))
            .await
            .unwrap_or(false)
    }

    /// Open a staged file for reading; fails when absent
    pub async fn open(&self, job_id: Uuid, ext: &str) -> Result<tokio::fs::File> {
        let path = self.file_path(job_id, ext);
        tokio::fs::File::open(&path)
            .await
            .with_context(|| format!("Staged file not found: {}", path.display()))
    }

    /// Delete a staged file; deleting an absent file is not an error
    pub async fn delete(&self, job_id: Uuid, ext: &str) {
        let path = self.file_path(job_id, ext);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => info!("Staged file deleted: job_id={} path={}", job_id, path.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!("Failed to delete staged file {}: {}", path.display(), e),
        }
    }
}

/// Extract a normalized lowercase extension (with dot) from a filename
pub fn file_extension(filename: &str) -> Option<String> {
    Path::new(filename)
        .extension()
        .map(|ext| format!(".{}", ext.to_string_lossy().to_lowercase()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_put_then_exists_and_path() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileStorage::new(dir.path());
        let job_id = Uuid::new_v4();

        let path = storage.put(job_id, ".csv", b"a,b\n1,2\n").await.unwrap();
        assert_eq!(path, dir.path().join(format!("{}.csv", job_id)));
        assert!(storage.exists(job_id, ".csv").await);

        let content = tokio::fs::read(&path).await.unwrap();
        assert_eq!(content, b"a,b\n1,2\n");
    }

    #[tokio::test]
    async fn test_open_missing_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileStorage::new(dir.path());
        assert!(storage.open(Uuid::new_v4(), ".csv").await.is_err());
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileStorage::new(dir.path());
        let job_id = Uuid::new_v4();

        storage.put(job_id, ".xlsx", b"bytes").await.unwrap();
        storage.delete(job_id, ".xlsx").await;
        assert!(!storage.exists(job_id, ".xlsx").await);

        // Second delete of the same key must not fail
        storage.delete(job_id, ".xlsx").await;
    }

    #[test]
    fn test_file_extension_normalizes_case() {
        assert_eq!(file_extension("Frota.CSV").as_deref(), Some(".csv"));
        assert_eq!(file_extension("planilha.xlsx").as_deref(), Some(".xlsx"));
        assert_eq!(file_extension("noext").as_deref(), None);
    }
}
