//! Configuration management

use anyhow::{Context, Result};

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// PostgreSQL connection string
    pub database_url: String,

    /// Work queue URL
    pub queue_url: String,

    /// Optional queue endpoint override (for local emulation)
    pub queue_endpoint_override: Option<String>,

    /// Directory for staged upload files
    pub upload_dir: String,

    /// Rows per processing chunk
    pub batch_size: usize,

    /// Upload size ceiling in bytes
    pub max_upload_bytes: u64,

    /// Minimum interval between progress events per job, in milliseconds
    pub progress_throttle_ms: u64,

    /// SSE heartbeat interval in seconds
    pub sse_heartbeat_sec: u64,

    /// Queue long-poll wait in seconds
    pub queue_long_poll_sec: u64,

    /// Queue visibility timeout in seconds
    pub queue_visibility_sec: u64,

    /// HTTP listen address for the serve role
    pub http_addr: String,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        // Load .env file if present
        dotenvy::dotenv().ok();

        let database_url = std::env::var("DATABASE_URL")
            .context("DATABASE_URL must be set")?;

        let queue_url = std::env::var("QUEUE_URL")
            .context("QUEUE_URL must be set")?;

        let queue_endpoint_override = std::env::var("QUEUE_ENDPOINT_OVERRIDE")
            .ok()
            .filter(|v| !v.is_empty());

        let upload_dir = std::env::var("UPLOAD_DIR")
            .unwrap_or_else(|_| "./uploads".to_string());

        let batch_size = parse_env("BATCH_SIZE", 1000)?;
        let max_upload_bytes = parse_env("MAX_UPLOAD_BYTES", 20 * 1024 * 1024)?;
        let progress_throttle_ms = parse_env("PROGRESS_THROTTLE_MS", 1000)?;
        let sse_heartbeat_sec = parse_env("SSE_HEARTBEAT_SEC", 30)?;
        let queue_long_poll_sec = parse_env("QUEUE_LONG_POLL_SEC", 20)?;
        let queue_visibility_sec = parse_env("QUEUE_VISIBILITY_SEC", 300)?;

        let http_addr = std::env::var("HTTP_ADDR")
            .unwrap_or_else(|_| "0.0.0.0:8000".to_string());

        Ok(Self {
            database_url,
            queue_url,
            queue_endpoint_override,
            upload_dir,
            batch_size,
            max_upload_bytes,
            progress_throttle_ms,
            sse_heartbeat_sec,
            queue_long_poll_sec,
            queue_visibility_sec,
            http_addr,
        })
    }
}

fn parse_env<T: std::str::FromStr>(name: &str, default: T) -> Result<T>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(name) {
        Ok(value) => value
            .parse::<T>()
            .with_context(|| format!("{} must be a valid number, got '{}'", name, value)),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_env_default_when_unset() {
        std::env::remove_var("FROTA_TEST_UNSET");
        let value: usize = parse_env("FROTA_TEST_UNSET", 42).unwrap();
        assert_eq!(value, 42);
    }

    #[test]
    fn test_parse_env_reads_value() {
        std::env::set_var("FROTA_TEST_SET", "7");
        let value: u64 = parse_env("FROTA_TEST_SET", 42).unwrap();
        assert_eq!(value, 7);
        std::env::remove_var("FROTA_TEST_SET");
    }

    #[test]
    fn test_parse_env_rejects_garbage() {
        std::env::set_var("FROTA_TEST_BAD", "not-a-number");
        let result: Result<u64> = parse_env("FROTA_TEST_BAD", 42);
        assert!(result.is_err());
        std::env::remove_var("FROTA_TEST_BAD");
    }
}
