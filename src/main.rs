//! frota-import - Asynchronous spreadsheet import pipeline
//!
//! One binary, three roles: the HTTP API (`serve`, which also hosts the
//! queue worker task so SSE subscribers share the in-process event bus),
//! a standalone queue worker (`worker`), and `migrate`.

mod cli;
mod config;
mod db;
mod error;
mod handlers;
mod queue;
mod services;
mod spreadsheet;
mod storage;
mod types;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tokio::signal;
use tracing::{error, info};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::handlers::AppState;
use crate::queue::QueueClient;
use crate::services::events::EventBus;
use crate::services::import_service::ImportService;
use crate::services::processor::JobProcessor;
use crate::services::worker::ImportWorker;
use crate::storage::FileStorage;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = cli::Cli::parse();

    dotenvy::dotenv().ok();

    let config = config::Config::from_env()?;
    init_tracing();

    let pool = db::create_pool(&config.database_url).await?;
    info!("Connected to PostgreSQL");

    match cli.command {
        Some(cli::Command::Migrate) => {
            db::run_migrations(&pool).await?;
            info!("Migrations complete, exiting.");
            Ok(())
        }
        Some(cli::Command::Worker) => run_worker(config, pool).await,
        Some(cli::Command::Serve) | None => run_server(config, pool).await,
    }
}

fn init_tracing() {
    let logs_dir = std::env::var("LOGS_DIR").unwrap_or_else(|_| "./logs".to_string());
    std::fs::create_dir_all(&logs_dir).ok();

    let file_appender = RollingFileAppender::new(Rotation::DAILY, &logs_dir, "frota-import.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
    // The guard must outlive the process or buffered lines are lost.
    std::mem::forget(guard);

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,frota_import=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::fmt::layer().with_writer(non_blocking).with_ansi(false))
        .init();
}

async fn run_server(config: config::Config, pool: sqlx::PgPool) -> Result<()> {
    info!("Starting frota-import server...");

    db::run_migrations(&pool).await?;

    let storage = FileStorage::new(&config.upload_dir);
    storage.init().await?;

    let queue = QueueClient::new(
        &config.queue_url,
        config.queue_endpoint_override.as_deref(),
        config.queue_visibility_sec,
    )
    .await?;

    let events = EventBus::new();

    let import_service = Arc::new(ImportService::new(
        pool.clone(),
        storage.clone(),
        queue.clone(),
        config.max_upload_bytes,
    ));

    // Co-hosted worker task: publisher and SSE subscribers reach the same
    // in-process event bus.
    let processor = JobProcessor::new(
        pool.clone(),
        storage.clone(),
        events.clone(),
        config.batch_size,
        Duration::from_millis(config.progress_throttle_ms),
    );
    let worker = ImportWorker::new(pool.clone(), queue.clone(), processor, config.queue_long_poll_sec);
    let worker_handle = tokio::spawn(async move {
        if let Err(e) = worker.run(shutdown_signal()).await {
            error!("Worker task failed: {:#}", e);
        }
    });

    let state = AppState {
        pool,
        events,
        import_service,
        sse_heartbeat: Duration::from_secs(config.sse_heartbeat_sec),
    };
    let app = handlers::router(state, config.max_upload_bytes);

    let listener = tokio::net::TcpListener::bind(&config.http_addr).await?;
    info!("Server listening on {}", config.http_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    worker_handle.await.ok();
    info!("Server shut down gracefully");
    Ok(())
}

async fn run_worker(config: config::Config, pool: sqlx::PgPool) -> Result<()> {
    info!("Starting frota-import worker...");

    db::run_migrations(&pool).await?;

    let storage = FileStorage::new(&config.upload_dir);
    storage.init().await?;

    let queue = QueueClient::new(
        &config.queue_url,
        config.queue_endpoint_override.as_deref(),
        config.queue_visibility_sec,
    )
    .await?;

    let events = EventBus::new();

    let processor = JobProcessor::new(
        pool.clone(),
        storage,
        events,
        config.batch_size,
        Duration::from_millis(config.progress_throttle_ms),
    );
    let worker = ImportWorker::new(pool, queue, processor, config.queue_long_poll_sec);

    worker.run(shutdown_signal()).await
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, starting graceful shutdown");
        }
        _ = terminate => {
            info!("Received terminate signal, starting graceful shutdown");
        }
    }
}
