//! Queue worker
//!
//! Long-running consumer that drains the work queue one message at a time.
//! Messages are acknowledged only after durable effects have landed; a
//! processing failure leaves the message in flight so the visibility
//! timeout redelivers it, and the job's own terminal status makes that
//! redelivery a no-op.

use anyhow::Result;
use sqlx::PgPool;
use tracing::{error, info, warn};

use crate::db::queries;
use crate::queue::{QueueClient, QueueMessage};
use crate::services::processor::JobProcessor;

pub struct ImportWorker {
    pool: PgPool,
    queue: QueueClient,
    processor: JobProcessor,
    long_poll_sec: u64,
}

impl ImportWorker {
    pub fn new(pool: PgPool, queue: QueueClient, processor: JobProcessor, long_poll_sec: u64) -> Self {
        Self {
            pool,
            queue,
            processor,
            long_poll_sec,
        }
    }

    /// Consume messages until the shutdown signal fires.
    ///
    /// The signal breaks the loop between iterations; in-flight work
    /// finishes first.
    pub async fn run(&self, shutdown: impl std::future::Future<Output = ()>) -> Result<()> {
        info!("Import worker started");
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Shutdown signal received, stopping worker");
                    break;
                }
                received = self.queue.receive(1, self.long_poll_sec as i32) => {
                    match received {
                        Ok(messages) => {
                            for message in messages {
                                self.handle_message(message).await;
                            }
                        }
                        Err(e) => {
                            error!("Queue receive failed: {:#}", e);
                            tokio::time::sleep(std::time::Duration::from_secs(5)).await;
                        }
                    }
                }
            }
        }

        info!("Import worker stopped");
        Ok(())
    }

    /// Process one received message end to end
    pub async fn handle_message(&self, message: QueueMessage) {
        let job_id = match message.parse() {
            Ok(parsed) => parsed.job_id,
            Err(e) => {
                warn!("Discarding malformed queue message: {:#}", e);
                self.ack(&message).await;
                return;
            }
        };

        // Idempotency gate: duplicate deliveries of finished jobs are
        // acknowledged without touching anything.
        match queries::job::get_job(&self.pool, job_id).await {
            Ok(Some(job)) if job.status.is_terminal() => {
                info!("Job {} already {}, acknowledging duplicate delivery", job_id, job.status);
                self.ack(&message).await;
                return;
            }
            Ok(Some(_)) => {}
            Ok(None) => {
                warn!("Queue message references unknown job {}, discarding", job_id);
                self.ack(&message).await;
                return;
            }
            Err(e) => {
                // Can't even load the job; leave the message for redelivery.
                error!("Failed to load job {}: {:#}", job_id, e);
                return;
            }
        }

        info!("Processing job {}", job_id);
        match self.processor.process(job_id).await {
            Ok(()) => {
                self.ack(&message).await;
                info!("Job {} processed successfully", job_id);
            }
            Err(e) => {
                // No ack: the visibility timeout will redeliver, and the
                // failed status turns the retry into an acknowledged no-op.
                error!("Job {} processing error: {:#}", job_id, e);
            }
        }
    }

    async fn ack(&self, message: &QueueMessage) {
        if let Err(e) = self.queue.delete(&message.receipt_handle).await {
            error!("Failed to delete queue message: {:#}", e);
        }
    }
}
