//! Work queue client
//!
//! At-least-once transport of job identifiers between submitter and worker.
//! Messages become invisible for the configured visibility timeout after a
//! receive; unacknowledged messages reappear, so consumers must be
//! idempotent with respect to `job_id`.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

/// Queue message payload: a single JSON object carrying the job id
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobMessage {
    pub job_id: Uuid,
}

/// A received message plus the receipt handle that acknowledges it
#[derive(Debug, Clone)]
pub struct QueueMessage {
    pub body: String,
    pub receipt_handle: String,
}

impl QueueMessage {
    /// Parse the JSON body into a [`JobMessage`]
    pub fn parse(&self) -> Result<JobMessage> {
        serde_json::from_str(&self.body).context("Invalid queue message body")
    }
}

/// SQS-backed work queue client
#[derive(Clone)]
pub struct QueueClient {
    client: aws_sdk_sqs::Client,
    queue_url: String,
    visibility_timeout_sec: u64,
}

impl QueueClient {
    /// Build a client for the configured queue.
    ///
    /// `endpoint_override` points the SDK at a local emulator when set.
    pub async fn new(
        queue_url: &str,
        endpoint_override: Option<&str>,
        visibility_timeout_sec: u64,
    ) -> Result<Self> {
        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest());
        if let Some(endpoint) = endpoint_override {
            loader = loader.endpoint_url(endpoint);
        }
        let sdk_config = loader.load().await;
        let client = aws_sdk_sqs::Client::new(&sdk_config);

        info!("Queue client ready for {}", queue_url);
        Ok(Self {
            client,
            queue_url: queue_url.to_string(),
            visibility_timeout_sec,
        })
    }

    /// Enqueue a job id; returns only once the queue has durably accepted it
    pub async fn publish_job(&self, job_id: Uuid) -> Result<()> {
        let body = serde_json::to_string(&JobMessage { job_id })?;

        let response = self
            .client
            .send_message()
            .queue_url(&self.queue_url)
            .message_body(body)
            .send()
            .await
            .context("Failed to publish job to queue")?;

        info!(
            "Job {} published to queue (message_id={})",
            job_id,
            response.message_id().unwrap_or("-")
        );
        Ok(())
    }

    /// Long-polling receive; returns an empty vec on timeout
    pub async fn receive(&self, max_messages: i32, wait_seconds: i32) -> Result<Vec<QueueMessage>> {
        let response = self
            .client
            .receive_message()
            .queue_url(&self.queue_url)
            .max_number_of_messages(max_messages.clamp(1, 10))
            .wait_time_seconds(wait_seconds)
            .visibility_timeout(self.visibility_timeout_sec as i32)
            .send()
            .await
            .context("Failed to receive from queue")?;

        let messages = response
            .messages
            .unwrap_or_default()
            .into_iter()
            .filter_map(|m| {
                let receipt_handle = m.receipt_handle?;
                let body = m.body?;
                Some(QueueMessage { body, receipt_handle })
            })
            .collect::<Vec<_>>();

        if !messages.is_empty() {
            debug!("Received {} queue message(s)", messages.len());
        }
        Ok(messages)
    }

    /// Acknowledge a message; call only after all durable effects have landed
    pub async fn delete(&self, receipt_handle: &str) -> Result<()> {
        self.client
            .delete_message()
            .queue_url(&self.queue_url)
            .receipt_handle(receipt_handle)
            .send()
            .await
            .context("Failed to delete queue message")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_message_wire_format() {
        let job_id: Uuid = "6fa459ea-ee8a-3ca4-894e-db77e160355e".parse().unwrap();
        let body = serde_json::to_string(&JobMessage { job_id }).unwrap();
        assert_eq!(body, r#"{"job_id":"6fa459ea-ee8a-3ca4-894e-db77e160355e"}"#);
    }

    #[test]
    fn test_parse_valid_message() {
        let msg = QueueMessage {
            body: r#"{"job_id":"6fa459ea-ee8a-3ca4-894e-db77e160355e"}"#.to_string(),
            receipt_handle: "rh-1".to_string(),
        };
        let parsed = msg.parse().unwrap();
        assert_eq!(parsed.job_id.to_string(), "6fa459ea-ee8a-3ca4-894e-db77e160355e");
    }

    #[test]
    fn test_parse_rejects_garbage() {
        let msg = QueueMessage {
            body: "not json".to_string(),
            receipt_handle: "rh-2".to_string(),
        };
        assert!(msg.parse().is_err());

        let msg = QueueMessage {
            body: r#"{"job_id":"not-a-uuid"}"#.to_string(),
            receipt_handle: "rh-3".to_string(),
        };
        assert!(msg.parse().is_err());
    }
}
