//! In-process job event bus
//!
//! Publish/subscribe keyed by job id plus a global channel. Each
//! subscription owns a bounded queue; delivery is best-effort non-blocking,
//! so a slow or gone consumer loses events instead of stalling the worker.
//! The registry is snapshotted under the lock and delivery happens outside
//! it to avoid head-of-line blocking.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::types::JobEvent;

/// Registry key for subscribers interested in every job
pub const ALL_JOBS_KEY: &str = "__all__";

const DEFAULT_QUEUE_CAPACITY: usize = 256;

struct SubscriberSlot {
    id: u64,
    tx: mpsc::Sender<JobEvent>,
}

struct Inner {
    subscribers: Mutex<HashMap<String, Vec<SubscriberSlot>>>,
    next_id: AtomicU64,
    queue_capacity: usize,
}

/// Process-local event bus, shared as a cheap clone
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<Inner>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_QUEUE_CAPACITY)
    }

    /// Bus whose subscriber queues hold at most `queue_capacity` events
    pub fn with_capacity(queue_capacity: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                subscribers: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(0),
                queue_capacity: queue_capacity.max(1),
            }),
        }
    }

    /// Subscribe to one job's events, or to all jobs when `job_id` is None
    pub fn subscribe(&self, job_id: Option<Uuid>) -> Subscription {
        let key = job_id
            .map(|id| id.to_string())
            .unwrap_or_else(|| ALL_JOBS_KEY.to_string());
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(self.inner.queue_capacity);

        let mut subscribers = self.inner.subscribers.lock();
        let slots = subscribers.entry(key.clone()).or_default();
        slots.push(SubscriberSlot { id, tx });
        info!("Subscriber added: key={} total={}", key, slots.len());

        Subscription {
            key,
            id,
            rx,
            bus: Arc::downgrade(&self.inner),
        }
    }

    /// Deliver an event to the job's subscribers and the global channel.
    ///
    /// Never blocks: a full subscriber queue drops the event for that
    /// subscriber only.
    pub fn publish(&self, event: JobEvent) {
        let job_key = event.job_id.to_string();

        let targets: Vec<mpsc::Sender<JobEvent>> = {
            let subscribers = self.inner.subscribers.lock();
            let mut targets = Vec::new();
            for key in [job_key.as_str(), ALL_JOBS_KEY] {
                if let Some(slots) = subscribers.get(key) {
                    targets.extend(slots.iter().map(|s| s.tx.clone()));
                }
            }
            targets
        };

        for tx in targets {
            match tx.try_send(event.clone()) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!(
                        "Dropping {} event for slow subscriber of job {}",
                        event.event_type.as_str(),
                        event.job_id
                    );
                }
                // Receiver gone; unsubscribe cleanup will collect the slot
                Err(mpsc::error::TrySendError::Closed(_)) => {}
            }
        }

        debug!(
            "Event published: job_id={} type={}",
            event.job_id,
            event.event_type.as_str()
        );
    }

    /// Drop every subscription
    pub fn close(&self) {
        self.inner.subscribers.lock().clear();
    }

    #[cfg(test)]
    fn subscriber_count(&self, key: &str) -> usize {
        self.inner
            .subscribers
            .lock()
            .get(key)
            .map(|s| s.len())
            .unwrap_or(0)
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl Inner {
    fn unsubscribe(&self, key: &str, id: u64) {
        let mut subscribers = self.subscribers.lock();
        if let Some(slots) = subscribers.get_mut(key) {
            slots.retain(|s| s.id != id);
            info!("Subscriber removed: key={} remaining={}", key, slots.len());
            if slots.is_empty() && key != ALL_JOBS_KEY {
                subscribers.remove(key);
            }
        }
    }
}

/// Result of waiting on a subscription
#[derive(Debug)]
pub enum Next {
    Event(JobEvent),
    Timeout,
    Closed,
}

/// A registered subscriber; unregisters itself on drop.
///
/// Holds only a weak relation back to the bus, so a lingering subscription
/// never keeps the registry alive.
pub struct Subscription {
    key: String,
    id: u64,
    rx: mpsc::Receiver<JobEvent>,
    bus: Weak<Inner>,
}

impl Subscription {
    /// Wait for the next event or until `timeout` elapses
    pub async fn next(&mut self, timeout: Duration) -> Next {
        match tokio::time::timeout(timeout, self.rx.recv()).await {
            Ok(Some(event)) => Next::Event(event),
            Ok(None) => Next::Closed,
            Err(_) => Next::Timeout,
        }
    }

    /// Wait for the next event; None when the bus has closed
    pub async fn recv(&mut self) -> Option<JobEvent> {
        self.rx.recv().await
    }

    pub fn close(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(inner) = self.bus.upgrade() {
            inner.unsubscribe(&self.key, self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::LogLevel;
    use chrono::Utc;

    fn progress(job_id: Uuid, processed: i32) -> JobEvent {
        JobEvent::progress(job_id, processed, 0, Some(100))
    }

    #[tokio::test]
    async fn test_job_subscriber_receives_own_events_only() {
        let bus = EventBus::new();
        let job_a = Uuid::new_v4();
        let job_b = Uuid::new_v4();
        let mut sub = bus.subscribe(Some(job_a));

        bus.publish(progress(job_b, 1));
        bus.publish(progress(job_a, 2));

        match sub.next(Duration::from_millis(100)).await {
            Next::Event(event) => {
                assert_eq!(event.job_id, job_a);
                assert_eq!(event.data["processed_rows"], 2);
            }
            other => panic!("expected event, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_global_subscriber_sees_every_job() {
        let bus = EventBus::new();
        let mut all = bus.subscribe(None);

        let job_a = Uuid::new_v4();
        let job_b = Uuid::new_v4();
        bus.publish(progress(job_a, 1));
        bus.publish(progress(job_b, 1));

        let first = all.recv().await.unwrap();
        let second = all.recv().await.unwrap();
        assert_eq!(first.job_id, job_a);
        assert_eq!(second.job_id, job_b);
    }

    #[tokio::test]
    async fn test_delivery_preserves_publish_order() {
        let bus = EventBus::new();
        let job_id = Uuid::new_v4();
        let mut sub = bus.subscribe(Some(job_id));

        for processed in 1..=5 {
            bus.publish(progress(job_id, processed));
        }

        for expected in 1..=5 {
            let event = sub.recv().await.unwrap();
            assert_eq!(event.data["processed_rows"], expected);
        }
    }

    #[tokio::test]
    async fn test_full_queue_drops_without_blocking() {
        let bus = EventBus::with_capacity(2);
        let job_id = Uuid::new_v4();
        let mut sub = bus.subscribe(Some(job_id));

        // Publish more than the queue holds while the consumer is idle
        for processed in 1..=10 {
            bus.publish(progress(job_id, processed));
        }

        // Only the first two made it; the rest were dropped
        assert!(matches!(sub.next(Duration::from_millis(50)).await, Next::Event(_)));
        assert!(matches!(sub.next(Duration::from_millis(50)).await, Next::Event(_)));
        assert!(matches!(sub.next(Duration::from_millis(50)).await, Next::Timeout));
    }

    #[tokio::test]
    async fn test_next_times_out_when_silent() {
        let bus = EventBus::new();
        let mut sub = bus.subscribe(Some(Uuid::new_v4()));
        assert!(matches!(sub.next(Duration::from_millis(20)).await, Next::Timeout));
    }

    #[tokio::test]
    async fn test_drop_unregisters_subscriber() {
        let bus = EventBus::new();
        let job_id = Uuid::new_v4();
        let key = job_id.to_string();

        let sub = bus.subscribe(Some(job_id));
        assert_eq!(bus.subscriber_count(&key), 1);
        drop(sub);
        assert_eq!(bus.subscriber_count(&key), 0);
    }

    #[tokio::test]
    async fn test_close_ends_subscriptions() {
        let bus = EventBus::new();
        let mut sub = bus.subscribe(None);
        bus.close();
        assert!(matches!(sub.next(Duration::from_millis(50)).await, Next::Closed));
    }

    #[tokio::test]
    async fn test_publish_with_no_subscribers_is_fine() {
        let bus = EventBus::new();
        bus.publish(JobEvent::log(
            Uuid::new_v4(),
            LogLevel::Info,
            "sem ouvintes",
            Utc::now(),
        ));
    }
}
