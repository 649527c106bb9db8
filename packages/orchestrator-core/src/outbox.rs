//! Transactional outbox: the replacement for an in-process event bus.
//!
//! Spec.md §9 flags the natural "item became READY → schedule now"
//! shortcut as a redesign target: *"replace with an explicit enqueue on
//! the scheduler-trigger queue at the moment an item transitions to
//! READY. Do not rely on in-process listeners — multiple orchestrator
//! replicas must each receive the signal."* `seesaw::outbox` already
//! solves exactly this class of problem for database-backed systems with
//! multiple writers: write the signal in the same transaction as the
//! state change, and have a separate, `FOR UPDATE SKIP LOCKED` poller
//! turn outbox rows into external effects (here: queue sends) once the
//! transaction has committed. This module keeps that shape but publishes
//! to a [`Queue`](crate::queue::Queue) instead of an `EventBus`.
//!
//! Three call sites use this:
//! - a work item transitioning READY writes an outbox row that the
//!   publisher turns into a scheduler-trigger message (spec.md §4.1, §4.3);
//! - a JobLink append (spec.md §4.6) and a JobError append (spec.md §4.7)
//!   are both written this way so their downstream effects (listing
//!   refresh, error-count re-evaluation) survive a crash between commit
//!   and publish.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Serialize};
use uuid::Uuid;

use crate::ids::CorrelationId;

/// A durable signal written to the outbox in the same transaction as the
/// business data it describes.
pub trait OutboxEvent: Serialize + DeserializeOwned + Send + Sync {
    /// Versioned type tag (e.g. `"work_item.ready.v1"`), used for routing
    /// and for forward-compatible deserialization on replay.
    fn event_type() -> &'static str;
}

/// A row of the `event_outbox` table, read back by the publisher.
#[derive(Debug, Clone)]
pub struct OutboxEntry {
    pub id: Uuid,
    pub event_type: String,
    pub payload: serde_json::Value,
    pub correlation_id: CorrelationId,
    pub created_at: DateTime<Utc>,
    pub published_at: Option<DateTime<Utc>>,
}

#[derive(Debug, thiserror::Error)]
pub enum OutboxError {
    #[error("outbox write failed: {0}")]
    Write(#[source] anyhow::Error),
    #[error("outbox read failed: {0}")]
    Read(#[source] anyhow::Error),
    #[error("no publisher registered for event type {0}")]
    UnroutedEventType(String),
}

pub type Result<T> = std::result::Result<T, OutboxError>;

/// Appends an outbox row. Implementations must write within the same
/// `sqlx::Transaction` as the business-data mutation that produced the
/// event, never on a separate connection.
#[async_trait]
pub trait OutboxWriter: Send + Sync {
    async fn write_event<E: OutboxEvent + 'static>(
        &mut self,
        event: &E,
        correlation_id: CorrelationId,
    ) -> Result<Uuid>;
}

/// Reads and retires outbox rows for the background publisher.
/// Implementations use `FOR UPDATE SKIP LOCKED` so multiple orchestrator
/// replicas can run the publisher concurrently without double-publishing.
#[async_trait]
pub trait OutboxReader: Send + Sync {
    async fn claim_unpublished(&self, limit: usize) -> Result<Vec<OutboxEntry>>;
    async fn mark_published(&self, ids: &[Uuid]) -> Result<()>;
    async fn cleanup_published(&self, older_than: DateTime<Utc>) -> Result<u64>;
}

/// Converts a claimed [`OutboxEntry`] into an external effect (a queue
/// send). Registered per `event_type` the same way `seesaw`'s
/// `DurableEventRegistry` maps event types to bus-emit closures; here the
/// closure pushes onto whichever `Queue` the event type routes to instead.
#[async_trait]
pub trait OutboxPublisher: Send + Sync {
    async fn publish(&self, entry: &OutboxEntry) -> Result<()>;
}

/// Polling configuration for the background publisher task.
#[derive(Debug, Clone)]
pub struct OutboxPublisherConfig {
    pub poll_interval: std::time::Duration,
    pub batch_size: usize,
    pub retention: std::time::Duration,
    pub cleanup_interval: std::time::Duration,
}

impl Default for OutboxPublisherConfig {
    fn default() -> Self {
        Self {
            poll_interval: std::time::Duration::from_millis(250),
            batch_size: 100,
            retention: std::time::Duration::from_secs(60 * 60 * 24),
            cleanup_interval: std::time::Duration::from_secs(60 * 30),
        }
    }
}

/// Drains the outbox once: claim a batch, publish each, mark published.
/// A failed publish leaves its row unpublished (and unlocked once the
/// claiming transaction ends) so the next poll retries it — at-least-once
/// delivery, matching the queues the publisher feeds.
pub async fn drain_once(
    reader: &dyn OutboxReader,
    publisher: &dyn OutboxPublisher,
    batch_size: usize,
) -> Result<usize> {
    let entries = reader.claim_unpublished(batch_size).await?;
    if entries.is_empty() {
        return Ok(0);
    }
    let mut published_ids = Vec::with_capacity(entries.len());
    for entry in &entries {
        match publisher.publish(entry).await {
            Ok(()) => published_ids.push(entry.id),
            Err(err) => {
                tracing::warn!(
                    outbox_id = %entry.id,
                    event_type = %entry.event_type,
                    error = %err,
                    "failed to publish outbox entry, will retry next poll"
                );
            }
        }
    }
    let published_count = published_ids.len();
    if !published_ids.is_empty() {
        reader.mark_published(&published_ids).await?;
    }
    Ok(published_count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct FakeEntry(OutboxEntry, bool);

    struct FakeReader {
        entries: Mutex<Vec<FakeEntry>>,
    }

    #[async_trait]
    impl OutboxReader for FakeReader {
        async fn claim_unpublished(&self, limit: usize) -> Result<Vec<OutboxEntry>> {
            let entries = self.entries.lock().unwrap();
            Ok(entries
                .iter()
                .filter(|e| !e.1)
                .take(limit)
                .map(|e| e.0.clone())
                .collect())
        }

        async fn mark_published(&self, ids: &[Uuid]) -> Result<()> {
            let mut entries = self.entries.lock().unwrap();
            for entry in entries.iter_mut() {
                if ids.contains(&entry.0.id) {
                    entry.1 = true;
                }
            }
            Ok(())
        }

        async fn cleanup_published(&self, _older_than: DateTime<Utc>) -> Result<u64> {
            Ok(0)
        }
    }

    struct FailingPublisher {
        fail_event_type: &'static str,
    }

    #[async_trait]
    impl OutboxPublisher for FailingPublisher {
        async fn publish(&self, entry: &OutboxEntry) -> Result<()> {
            if entry.event_type == self.fail_event_type {
                return Err(OutboxError::UnroutedEventType(entry.event_type.clone()));
            }
            Ok(())
        }
    }

    fn entry(event_type: &str) -> OutboxEntry {
        OutboxEntry {
            id: Uuid::new_v4(),
            event_type: event_type.to_string(),
            payload: serde_json::json!({}),
            correlation_id: CorrelationId::NONE,
            created_at: Utc::now(),
            published_at: None,
        }
    }

    #[tokio::test]
    async fn drain_publishes_and_marks_all_on_success() {
        let reader = FakeReader {
            entries: Mutex::new(vec![
                FakeEntry(entry("work_item.ready.v1"), false),
                FakeEntry(entry("work_item.ready.v1"), false),
            ]),
        };
        let publisher = FailingPublisher {
            fail_event_type: "never",
        };
        let count = drain_once(&reader, &publisher, 10).await.unwrap();
        assert_eq!(count, 2);
        assert!(reader.entries.lock().unwrap().iter().all(|e| e.1));
    }

    #[tokio::test]
    async fn drain_leaves_failed_entries_unpublished() {
        let reader = FakeReader {
            entries: Mutex::new(vec![
                FakeEntry(entry("work_item.ready.v1"), false),
                FakeEntry(entry("job_error.appended.v1"), false),
            ]),
        };
        let publisher = FailingPublisher {
            fail_event_type: "job_error.appended.v1",
        };
        let count = drain_once(&reader, &publisher, 10).await.unwrap();
        assert_eq!(count, 1);
        let entries = reader.entries.lock().unwrap();
        assert!(entries.iter().find(|e| e.0.event_type == "work_item.ready.v1").unwrap().1);
        assert!(!entries.iter().find(|e| e.0.event_type == "job_error.appended.v1").unwrap().1);
    }

    #[tokio::test]
    async fn drain_on_empty_outbox_is_a_noop() {
        let reader = FakeReader {
            entries: Mutex::new(vec![]),
        };
        let publisher = FailingPublisher {
            fail_event_type: "never",
        };
        let count = drain_once(&reader, &publisher, 10).await.unwrap();
        assert_eq!(count, 0);
    }
}
