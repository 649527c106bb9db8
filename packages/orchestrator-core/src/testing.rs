//! Generic test doubles shared across the orchestration core and the
//! orchestrator app crate.
//!
//! Narrows `seesaw::testing` (which assumed the in-process `Machine`/
//! `EventBus`/`CommandRegistry` stack) down to what survives that stack's
//! removal: assertion helpers over the [`Queue`](crate::queue::Queue)
//! trait, generalized from `seesaw`'s `SpyJobQueue`. Domain-specific test
//! doubles (a `WorkItem` store, a `Job` repository) have no generic shape
//! worth sharing and live in the `orchestrator` crate's own test modules
//! instead.
//!
//! Available behind the `testing` feature, the same convention the
//! teacher crate used.

use std::sync::Mutex;

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};

use crate::queue::{InMemoryQueue, Message, Queue, Result as QueueResult};

/// One send recorded by [`SpyQueue`].
#[derive(Debug, Clone)]
pub struct RecordedSend<T> {
    pub body: T,
    pub group_id: String,
}

/// A [`Queue`] that records every `send` in order, for assertions in tests
/// that exercise the scheduler, the ingester, or the outbox publisher
/// without a real SQS queue. Delivery itself is delegated to an
/// [`InMemoryQueue`] so `receive`/`delete` behave like the real thing.
pub struct SpyQueue<T> {
    inner: InMemoryQueue<T>,
    sent: Mutex<Vec<RecordedSend<T>>>,
}

impl<T: Clone> Default for SpyQueue<T> {
    fn default() -> Self {
        Self {
            inner: InMemoryQueue::new(),
            sent: Mutex::new(Vec::new()),
        }
    }
}

impl<T: Clone> SpyQueue<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent_count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }

    pub fn sent(&self) -> Vec<RecordedSend<T>> {
        self.sent.lock().unwrap().clone()
    }

    pub fn clear(&self) {
        self.sent.lock().unwrap().clear();
    }
}

#[async_trait]
impl<T> Queue<T> for SpyQueue<T>
where
    T: Send + Sync + Clone + Serialize + DeserializeOwned + 'static,
{
    async fn send(&self, body: &T, group_id: &str) -> QueueResult<()> {
        self.sent.lock().unwrap().push(RecordedSend {
            body: body.clone(),
            group_id: group_id.to_string(),
        });
        self.inner.send(body, group_id).await
    }

    async fn receive(&self, max_messages: u32, wait_secs: u32) -> QueueResult<Vec<Message<T>>> {
        self.inner.receive(max_messages, wait_secs).await
    }

    async fn delete(&self, receipt_handle: &str) -> QueueResult<()> {
        self.inner.delete(receipt_handle).await
    }

    async fn purge(&self) -> QueueResult<()> {
        self.inner.purge().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn records_sends_in_order() {
        let q: SpyQueue<i32> = SpyQueue::new();
        q.send(&1, "job-a").await.unwrap();
        q.send(&2, "job-b").await.unwrap();

        let sent = q.sent();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].body, 1);
        assert_eq!(sent[0].group_id, "job-a");
        assert_eq!(sent[1].body, 2);
    }

    #[tokio::test]
    async fn delivers_through_to_the_inner_queue() {
        let q: SpyQueue<i32> = SpyQueue::new();
        q.send(&7, "job-a").await.unwrap();
        let msgs = q.receive(10, 0).await.unwrap();
        assert_eq!(msgs.len(), 1);
        assert_eq!(msgs[0].body, 7);
    }

    #[tokio::test]
    async fn clear_resets_the_recorded_sends_but_not_delivery() {
        let q: SpyQueue<i32> = SpyQueue::new();
        q.send(&1, "job-a").await.unwrap();
        q.clear();
        assert_eq!(q.sent_count(), 0);
        assert_eq!(q.receive(10, 0).await.unwrap().len(), 1);
    }
}
