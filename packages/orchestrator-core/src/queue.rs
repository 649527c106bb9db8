//! FIFO message queue abstraction.
//!
//! The orchestration core talks to five kinds of queues (spec.md §2, §6):
//! one worker-facing queue per service, a small-update and a large-update
//! queue draining into the [update ingester](crate), and a scheduler-trigger
//! queue. All five share the same shape, so they share one trait,
//! generalized from `seesaw::dispatch::JobQueue`: at-least-once delivery,
//! visibility timeout, short/long-polling `receive`, batch receive, and
//! per-message or batch `delete`.
//!
//! Production code backs this trait with `aws-sdk-sqs`; tests use
//! [`InMemoryQueue`].

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};

/// A message received from a [`Queue`], carrying the receipt handle needed
/// to delete it once processed.
#[derive(Debug, Clone)]
pub struct Message<T> {
    /// Opaque handle used to acknowledge (delete) this specific delivery.
    /// Re-delivery of the same logical message gets a fresh receipt.
    pub receipt_handle: String,
    pub body: T,
}

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("queue send failed: {0}")]
    Send(#[source] anyhow::Error),
    #[error("queue receive failed: {0}")]
    Receive(#[source] anyhow::Error),
    #[error("queue delete failed: {0}")]
    Delete(#[source] anyhow::Error),
    #[error("message body could not be (de)serialized: {0}")]
    Codec(#[source] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, QueueError>;

/// A FIFO, at-least-once delivery queue.
///
/// FIFO ordering within a queue must be preserved across retries; per
/// spec.md §4.2 step 4, production callers always pass the same
/// `group_id` for a given service so worker correctness never depends on
/// interleaving across services.
#[async_trait]
pub trait Queue<T>: Send + Sync
where
    T: Send + Sync + Serialize + DeserializeOwned + 'static,
{
    /// Enqueue one message, tagged with a FIFO message-group id.
    async fn send(&self, body: &T, group_id: &str) -> Result<()>;

    /// Receive up to `max_messages` messages, waiting up to `wait_secs` for
    /// at least one to arrive (0 = short poll, return immediately).
    async fn receive(&self, max_messages: u32, wait_secs: u32) -> Result<Vec<Message<T>>>;

    /// Acknowledge and remove one message.
    async fn delete(&self, receipt_handle: &str) -> Result<()>;

    /// Acknowledge and remove a batch of messages in one round trip.
    async fn delete_batch(&self, receipt_handles: &[String]) -> Result<()> {
        for handle in receipt_handles {
            self.delete(handle).await?;
        }
        Ok(())
    }

    /// Discard every message currently on the queue. Used by maintenance
    /// tooling only; never called from the hot path.
    async fn purge(&self) -> Result<()>;
}

/// In-memory [`Queue`] implementation for unit tests.
///
/// Preserves FIFO order per `group_id` the same way a real SQS FIFO queue
/// does (messages are stored in overall arrival order and drained in that
/// order regardless of group, since a single-instance test queue has no
/// need to interleave across groups).
pub struct InMemoryQueue<T> {
    messages: Mutex<VecDeque<(String, T)>>,
    next_receipt: Mutex<u64>,
}

impl<T> Default for InMemoryQueue<T> {
    fn default() -> Self {
        Self {
            messages: Mutex::new(VecDeque::new()),
            next_receipt: Mutex::new(0),
        }
    }
}

impl<T: Clone> InMemoryQueue<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.messages.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl<T> Queue<T> for InMemoryQueue<T>
where
    T: Send + Sync + Clone + Serialize + DeserializeOwned + 'static,
{
    async fn send(&self, body: &T, _group_id: &str) -> Result<()> {
        let mut next = self.next_receipt.lock().unwrap();
        let receipt = format!("in-memory-{}", *next);
        *next += 1;
        self.messages
            .lock()
            .unwrap()
            .push_back((receipt, body.clone()));
        Ok(())
    }

    async fn receive(&self, max_messages: u32, wait_secs: u32) -> Result<Vec<Message<T>>> {
        let deadline = Duration::from_secs(wait_secs as u64);
        let mut waited = Duration::ZERO;
        loop {
            {
                let mut queue = self.messages.lock().unwrap();
                if !queue.is_empty() {
                    let mut out = Vec::new();
                    for _ in 0..max_messages {
                        match queue.pop_front() {
                            Some((receipt_handle, body)) => {
                                out.push(Message {
                                    receipt_handle,
                                    body,
                                });
                            }
                            None => break,
                        }
                    }
                    return Ok(out);
                }
            }
            if waited >= deadline {
                return Ok(Vec::new());
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
            waited += Duration::from_millis(10);
        }
    }

    async fn delete(&self, receipt_handle: &str) -> Result<()> {
        let mut queue = self.messages.lock().unwrap();
        queue.retain(|(r, _)| r != receipt_handle);
        Ok(())
    }

    async fn purge(&self) -> Result<()> {
        self.messages.lock().unwrap().clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fifo_order_is_preserved() {
        let q: InMemoryQueue<i32> = InMemoryQueue::new();
        q.send(&1, "g").await.unwrap();
        q.send(&2, "g").await.unwrap();
        q.send(&3, "g").await.unwrap();

        let msgs = q.receive(10, 0).await.unwrap();
        let bodies: Vec<i32> = msgs.iter().map(|m| m.body).collect();
        assert_eq!(bodies, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn receive_respects_max_messages() {
        let q: InMemoryQueue<i32> = InMemoryQueue::new();
        for i in 0..5 {
            q.send(&i, "g").await.unwrap();
        }
        let msgs = q.receive(2, 0).await.unwrap();
        assert_eq!(msgs.len(), 2);
        assert_eq!(q.len(), 3);
    }

    #[tokio::test]
    async fn delete_removes_only_the_acked_message() {
        let q: InMemoryQueue<i32> = InMemoryQueue::new();
        q.send(&1, "g").await.unwrap();
        q.send(&2, "g").await.unwrap();
        let msgs = q.receive(10, 0).await.unwrap();
        q.delete(&msgs[0].receipt_handle).await.unwrap();
        assert_eq!(q.len(), 1);
    }

    #[tokio::test]
    async fn receive_short_polls_when_empty() {
        let q: InMemoryQueue<i32> = InMemoryQueue::new();
        let msgs = q.receive(10, 0).await.unwrap();
        assert!(msgs.is_empty());
    }
}
