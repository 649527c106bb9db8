//! SQS-backed [`Queue`] implementation and the set of queues the
//! orchestrator wires up at startup (spec.md §2, §6).
//!
//! One queue per service (worker-facing), one small- and one large-update
//! queue (orchestrator-facing), and one scheduler-trigger queue, all
//! sharing the same `Queue<T>` trait from `orchestrator-core`.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use orchestrator_core::{Message, Queue, QueueError, ServiceId};
use serde::{de::DeserializeOwned, Serialize};

use crate::config::Config;
use crate::wire::{WorkAssignment, WorkItemUpdate};

/// Production [`Queue`] implementation backed by `aws-sdk-sqs`.
pub struct SqsQueue<T> {
    client: aws_sdk_sqs::Client,
    queue_url: String,
    _marker: std::marker::PhantomData<T>,
}

impl<T> SqsQueue<T> {
    pub fn new(client: aws_sdk_sqs::Client, queue_url: impl Into<String>) -> Self {
        Self {
            client,
            queue_url: queue_url.into(),
            _marker: std::marker::PhantomData,
        }
    }
}

#[async_trait]
impl<T> Queue<T> for SqsQueue<T>
where
    T: Send + Sync + Serialize + DeserializeOwned + 'static,
{
    async fn send(&self, body: &T, group_id: &str) -> Result<(), QueueError> {
        let payload = serde_json::to_string(body).map_err(|e| QueueError::Codec(anyhow::anyhow!(e)))?;
        let dedup_id = uuid::Uuid::new_v4().to_string();
        self.client
            .send_message()
            .queue_url(&self.queue_url)
            .message_body(payload)
            .message_group_id(group_id)
            .message_deduplication_id(dedup_id)
            .send()
            .await
            .map_err(|e| QueueError::Send(anyhow::anyhow!(e)))?;
        Ok(())
    }

    async fn receive(&self, max_messages: u32, wait_secs: u32) -> Result<Vec<Message<T>>, QueueError> {
        let output = self
            .client
            .receive_message()
            .queue_url(&self.queue_url)
            .max_number_of_messages(max_messages.min(10) as i32)
            .wait_time_seconds(wait_secs.min(20) as i32)
            .send()
            .await
            .map_err(|e| QueueError::Receive(anyhow::anyhow!(e)))?;

        output
            .messages()
            .iter()
            .map(|m| {
                let receipt_handle = m
                    .receipt_handle()
                    .ok_or_else(|| QueueError::Receive(anyhow::anyhow!("message missing receipt handle")))?
                    .to_string();
                let raw = m
                    .body()
                    .ok_or_else(|| QueueError::Receive(anyhow::anyhow!("message missing body")))?;
                let body: T = serde_json::from_str(raw).map_err(|e| QueueError::Codec(anyhow::anyhow!(e)))?;
                Ok(Message { receipt_handle, body })
            })
            .collect()
    }

    async fn delete(&self, receipt_handle: &str) -> Result<(), QueueError> {
        self.client
            .delete_message()
            .queue_url(&self.queue_url)
            .receipt_handle(receipt_handle)
            .send()
            .await
            .map_err(|e| QueueError::Delete(anyhow::anyhow!(e)))?;
        Ok(())
    }

    async fn purge(&self) -> Result<(), QueueError> {
        self.client
            .purge_queue()
            .queue_url(&self.queue_url)
            .send()
            .await
            .map_err(|e| QueueError::Delete(anyhow::anyhow!(e)))?;
        Ok(())
    }
}

/// A wake-up signal for a `(job, service)` pair with newly-READY work,
/// written to the outbox and published to the scheduler-trigger queue
/// (spec.md §9). Carries no payload beyond the routing key — the
/// scheduler always re-reads `user_work`/`work_items` itself rather than
/// trusting anything in the message body.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct SchedulerTrigger {
    pub job_id: uuid::Uuid,
    pub service_id: String,
}

impl orchestrator_core::OutboxEvent for SchedulerTrigger {
    fn event_type() -> &'static str {
        "scheduler_trigger.v1"
    }
}

/// Every queue the orchestrator process talks to, keyed by role. Each role
/// carries its own message shape, so this is three queue families rather
/// than one `Queue<T>` reused across all of them.
pub struct Queues {
    pub scheduler_trigger: Arc<dyn Queue<SchedulerTrigger>>,
    pub small_updates: Arc<dyn Queue<WorkItemUpdate>>,
    pub large_updates: Arc<dyn Queue<WorkItemUpdate>>,
    pub services: HashMap<ServiceId, Arc<dyn Queue<WorkAssignment>>>,
}

impl Queues {
    pub async fn from_config(config: &Config) -> anyhow::Result<Self> {
        let aws_config = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
        let client = aws_sdk_sqs::Client::new(&aws_config);

        let services = config
            .service_queue_urls
            .iter()
            .map(|(service, url)| {
                let queue: Arc<dyn Queue<WorkAssignment>> =
                    Arc::new(SqsQueue::new(client.clone(), url.clone()));
                (ServiceId::from(service.as_str()), queue)
            })
            .collect();

        Ok(Self {
            scheduler_trigger: Arc::new(SqsQueue::new(client.clone(), config.scheduler_trigger_queue_url.clone())),
            small_updates: Arc::new(SqsQueue::new(client.clone(), config.small_update_queue_url.clone())),
            large_updates: Arc::new(SqsQueue::new(client, config.large_update_queue_url.clone())),
            services,
        })
    }

    pub fn service_queue(&self, service_id: &ServiceId) -> Option<Arc<dyn Queue<WorkAssignment>>> {
        self.services.get(service_id).cloned()
    }
}
