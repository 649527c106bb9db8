//! Downstream generation (spec.md §4.3, §4.4): turns a completed upstream
//! work item into the next step's work items — fan-out, one-shot
//! aggregation, or incrementally batched aggregation.
//!
//! Both aggregation flavors share one persistent accumulator (the
//! `batch_buffers` table, spec.md §4.4): a non-batched aggregated step
//! simply never flushes until every upstream item has completed, while a
//! batched step flushes early whenever the buffer crosses either bound.
//! This reuses one piece of state for what the spec describes as two
//! mechanisms, because a non-batched aggregation gate still has to
//! accumulate every upstream result somewhere between the first upstream
//! completion and the last — there is nowhere else to keep it.

use orchestrator_core::{CorrelationId, OutboxError, OutboxWriter};
use sqlx::{Postgres, Transaction};
use uuid::Uuid;

use crate::catalog::{self, CatalogStore};
use crate::config::Config;
use crate::models::{Job, WorkItem, WorkflowStep};
use crate::queues::SchedulerTrigger;
use crate::repository::batch_buffer::{BatchBuffer, BatchBufferRepository};
use crate::repository::outbox::PgOutboxWriter;
use crate::repository::user_work::UserWorkRepository;
use crate::repository::work_item::WorkItemRepository;
use crate::repository::workflow_step::WorkflowStepRepository;

#[derive(Debug, thiserror::Error)]
pub enum DownstreamError {
    #[error("database error: {0}")]
    Db(#[from] sqlx::Error),
    #[error(transparent)]
    Catalog(#[from] catalog::CatalogStoreError),
    #[error(transparent)]
    Outbox(#[from] OutboxError),
}

/// What happened when a completed upstream item was handed to downstream
/// generation. Callers use this to decide whether "no downstream item was
/// created" holds for the leaf-finalization gate (spec.md §4.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownstreamOutcome {
    NoNextStep,
    FanOut { created: usize },
    AggregationBuffered,
    AggregationFlushed { batches: usize },
}

impl DownstreamOutcome {
    pub fn created_anything(&self) -> bool {
        !matches!(
            self,
            DownstreamOutcome::NoNextStep | DownstreamOutcome::AggregationBuffered
        )
    }
}

/// Generates whatever the next step needs from one upstream completion.
/// `results`/`sizes` are empty for a FAILED or CANCELED upstream item —
/// spec.md §4.4 step 1: "if the upstream FAILED, contribute zero URLs but
/// still advance the bookkeeping," which happens naturally here because
/// the gate reads `completed_count` from `work_items`, not from this
/// function's inputs.
#[allow(clippy::too_many_arguments)]
pub async fn generate_downstream(
    tx: &mut Transaction<'_, Postgres>,
    catalog: &dyn CatalogStore,
    config: &Config,
    job: &Job,
    current_step: &WorkflowStep,
    upstream: &WorkItem,
    results: &[String],
    sizes: &[i64],
    correlation_id: CorrelationId,
) -> Result<DownstreamOutcome, DownstreamError> {
    let Some(next_step) = WorkflowStepRepository::find_next(tx, job.id, current_step.step_index).await? else {
        return Ok(DownstreamOutcome::NoNextStep);
    };

    let already_created = WorkItemRepository::count_for_step(tx, job.id, next_step.step_index).await?;
    if already_created >= next_step.work_item_count as i64 {
        // spec.md §9 open question: a superseded step (numInputGranules
        // shrank after this downstream's quota was already satisfied)
        // accepts the upstream item's own completion but emits nothing.
        return Ok(DownstreamOutcome::NoNextStep);
    }

    if !next_step.has_aggregated_output {
        let created = fan_out(tx, job, &next_step, upstream, results).await?;
        if created > 0 {
            notify_ready(tx, job.id, &next_step.service_id, correlation_id).await?;
        }
        return Ok(DownstreamOutcome::FanOut { created });
    }

    aggregate(tx, catalog, config, job, current_step, &next_step, upstream, results, sizes, correlation_id).await
}

/// Fan-out (spec.md §4.3): one READY item per result. A single result
/// propagates the upstream `sortIndex` unchanged; multiple results are
/// assigned consecutive indexes starting just past the step's current max.
async fn fan_out(
    tx: &mut Transaction<'_, Postgres>,
    job: &Job,
    next_step: &WorkflowStep,
    upstream: &WorkItem,
    results: &[String],
) -> Result<usize, DownstreamError> {
    if results.is_empty() {
        return Ok(0);
    }

    let base_sort_index = if results.len() > 1 {
        WorkItemRepository::max_sort_index(tx, job.id, next_step.step_index)
            .await?
            .unwrap_or(-1)
            + 1
    } else {
        upstream.sort_index
    };

    let now = chrono::Utc::now();
    let items: Vec<WorkItem> = results
        .iter()
        .enumerate()
        .map(|(i, url)| WorkItem {
            id: Uuid::new_v4(),
            job_id: job.id,
            step_index: next_step.step_index,
            service_id: next_step.service_id.clone(),
            status: "READY".to_string(),
            catalog_location: Some(url.clone()),
            scroll_token: None,
            sort_index: base_sort_index + i as i64,
            retry_count: 0,
            started_at: None,
            duration_ms: None,
            total_items_size: None,
            output_item_sizes: None,
            version: 0,
            created_at: now,
            updated_at: now,
        })
        .collect();

    WorkItemRepository::insert_batch(tx, &items).await?;
    UserWorkRepository::apply_delta(
        tx,
        job.id,
        &next_step.service_id,
        &job.username,
        job.is_async,
        items.len() as i32,
        0,
        true,
    )
    .await?;

    Ok(items.len())
}

/// Aggregation (spec.md §4.3 non-batched, §4.4 batched): buffer this
/// upstream's results, then flush according to the next step's policy.
#[allow(clippy::too_many_arguments)]
async fn aggregate(
    tx: &mut Transaction<'_, Postgres>,
    catalog: &dyn CatalogStore,
    config: &Config,
    job: &Job,
    current_step: &WorkflowStep,
    next_step: &WorkflowStep,
    upstream: &WorkItem,
    results: &[String],
    sizes: &[i64],
    correlation_id: CorrelationId,
) -> Result<DownstreamOutcome, DownstreamError> {
    let mut buffer = BatchBufferRepository::lock_for_update(tx, job.id, next_step.step_index).await?;
    buffer.urls.extend(results.iter().cloned());
    let extended_sizes = if sizes.len() == results.len() {
        sizes.to_vec()
    } else {
        vec![0i64; results.len()]
    };
    buffer.sizes.extend(extended_sizes);
    buffer.sort_indices.extend(std::iter::repeat(upstream.sort_index).take(results.len()));
    buffer.min_sort_index = Some(match buffer.min_sort_index {
        Some(existing) => existing.min(upstream.sort_index),
        None => upstream.sort_index,
    });

    let completed = WorkItemRepository::completed_count(tx, job.id, current_step.step_index).await?;
    let all_upstream_complete = completed >= current_step.work_item_count as i64;

    let mut batches_flushed = 0usize;

    if next_step.is_batched {
        while buffer.exceeds(config.max_batch_inputs as usize, config.max_batch_size_bytes) {
            let (urls, _sizes, min_sort_index) = buffer.split_front(config.max_batch_inputs as usize, config.max_batch_size_bytes);
            flush_batch(tx, catalog, config, job, next_step, urls, min_sort_index, correlation_id).await?;
            batches_flushed += 1;
        }
        if all_upstream_complete && !buffer.urls.is_empty() {
            let (urls, _sizes, min_sort_index) = buffer.take_all();
            flush_batch(tx, catalog, config, job, next_step, urls, min_sort_index, correlation_id).await?;
            batches_flushed += 1;
        }
    } else if all_upstream_complete && !buffer.urls.is_empty() {
        let (urls, _sizes, min_sort_index) = buffer.take_all();
        flush_batch(tx, catalog, config, job, next_step, urls, min_sort_index, correlation_id).await?;
        batches_flushed += 1;
    }

    BatchBufferRepository::save(tx, job.id, next_step.step_index, &buffer).await?;

    if batches_flushed > 0 {
        Ok(DownstreamOutcome::AggregationFlushed { batches: batches_flushed })
    } else {
        Ok(DownstreamOutcome::AggregationBuffered)
    }
}

/// Writes one batch's paginated catalog artifact and emits its single
/// READY WorkItem, `sortIndex` equal to the smallest upstream `sortIndex`
/// contributing to the batch (spec.md §4.4 step 4).
#[allow(clippy::too_many_arguments)]
async fn flush_batch(
    tx: &mut Transaction<'_, Postgres>,
    catalog_store: &dyn CatalogStore,
    config: &Config,
    job: &Job,
    next_step: &WorkflowStep,
    urls: Vec<String>,
    min_sort_index: i64,
    correlation_id: CorrelationId,
) -> Result<(), DownstreamError> {
    let item_id = Uuid::new_v4();
    let location = catalog::write_paginated_catalog(
        catalog_store,
        |page| catalog::aggregate_catalog_key(&job.id, &item_id, page),
        &format!("aggregate-{item_id}-"),
        "aggregated granule batch",
        &urls,
        config.aggregate_max_page_size as usize,
    )
    .await?;

    let now = chrono::Utc::now();
    let item = WorkItem {
        id: item_id,
        job_id: job.id,
        step_index: next_step.step_index,
        service_id: next_step.service_id.clone(),
        status: "READY".to_string(),
        catalog_location: Some(location),
        scroll_token: None,
        sort_index: min_sort_index,
        retry_count: 0,
        started_at: None,
        duration_ms: None,
        total_items_size: None,
        output_item_sizes: None,
        version: 0,
        created_at: now,
        updated_at: now,
    };
    WorkItemRepository::insert(tx, &item).await?;
    UserWorkRepository::apply_delta(tx, job.id, &next_step.service_id, &job.username, job.is_async, 1, 0, true).await?;
    notify_ready(tx, job.id, &next_step.service_id, correlation_id).await?;
    Ok(())
}

/// Writes the scheduler-trigger outbox row (spec.md §9): the durable
/// replacement for an in-process "item became READY" listener, so every
/// orchestrator replica — not just the one that happened to process this
/// update — eventually sees the signal.
async fn notify_ready(
    tx: &mut Transaction<'_, Postgres>,
    job_id: Uuid,
    service_id: &str,
    correlation_id: CorrelationId,
) -> Result<(), DownstreamError> {
    let mut writer = PgOutboxWriter::new(&mut **tx);
    writer
        .write_event(
            &SchedulerTrigger {
                job_id,
                service_id: service_id.to_string(),
            },
            correlation_id,
        )
        .await?;
    Ok(())
}

impl BatchBuffer {
    fn exceeds(&self, max_inputs: usize, max_bytes: i64) -> bool {
        self.urls.len() > max_inputs || self.sizes.iter().sum::<i64>() > max_bytes
    }

    /// Greedily slices the smallest prefix that brings the buffer back
    /// under both bounds, per spec.md §4.4 step 3.
    fn split_front(&mut self, max_inputs: usize, max_bytes: i64) -> (Vec<String>, Vec<i64>, i64) {
        let mut take = 0usize;
        let mut running_bytes = 0i64;
        while take < self.urls.len() {
            let next_bytes = running_bytes + self.sizes.get(take).copied().unwrap_or(0);
            let would_exceed_inputs = take + 1 > max_inputs;
            let would_exceed_bytes = next_bytes > max_bytes;
            if take > 0 && (would_exceed_inputs || would_exceed_bytes) {
                break;
            }
            running_bytes = next_bytes;
            take += 1;
            if take >= max_inputs {
                break;
            }
        }
        let min_sort_index = self.min_sort_index.unwrap_or(0);
        let urls: Vec<String> = self.urls.drain(..take).collect();
        let sizes: Vec<i64> = self.sizes.drain(..take).collect();
        self.sort_indices.drain(..take);
        self.min_sort_index = self.sort_indices.iter().min().copied();
        (urls, sizes, min_sort_index)
    }

    fn take_all(&mut self) -> (Vec<String>, Vec<i64>, i64) {
        let min_sort_index = self.min_sort_index.take().unwrap_or(0);
        self.sort_indices.clear();
        (std::mem::take(&mut self.urls), std::mem::take(&mut self.sizes), min_sort_index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn buffer_with(sizes: Vec<i64>) -> BatchBuffer {
        let sort_indices: Vec<i64> = (0..sizes.len() as i64).collect();
        BatchBuffer {
            urls: sizes.iter().enumerate().map(|(i, _)| format!("url-{i}")).collect(),
            sizes,
            min_sort_index: sort_indices.first().copied(),
            sort_indices,
        }
    }

    #[test]
    fn split_front_binds_on_input_count() {
        let mut buf = buffer_with(vec![10, 10, 10, 10, 10]);
        let (urls, sizes, _) = buf.split_front(3, 1_000_000);
        assert_eq!(urls.len(), 3);
        assert_eq!(sizes.len(), 3);
        assert_eq!(buf.urls.len(), 2);
    }

    #[test]
    fn split_front_binds_on_byte_budget() {
        // Ten items at 4000 bytes each, bound at 10000 bytes and 3 inputs:
        // the byte bound (2 items = 8000 <= 10000, 3rd would be 12000) binds
        // before the count bound, matching spec.md §8 boundary scenario 3.
        let mut buf = buffer_with(vec![4000; 10]);
        let (urls, _sizes, _) = buf.split_front(3, 10_000);
        assert_eq!(urls.len(), 2);
    }

    #[test]
    fn split_front_recomputes_min_sort_index_from_the_remainder() {
        let mut buf = buffer_with(vec![10, 10, 10, 10, 10]);
        let (_urls, _sizes, first_min) = buf.split_front(3, 1_000_000);
        assert_eq!(first_min, 0);
        // The remaining two items carry sort indices 3 and 4; the stale
        // value of 0 must not survive the drain.
        assert_eq!(buf.min_sort_index, Some(3));

        let (_urls, _sizes, second_min) = buf.take_all();
        assert_eq!(second_min, 3);
    }

    #[test]
    fn exceeds_checks_either_bound() {
        let buf = buffer_with(vec![10, 10, 10]);
        assert!(buf.exceeds(2, 1_000_000));
        assert!(!buf.exceeds(10, 1_000_000));
        assert!(buf.exceeds(10, 5));
    }

    #[test]
    fn take_all_drains_everything() {
        let mut buf = buffer_with(vec![1, 2, 3]);
        let (urls, sizes, min_sort_index) = buf.take_all();
        assert_eq!(urls.len(), 3);
        assert_eq!(sizes.len(), 3);
        assert_eq!(min_sort_index, 0);
        assert!(buf.urls.is_empty());
        assert!(buf.min_sort_index.is_none());
    }
}
