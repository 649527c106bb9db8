//! The work-item update ingester (spec.md §4.7): drains the small- and
//! large-update queues in batches, groups by job, and applies each update
//! as an independent transactional state transition.
//!
//! A message is deleted from its queue whether its update succeeds or
//! errors, to avoid poison-message loops (spec.md §4.7); an errored update
//! leaves its work item in its prior state for the failer ([`crate::failer`])
//! to eventually recover.

use orchestrator_core::{CorrelationId, Queue};
use sqlx::{Postgres, Transaction};
use tokio::task::JoinSet;
use uuid::Uuid;

use crate::deps::Deps;
use crate::downstream;
use crate::leaf;
use crate::models::{Job, JobStatus, WorkItem, WorkItemStatus, WorkflowStep};
use crate::paginator;
use crate::repository::job::JobRepository;
use crate::repository::job_error::JobErrorRepository;
use crate::repository::user_work::UserWorkRepository;
use crate::repository::work_item::WorkItemRepository;
use crate::repository::workflow_step::WorkflowStepRepository;
use crate::wire::{Update, WorkItemUpdate};
use orchestrator_core::{classify_failure, FailureKind};

#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("database error: {0}")]
    Db(#[from] sqlx::Error),
    #[error(transparent)]
    Downstream(#[from] downstream::DownstreamError),
    #[error(transparent)]
    Leaf(#[from] leaf::LeafError),
}

/// One drain-and-process pass over a single queue. Returns the number of
/// updates processed (successfully or not — every received message is
/// deleted regardless of its processing outcome).
///
/// Updates are looked up by `jobID` only implicitly: each runs as its own
/// transaction, and the Job row lock already serializes same-job updates,
/// so there is nothing further to gain from an explicit grouping pass —
/// every update in the batch is simply dispatched concurrently (spec.md
/// §4.7: "all updates for one job in the current batch are processed
/// concurrently (sharing a transactional context only per-update)").
pub async fn run_once(
    deps: &Deps,
    queue: &dyn Queue<WorkItemUpdate>,
    max_messages: u32,
) -> Result<usize, orchestrator_core::QueueError> {
    let messages = queue.receive(max_messages, 10).await?;
    if messages.is_empty() {
        return Ok(0);
    }

    let mut tasks = JoinSet::new();
    for msg in &messages {
        let deps = deps.clone();
        let work_item_id = msg.body.work_item_id.into_inner();
        let update = msg.body.update.clone();
        let correlation_id = CorrelationId::new();
        tasks.spawn(async move { process_update(&deps, work_item_id, update, correlation_id).await });
    }
    while let Some(result) = tasks.join_next().await {
        match result {
            Ok(Err(err)) => {
                tracing::warn!(error = %err, "update processing failed; item left for the failer to recover");
            }
            Err(join_err) => {
                tracing::warn!(error = %join_err, "update-processing task panicked");
            }
            Ok(Ok(())) => {}
        }
    }

    let receipts: Vec<String> = messages.into_iter().map(|m| m.receipt_handle).collect();
    queue.delete_batch(&receipts).await?;
    Ok(receipts.len())
}

/// Applies one update inside its own transaction, re-fetching and locking
/// Job then WorkItem in that order (spec.md §5). Returns `Ok(())` for every
/// case spec.md §4.7 calls an early-exit (unknown item, terminal job,
/// already-completed item) — these are not errors, just no-ops.
pub async fn process_update(
    deps: &Deps,
    work_item_id: Uuid,
    update: Update,
    correlation_id: CorrelationId,
) -> Result<(), IngestError> {
    let job_id = {
        let mut conn = deps.pool.acquire().await?;
        match WorkItemRepository::find(&mut conn, work_item_id).await? {
            Some(item) => item.job_id,
            None => return Ok(()),
        }
    };

    let mut tx = deps.pool.begin().await?;

    let Some(mut job) = JobRepository::lock_for_update(&mut tx, job_id).await? else {
        tx.rollback().await?;
        return Ok(());
    };
    if job.is_terminal() {
        // Idempotent accept: a CANCELED (or any) update arriving after the
        // job is already terminal is dropped silently (spec.md §5).
        tx.rollback().await?;
        return Ok(());
    }

    let Some(item) = WorkItemRepository::lock_for_update(&mut tx, work_item_id).await? else {
        tx.rollback().await?;
        return Ok(());
    };
    if item.is_completed() {
        tx.rollback().await?;
        return Ok(());
    }

    let Some(step) = WorkflowStepRepository::find(&mut tx, job.id, item.step_index).await? else {
        tx.rollback().await?;
        return Ok(());
    };

    match update {
        Update::Canceled => {
            WorkItemRepository::complete(&mut tx, item.id, "CANCELED", None, None, None, None).await?;
            UserWorkRepository::apply_delta(&mut tx, job.id, &item.service_id, &job.username, job.is_async, 0, -1, false).await?;
        }
        Update::Failed { message, duration_ms } => {
            handle_failed(&mut tx, deps, &mut job, &item, &step, message, duration_ms, correlation_id).await?;
        }
        Update::Successful {
            results,
            output_item_sizes,
            total_items_size,
            duration_ms,
            hits,
            scroll_token,
        } => {
            handle_successful(
                &mut tx,
                deps,
                &mut job,
                &item,
                &step,
                results,
                output_item_sizes,
                total_items_size,
                duration_ms,
                hits,
                scroll_token,
                correlation_id,
            )
            .await?;
        }
    }

    tx.commit().await?;
    Ok(())
}

/// spec.md §4.1, §4.7: paginator failures are always terminal for the job.
/// Other steps retry up to `retryLimit`; once non-retryable, the failure is
/// recorded as a JobError and the job fails if `ignoreErrors=false` or the
/// error count exceeds `maxErrorsForJob` (spec.md §7's error-count-breach
/// row: that check is unconditional, independent of `ignoreErrors`).
async fn handle_failed(
    tx: &mut Transaction<'_, Postgres>,
    deps: &Deps,
    job: &mut Job,
    item: &WorkItem,
    step: &WorkflowStep,
    message: String,
    duration_ms: Option<i64>,
    correlation_id: CorrelationId,
) -> Result<(), IngestError> {
    if step.is_paginator() {
        WorkItemRepository::complete(tx, item.id, "FAILED", duration_ms, None, None, None).await?;
        UserWorkRepository::apply_delta(tx, job.id, &item.service_id, &job.username, job.is_async, 0, -1, false).await?;
        JobErrorRepository::append(tx, job.id, item.catalog_location.as_deref(), &message).await?;
        crate::scheduler::cancel_job(tx, job, JobStatus::Failed, Some(message)).await?;
        return Ok(());
    }

    if classify_failure(item.retry_count, deps.config.retry_limit) == FailureKind::Retryable {
        WorkItemRepository::retry(tx, item.id).await?;
        UserWorkRepository::apply_delta(tx, job.id, &item.service_id, &job.username, job.is_async, 1, -1, false).await?;
        return Ok(());
    }

    WorkItemRepository::complete(tx, item.id, "FAILED", duration_ms, None, None, None).await?;
    UserWorkRepository::apply_delta(tx, job.id, &item.service_id, &job.username, job.is_async, 0, -1, false).await?;
    JobErrorRepository::append(tx, job.id, item.catalog_location.as_deref(), &message).await?;

    let error_count = JobErrorRepository::count_for_job(tx, job.id).await?;
    if !job.ignore_errors || error_count > deps.config.max_errors_for_job {
        let reason = if error_count > deps.config.max_errors_for_job {
            format!("error count {error_count} exceeded limit {}", deps.config.max_errors_for_job)
        } else {
            message
        };
        crate::scheduler::cancel_job(tx, job, JobStatus::Failed, Some(reason)).await?;
        return Ok(());
    }

    if job.status() == JobStatus::Running {
        job.status = JobStatus::RunningWithErrors.as_str().to_string();
    }

    let outcome = downstream::generate_downstream(
        tx,
        deps.catalog.as_ref(),
        &deps.config,
        job,
        step,
        item,
        &[],
        &[],
        correlation_id,
    )
    .await?;

    if leaf::is_effectively_leaf(tx, job.id, step, outcome.created_anything()).await? {
        leaf::handle_leaf_completion(tx, job, step, item, &[]).await?;
    } else {
        JobRepository::save(tx, job).await?;
    }

    Ok(())
}

#[allow(clippy::too_many_arguments)]
async fn handle_successful(
    tx: &mut Transaction<'_, Postgres>,
    deps: &Deps,
    job: &mut Job,
    item: &WorkItem,
    step: &WorkflowStep,
    results: Vec<String>,
    output_item_sizes: Vec<i64>,
    total_items_size: Option<i64>,
    duration_ms: Option<i64>,
    hits: Option<i32>,
    scroll_token: Option<String>,
    correlation_id: CorrelationId,
) -> Result<(), IngestError> {
    let wall_clock_ms = item
        .started_at
        .map(|started| (deps.clock.now() - started).num_milliseconds().max(0));
    let final_duration = larger_of(duration_ms, wall_clock_ms);
    let sizes_json = serde_json::to_value(&output_item_sizes).ok();

    WorkItemRepository::complete(
        tx,
        item.id,
        "SUCCESSFUL",
        final_duration,
        total_items_size,
        sizes_json,
        scroll_token.clone(),
    )
    .await?;
    UserWorkRepository::apply_delta(tx, job.id, &item.service_id, &job.username, job.is_async, 0, -1, false).await?;

    if let Some(hits) = hits {
        if let Some(shrunk) = paginator::apply_hits_shrink(tx, job.id, job.num_input_granules, hits, deps.config.cmr_max_page_size).await? {
            job.num_input_granules = shrunk;
        }
    }

    if step.is_paginator() {
        let successful = WorkItemRepository::successful_paginator_count(tx, job.id).await?;
        let remaining = paginator::max_granules(job.num_input_granules, successful, deps.config.cmr_max_page_size);
        if remaining > 0 {
            paginator::create_successor_item(
                tx,
                job.id,
                &item.service_id,
                &job.username,
                job.is_async,
                item.sort_index,
                scroll_token,
            )
            .await?;
        }
    }

    let outcome = downstream::generate_downstream(
        tx,
        deps.catalog.as_ref(),
        &deps.config,
        job,
        step,
        item,
        &results,
        &output_item_sizes,
        correlation_id,
    )
    .await?;

    if leaf::is_effectively_leaf(tx, job.id, step, outcome.created_anything()).await? {
        leaf::handle_leaf_completion(tx, job, step, item, &results).await?;
    } else {
        JobRepository::save(tx, job).await?;
    }

    Ok(())
}

fn larger_of(a: Option<i64>, b: Option<i64>) -> Option<i64> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.max(b)),
        (Some(a), None) => Some(a),
        (None, Some(b)) => Some(b),
        (None, None) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn larger_of_prefers_the_bigger_duration() {
        assert_eq!(larger_of(Some(100), Some(50)), Some(100));
        assert_eq!(larger_of(Some(50), Some(100)), Some(100));
        assert_eq!(larger_of(None, Some(100)), Some(100));
        assert_eq!(larger_of(Some(100), None), Some(100));
        assert_eq!(larger_of(None, None), None);
    }
}
