//! The fair scheduler (spec.md §4.2): "give me the next work item to run
//! for service S", answered from the `user_work` ledger rather than a
//! scan over `work_items`.
//!
//! [`dispatch_next`] runs the four-step selection protocol inside one
//! transaction, locking rows in the Job→WorkItem→UserWork order spec.md §5
//! mandates, then sends the worker-facing message only after the
//! transaction commits — the enqueue is the one piece of this path that
//! is not worth rolling back, and a crash between commit and send just
//! leaves the item for the failer to recover (spec.md §4.8).

use orchestrator_core::ServiceId;
use sqlx::{Postgres, Transaction};

use crate::deps::Deps;
use crate::models::{Job, WorkItem, WorkflowStep};
use crate::paginator::{self, PAGINATOR_STEP_INDEX};
use crate::repository::job::JobRepository;
use crate::repository::user_work::UserWorkRepository;
use crate::repository::work_item::WorkItemRepository;
use crate::repository::workflow_step::WorkflowStepRepository;
use crate::wire::WorkAssignment;

/// The constant FIFO message-group id every dispatch uses for a given
/// service queue (spec.md §4.2 step 4): "enqueued... with a constant
/// group identifier... worker correctness does not depend on specific
/// interleaving across services."
pub const DISPATCH_GROUP_ID: &str = "dispatch";

#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error("database error: {0}")]
    Db(#[from] sqlx::Error),
    #[error("queue error: {0}")]
    Queue(#[from] orchestrator_core::QueueError),
    #[error("no worker-facing queue configured for service {0}")]
    UnknownService(String),
}

/// Picks and dispatches the next work item for `service_id`, if any is
/// available. Returns `None` rather than an error when there is simply
/// nothing ready — that is the expected, frequent case for a scheduler
/// poll loop.
pub async fn dispatch_next(deps: &Deps, service_id: &ServiceId) -> Result<Option<WorkAssignment>, SchedulerError> {
    let mut tx = deps.pool.begin().await?;

    let Some((job, item, step)) = select_next_item(&mut tx, service_id, deps.config.cmr_max_page_size).await? else {
        tx.rollback().await?;
        return Ok(None);
    };

    let started_at = deps.clock.now();
    WorkItemRepository::mark_running(&mut tx, item.id, started_at).await?;
    UserWorkRepository::apply_delta(&mut tx, item.job_id, service_id.as_str(), &job.username, job.is_async, -1, 1, true)
        .await?;

    let max_granules = if step.is_paginator() {
        let successful = WorkItemRepository::successful_paginator_count(&mut tx, job.id).await?;
        Some(paginator::max_granules(
            job.num_input_granules,
            successful,
            deps.config.cmr_max_page_size,
        ))
    } else {
        None
    };

    tx.commit().await?;

    let assignment = WorkAssignment {
        work_item_id: item.id.into(),
        job_id: item.job_id,
        step_index: item.step_index,
        catalog_location: item.catalog_location.clone(),
        scroll_token: item.scroll_token.clone(),
        max_granules,
    };

    let queue = deps
        .queues
        .service_queue(service_id)
        .ok_or_else(|| SchedulerError::UnknownService(service_id.as_str().to_string()))?;
    queue.send(&assignment, DISPATCH_GROUP_ID).await?;

    Ok(Some(assignment))
}

/// Steps 1–3 of spec.md §4.2's selection protocol, plus the paginator's
/// `isSequential` guard: picks the fairest user, then their fairest job,
/// then that job's oldest READY item for this service, re-fetching and
/// locking the Job row first to honor the lock order of spec.md §5.
async fn select_next_item(
    tx: &mut Transaction<'_, Postgres>,
    service_id: &ServiceId,
    cmr_max_page_size: i32,
) -> Result<Option<(Job, WorkItem, WorkflowStep)>, SchedulerError> {
    let Some(next_user) = UserWorkRepository::next_user(tx, service_id.as_str()).await? else {
        return Ok(None);
    };
    let Some(next_job) = UserWorkRepository::next_job(tx, &next_user.username, service_id.as_str()).await? else {
        return Ok(None);
    };

    let Some(job) = JobRepository::lock_for_update(tx, next_job.job_id).await? else {
        return Ok(None);
    };
    if job.is_terminal() || job.status() == crate::models::JobStatus::Paused {
        return Ok(None);
    }

    let Some(item) = WorkItemRepository::lock_oldest_ready(tx, job.id, service_id.as_str()).await? else {
        return Ok(None);
    };

    let Some(step) = WorkflowStepRepository::find(tx, job.id, item.step_index).await? else {
        return Ok(None);
    };

    if step.is_sequential {
        let running = WorkItemRepository::running_count_for_step(tx, job.id, PAGINATOR_STEP_INDEX).await?;
        if running > 0 {
            return Ok(None);
        }
    }

    if step.is_paginator() {
        let successful = WorkItemRepository::successful_paginator_count(tx, job.id).await?;
        let remaining = paginator::max_granules(job.num_input_granules, successful, cmr_max_page_size);
        if remaining <= 0 {
            return Ok(None);
        }
    }

    Ok(Some((job, item, step)))
}

/// One poll-loop iteration: drains the scheduler-trigger queue for
/// routing hints, but always re-derives the real answer from the ledger
/// rather than trusting anything carried in the trigger message body
/// (spec.md §9's note that the scheduler always re-reads `user_work`).
pub async fn run_once(deps: &Deps, service_id: &ServiceId) -> Result<bool, SchedulerError> {
    Ok(dispatch_next(deps, service_id).await?.is_some())
}

/// Bulk-transitions a job to a terminal status, cancels its remaining
/// work, and deletes its `user_work` rows (spec.md §5's cancellation
/// contract). Used both by explicit user cancellation and by the
/// ingester when a non-retryable failure makes a job terminal.
pub async fn cancel_job(
    tx: &mut Transaction<'_, Postgres>,
    job: &mut Job,
    status: crate::models::JobStatus,
    message: Option<String>,
) -> sqlx::Result<()> {
    job.status = status.as_str().to_string();
    job.message = message;
    JobRepository::save(tx, job).await?;
    JobRepository::cancel(tx, job.id, "CANCELED").await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dispatch_group_id_is_stable() {
        assert_eq!(DISPATCH_GROUP_ID, "dispatch");
    }
}
