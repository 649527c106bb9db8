//! Leaf handling and job finalization (spec.md §4.6).
//!
//! "Leaf" here means effectively last, not textually last: a mid-flight
//! `numInputGranules` shrink (spec.md §4.5) can retire a step that used to
//! have downstream work, leaving an earlier step as the job's true final
//! step. [`is_effectively_leaf`] checks the next step's *current*
//! `workItemCount` rather than assuming `stepIndex == N`.

use sqlx::{Postgres, Transaction};

use crate::models::job::leaf_progress;
use crate::models::{Job, JobStatus, WorkItem, WorkItemStatus, WorkflowStep};
use crate::repository::job::JobRepository;
use crate::repository::job_error::JobErrorRepository;
use crate::repository::job_link::JobLinkRepository;
use crate::repository::work_item::WorkItemRepository;
use crate::repository::workflow_step::WorkflowStepRepository;

#[derive(Debug, thiserror::Error)]
pub enum LeafError {
    #[error("database error: {0}")]
    Db(#[from] sqlx::Error),
}

/// A step is effectively the job's leaf for this completion when nothing
/// was created downstream and either there truly is no next step, or the
/// next step's `workItemCount` has shrunk to zero.
pub async fn is_effectively_leaf(
    tx: &mut Transaction<'_, Postgres>,
    job_id: uuid::Uuid,
    current_step: &WorkflowStep,
    created_downstream: bool,
) -> Result<bool, LeafError> {
    if created_downstream {
        return Ok(false);
    }
    Ok(
        match WorkflowStepRepository::find_next(tx, job_id, current_step.step_index).await? {
            None => true,
            Some(next) => next.work_item_count == 0,
        },
    )
}

/// Applies spec.md §4.6 for one completed item at an (effectively) leaf
/// step: appends a JobLink on success, advances progress, and either pauses
/// a PREVIEWING job at its first leaf completion or finalizes the job once
/// every item at the step has completed.
///
/// The preview checkpoint and the finalize gate both fire on "the step is
/// done enough to say something about the job," so we resolve the order
/// spec.md leaves implicit by giving PREVIEWING priority: a job awaiting
/// preview confirmation pauses rather than finalizing even if this
/// completion also happens to satisfy the completion gate (e.g. a
/// single-granule job), since finalizing would skip the checkpoint
/// entirely.
pub async fn handle_leaf_completion(
    tx: &mut Transaction<'_, Postgres>,
    job: &mut Job,
    leaf_step: &WorkflowStep,
    item: &WorkItem,
    result_hrefs: &[String],
) -> Result<(), LeafError> {
    if item.status() == WorkItemStatus::Successful {
        for href in result_hrefs {
            JobLinkRepository::append(tx, job.id, href, None, None, "item", None, None).await?;
        }
    }

    let completed = WorkItemRepository::completed_count(tx, job.id, leaf_step.step_index).await?;
    job.progress = leaf_progress(completed, leaf_step.work_item_count);

    if job.status() == JobStatus::Previewing {
        job.status = JobStatus::Paused.as_str().to_string();
        job.message = Some("paused for preview confirmation".to_string());
    } else if completed >= leaf_step.work_item_count as i64 {
        finalize(tx, job).await?;
    }

    JobRepository::save(tx, job).await?;
    Ok(())
}

/// `status = COMPLETE_WITH_ERRORS` if any JobError exists and any JobLink
/// exists; `FAILED` if any JobError exists and no JobLink; otherwise
/// `SUCCESSFUL` (spec.md §4.6).
async fn finalize(tx: &mut Transaction<'_, Postgres>, job: &mut Job) -> Result<(), LeafError> {
    let error_count = JobErrorRepository::count_for_job(tx, job.id).await?;
    let link_count = JobLinkRepository::count_for_job(tx, job.id).await?;

    let status = if error_count > 0 && link_count > 0 {
        JobStatus::CompleteWithErrors
    } else if error_count > 0 {
        JobStatus::Failed
    } else {
        JobStatus::Successful
    };
    job.status = status.as_str().to_string();
    job.progress = 100;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn leaf_progress_tracks_step_completion_count() {
        assert_eq!(leaf_progress(3, 10), 30);
        assert_eq!(leaf_progress(10, 10), 100);
    }
}
