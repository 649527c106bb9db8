//! The catalog paginator step (spec.md §4.5): step 1 of every job, whose
//! page count depends on prior results and may shrink mid-flight.

use chrono::Utc;
use orchestrator_core::WorkItemId;
use sqlx::{Postgres, Transaction};
use uuid::Uuid;

use crate::models::WorkItem;
use crate::repository::user_work::UserWorkRepository;
use crate::repository::work_item::WorkItemRepository;
use crate::repository::workflow_step::WorkflowStepRepository;

pub const PAGINATOR_STEP_INDEX: i32 = 1;

/// `maxGranules(job)` (spec.md §4.5): how many granules the *next*
/// paginator dispatch may request, given how many pages have already
/// succeeded. Zero means the paginator is finished and should not be
/// dispatched again.
pub fn max_granules(num_input_granules: i32, successful_paginator_items: i64, cmr_max_page_size: i32) -> i32 {
    let consumed = successful_paginator_items as i64 * cmr_max_page_size as i64;
    let remaining = num_input_granules as i64 - consumed;
    remaining.clamp(0, cmr_max_page_size as i64) as i32
}

/// Applies a revised `hits` count from a paginator success (spec.md §4.5):
/// if `hits < job.numInputGranules`, shrinks `numInputGranules` to `hits`
/// and recomputes `workItemCount` for every step of the job. A `hits`
/// value at or above the current count is ignored — the budget was fixed
/// at submission and only ever narrows.
pub async fn apply_hits_shrink(
    tx: &mut Transaction<'_, Postgres>,
    job_id: Uuid,
    current_num_input_granules: i32,
    hits: i32,
    cmr_max_page_size: i32,
) -> sqlx::Result<Option<i32>> {
    if hits >= current_num_input_granules {
        return Ok(None);
    }

    let steps = WorkflowStepRepository::all_for_job(tx, job_id).await?;
    for step in &steps {
        let recomputed = step.recompute_work_item_count(hits, cmr_max_page_size);
        WorkflowStepRepository::update_work_item_count(tx, job_id, step.step_index, recomputed).await?;
    }

    Ok(Some(hits))
}

/// Creates the next READY paginator item once a page succeeds and
/// granules remain, inheriting the returned `scrollToken` (spec.md §4.5).
pub async fn create_successor_item(
    tx: &mut Transaction<'_, Postgres>,
    job_id: Uuid,
    service_id: &str,
    username: &str,
    is_async: bool,
    previous_sort_index: i64,
    scroll_token: Option<String>,
) -> sqlx::Result<WorkItem> {
    let now = Utc::now();
    let item = WorkItem {
        id: WorkItemId::new().into_inner(),
        job_id,
        step_index: PAGINATOR_STEP_INDEX,
        service_id: service_id.to_string(),
        status: "READY".to_string(),
        catalog_location: None,
        scroll_token,
        sort_index: previous_sort_index + 1,
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
    UserWorkRepository::apply_delta(tx, job_id, service_id, username, is_async, 1, 0, true).await?;
    Ok(item)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn max_granules_caps_at_page_size() {
        assert_eq!(max_granules(5, 0, 2), 2);
        assert_eq!(max_granules(5, 2, 2), 1);
        assert_eq!(max_granules(5, 3, 2), 0);
    }

    #[test]
    fn max_granules_never_goes_negative_once_exhausted() {
        assert_eq!(max_granules(4, 10, 2), 0);
    }

    #[test]
    fn max_granules_reflects_a_mid_flight_shrink() {
        assert_eq!(max_granules(3, 1, 2), 1);
        assert_eq!(max_granules(3, 2, 2), 0);
    }
}
