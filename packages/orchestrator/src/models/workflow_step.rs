//! `workflow_steps` row (spec.md §3).

use uuid::Uuid;

/// A `workflow_steps` row. `step_index` 1 is always the paginator step
/// (spec.md §4.5); `work_item_count` is the expected total for the step and
/// is recomputed whenever `Job.num_input_granules` changes (spec.md §4.5).
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct WorkflowStep {
    pub job_id: Uuid,
    pub step_index: i32,
    pub service_id: String,
    pub work_item_count: i32,
    pub has_aggregated_output: bool,
    pub is_batched: bool,
    pub is_sequential: bool,
}

impl WorkflowStep {
    pub fn is_paginator(&self) -> bool {
        self.step_index == 1
    }

    /// Recomputed work-item count for this step given the job's current
    /// `num_input_granules` and `cmr_max_page_size` (spec.md §4.5):
    /// ```text
    /// step 1 (paginator):    ceil(numInputGranules / cmrMaxPageSize)
    /// aggregated steps:      1
    /// other steps:           numInputGranules
    /// ```
    pub fn recompute_work_item_count(&self, num_input_granules: i32, cmr_max_page_size: i32) -> i32 {
        if self.is_paginator() {
            div_ceil(num_input_granules, cmr_max_page_size)
        } else if self.has_aggregated_output && !self.is_batched {
            1
        } else {
            num_input_granules
        }
    }
}

fn div_ceil(numerator: i32, denominator: i32) -> i32 {
    if numerator <= 0 {
        return 0;
    }
    (numerator + denominator - 1) / denominator
}

#[cfg(test)]
mod tests {
    use super::*;

    fn step(step_index: i32, has_aggregated_output: bool, is_batched: bool) -> WorkflowStep {
        WorkflowStep {
            job_id: Uuid::nil(),
            step_index,
            service_id: "svc".to_string(),
            work_item_count: 0,
            has_aggregated_output,
            is_batched,
            is_sequential: step_index == 1,
        }
    }

    #[test]
    fn paginator_step_ceils_division() {
        let s = step(1, false, false);
        assert_eq!(s.recompute_work_item_count(5, 2), 3);
        assert_eq!(s.recompute_work_item_count(4, 2), 2);
        assert_eq!(s.recompute_work_item_count(0, 2), 0);
    }

    #[test]
    fn non_batched_aggregated_step_is_always_one() {
        let s = step(3, true, false);
        assert_eq!(s.recompute_work_item_count(100, 2), 1);
    }

    #[test]
    fn batched_aggregated_step_tracks_granules() {
        let s = step(3, true, true);
        assert_eq!(s.recompute_work_item_count(7, 2), 7);
    }

    #[test]
    fn fan_out_step_tracks_granules() {
        let s = step(2, false, false);
        assert_eq!(s.recompute_work_item_count(7, 2), 7);
    }
}
