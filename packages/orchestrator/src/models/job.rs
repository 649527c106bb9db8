//! `jobs` row (spec.md §3).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Job lifecycle status. Stored as `TEXT` on the row (matching the
/// `status: String` column `server::kernel::job_queue::Job` uses) and
/// parsed at the domain boundary rather than via a Postgres enum type, so
/// adding a status never requires an `ALTER TYPE` migration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobStatus {
    Accepted,
    Previewing,
    Running,
    RunningWithErrors,
    Paused,
    Successful,
    CompleteWithErrors,
    Failed,
    Canceled,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Accepted => "ACCEPTED",
            JobStatus::Previewing => "PREVIEWING",
            JobStatus::Running => "RUNNING",
            JobStatus::RunningWithErrors => "RUNNING_WITH_ERRORS",
            JobStatus::Paused => "PAUSED",
            JobStatus::Successful => "SUCCESSFUL",
            JobStatus::CompleteWithErrors => "COMPLETE_WITH_ERRORS",
            JobStatus::Failed => "FAILED",
            JobStatus::Canceled => "CANCELED",
        }
    }

    pub fn parse(s: &str) -> anyhow::Result<Self> {
        Ok(match s {
            "ACCEPTED" => JobStatus::Accepted,
            "PREVIEWING" => JobStatus::Previewing,
            "RUNNING" => JobStatus::Running,
            "RUNNING_WITH_ERRORS" => JobStatus::RunningWithErrors,
            "PAUSED" => JobStatus::Paused,
            "SUCCESSFUL" => JobStatus::Successful,
            "COMPLETE_WITH_ERRORS" => JobStatus::CompleteWithErrors,
            "FAILED" => JobStatus::Failed,
            "CANCELED" => JobStatus::Canceled,
            other => anyhow::bail!("unknown job status {other}"),
        })
    }

    /// Terminal ∈ {SUCCESSFUL, COMPLETE_WITH_ERRORS, FAILED, CANCELED} (§3).
    /// Once terminal, a job never transitions again.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Successful
                | JobStatus::CompleteWithErrors
                | JobStatus::Failed
                | JobStatus::Canceled
        )
    }
}

/// A `jobs` row.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Job {
    pub id: Uuid,
    pub username: String,
    pub status: String,
    pub num_input_granules: i32,
    pub progress: i32,
    pub message: Option<String>,
    pub ignore_errors: bool,
    pub is_async: bool,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    pub fn status(&self) -> JobStatus {
        JobStatus::parse(&self.status).expect("job status column holds an invalid value")
    }

    pub fn is_terminal(&self) -> bool {
        self.status().is_terminal()
    }
}

/// Leaf-step progress (spec.md §4.6): "each batch of `workItemCount`
/// completions corresponds to finishing one granule through the
/// pipeline; progress is derived as (completed batches across all
/// steps) / (expected batches)." Every non-leaf step's own work items
/// complete into exactly one net effect at the leaf (fan-out/aggregation
/// collapse N upstream items into the leaf's own `workItemCount`), so the
/// leaf step is where that ratio is actually observable; this computes it
/// as the fraction of the leaf step's own items completed so far.
pub fn leaf_progress(leaf_completed_count: i64, leaf_work_item_count: i32) -> i32 {
    if leaf_work_item_count <= 0 {
        return 100;
    }
    let pct = (leaf_completed_count * 100) / leaf_work_item_count as i64;
    pct.clamp(0, 100) as i32
}

#[cfg(test)]
mod progress_tests {
    use super::*;

    #[test]
    fn progress_tracks_leaf_completions() {
        assert_eq!(leaf_progress(0, 2), 0);
        assert_eq!(leaf_progress(1, 2), 50);
        assert_eq!(leaf_progress(2, 2), 100);
    }

    #[test]
    fn progress_is_complete_when_leaf_has_no_items() {
        assert_eq!(leaf_progress(0, 0), 100);
    }
}
