//! `work_items` row and its state machine (spec.md §3, §4.1).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorkItemStatus {
    Ready,
    Running,
    Successful,
    Failed,
    Canceled,
}

impl WorkItemStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkItemStatus::Ready => "READY",
            WorkItemStatus::Running => "RUNNING",
            WorkItemStatus::Successful => "SUCCESSFUL",
            WorkItemStatus::Failed => "FAILED",
            WorkItemStatus::Canceled => "CANCELED",
        }
    }

    pub fn parse(s: &str) -> anyhow::Result<Self> {
        Ok(match s {
            "READY" => WorkItemStatus::Ready,
            "RUNNING" => WorkItemStatus::Running,
            "SUCCESSFUL" => WorkItemStatus::Successful,
            "FAILED" => WorkItemStatus::Failed,
            "CANCELED" => WorkItemStatus::Canceled,
            other => anyhow::bail!("unknown work item status {other}"),
        })
    }

    /// Completed ∈ {SUCCESSFUL, FAILED, CANCELED} (spec.md §3). Once
    /// completed, a work item never transitions again except an explicit
    /// retry, which resets it to READY.
    pub fn is_completed(&self) -> bool {
        matches!(
            self,
            WorkItemStatus::Successful | WorkItemStatus::Failed | WorkItemStatus::Canceled
        )
    }
}

/// A `work_items` row.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct WorkItem {
    pub id: Uuid,
    pub job_id: Uuid,
    pub step_index: i32,
    pub service_id: String,
    pub status: String,
    pub catalog_location: Option<String>,
    pub scroll_token: Option<String>,
    pub sort_index: i64,
    pub retry_count: i32,
    pub started_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<i64>,
    pub total_items_size: Option<i64>,
    pub output_item_sizes: Option<serde_json::Value>,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WorkItem {
    pub fn status(&self) -> WorkItemStatus {
        WorkItemStatus::parse(&self.status).expect("work item status column holds an invalid value")
    }

    pub fn is_completed(&self) -> bool {
        self.status().is_completed()
    }

    /// `retryCount < retryLimit` means a FAILED update is retried rather
    /// than treated as terminal (spec.md §4.1).
    pub fn is_retryable(&self, retry_limit: i32) -> bool {
        self.retry_count < retry_limit
    }

    pub fn output_item_sizes_vec(&self) -> Vec<i64> {
        self.output_item_sizes
            .as_ref()
            .and_then(|v| serde_json::from_value(v.clone()).ok())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(status: &str, retry_count: i32) -> WorkItem {
        WorkItem {
            id: Uuid::nil(),
            job_id: Uuid::nil(),
            step_index: 1,
            service_id: "svc".to_string(),
            status: status.to_string(),
            catalog_location: None,
            scroll_token: None,
            sort_index: 0,
            retry_count,
            started_at: None,
            duration_ms: None,
            total_items_size: None,
            output_item_sizes: None,
            version: 0,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn completed_statuses_are_terminal() {
        assert!(item("SUCCESSFUL", 0).is_completed());
        assert!(item("FAILED", 0).is_completed());
        assert!(item("CANCELED", 0).is_completed());
        assert!(!item("READY", 0).is_completed());
        assert!(!item("RUNNING", 0).is_completed());
    }

    #[test]
    fn retry_budget_is_exclusive_of_the_limit() {
        assert!(item("FAILED", 2).is_retryable(3));
        assert!(!item("FAILED", 3).is_retryable(3));
    }
}
