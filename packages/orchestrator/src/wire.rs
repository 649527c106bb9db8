//! Wire types exchanged with service workers (spec.md §6, §9).
//!
//! Spec.md §9 flags the loosely-typed update object workers historically
//! sent and asks for a tagged variant instead. `Update` is that variant:
//! paginator-only fields (`hits`, `scroll_token`) live on
//! [`Update::Successful`] rather than floating at the top level of every
//! update.

use orchestrator_core::WorkItemId;
use serde::{Deserialize, Serialize};

/// The body of `updateWorkItem(id, body)` (spec.md §6), reshaped from the
/// ad hoc `{ status, hits?, results?, ... }` object into a tagged union.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "UPPERCASE")]
pub enum Update {
    Successful {
        results: Vec<String>,
        output_item_sizes: Vec<i64>,
        total_items_size: Option<i64>,
        duration_ms: Option<i64>,
        /// Revised catalog hit count; paginator items only (spec.md §4.5).
        #[serde(default)]
        hits: Option<i32>,
        /// Catalog scroll continuation token; paginator items only.
        #[serde(default)]
        scroll_token: Option<String>,
    },
    Failed {
        message: String,
        duration_ms: Option<i64>,
    },
    Canceled,
}

/// One message on a worker-facing queue: a dispatched work item plus,
/// for the paginator step only, the page-size cap computed at dispatch
/// time (spec.md §4.5, §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkAssignment {
    pub work_item_id: WorkItemId,
    pub job_id: uuid::Uuid,
    pub step_index: i32,
    pub catalog_location: Option<String>,
    pub scroll_token: Option<String>,
    pub max_granules: Option<i32>,
}

/// One message on an update queue: an update keyed by the work item it
/// targets. `results.len() > 1` routes to the large-update queue,
/// otherwise the small-update queue (spec.md §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkItemUpdate {
    pub work_item_id: WorkItemId,
    pub update: Update,
}

impl WorkItemUpdate {
    /// Which update queue this message belongs on, per spec.md §6.
    pub fn routes_to_large_queue(&self) -> bool {
        matches!(&self.update, Update::Successful { results, .. } if results.len() > 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_result_routes_to_small_queue() {
        let update = WorkItemUpdate {
            work_item_id: WorkItemId::new(),
            update: Update::Successful {
                results: vec!["a".to_string()],
                output_item_sizes: vec![10],
                total_items_size: Some(10),
                duration_ms: Some(5),
                hits: None,
                scroll_token: None,
            },
        };
        assert!(!update.routes_to_large_queue());
    }

    #[test]
    fn multi_result_routes_to_large_queue() {
        let update = WorkItemUpdate {
            work_item_id: WorkItemId::new(),
            update: Update::Successful {
                results: vec!["a".to_string(), "b".to_string()],
                output_item_sizes: vec![10, 20],
                total_items_size: Some(30),
                duration_ms: Some(5),
                hits: None,
                scroll_token: None,
            },
        };
        assert!(update.routes_to_large_queue());
    }

    #[test]
    fn failure_and_cancel_route_to_small_queue() {
        let failure = WorkItemUpdate {
            work_item_id: WorkItemId::new(),
            update: Update::Failed {
                message: "boom".to_string(),
                duration_ms: None,
            },
        };
        assert!(!failure.routes_to_large_queue());

        let cancel = WorkItemUpdate {
            work_item_id: WorkItemId::new(),
            update: Update::Canceled,
        };
        assert!(!cancel.routes_to_large_queue());
    }
}
