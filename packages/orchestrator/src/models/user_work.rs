//! `user_work` row: the fair-scheduling ledger (spec.md §3, §4.2).

use chrono::{DateTime, Utc};
use uuid::Uuid;

/// A `user_work` row. Deleted once both `ready_count` and `running_count`
/// reach zero. Fully derivable from `work_items` — see
/// [`crate::repository::user_work::UserWorkRepository::rebuild_for_job`].
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct UserWork {
    pub job_id: Uuid,
    pub service_id: String,
    pub username: String,
    pub ready_count: i32,
    pub running_count: i32,
    pub last_worked: DateTime<Utc>,
    pub is_async: bool,
    pub version: i64,
}

impl UserWork {
    pub fn is_empty(&self) -> bool {
        self.ready_count == 0 && self.running_count == 0
    }
}
