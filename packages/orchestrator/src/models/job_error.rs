//! `job_errors` row (spec.md §3). Append-only.

use chrono::{DateTime, Utc};
use uuid::Uuid;

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct JobError {
    pub id: Uuid,
    pub job_id: Uuid,
    pub url: Option<String>,
    pub message: String,
    pub created_at: DateTime<Utc>,
}
