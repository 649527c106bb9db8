//! `job_links` row (spec.md §3). Appended when leaf-step items succeed.

use chrono::{DateTime, Utc};
use uuid::Uuid;

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct JobLink {
    pub id: Uuid,
    pub job_id: Uuid,
    pub href: String,
    #[sqlx(rename = "type")]
    pub link_type: Option<String>,
    pub title: Option<String>,
    pub rel: String,
    pub temporal: Option<serde_json::Value>,
    pub bbox: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}
