//! `job_links` repository. Appended when leaf-step items succeed (spec.md §4.6).

use sqlx::{PgConnection, Postgres, Transaction};
use uuid::Uuid;

use crate::models::JobLink;

pub struct JobLinkRepository;

impl JobLinkRepository {
    #[allow(clippy::too_many_arguments)]
    pub async fn append(
        tx: &mut Transaction<'_, Postgres>,
        job_id: Uuid,
        href: &str,
        link_type: Option<&str>,
        title: Option<&str>,
        rel: &str,
        temporal: Option<serde_json::Value>,
        bbox: Option<serde_json::Value>,
    ) -> sqlx::Result<()> {
        sqlx::query(
            r#"
            INSERT INTO job_links (id, job_id, href, type, title, rel, temporal, bbox)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(job_id)
        .bind(href)
        .bind(link_type)
        .bind(title)
        .bind(rel)
        .bind(temporal)
        .bind(bbox)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    pub async fn count_for_job(conn: &mut PgConnection, job_id: Uuid) -> sqlx::Result<i64> {
        let row: (i64,) = sqlx::query_as("SELECT count(*) FROM job_links WHERE job_id = $1")
            .bind(job_id)
            .fetch_one(conn)
            .await?;
        Ok(row.0)
    }

    pub async fn list_for_job(conn: &mut PgConnection, job_id: Uuid) -> sqlx::Result<Vec<JobLink>> {
        sqlx::query_as::<_, JobLink>("SELECT * FROM job_links WHERE job_id = $1 ORDER BY created_at ASC")
            .bind(job_id)
            .fetch_all(conn)
            .await
    }
}
