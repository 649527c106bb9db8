//! `job_errors` repository. Append-only (spec.md §3).

use sqlx::{PgConnection, Postgres, Transaction};
use uuid::Uuid;

pub struct JobErrorRepository;

impl JobErrorRepository {
    pub async fn append(
        tx: &mut Transaction<'_, Postgres>,
        job_id: Uuid,
        url: Option<&str>,
        message: &str,
    ) -> sqlx::Result<()> {
        sqlx::query("INSERT INTO job_errors (id, job_id, url, message) VALUES ($1, $2, $3, $4)")
            .bind(Uuid::new_v4())
            .bind(job_id)
            .bind(url)
            .bind(message)
            .execute(&mut **tx)
            .await?;
        Ok(())
    }

    pub async fn count_for_job(conn: &mut PgConnection, job_id: Uuid) -> sqlx::Result<i64> {
        let row: (i64,) = sqlx::query_as("SELECT count(*) FROM job_errors WHERE job_id = $1")
            .bind(job_id)
            .fetch_one(conn)
            .await?;
        Ok(row.0)
    }
}
