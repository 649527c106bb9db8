//! `jobs` repository. First lock in the Job→WorkItem→UserWork order
//! (spec.md §5).

use sqlx::{PgConnection, Postgres, Transaction};
use uuid::Uuid;

use crate::models::Job;

pub struct JobRepository;

impl JobRepository {
    /// Locks and returns the job row. Must be called before any WorkItem
    /// or UserWork row is locked in the same transaction (spec.md §5).
    pub async fn lock_for_update(
        tx: &mut Transaction<'_, Postgres>,
        job_id: Uuid,
    ) -> sqlx::Result<Option<Job>> {
        sqlx::query_as::<_, Job>("SELECT * FROM jobs WHERE id = $1 FOR UPDATE")
            .bind(job_id)
            .fetch_optional(&mut **tx)
            .await
    }

    pub async fn find(conn: &mut PgConnection, job_id: Uuid) -> sqlx::Result<Option<Job>> {
        sqlx::query_as::<_, Job>("SELECT * FROM jobs WHERE id = $1")
            .bind(job_id)
            .fetch_optional(conn)
            .await
    }

    pub async fn insert(tx: &mut Transaction<'_, Postgres>, job: &Job) -> sqlx::Result<()> {
        sqlx::query(
            r#"
            INSERT INTO jobs (
                id, username, status, num_input_granules, progress, message,
                ignore_errors, is_async, version, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(job.id)
        .bind(&job.username)
        .bind(&job.status)
        .bind(job.num_input_granules)
        .bind(job.progress)
        .bind(&job.message)
        .bind(job.ignore_errors)
        .bind(job.is_async)
        .bind(job.version)
        .bind(job.created_at)
        .bind(job.updated_at)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    /// Writes back a job row already locked by [`Self::lock_for_update`]
    /// in this same transaction. `version` is bumped to detect a future
    /// caller racing this same row outside the lock (defense in depth;
    /// the `FOR UPDATE` lock is the primary guard).
    pub async fn save(tx: &mut Transaction<'_, Postgres>, job: &Job) -> sqlx::Result<()> {
        sqlx::query(
            r#"
            UPDATE jobs
            SET status = $2, num_input_granules = $3, progress = $4, message = $5,
                version = version + 1, updated_at = now()
            WHERE id = $1
            "#,
        )
        .bind(job.id)
        .bind(&job.status)
        .bind(job.num_input_granules)
        .bind(job.progress)
        .bind(&job.message)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    /// Bulk-transitions every non-completed WorkItem for a job to CANCELED
    /// and removes its UserWork rows (spec.md §5's cancellation contract).
    /// Caller must already hold the Job row lock.
    pub async fn cancel(tx: &mut Transaction<'_, Postgres>, job_id: Uuid, canceled_status: &str) -> sqlx::Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE work_items
            SET status = $2, version = version + 1, updated_at = now()
            WHERE job_id = $1 AND status NOT IN ('SUCCESSFUL', 'FAILED', 'CANCELED')
            "#,
        )
        .bind(job_id)
        .bind(canceled_status)
        .execute(&mut **tx)
        .await?;

        sqlx::query("DELETE FROM user_work WHERE job_id = $1")
            .bind(job_id)
            .execute(&mut **tx)
            .await?;

        Ok(result.rows_affected())
    }
}
