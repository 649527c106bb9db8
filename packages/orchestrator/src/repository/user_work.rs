//! `user_work` repository: the fair-scheduling ledger (spec.md §4.2).
//! Locked last in the Job→WorkItem→UserWork order (spec.md §5).

use sqlx::{PgConnection, Postgres, Transaction};
use uuid::Uuid;

use crate::models::UserWork;

pub struct UserWorkRepository;

/// A user selected by [`UserWorkRepository::next_user`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NextUser {
    pub username: String,
}

/// A job selected by [`UserWorkRepository::next_job`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NextJob {
    pub job_id: Uuid,
}

impl UserWorkRepository {
    /// `nextUser(S)` (spec.md §4.2 step 1): among users with a READY row
    /// for this service, pick the one whose summed `running_count` across
    /// *all* services is smallest, breaking ties by oldest `max(last_worked)`.
    pub async fn next_user(conn: &mut PgConnection, service_id: &str) -> sqlx::Result<Option<NextUser>> {
        let row: Option<(String,)> = sqlx::query_as(
            r#"
            WITH candidates AS (
                SELECT DISTINCT username FROM user_work
                WHERE service_id = $1 AND ready_count > 0
            ),
            running_totals AS (
                SELECT username, coalesce(sum(running_count), 0) AS total_running, max(last_worked) AS oldest_worked
                FROM user_work
                WHERE username IN (SELECT username FROM candidates)
                GROUP BY username
            )
            SELECT username FROM running_totals
            ORDER BY total_running ASC, oldest_worked ASC
            LIMIT 1
            "#,
        )
        .bind(service_id)
        .fetch_optional(conn)
        .await?;
        Ok(row.map(|(username,)| NextUser { username }))
    }

    /// `nextJob(user, S)` (spec.md §4.2 step 2): among the user's rows for
    /// this service with ready work, pick synchronous jobs first
    /// (`is_async` asc), then oldest `last_worked`.
    pub async fn next_job(
        conn: &mut PgConnection,
        username: &str,
        service_id: &str,
    ) -> sqlx::Result<Option<NextJob>> {
        let row: Option<(Uuid,)> = sqlx::query_as(
            r#"
            SELECT job_id FROM user_work
            WHERE username = $1 AND service_id = $2 AND ready_count > 0
            ORDER BY is_async ASC, last_worked ASC
            LIMIT 1
            "#,
        )
        .bind(username)
        .bind(service_id)
        .fetch_optional(conn)
        .await?;
        Ok(row.map(|(job_id,)| NextJob { job_id }))
    }

    pub async fn lock_for_update(
        tx: &mut Transaction<'_, Postgres>,
        job_id: Uuid,
        service_id: &str,
    ) -> sqlx::Result<Option<UserWork>> {
        sqlx::query_as::<_, UserWork>(
            "SELECT * FROM user_work WHERE job_id = $1 AND service_id = $2 FOR UPDATE",
        )
        .bind(job_id)
        .bind(service_id)
        .fetch_optional(&mut **tx)
        .await
    }

    /// Upserts a `(job, service)` row, adding `ready_delta`/`running_delta`
    /// to the existing counts (or starting from zero), and stamping
    /// `last_worked = now()` when `touch` is true. Deletes the row if both
    /// counts land at zero (spec.md §3).
    pub async fn apply_delta(
        tx: &mut Transaction<'_, Postgres>,
        job_id: Uuid,
        service_id: &str,
        username: &str,
        is_async: bool,
        ready_delta: i32,
        running_delta: i32,
        touch: bool,
    ) -> sqlx::Result<()> {
        let existing = Self::lock_for_update(tx, job_id, service_id).await?;
        let (ready_count, running_count) = match &existing {
            Some(row) => (row.ready_count + ready_delta, row.running_count + running_delta),
            None => (ready_delta.max(0), running_delta.max(0)),
        };

        if ready_count <= 0 && running_count <= 0 {
            sqlx::query("DELETE FROM user_work WHERE job_id = $1 AND service_id = $2")
                .bind(job_id)
                .bind(service_id)
                .execute(&mut **tx)
                .await?;
            return Ok(());
        }

        if existing.is_some() {
            if touch {
                sqlx::query(
                    r#"
                    UPDATE user_work
                    SET ready_count = $3, running_count = $4, last_worked = now(), version = version + 1
                    WHERE job_id = $1 AND service_id = $2
                    "#,
                )
                .bind(job_id)
                .bind(service_id)
                .bind(ready_count)
                .bind(running_count)
                .execute(&mut **tx)
                .await?;
            } else {
                sqlx::query(
                    r#"
                    UPDATE user_work
                    SET ready_count = $3, running_count = $4, version = version + 1
                    WHERE job_id = $1 AND service_id = $2
                    "#,
                )
                .bind(job_id)
                .bind(service_id)
                .bind(ready_count)
                .bind(running_count)
                .execute(&mut **tx)
                .await?;
            }
        } else {
            sqlx::query(
                r#"
                INSERT INTO user_work (job_id, service_id, username, ready_count, running_count, last_worked, is_async)
                VALUES ($1, $2, $3, $4, $5, now(), $6)
                "#,
            )
            .bind(job_id)
            .bind(service_id)
            .bind(username)
            .bind(ready_count)
            .bind(running_count)
            .bind(is_async)
            .execute(&mut **tx)
            .await?;
        }
        Ok(())
    }

    pub async fn delete_for_job(tx: &mut Transaction<'_, Postgres>, job_id: Uuid) -> sqlx::Result<()> {
        sqlx::query("DELETE FROM user_work WHERE job_id = $1")
            .bind(job_id)
            .execute(&mut **tx)
            .await?;
        Ok(())
    }

    /// Rebuild discipline (spec.md §4.2): recompute every `user_work` row
    /// for a job from the authoritative `work_items` table. Invoked on
    /// store restart or when a job resumes from PAUSED.
    pub async fn rebuild_for_job(
        tx: &mut Transaction<'_, Postgres>,
        job_id: Uuid,
        username: &str,
        is_async: bool,
    ) -> sqlx::Result<()> {
        sqlx::query("DELETE FROM user_work WHERE job_id = $1")
            .bind(job_id)
            .execute(&mut **tx)
            .await?;

        sqlx::query(
            r#"
            INSERT INTO user_work (job_id, service_id, username, ready_count, running_count, last_worked, is_async)
            SELECT
                job_id,
                service_id,
                $2,
                count(*) FILTER (WHERE status = 'READY'),
                count(*) FILTER (WHERE status = 'RUNNING'),
                now(),
                $3
            FROM work_items
            WHERE job_id = $1
            GROUP BY job_id, service_id
            HAVING count(*) FILTER (WHERE status = 'READY') > 0 OR count(*) FILTER (WHERE status = 'RUNNING') > 0
            "#,
        )
        .bind(job_id)
        .bind(username)
        .bind(is_async)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }
}
