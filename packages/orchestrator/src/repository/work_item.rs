//! `work_items` repository. Locked second in the Job→WorkItem→UserWork
//! order (spec.md §5) — always re-fetch after the Job lock rather than
//! trusting a pre-transaction read.

use chrono::{DateTime, Utc};
use sqlx::{PgConnection, Postgres, Transaction};
use uuid::Uuid;

use crate::models::WorkItem;

pub struct WorkItemRepository;

impl WorkItemRepository {
    pub async fn lock_for_update(
        tx: &mut Transaction<'_, Postgres>,
        work_item_id: Uuid,
    ) -> sqlx::Result<Option<WorkItem>> {
        sqlx::query_as::<_, WorkItem>("SELECT * FROM work_items WHERE id = $1 FOR UPDATE")
            .bind(work_item_id)
            .fetch_optional(&mut **tx)
            .await
    }

    pub async fn find(conn: &mut PgConnection, work_item_id: Uuid) -> sqlx::Result<Option<WorkItem>> {
        sqlx::query_as::<_, WorkItem>("SELECT * FROM work_items WHERE id = $1")
            .bind(work_item_id)
            .fetch_optional(conn)
            .await
    }

    /// `popReady` (spec.md §4.2 step 3): oldest READY item for (job,
    /// service), ordered by `sort_index` asc then `id` asc, locked.
    pub async fn lock_oldest_ready(
        tx: &mut Transaction<'_, Postgres>,
        job_id: Uuid,
        service_id: &str,
    ) -> sqlx::Result<Option<WorkItem>> {
        sqlx::query_as::<_, WorkItem>(
            r#"
            SELECT * FROM work_items
            WHERE job_id = $1 AND service_id = $2 AND status = 'READY'
            ORDER BY sort_index ASC, id ASC
            LIMIT 1
            FOR UPDATE
            "#,
        )
        .bind(job_id)
        .bind(service_id)
        .fetch_optional(&mut **tx)
        .await
    }

    pub async fn insert(tx: &mut Transaction<'_, Postgres>, item: &WorkItem) -> sqlx::Result<()> {
        sqlx::query(
            r#"
            INSERT INTO work_items (
                id, job_id, step_index, service_id, status, catalog_location,
                scroll_token, sort_index, retry_count, started_at, duration_ms,
                total_items_size, output_item_sizes, version, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
            "#,
        )
        .bind(item.id)
        .bind(item.job_id)
        .bind(item.step_index)
        .bind(&item.service_id)
        .bind(&item.status)
        .bind(&item.catalog_location)
        .bind(&item.scroll_token)
        .bind(item.sort_index)
        .bind(item.retry_count)
        .bind(item.started_at)
        .bind(item.duration_ms)
        .bind(item.total_items_size)
        .bind(&item.output_item_sizes)
        .bind(item.version)
        .bind(item.created_at)
        .bind(item.updated_at)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    pub async fn insert_batch(tx: &mut Transaction<'_, Postgres>, items: &[WorkItem]) -> sqlx::Result<()> {
        for item in items {
            Self::insert(tx, item).await?;
        }
        Ok(())
    }

    /// Flips a locked READY item to RUNNING and stamps `started_at`
    /// (dispatch, spec.md §4.1).
    pub async fn mark_running(
        tx: &mut Transaction<'_, Postgres>,
        work_item_id: Uuid,
        started_at: DateTime<Utc>,
    ) -> sqlx::Result<()> {
        sqlx::query(
            "UPDATE work_items SET status = 'RUNNING', started_at = $2, version = version + 1, updated_at = now() WHERE id = $1",
        )
        .bind(work_item_id)
        .bind(started_at)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    /// Rewrites a FAILED item back to READY with `retry_count` incremented
    /// (spec.md §4.1).
    pub async fn retry(tx: &mut Transaction<'_, Postgres>, work_item_id: Uuid) -> sqlx::Result<()> {
        sqlx::query(
            r#"
            UPDATE work_items
            SET status = 'READY', retry_count = retry_count + 1, started_at = NULL,
                version = version + 1, updated_at = now()
            WHERE id = $1
            "#,
        )
        .bind(work_item_id)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    /// Records a terminal completion (SUCCESSFUL, FAILED, or CANCELED)
    /// along with the worker-reported duration and sizes.
    #[allow(clippy::too_many_arguments)]
    pub async fn complete(
        tx: &mut Transaction<'_, Postgres>,
        work_item_id: Uuid,
        status: &str,
        duration_ms: Option<i64>,
        total_items_size: Option<i64>,
        output_item_sizes: Option<serde_json::Value>,
        scroll_token: Option<String>,
    ) -> sqlx::Result<()> {
        sqlx::query(
            r#"
            UPDATE work_items
            SET status = $2, duration_ms = $3, total_items_size = $4,
                output_item_sizes = $5, scroll_token = $6,
                version = version + 1, updated_at = now()
            WHERE id = $1
            "#,
        )
        .bind(work_item_id)
        .bind(status)
        .bind(duration_ms)
        .bind(total_items_size)
        .bind(output_item_sizes)
        .bind(scroll_token)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    pub async fn max_sort_index(
        conn: &mut PgConnection,
        job_id: Uuid,
        step_index: i32,
    ) -> sqlx::Result<Option<i64>> {
        let row: (Option<i64>,) =
            sqlx::query_as("SELECT max(sort_index) FROM work_items WHERE job_id = $1 AND step_index = $2")
                .bind(job_id)
                .bind(step_index)
                .fetch_one(conn)
                .await?;
        Ok(row.0)
    }

    /// Every item ever created for a step, regardless of status. Used to
    /// guard against re-emitting downstream items when a mid-flight
    /// `numInputGranules` shrink has already satisfied the step's revised
    /// `workItemCount` (spec.md §9 open question on superseded steps).
    pub async fn count_for_step(
        conn: &mut PgConnection,
        job_id: Uuid,
        step_index: i32,
    ) -> sqlx::Result<i64> {
        let row: (i64,) = sqlx::query_as(
            "SELECT count(*) FROM work_items WHERE job_id = $1 AND step_index = $2",
        )
        .bind(job_id)
        .bind(step_index)
        .fetch_one(conn)
        .await?;
        Ok(row.0)
    }

    /// RUNNING items at a step, for the paginator's `isSequential` gate
    /// (spec.md §4.5): at most one paginator item may be RUNNING per job.
    pub async fn running_count_for_step(
        conn: &mut PgConnection,
        job_id: Uuid,
        step_index: i32,
    ) -> sqlx::Result<i64> {
        let row: (i64,) = sqlx::query_as(
            "SELECT count(*) FROM work_items WHERE job_id = $1 AND step_index = $2 AND status = 'RUNNING'",
        )
        .bind(job_id)
        .bind(step_index)
        .fetch_one(conn)
        .await?;
        Ok(row.0)
    }

    pub async fn completed_count(
        conn: &mut PgConnection,
        job_id: Uuid,
        step_index: i32,
    ) -> sqlx::Result<i64> {
        let row: (i64,) = sqlx::query_as(
            r#"
            SELECT count(*) FROM work_items
            WHERE job_id = $1 AND step_index = $2
              AND status IN ('SUCCESSFUL', 'FAILED', 'CANCELED')
            "#,
        )
        .bind(job_id)
        .bind(step_index)
        .fetch_one(conn)
        .await?;
        Ok(row.0)
    }

    /// Catalog locations of every SUCCESSFUL item at a step, ordered by
    /// `sort_index`, for the aggregation gate (spec.md §4.3) to read back
    /// and concatenate.
    pub async fn successful_locations_for_step(
        conn: &mut PgConnection,
        job_id: Uuid,
        step_index: i32,
    ) -> sqlx::Result<Vec<(i64, Option<String>)>> {
        sqlx::query_as(
            r#"
            SELECT sort_index, catalog_location FROM work_items
            WHERE job_id = $1 AND step_index = $2 AND status = 'SUCCESSFUL'
            ORDER BY sort_index ASC
            "#,
        )
        .bind(job_id)
        .bind(step_index)
        .fetch_all(conn)
        .await
    }

    pub async fn successful_paginator_count(conn: &mut PgConnection, job_id: Uuid) -> sqlx::Result<i64> {
        let row: (i64,) = sqlx::query_as(
            "SELECT count(*) FROM work_items WHERE job_id = $1 AND step_index = 1 AND status = 'SUCCESSFUL'",
        )
        .bind(job_id)
        .fetch_one(conn)
        .await?;
        Ok(row.0)
    }

    /// RUNNING items older than `threshold_started_before`, per service,
    /// for the failer's sweep (spec.md §4.8).
    pub async fn find_stuck_running(
        conn: &mut PgConnection,
        threshold_started_before: DateTime<Utc>,
        limit: i64,
    ) -> sqlx::Result<Vec<WorkItem>> {
        sqlx::query_as::<_, WorkItem>(
            r#"
            SELECT * FROM work_items
            WHERE status = 'RUNNING' AND started_at < $1
            ORDER BY started_at ASC
            LIMIT $2
            "#,
        )
        .bind(threshold_started_before)
        .bind(limit)
        .fetch_all(conn)
        .await
    }

    /// Recent successful durations for a (job, service), used to compute
    /// the failer's adaptive percentile threshold (spec.md §4.8).
    pub async fn recent_successful_durations(
        conn: &mut PgConnection,
        service_id: &str,
        limit: i64,
    ) -> sqlx::Result<Vec<i64>> {
        let rows: Vec<(i64,)> = sqlx::query_as(
            r#"
            SELECT duration_ms FROM work_items
            WHERE service_id = $1 AND status = 'SUCCESSFUL' AND duration_ms IS NOT NULL
            ORDER BY updated_at DESC
            LIMIT $2
            "#,
        )
        .bind(service_id)
        .bind(limit)
        .fetch_all(conn)
        .await?;
        Ok(rows.into_iter().map(|(d,)| d).collect())
    }
}
