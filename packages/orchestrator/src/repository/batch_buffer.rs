//! `batch_buffers` repository: the pending-input accumulator for batched
//! aggregation (spec.md §4.4).

use sqlx::{Postgres, Transaction};
use uuid::Uuid;

/// One (job, step) pending batch buffer row, decoded from JSON columns.
///
/// `sort_indices` runs parallel to `urls`/`sizes`, one entry per buffered
/// result, so a partial drain can recompute `min_sort_index` for whatever
/// is left rather than carrying a stale value forward.
#[derive(Debug, Clone, Default)]
pub struct BatchBuffer {
    pub urls: Vec<String>,
    pub sizes: Vec<i64>,
    pub sort_indices: Vec<i64>,
    pub min_sort_index: Option<i64>,
}

pub struct BatchBufferRepository;

impl BatchBufferRepository {
    pub async fn lock_for_update(
        tx: &mut Transaction<'_, Postgres>,
        job_id: Uuid,
        step_index: i32,
    ) -> sqlx::Result<BatchBuffer> {
        let row: Option<(serde_json::Value, serde_json::Value, serde_json::Value, Option<i64>)> = sqlx::query_as(
            r#"
            SELECT pending_urls, pending_sizes, pending_sort_indices, min_sort_index
            FROM batch_buffers
            WHERE job_id = $1 AND step_index = $2
            FOR UPDATE
            "#,
        )
        .bind(job_id)
        .bind(step_index)
        .fetch_optional(&mut **tx)
        .await?;

        Ok(match row {
            Some((urls, sizes, sort_indices, min_sort_index)) => BatchBuffer {
                urls: serde_json::from_value(urls).unwrap_or_default(),
                sizes: serde_json::from_value(sizes).unwrap_or_default(),
                sort_indices: serde_json::from_value(sort_indices).unwrap_or_default(),
                min_sort_index,
            },
            None => BatchBuffer::default(),
        })
    }

    /// Persists the buffer's remaining (unflushed) contents after an
    /// append-and-greedily-flush pass (spec.md §4.4 steps 2–3).
    pub async fn save(
        tx: &mut Transaction<'_, Postgres>,
        job_id: Uuid,
        step_index: i32,
        buffer: &BatchBuffer,
    ) -> sqlx::Result<()> {
        if buffer.urls.is_empty() {
            sqlx::query("DELETE FROM batch_buffers WHERE job_id = $1 AND step_index = $2")
                .bind(job_id)
                .bind(step_index)
                .execute(&mut **tx)
                .await?;
            return Ok(());
        }

        sqlx::query(
            r#"
            INSERT INTO batch_buffers (job_id, step_index, pending_urls, pending_sizes, pending_sort_indices, min_sort_index, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, now())
            ON CONFLICT (job_id, step_index) DO UPDATE
            SET pending_urls = EXCLUDED.pending_urls,
                pending_sizes = EXCLUDED.pending_sizes,
                pending_sort_indices = EXCLUDED.pending_sort_indices,
                min_sort_index = EXCLUDED.min_sort_index,
                version = batch_buffers.version + 1,
                updated_at = now()
            "#,
        )
        .bind(job_id)
        .bind(step_index)
        .bind(serde_json::to_value(&buffer.urls).unwrap())
        .bind(serde_json::to_value(&buffer.sizes).unwrap())
        .bind(serde_json::to_value(&buffer.sort_indices).unwrap())
        .bind(buffer.min_sort_index)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }
}
