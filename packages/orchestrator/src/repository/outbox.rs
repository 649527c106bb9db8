//! Postgres-backed `OutboxWriter`/`OutboxReader` (spec.md §9's redesigned
//! signal path) against the `event_outbox` table.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use orchestrator_core::{CorrelationId, OutboxEntry, OutboxError, OutboxEvent, OutboxReader, OutboxWriter, Result};
use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

/// Writes within an already-open connection or transaction, so the caller
/// controls atomicity with the business-data mutation.
pub struct PgOutboxWriter<'a> {
    conn: &'a mut PgConnection,
}

impl<'a> PgOutboxWriter<'a> {
    pub fn new(conn: &'a mut PgConnection) -> Self {
        Self { conn }
    }
}

#[async_trait]
impl<'a> OutboxWriter for PgOutboxWriter<'a> {
    async fn write_event<E: OutboxEvent + 'static>(
        &mut self,
        event: &E,
        correlation_id: CorrelationId,
    ) -> Result<Uuid> {
        let id = Uuid::new_v4();
        let payload = serde_json::to_value(event).map_err(|e| OutboxError::Write(e.into()))?;
        sqlx::query(
            r#"
            INSERT INTO event_outbox (id, event_type, payload, correlation_id, created_at)
            VALUES ($1, $2, $3, $4, now())
            "#,
        )
        .bind(id)
        .bind(E::event_type())
        .bind(payload)
        .bind(correlation_id.into_inner())
        .execute(&mut *self.conn)
        .await
        .map_err(|e| OutboxError::Write(e.into()))?;
        Ok(id)
    }
}

/// Reader/cleanup half, run by the background publisher against the pool
/// directly rather than inside the business transaction.
pub struct PgOutboxReader {
    pool: PgPool,
}

impl PgOutboxReader {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl OutboxReader for PgOutboxReader {
    async fn claim_unpublished(&self, limit: usize) -> Result<Vec<OutboxEntry>> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| OutboxError::Read(e.into()))?;

        let rows: Vec<(Uuid, String, serde_json::Value, Uuid, DateTime<Utc>, Option<DateTime<Utc>>)> =
            sqlx::query_as(
                r#"
                SELECT id, event_type, payload, correlation_id, created_at, published_at
                FROM event_outbox
                WHERE published_at IS NULL
                ORDER BY created_at ASC
                LIMIT $1
                FOR UPDATE SKIP LOCKED
                "#,
            )
            .bind(limit as i64)
            .fetch_all(&mut *tx)
            .await
            .map_err(|e| OutboxError::Read(e.into()))?;

        tx.commit().await.map_err(|e| OutboxError::Read(e.into()))?;

        Ok(rows
            .into_iter()
            .map(|(id, event_type, payload, correlation_id, created_at, published_at)| OutboxEntry {
                id,
                event_type,
                payload,
                correlation_id: CorrelationId::from(correlation_id),
                created_at,
                published_at,
            })
            .collect())
    }

    async fn mark_published(&self, ids: &[Uuid]) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        sqlx::query("UPDATE event_outbox SET published_at = now() WHERE id = ANY($1)")
            .bind(ids)
            .execute(&self.pool)
            .await
            .map_err(|e| OutboxError::Read(e.into()))?;
        Ok(())
    }

    async fn cleanup_published(&self, older_than: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query("DELETE FROM event_outbox WHERE published_at IS NOT NULL AND published_at < $1")
            .bind(older_than)
            .execute(&self.pool)
            .await
            .map_err(|e| OutboxError::Read(e.into()))?;
        Ok(result.rows_affected())
    }
}
