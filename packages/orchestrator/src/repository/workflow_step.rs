//! `workflow_steps` repository.

use sqlx::{PgConnection, Postgres, Transaction};
use uuid::Uuid;

use crate::models::WorkflowStep;

pub struct WorkflowStepRepository;

impl WorkflowStepRepository {
    pub async fn find(
        conn: &mut PgConnection,
        job_id: Uuid,
        step_index: i32,
    ) -> sqlx::Result<Option<WorkflowStep>> {
        sqlx::query_as::<_, WorkflowStep>(
            "SELECT * FROM workflow_steps WHERE job_id = $1 AND step_index = $2",
        )
        .bind(job_id)
        .bind(step_index)
        .fetch_optional(conn)
        .await
    }

    pub async fn find_next(
        conn: &mut PgConnection,
        job_id: Uuid,
        current_step_index: i32,
    ) -> sqlx::Result<Option<WorkflowStep>> {
        Self::find(conn, job_id, current_step_index + 1).await
    }

    pub async fn all_for_job(conn: &mut PgConnection, job_id: Uuid) -> sqlx::Result<Vec<WorkflowStep>> {
        sqlx::query_as::<_, WorkflowStep>(
            "SELECT * FROM workflow_steps WHERE job_id = $1 ORDER BY step_index ASC",
        )
        .bind(job_id)
        .fetch_all(conn)
        .await
    }

    pub async fn insert(tx: &mut Transaction<'_, Postgres>, step: &WorkflowStep) -> sqlx::Result<()> {
        sqlx::query(
            r#"
            INSERT INTO workflow_steps (
                job_id, step_index, service_id, work_item_count,
                has_aggregated_output, is_batched, is_sequential
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(step.job_id)
        .bind(step.step_index)
        .bind(&step.service_id)
        .bind(step.work_item_count)
        .bind(step.has_aggregated_output)
        .bind(step.is_batched)
        .bind(step.is_sequential)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    /// Recomputes and persists `work_item_count` for every step of a job,
    /// per spec.md §4.5's formula, when `num_input_granules` shrinks.
    pub async fn update_work_item_count(
        tx: &mut Transaction<'_, Postgres>,
        job_id: Uuid,
        step_index: i32,
        work_item_count: i32,
    ) -> sqlx::Result<()> {
        sqlx::query("UPDATE workflow_steps SET work_item_count = $3 WHERE job_id = $1 AND step_index = $2")
            .bind(job_id)
            .bind(step_index)
            .bind(work_item_count)
            .execute(&mut **tx)
            .await?;
        Ok(())
    }
}
