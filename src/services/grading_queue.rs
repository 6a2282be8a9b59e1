use crate::error::Result;
use crate::services::grading_service::GradingService;
use sqlx::{PgPool, Row};
use uuid::Uuid;

/// Single-claim grading queue: submission enqueues, the worker claims one
/// job at a time per sheet (`FOR UPDATE SKIP LOCKED`), so each answer
/// sheet is graded by at most one pass at a time and the submit request
/// returns immediately.
#[derive(Clone)]
pub struct GradingQueueService {
    pub pool: PgPool,
}

impl GradingQueueService {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn enqueue(&self, answer_sheet_id: Uuid) -> Result<Uuid> {
        let row = sqlx::query(
            r#"
            INSERT INTO grading_jobs (answer_sheet_id)
            VALUES ($1)
            RETURNING id
            "#,
        )
        .bind(answer_sheet_id)
        .fetch_one(&self.pool)
        .await?;
        let id: Uuid = row.try_get("id")?;
        Ok(id)
    }

    /// Claims and runs one pending job. Returns false when the queue is
    /// idle so the worker loop can sleep.
    pub async fn run_once(&self, grading: &GradingService) -> Result<bool> {
        let rec = sqlx::query(
            r#"
            UPDATE grading_jobs SET status = 'running', started_at = NOW()
            WHERE id = (
                SELECT id FROM grading_jobs WHERE status = 'pending'
                ORDER BY created_at ASC FOR UPDATE SKIP LOCKED LIMIT 1
            )
            RETURNING id, answer_sheet_id
            "#,
        )
        .fetch_optional(&self.pool)
        .await?;
        let Some(row) = rec else { return Ok(false) };
        let job_id: Uuid = row.try_get("id")?;
        let sheet_id: Uuid = row.try_get("answer_sheet_id")?;

        match grading.check_answer_sheet(sheet_id).await {
            Ok(()) => {
                sqlx::query(
                    r#"UPDATE grading_jobs SET status = 'succeeded', finished_at = NOW() WHERE id = $1"#,
                )
                .bind(job_id)
                .execute(&self.pool)
                .await?;
            }
            Err(e) => {
                tracing::error!(job_id = %job_id, sheet_id = %sheet_id, error = %e, "Grading job failed");
                sqlx::query(
                    r#"UPDATE grading_jobs SET status = 'failed', error = $1, finished_at = NOW() WHERE id = $2"#,
                )
                .bind(e.to_string())
                .bind(job_id)
                .execute(&self.pool)
                .await?;
            }
        }

        Ok(true)
    }
}
