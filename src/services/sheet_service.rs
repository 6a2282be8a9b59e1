use crate::dto::student_dto::{SaveAnswerPayload, StartAttemptPayload};
use crate::error::{Error, Result};
use crate::models::answer::{self, Answer, AnswerKind};
use crate::models::answer_sheet::{AnswerSheet, SheetStatus};
use crate::models::question::Question;
use crate::services::grading_queue::GradingQueueService;
use crate::services::grading_service::GradingService;
use sqlx::PgPool;
use uuid::Uuid;

#[derive(Clone)]
pub struct SheetService {
    pool: PgPool,
}

impl SheetService {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Starts an attempt on a published worksheet. A student with an
    /// attempt still in `answering` resumes it; once a previous attempt
    /// has been submitted they get a fresh sheet.
    pub async fn start_attempt(
        &self,
        published_id: Uuid,
        payload: StartAttemptPayload,
    ) -> Result<AnswerSheet> {
        if let Some(open) = sqlx::query_as::<_, AnswerSheet>(
            r#"
            SELECT * FROM answer_sheets
            WHERE published_worksheet_id = $1 AND student_email = $2 AND status = 'answering'
            ORDER BY created_at DESC
            LIMIT 1
            "#,
        )
        .bind(published_id)
        .bind(&payload.student_email)
        .fetch_optional(&self.pool)
        .await?
        {
            tracing::info!(sheet_id = %open.id, "Resuming open answer sheet");
            return Ok(open);
        }

        let published = sqlx::query_as::<_, crate::models::worksheet::PublishedWorksheet>(
            r#"SELECT * FROM published_worksheets WHERE id = $1"#,
        )
        .bind(published_id)
        .fetch_one(&self.pool)
        .await?;

        let questions: Vec<Question> = serde_json::from_value(published.questions.clone())
            .map_err(|e| Error::Internal(format!("Corrupt question tree: {}", e)))?;
        let answers = serde_json::to_value(answer::blank_sheet_answers(&questions))?;

        let sheet = sqlx::query_as::<_, AnswerSheet>(
            r#"
            INSERT INTO answer_sheets
                (published_worksheet_id, student_name, student_email, status, answers, start_time)
            VALUES ($1, $2, $3, 'answering', $4, NOW())
            RETURNING *
            "#,
        )
        .bind(published_id)
        .bind(&payload.student_name)
        .bind(&payload.student_email)
        .bind(answers)
        .fetch_one(&self.pool)
        .await?;
        Ok(sheet)
    }

    pub async fn get_sheet(&self, sheet_id: Uuid) -> Result<AnswerSheet> {
        let sheet =
            sqlx::query_as::<_, AnswerSheet>(r#"SELECT * FROM answer_sheets WHERE id = $1"#)
                .bind(sheet_id)
                .fetch_one(&self.pool)
                .await?;
        Ok(sheet)
    }

    /// Writes a student's response into the sheet's answer tree, addressed
    /// by question id. Only allowed while the sheet is still `answering`.
    pub async fn save_answer(&self, sheet_id: Uuid, payload: SaveAnswerPayload) -> Result<AnswerSheet> {
        let sheet = self.get_sheet(sheet_id).await?;
        if sheet.sheet_status()? != SheetStatus::Answering {
            return Err(Error::Conflict(
                "Answer sheet has already been submitted".to_string(),
            ));
        }

        let mut answers: Vec<Answer> = serde_json::from_value(sheet.answers.clone())
            .map_err(|e| Error::Internal(format!("Corrupt answer tree: {}", e)))?;
        let leaf = answer::flatten_leaves_mut(&mut answers)
            .into_iter()
            .find(|a| a.question_id == payload.question_id)
            .ok_or_else(|| {
                Error::NotFound(format!(
                    "No answer for question {} on this sheet",
                    payload.question_id
                ))
            })?;

        write_response(leaf, &payload)?;

        let answers_json = serde_json::to_value(&answers)?;
        let sheet = sqlx::query_as::<_, AnswerSheet>(
            r#"
            UPDATE answer_sheets
            SET answers = $1, updated_at = NOW()
            WHERE id = $2 AND status = 'answering'
            RETURNING *
            "#,
        )
        .bind(answers_json)
        .bind(sheet_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(sheet)
    }

    /// Submits the sheet for grading. The status transition is the
    /// concurrency gate: it flips `answering` to `checking` exactly once,
    /// so a double submission gets a conflict instead of a second grading
    /// run.
    pub async fn submit(
        &self,
        sheet_id: Uuid,
        grading: &GradingService,
        queue: &GradingQueueService,
    ) -> Result<AnswerSheet> {
        if !grading.mark_checking(sheet_id).await? {
            // Distinguish "never existed" from "already past answering".
            let sheet = self.get_sheet(sheet_id).await?;
            return Err(Error::Conflict(format!(
                "Answer sheet {} is already {}",
                sheet_id, sheet.status
            )));
        }

        let job_id = queue.enqueue(sheet_id).await?;
        tracing::info!(sheet_id = %sheet_id, job_id = %job_id, "Answer sheet submitted for grading");
        self.get_sheet(sheet_id).await
    }
}

fn write_response(leaf: &mut Answer, payload: &SaveAnswerPayload) -> Result<()> {
    match &mut leaf.kind {
        AnswerKind::MultipleChoice(a) => {
            let selected = payload.selected.ok_or_else(|| {
                Error::BadRequest("Multiple choice answers require 'selected'".to_string())
            })?;
            if selected < 0 {
                return Err(Error::BadRequest(
                    "'selected' must be a positive choice index, or 0 to clear".to_string(),
                ));
            }
            a.selected = selected;
        }
        AnswerKind::ShortAnswer(a) | AnswerKind::OpenEnded(a) => {
            a.text = payload
                .text
                .clone()
                .ok_or_else(|| Error::BadRequest("Text answers require 'text'".to_string()))?;
        }
        AnswerKind::Essay(a) => {
            a.text = payload
                .text
                .clone()
                .ok_or_else(|| Error::BadRequest("Essay answers require 'text'".to_string()))?;
        }
        AnswerKind::Nested(_) => {
            return Err(Error::BadRequest(
                "Nested questions have no directly writable answer".to_string(),
            ));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::answer::MultipleChoiceAnswer;
    use rust_decimal::Decimal;

    fn mcq_leaf() -> Answer {
        Answer {
            id: Uuid::new_v4(),
            question_id: Uuid::new_v4(),
            order: 1,
            graded_at: None,
            kind: AnswerKind::MultipleChoice(MultipleChoiceAnswer {
                selected: 0,
                marks: Decimal::ZERO,
                feedback: None,
            }),
        }
    }

    #[test]
    fn write_response_sets_selected_choice() {
        let mut leaf = mcq_leaf();
        let payload = SaveAnswerPayload {
            question_id: leaf.question_id,
            selected: Some(3),
            text: None,
        };
        write_response(&mut leaf, &payload).unwrap();
        match &leaf.kind {
            AnswerKind::MultipleChoice(a) => assert_eq!(a.selected, 3),
            _ => panic!("expected multiple choice"),
        }
    }

    #[test]
    fn write_response_rejects_wrong_shape() {
        let mut leaf = mcq_leaf();
        let payload = SaveAnswerPayload {
            question_id: leaf.question_id,
            selected: None,
            text: Some("an essay".into()),
        };
        assert!(write_response(&mut leaf, &payload).is_err());
    }
}
