use crate::error::{Error, Result};
use crate::models::answer::{
    flatten_leaves as flatten_answer_leaves, flatten_leaves_mut, total_awarded, Answer, AnswerKind,
};
use crate::models::answer_sheet::{AnswerSheet, SheetStatus};
use crate::models::question::{
    flatten_leaves as flatten_question_leaves, LeafQuestion, Question, QuestionKind,
};
use crate::models::rubric;
use crate::models::worksheet::PublishedWorksheet;
use crate::services::notification_service::NotificationService;
use crate::services::oracle_service::OracleService;
use crate::services::scoring::{self, EssayEvaluation};
use chrono::Utc;
use rust_decimal::Decimal;
use sqlx::PgPool;
use uuid::Uuid;

/// Transient oracle failures (network, malformed reply) are retried per
/// leaf before the pass is abandoned.
const MAX_ORACLE_ATTEMPTS: u32 = 3;

/// Immutable per-leaf grading outcome, folded into the sheet total after
/// every leaf has one.
#[derive(Debug)]
pub enum LeafScore {
    MultipleChoice {
        marks: Decimal,
        feedback: Option<String>,
    },
    OpenEnded {
        marks: Decimal,
        feedback: String,
    },
    Essay(EssayEvaluation),
}

#[derive(Clone)]
pub struct GradingService {
    pool: PgPool,
    oracle: OracleService,
}

impl GradingService {
    pub fn new(pool: PgPool, oracle: OracleService) -> Self {
        Self { pool, oracle }
    }

    /// The entry guard: conditionally moves a sheet from `answering` to
    /// `checking` in a single statement. Returns false when the sheet was
    /// not in `answering`, which makes double submission a no-op.
    pub async fn mark_checking(&self, sheet_id: Uuid) -> Result<bool> {
        let result = sqlx::query(
            r#"UPDATE answer_sheets
               SET status = 'checking', end_time = COALESCE(end_time, NOW()), updated_at = NOW()
               WHERE id = $1 AND status = 'answering'"#,
        )
        .bind(sheet_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    /// Grades every leaf of the sheet, persists the total, flips the sheet
    /// to `returned` and queues the notification email. On failure the
    /// sheet lands in `checking_failed` rather than hanging in `checking`.
    pub async fn check_answer_sheet(&self, sheet_id: Uuid) -> Result<()> {
        match self.run_pipeline(sheet_id).await {
            Ok(()) => Ok(()),
            Err(e) => {
                tracing::error!(sheet_id = %sheet_id, error = %e, "Grading pass failed");
                sqlx::query(
                    r#"UPDATE answer_sheets SET status = 'checking_failed', updated_at = NOW()
                       WHERE id = $1 AND status = 'checking'"#,
                )
                .bind(sheet_id)
                .execute(&self.pool)
                .await?;
                Err(e)
            }
        }
    }

    async fn run_pipeline(&self, sheet_id: Uuid) -> Result<()> {
        let sheet = sqlx::query_as::<_, AnswerSheet>(
            r#"SELECT * FROM answer_sheets WHERE id = $1"#,
        )
        .bind(sheet_id)
        .fetch_one(&self.pool)
        .await?;

        let status: SheetStatus = sheet.status.parse()?;
        if status != SheetStatus::Checking {
            return Err(Error::Conflict(format!(
                "Answer sheet {} is '{}', expected 'checking'",
                sheet_id, sheet.status
            )));
        }

        let published = sqlx::query_as::<_, PublishedWorksheet>(
            r#"SELECT * FROM published_worksheets WHERE id = $1"#,
        )
        .bind(sheet.published_worksheet_id)
        .fetch_one(&self.pool)
        .await?;

        let questions: Vec<Question> = serde_json::from_value(published.questions.clone())
            .map_err(|e| Error::Internal(format!("Corrupt published question tree: {}", e)))?;
        let mut answers: Vec<Answer> = serde_json::from_value(sheet.answers.clone())
            .map_err(|e| Error::Internal(format!("Corrupt answer tree: {}", e)))?;

        let leaf_count = {
            let question_leaves = flatten_question_leaves(&questions);
            let answer_leaves = flatten_answer_leaves(&answers);
            if question_leaves.len() != answer_leaves.len() {
                return Err(Error::Internal(format!(
                    "Answer sheet {} has {} answers for {} questions",
                    sheet_id,
                    answer_leaves.len(),
                    question_leaves.len()
                )));
            }
            question_leaves.len()
        };

        for idx in 0..leaf_count {
            let score = {
                let question_leaves = flatten_question_leaves(&questions);
                let answer_leaves = flatten_answer_leaves(&answers);
                let leaf = &question_leaves[idx];
                let answer = answer_leaves[idx];
                verify_leaf_alignment(leaf, answer)?;
                if answer.graded_at.is_some() {
                    tracing::debug!(label = %leaf.label, "Leaf already scored, skipping");
                    None
                } else {
                    Some(self.score_leaf(leaf, answer).await?)
                }
            };

            if let Some(score) = score {
                {
                    let mut answer_leaves = flatten_leaves_mut(&mut answers);
                    apply_leaf_score(answer_leaves[idx], score)?;
                }
                // Per-leaf commit: a crash mid-pass resumes from the next
                // ungraded leaf instead of re-scoring everything.
                let answers_json = serde_json::to_value(&answers)?;
                sqlx::query(
                    r#"UPDATE answer_sheets SET answers = $1, updated_at = NOW() WHERE id = $2"#,
                )
                .bind(answers_json)
                .bind(sheet_id)
                .execute(&self.pool)
                .await?;
            }
        }

        let total = total_awarded(&answers);
        sqlx::query(
            r#"UPDATE answer_sheets
               SET total_marks = $1, status = 'returned', updated_at = NOW()
               WHERE id = $2 AND status = 'checking'"#,
        )
        .bind(total)
        .bind(sheet_id)
        .execute(&self.pool)
        .await?;

        tracing::info!(
            sheet_id = %sheet_id,
            total = %total,
            max = published.total_marks,
            "Answer sheet graded"
        );

        // Fire-and-forget: a failed enqueue must never roll grading back.
        let notif = NotificationService::new(self.pool.clone());
        if let Err(e) = notif
            .enqueue_graded_email(&sheet, &published.title, total, published.total_marks)
            .await
        {
            tracing::error!(sheet_id = %sheet_id, error = %e, "Failed to queue graded email");
        }

        Ok(())
    }

    async fn score_leaf(&self, leaf: &LeafQuestion<'_>, answer: &Answer) -> Result<LeafScore> {
        match (&leaf.question.kind, &answer.kind) {
            (QuestionKind::MultipleChoice(q), AnswerKind::MultipleChoice(a)) => {
                let marks = scoring::score_multiple_choice(q, a.selected);
                let feedback = if marks.is_zero() {
                    q.explanation.clone()
                } else {
                    None
                };
                Ok(LeafScore::MultipleChoice { marks, feedback })
            }
            (QuestionKind::ShortAnswer(q), AnswerKind::ShortAnswer(a))
            | (QuestionKind::OpenEnded(q), AnswerKind::OpenEnded(a)) => {
                let (system, user) = scoring::build_open_ended_prompt(&leaf.label, q, &a.text);
                let mut last_err = None;
                for attempt in 1..=MAX_ORACLE_ATTEMPTS {
                    let outcome = match self.oracle.complete_text(&system, &user).await {
                        Ok(reply) => scoring::parse_open_ended_reply(&reply, q.marks),
                        Err(e) => Err(e),
                    };
                    match outcome {
                        Ok((marks, feedback)) => {
                            return Ok(LeafScore::OpenEnded {
                                marks: Decimal::from(marks),
                                feedback,
                            })
                        }
                        Err(e @ (Error::Oracle(_) | Error::Reqwest(_))) => {
                            tracing::warn!(
                                label = %leaf.label,
                                attempt,
                                error = %e,
                                "Oracle call failed, retrying"
                            );
                            last_err = Some(e);
                        }
                        Err(e) => return Err(e),
                    }
                }
                Err(last_err.unwrap_or_else(|| {
                    Error::Oracle("Open-ended scoring exhausted retries".to_string())
                }))
            }
            (QuestionKind::Essay(q), AnswerKind::Essay(a)) => {
                let template = rubric::resolve(&q.essay_type)?;
                let (system, user) =
                    scoring::build_essay_prompt(&leaf.label, q, template, &a.text)?;
                let mut last_err = None;
                for attempt in 1..=MAX_ORACLE_ATTEMPTS {
                    let outcome = match self.oracle.complete_json(&system, &user).await {
                        Ok(reply) => scoring::score_essay_reply(q, template, &reply),
                        Err(e) => Err(e),
                    };
                    match outcome {
                        Ok(evaluation) => return Ok(LeafScore::Essay(evaluation)),
                        Err(e @ (Error::Oracle(_) | Error::Reqwest(_))) => {
                            tracing::warn!(
                                label = %leaf.label,
                                attempt,
                                error = %e,
                                "Oracle call failed, retrying"
                            );
                            last_err = Some(e);
                        }
                        Err(e) => return Err(e),
                    }
                }
                Err(last_err
                    .unwrap_or_else(|| Error::Oracle("Essay scoring exhausted retries".to_string())))
            }
            _ => Err(Error::Internal(format!(
                "Question {} and its answer disagree on variant",
                leaf.label
            ))),
        }
    }
}

/// The answer's back-reference must point at the question occupying the
/// same traversal position; anything else means the sheet is structurally
/// corrupt and grading must not continue.
pub(crate) fn verify_leaf_alignment(leaf: &LeafQuestion<'_>, answer: &Answer) -> Result<()> {
    if answer.question_id != leaf.question.id {
        return Err(Error::Internal(format!(
            "Answer at question {} references question {} instead of {}",
            leaf.label, answer.question_id, leaf.question.id
        )));
    }
    if answer.order != leaf.question.order {
        return Err(Error::Internal(format!(
            "Answer at question {} has order {} but the question has {}",
            leaf.label, answer.order, leaf.question.order
        )));
    }
    Ok(())
}

pub(crate) fn apply_leaf_score(answer: &mut Answer, score: LeafScore) -> Result<()> {
    match (&mut answer.kind, score) {
        (AnswerKind::MultipleChoice(a), LeafScore::MultipleChoice { marks, feedback }) => {
            a.marks = marks;
            a.feedback = feedback;
        }
        (AnswerKind::ShortAnswer(a), LeafScore::OpenEnded { marks, feedback })
        | (AnswerKind::OpenEnded(a), LeafScore::OpenEnded { marks, feedback }) => {
            a.marks = marks;
            a.feedback = feedback;
        }
        (AnswerKind::Essay(a), LeafScore::Essay(evaluation)) => {
            a.criteria = evaluation.criteria;
            a.properties = evaluation.properties;
            a.marks = evaluation.marks;
            a.overall_impression = evaluation.overall_impression;
        }
        _ => {
            return Err(Error::Internal(
                "Leaf score does not match answer variant".to_string(),
            ))
        }
    }
    answer.graded_at = Some(Utc::now());
    Ok(())
}
