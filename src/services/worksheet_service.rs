use crate::dto::authoring_dto::{
    CreateWorksheetPayload, InsertQuestionPayload, ReorderQuestionsPayload, UpdateWorksheetPayload,
};
use crate::error::{Error, Result};
use crate::models::answer_sheet::AnswerSheet;
use crate::models::question::{
    self, insert_at, remove_at, siblings_at_path, swap_orders, Question, QuestionKind,
    MAX_NESTING_DEPTH,
};
use crate::models::rubric;
use crate::models::worksheet::{PublishedWorksheet, Worksheet};
use crate::utils::join_code::generate_join_code;
use sqlx::PgPool;
use uuid::Uuid;

#[derive(Debug, serde::Serialize)]
pub struct PaginatedWorksheets {
    pub items: Vec<Worksheet>,
    pub total: i64,
    pub page: i64,
    pub per_page: i64,
}

#[derive(Clone)]
pub struct WorksheetService {
    pool: PgPool,
}

impl WorksheetService {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn create_worksheet(&self, payload: CreateWorksheetPayload) -> Result<Worksheet> {
        let worksheet = sqlx::query_as::<_, Worksheet>(
            r#"
            INSERT INTO worksheets (title, description, created_by, questions)
            VALUES ($1, $2, $3, '[]'::jsonb)
            RETURNING *
            "#,
        )
        .bind(payload.title)
        .bind(payload.description)
        .bind(payload.created_by)
        .fetch_one(&self.pool)
        .await?;
        Ok(worksheet)
    }

    pub async fn get_worksheet(&self, id: Uuid) -> Result<Worksheet> {
        let worksheet = sqlx::query_as::<_, Worksheet>(r#"SELECT * FROM worksheets WHERE id = $1"#)
            .bind(id)
            .fetch_one(&self.pool)
            .await?;
        Ok(worksheet)
    }

    pub async fn list_worksheets(&self, page: i64, per_page: i64) -> Result<PaginatedWorksheets> {
        let offset = (page - 1) * per_page;
        let items = sqlx::query_as::<_, Worksheet>(
            r#"SELECT * FROM worksheets ORDER BY created_at DESC LIMIT $1 OFFSET $2"#,
        )
        .bind(per_page)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;
        let total: i64 = sqlx::query_scalar(r#"SELECT COUNT(*) FROM worksheets"#)
            .fetch_one(&self.pool)
            .await?;
        Ok(PaginatedWorksheets {
            items,
            total,
            page,
            per_page,
        })
    }

    pub async fn update_worksheet(
        &self,
        id: Uuid,
        payload: UpdateWorksheetPayload,
    ) -> Result<Worksheet> {
        let worksheet = sqlx::query_as::<_, Worksheet>(
            r#"
            UPDATE worksheets
            SET title = COALESCE($1, title),
                description = COALESCE($2, description),
                updated_at = NOW()
            WHERE id = $3
            RETURNING *
            "#,
        )
        .bind(payload.title)
        .bind(payload.description)
        .bind(id)
        .fetch_one(&self.pool)
        .await?;
        Ok(worksheet)
    }

    pub async fn delete_worksheet(&self, id: Uuid) -> Result<()> {
        let result = sqlx::query(r#"DELETE FROM worksheets WHERE id = $1"#)
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(Error::NotFound(format!("Worksheet {} not found", id)));
        }
        Ok(())
    }

    /// Inserts a question at the payload's path and order, shifting later
    /// siblings. The combined depth of the path and the inserted subtree
    /// must stay within the three-level bound.
    pub async fn insert_question(
        &self,
        worksheet_id: Uuid,
        payload: InsertQuestionPayload,
    ) -> Result<Worksheet> {
        let worksheet = self.get_worksheet(worksheet_id).await?;
        let mut questions = decode_tree(&worksheet.questions)?;

        let question = build_question(payload.question);
        if payload.path.len() + question.subtree_depth() > MAX_NESTING_DEPTH {
            return Err(Error::BadRequest(format!(
                "Questions may be nested at most {} levels deep",
                MAX_NESTING_DEPTH
            )));
        }
        validate_question(&question)?;

        let siblings = siblings_at_path(&mut questions, &payload.path)?;
        insert_at(siblings, payload.order, question)?;

        self.store_tree(worksheet_id, &questions).await
    }

    /// Removes the question at the path/order, dropping its subtree and
    /// renumbering the remaining siblings.
    pub async fn remove_question(
        &self,
        worksheet_id: Uuid,
        path: &[i32],
        order: i32,
    ) -> Result<Worksheet> {
        let worksheet = self.get_worksheet(worksheet_id).await?;
        let mut questions = decode_tree(&worksheet.questions)?;

        let siblings = siblings_at_path(&mut questions, path)?;
        remove_at(siblings, order)?;

        self.store_tree(worksheet_id, &questions).await
    }

    pub async fn reorder_questions(
        &self,
        worksheet_id: Uuid,
        payload: ReorderQuestionsPayload,
    ) -> Result<Worksheet> {
        let worksheet = self.get_worksheet(worksheet_id).await?;
        let mut questions = decode_tree(&worksheet.questions)?;

        let siblings = siblings_at_path(&mut questions, &payload.path)?;
        swap_orders(siblings, payload.first_order, payload.second_order)?;

        self.store_tree(worksheet_id, &questions).await
    }

    /// Publishes an immutable snapshot of the worksheet under a fresh join
    /// code. Essay questions are checked against the rubric registry here
    /// so a bad essay type fails at publish time, not mid-grading.
    pub async fn publish(&self, worksheet_id: Uuid) -> Result<PublishedWorksheet> {
        let worksheet = self.get_worksheet(worksheet_id).await?;
        let questions = decode_tree(&worksheet.questions)?;
        if questions.is_empty() {
            return Err(Error::BadRequest(
                "Cannot publish a worksheet with no questions".to_string(),
            ));
        }
        for leaf in question::flatten_leaves(&questions) {
            validate_question(leaf.question)?;
        }

        let total_marks = question::total_marks(&questions);
        let join_code = generate_join_code();

        let published = sqlx::query_as::<_, PublishedWorksheet>(
            r#"
            INSERT INTO published_worksheets (worksheet_id, title, description, questions, join_code, total_marks)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING *
            "#,
        )
        .bind(worksheet.id)
        .bind(&worksheet.title)
        .bind(&worksheet.description)
        .bind(&worksheet.questions)
        .bind(&join_code)
        .bind(total_marks)
        .fetch_one(&self.pool)
        .await?;

        tracing::info!(
            worksheet_id = %worksheet_id,
            published_id = %published.id,
            join_code = %join_code,
            "Worksheet published"
        );
        Ok(published)
    }

    pub async fn get_published_by_id(&self, id: Uuid) -> Result<PublishedWorksheet> {
        let published = sqlx::query_as::<_, PublishedWorksheet>(
            r#"SELECT * FROM published_worksheets WHERE id = $1"#,
        )
        .bind(id)
        .fetch_one(&self.pool)
        .await?;
        Ok(published)
    }

    pub async fn get_published_by_code(&self, join_code: &str) -> Result<PublishedWorksheet> {
        let published = sqlx::query_as::<_, PublishedWorksheet>(
            r#"SELECT * FROM published_worksheets WHERE join_code = $1"#,
        )
        .bind(join_code)
        .fetch_one(&self.pool)
        .await?;
        Ok(published)
    }

    pub async fn list_answer_sheets(&self, published_id: Uuid) -> Result<Vec<AnswerSheet>> {
        let sheets = sqlx::query_as::<_, AnswerSheet>(
            r#"SELECT * FROM answer_sheets WHERE published_worksheet_id = $1 ORDER BY created_at ASC"#,
        )
        .bind(published_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(sheets)
    }

    async fn store_tree(&self, worksheet_id: Uuid, questions: &[Question]) -> Result<Worksheet> {
        debug_assert!(question::order_invariant_holds(questions));
        let questions_json = serde_json::to_value(questions)?;
        let worksheet = sqlx::query_as::<_, Worksheet>(
            r#"UPDATE worksheets SET questions = $1, updated_at = NOW() WHERE id = $2 RETURNING *"#,
        )
        .bind(questions_json)
        .bind(worksheet_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(worksheet)
    }
}

pub fn decode_tree(raw: &serde_json::Value) -> Result<Vec<Question>> {
    serde_json::from_value(raw.clone())
        .map_err(|e| Error::Internal(format!("Corrupt question tree: {}", e)))
}

/// Assigns fresh ids to an incoming question and any nested children, and
/// renumbers provided children into a contiguous order.
fn build_question(kind: QuestionKind) -> Question {
    let mut q = Question::new(kind);
    if let QuestionKind::Nested(nested) = &mut q.kind {
        let children = std::mem::take(&mut nested.children);
        nested.children = children
            .into_iter()
            .enumerate()
            .map(|(idx, child)| {
                let mut child = build_question(child.kind);
                child.order = idx as i32 + 1;
                child
            })
            .collect();
    }
    q
}

/// Per-variant sanity checks, applied on insert and again at publish.
fn validate_question(question: &Question) -> Result<()> {
    match &question.kind {
        QuestionKind::MultipleChoice(q) => {
            if q.marks < 1 {
                return Err(Error::BadRequest(
                    "Multiple choice questions must carry at least 1 mark".to_string(),
                ));
            }
            if q.answer < 0 || q.answer as usize > q.choices.len() {
                return Err(Error::BadRequest(format!(
                    "Correct answer index {} outside choices 1..={}",
                    q.answer,
                    q.choices.len()
                )));
            }
        }
        QuestionKind::ShortAnswer(q) | QuestionKind::OpenEnded(q) => {
            if q.marks < 1 {
                return Err(Error::BadRequest(
                    "Open-ended questions must carry at least 1 mark".to_string(),
                ));
            }
        }
        QuestionKind::Essay(q) => {
            let template = rubric::resolve(&q.essay_type)?;
            for criterion in &q.criteria {
                if criterion.marks < 0 {
                    return Err(Error::BadRequest(format!(
                        "Criterion '{}' has negative marks",
                        criterion.name
                    )));
                }
                if template.criterion(&criterion.name).is_none() {
                    return Err(Error::BadRequest(format!(
                        "Criterion '{}' is not defined by rubric '{}'",
                        criterion.name, q.essay_type
                    )));
                }
            }
        }
        QuestionKind::Nested(q) => {
            for child in &q.children {
                validate_question(child)?;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::question::{Choice, EssayCriterion, EssayQuestion, MultipleChoiceQuestion};

    #[test]
    fn build_question_assigns_ids_and_child_orders() {
        let kind: QuestionKind = serde_json::from_value(serde_json::json!({
            "question_type": "nested",
            "text": "parts",
            "children": [
                {"id": "00000000-0000-0000-0000-000000000000", "order": 0,
                 "question_type": "short_answer", "text": "a", "marks": 2,
                 "marking_scheme": ["p"], "sample_answer": null, "explanation": null},
                {"id": "00000000-0000-0000-0000-000000000000", "order": 0,
                 "question_type": "short_answer", "text": "b", "marks": 1,
                 "marking_scheme": ["p"], "sample_answer": null, "explanation": null}
            ]
        }))
        .unwrap();
        let q = build_question(kind);
        if let QuestionKind::Nested(nested) = &q.kind {
            assert_eq!(nested.children[0].order, 1);
            assert_eq!(nested.children[1].order, 2);
            assert_ne!(nested.children[0].id, nested.children[1].id);
            assert_ne!(nested.children[0].id, Uuid::nil());
        } else {
            panic!("expected nested");
        }
    }

    #[test]
    fn validation_rejects_unregistered_essay_criterion() {
        let q = Question::new(QuestionKind::Essay(EssayQuestion {
            text: "essay".into(),
            essay_type: "uk_igcse_english_narrative".parse().unwrap(),
            criteria: vec![EssayCriterion {
                name: "Handwriting".into(),
                description: String::new(),
                marks: 5,
            }],
        }));
        assert!(validate_question(&q).is_err());
    }

    #[test]
    fn validation_rejects_mcq_answer_outside_choices() {
        let q = Question::new(QuestionKind::MultipleChoice(MultipleChoiceQuestion {
            text: "pick".into(),
            choices: vec![Choice {
                index: 1,
                text: "only".into(),
            }],
            answer: 4,
            marks: 1,
            explanation: None,
        }));
        assert!(validate_question(&q).is_err());
    }
}
