use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;
use validator::Validate;

use crate::models::answer_sheet::AnswerSheet;
use crate::models::worksheet::PublishedWorksheet;

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct StartAttemptPayload {
    #[validate(length(min = 1, max = 120))]
    pub student_name: String,
    #[validate(email)]
    pub student_email: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SaveAnswerPayload {
    pub question_id: Uuid,
    /// 1-based choice index for multiple choice questions.
    pub selected: Option<i32>,
    /// Free text for short answer, open-ended and essay questions.
    pub text: Option<String>,
}

/// The worksheet as students see it: marking material is stripped before
/// it leaves the server.
#[derive(Debug, Clone, Serialize)]
pub struct StudentWorksheetResponse {
    pub id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub questions: JsonValue,
    pub total_marks: i32,
}

impl From<PublishedWorksheet> for StudentWorksheetResponse {
    fn from(p: PublishedWorksheet) -> Self {
        let mut questions = p.questions;
        redact_marking_material(&mut questions);
        Self {
            id: p.id,
            title: p.title,
            description: p.description,
            questions,
            total_marks: p.total_marks,
        }
    }
}

/// Strips answer keys, marking schemes, sample answers and explanations
/// from a question tree, recursing through nested children.
fn redact_marking_material(value: &mut JsonValue) {
    match value {
        JsonValue::Array(items) => {
            for item in items {
                redact_marking_material(item);
            }
        }
        JsonValue::Object(map) => {
            map.remove("answer");
            map.remove("marking_scheme");
            map.remove("sample_answer");
            map.remove("explanation");
            if let Some(children) = map.get_mut("children") {
                redact_marking_material(children);
            }
        }
        _ => {}
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AnswerSheetResponse {
    pub id: Uuid,
    pub published_worksheet_id: Uuid,
    pub student_name: String,
    pub student_email: String,
    pub status: String,
    pub answers: JsonValue,
    pub total_marks: Option<Decimal>,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
}

impl From<AnswerSheet> for AnswerSheetResponse {
    fn from(s: AnswerSheet) -> Self {
        Self {
            id: s.id,
            published_worksheet_id: s.published_worksheet_id,
            student_name: s.student_name,
            student_email: s.student_email,
            status: s.status,
            answers: s.answers,
            total_marks: s.total_marks,
            start_time: s.start_time,
            end_time: s.end_time,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn redaction_strips_marking_material_recursively() {
        let mut tree = json!([
            {
                "question_type": "multiple_choice",
                "text": "pick",
                "choices": [{"index": 1, "text": "a"}],
                "answer": 1,
                "marks": 2,
                "explanation": "because"
            },
            {
                "question_type": "nested",
                "text": "parts",
                "children": [
                    {
                        "question_type": "short_answer",
                        "text": "inner",
                        "marks": 1,
                        "marking_scheme": ["the point"],
                        "sample_answer": "sample"
                    }
                ]
            }
        ]);
        redact_marking_material(&mut tree);
        assert!(tree[0].get("answer").is_none());
        assert!(tree[0].get("explanation").is_none());
        assert_eq!(tree[0]["marks"], 2);
        let inner = &tree[1]["children"][0];
        assert!(inner.get("marking_scheme").is_none());
        assert!(inner.get("sample_answer").is_none());
        assert_eq!(inner["text"], "inner");
    }
}
