use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;
use validator::Validate;

use crate::models::question::QuestionKind;
use crate::models::worksheet::{PublishedWorksheet, Worksheet};
use crate::services::worksheet_service::PaginatedWorksheets;

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CreateWorksheetPayload {
    #[validate(length(min = 1, max = 200))]
    pub title: String,
    pub description: Option<String>,
    pub created_by: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct UpdateWorksheetPayload {
    #[validate(length(min = 1, max = 200))]
    pub title: Option<String>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InsertQuestionPayload {
    /// Sibling orders leading into nested questions; empty for the root.
    #[serde(default)]
    pub path: Vec<i32>,
    pub order: i32,
    pub question: QuestionKind,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RemoveQuestionQuery {
    /// Comma-separated sibling orders, e.g. "2,1"; absent for the root.
    pub path: Option<String>,
}

impl RemoveQuestionQuery {
    pub fn parse_path(&self) -> Result<Vec<i32>, crate::error::Error> {
        let Some(raw) = self.path.as_deref().filter(|s| !s.is_empty()) else {
            return Ok(Vec::new());
        };
        raw.split(',')
            .map(|part| {
                part.trim().parse::<i32>().map_err(|_| {
                    crate::error::Error::BadRequest(format!(
                        "Invalid question path segment '{}'",
                        part
                    ))
                })
            })
            .collect()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReorderQuestionsPayload {
    #[serde(default)]
    pub path: Vec<i32>,
    pub first_order: i32,
    pub second_order: i32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WorksheetListQuery {
    pub page: Option<i64>,
    pub per_page: Option<i64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct WorksheetResponse {
    pub id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub created_by: Option<String>,
    pub questions: JsonValue,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl From<Worksheet> for WorksheetResponse {
    fn from(w: Worksheet) -> Self {
        Self {
            id: w.id,
            title: w.title,
            description: w.description,
            created_by: w.created_by,
            questions: w.questions,
            created_at: w.created_at,
            updated_at: w.updated_at,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct WorksheetListResponse {
    pub items: Vec<WorksheetResponse>,
    pub total: i64,
    pub page: i64,
    pub per_page: i64,
}

impl From<PaginatedWorksheets> for WorksheetListResponse {
    fn from(list: PaginatedWorksheets) -> Self {
        Self {
            items: list.items.into_iter().map(WorksheetResponse::from).collect(),
            total: list.total,
            page: list.page,
            per_page: list.per_page,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PublishedWorksheetResponse {
    pub id: Uuid,
    pub worksheet_id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub questions: JsonValue,
    pub join_code: String,
    pub total_marks: i32,
    pub published_at: Option<DateTime<Utc>>,
}

impl From<PublishedWorksheet> for PublishedWorksheetResponse {
    fn from(p: PublishedWorksheet) -> Self {
        Self {
            id: p.id,
            worksheet_id: p.worksheet_id,
            title: p.title,
            description: p.description,
            questions: p.questions,
            join_code: p.join_code,
            total_marks: p.total_marks,
            published_at: p.published_at,
        }
    }
}
