use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use sqlx::FromRow;
use uuid::Uuid;

/// An authored, editable worksheet. The question tree lives in `questions`
/// as JSONB and decodes to `Vec<Question>`.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Worksheet {
    pub id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub created_by: Option<String>,
    pub questions: JsonValue,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

/// Immutable snapshot of a worksheet made available to students through a
/// join code. Only answer sheets reference it; the snapshot itself never
/// changes after publication.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct PublishedWorksheet {
    pub id: Uuid,
    pub worksheet_id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub questions: JsonValue,
    pub join_code: String,
    pub total_marks: i32,
    pub published_at: Option<DateTime<Utc>>,
}
