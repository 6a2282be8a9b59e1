use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use sqlx::FromRow;
use uuid::Uuid;

/// Lifecycle of an answer sheet. Transitions only ever move forward:
/// answering -> checking -> returned, with checking_failed as an explicit
/// terminal state instead of a sheet stuck in checking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SheetStatus {
    Answering,
    Checking,
    Returned,
    CheckingFailed,
}

impl SheetStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SheetStatus::Answering => "answering",
            SheetStatus::Checking => "checking",
            SheetStatus::Returned => "returned",
            SheetStatus::CheckingFailed => "checking_failed",
        }
    }
}

impl std::str::FromStr for SheetStatus {
    type Err = crate::error::Error;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw {
            "answering" => Ok(SheetStatus::Answering),
            "checking" => Ok(SheetStatus::Checking),
            "returned" => Ok(SheetStatus::Returned),
            "checking_failed" => Ok(SheetStatus::CheckingFailed),
            other => Err(crate::error::Error::Internal(format!(
                "Unknown answer sheet status '{}'",
                other
            ))),
        }
    }
}

impl std::fmt::Display for SheetStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One student's attempt at a published worksheet. `answers` holds the
/// `Vec<Answer>` tree as JSONB; only the grading pipeline mutates marks,
/// feedback, `total_marks` and `status`.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct AnswerSheet {
    pub id: Uuid,
    pub published_worksheet_id: Uuid,
    pub student_name: String,
    pub student_email: String,
    pub status: String,
    pub answers: JsonValue,
    pub total_marks: Option<Decimal>,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl AnswerSheet {
    pub fn sheet_status(&self) -> crate::error::Result<SheetStatus> {
        self.status.parse()
    }
}
