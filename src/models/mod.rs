pub mod answer;
pub mod answer_sheet;
pub mod email_log;
pub mod question;
pub mod rubric;
pub mod worksheet;
