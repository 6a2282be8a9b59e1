pub mod grading_queue;
pub mod grading_service;
pub mod notification_service;
pub mod oracle_service;
pub mod scoring;
pub mod sheet_service;
pub mod worksheet_service;
