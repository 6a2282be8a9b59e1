pub mod authoring_dto;
pub mod student_dto;
