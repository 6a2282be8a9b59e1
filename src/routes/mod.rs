pub mod health;
pub mod student;
pub mod worksheet;
