pub mod attendance;
pub mod audit;
pub mod backup_exchange;
pub mod classes;
pub mod core;
pub mod enrollments;
pub mod evaluations;
pub mod grades;
pub mod holidays;
pub mod sessions;
pub mod students;
