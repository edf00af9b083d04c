pub mod attendance;
pub mod backup_exchange;
pub mod classes;
pub mod core;
pub mod reports;
pub mod school_years;
pub mod stats;
pub mod students;

mod common;
