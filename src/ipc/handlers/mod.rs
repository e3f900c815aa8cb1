pub mod classes;
pub mod core;
pub mod reports;
pub mod session;
pub mod students;
pub mod templates;
