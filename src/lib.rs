pub mod assemble;
pub mod billing;
pub mod db;
pub mod engine;
pub mod ipc;
pub mod placeholder;
pub mod section;
pub mod session;
pub mod state;
