//! PostgreSQL-backed store implementations.

pub mod case_writer;
pub mod retry_queue;
pub mod run_tracker;
