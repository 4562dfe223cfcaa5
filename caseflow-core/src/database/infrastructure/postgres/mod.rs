//! PostgreSQL infrastructure adapters implementing the storage ports.

pub mod repositories;

pub use repositories::case_writer::PostgresCaseWriter;
pub use repositories::retry_queue::PostgresRetryQueue;
pub use repositories::run_tracker::PostgresRunTracker;
