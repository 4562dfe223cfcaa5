//! Storage ports. Callers depend on these traits; the Postgres adapters
//! under `database::infrastructure::postgres` implement them.

pub mod case_writer;
pub mod retry_queue;
pub mod run_tracker;

pub use case_writer::CaseWriter;
pub use retry_queue::RetryQueue;
pub use run_tracker::RunTracker;
