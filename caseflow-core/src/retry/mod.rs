//! Replay of failed backend deliveries from the durable retry queue.

pub mod backoff;
pub mod delivery;
pub mod worker;

pub use backoff::Backoff;
pub use delivery::{BackendRegistry, DeliveryBackend, DeliveryError};
pub use worker::{RetryBatchSummary, RetryWorker, RetryWorkerConfig};
