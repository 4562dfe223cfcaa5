use async_trait::async_trait;
use std::time::Duration;

use crate::{
    error::Result,
    types::{EnqueueRetry, RetryHandle, RetryId, RetryRecord},
};

/// Durable queue of backend deliveries awaiting another attempt.
///
/// The queue holds at most one pending record per `(case_id, backend)` and
/// owns no backoff policy: callers choose every delay.
#[async_trait]
pub trait RetryQueue: Send + Sync {
    /// Insert a pending record or merge into the existing one.
    async fn enqueue(&self, request: &EnqueueRetry) -> Result<RetryHandle>;

    /// Claim up to `limit` due records, earliest first. Claimed records are
    /// leased and invisible to other callers until the lease lapses.
    async fn fetch_ready(&self, limit: usize) -> Result<Vec<RetryRecord>>;

    /// Record a failed attempt and push the record out by at least `delay`.
    /// Returns the new attempt count.
    ///
    /// `claimed_generation` is the `generation` of the record as claimed.
    /// When set and an enqueue has merged a newer payload since, this call,
    /// `resolve` and `abandon` leave the record pending and return
    /// `NotFound`. `None` applies unconditionally.
    async fn schedule_retry(
        &self,
        retry_id: RetryId,
        claimed_generation: Option<i64>,
        delay: Duration,
        last_error: Option<&str>,
    ) -> Result<i32>;

    async fn resolve(
        &self,
        retry_id: RetryId,
        claimed_generation: Option<i64>,
    ) -> Result<()>;

    async fn abandon(
        &self,
        retry_id: RetryId,
        claimed_generation: Option<i64>,
        reason: &str,
    ) -> Result<()>;

    async fn get(&self, retry_id: RetryId) -> Result<Option<RetryRecord>>;

    async fn list_pending(&self, limit: usize) -> Result<Vec<RetryRecord>>;

    /// Same selection as `fetch_ready` without claiming anything.
    async fn peek_ready(&self, limit: usize) -> Result<Vec<RetryRecord>>;

    async fn pending_count(&self) -> Result<i64>;
}
