use async_trait::async_trait;

use crate::{
    error::Result,
    types::{NewRun, RunId, RunOutcome, RunRecord, WriterResult},
};

#[async_trait]
pub trait RunTracker: Send + Sync {
    async fn start_run(&self, run: &NewRun) -> Result<RunId>;

    /// Add one written case to the run's counters.
    async fn record_case(
        &self,
        run_id: RunId,
        result: &WriterResult,
    ) -> Result<()>;

    async fn complete_run(
        &self,
        run_id: RunId,
        outcome: &RunOutcome,
    ) -> Result<()>;

    async fn record_backend_write(
        &self,
        run_id: RunId,
        backend: &str,
    ) -> Result<()>;

    async fn record_retry_scheduled(&self, run_id: RunId) -> Result<()>;

    async fn get_run(&self, run_id: RunId) -> Result<Option<RunRecord>>;

    /// Most recent runs first.
    async fn list_runs(
        &self,
        limit: usize,
        dataset: Option<&str>,
    ) -> Result<Vec<RunRecord>>;

    async fn latest_run(&self, dataset: Option<&str>)
    -> Result<Option<RunRecord>>;
}
