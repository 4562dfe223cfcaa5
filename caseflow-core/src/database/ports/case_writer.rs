use async_trait::async_trait;

use crate::{
    error::Result,
    types::{CaseBundle, RunId, WriterResult},
};

#[async_trait]
pub trait CaseWriter: Send + Sync {
    /// Persist a bundle in one transaction, upserting every row by its
    /// natural key. Writing the same bundle twice returns the same ids.
    async fn write_case(
        &self,
        bundle: &CaseBundle,
        ingestion_run_id: Option<RunId>,
    ) -> Result<WriterResult>;
}
