pub mod case;
pub mod ids;
pub mod retry;
pub mod run;

pub use case::{
    CaseBundle, CasePayload, EntityMentionPayload, EntityPayload,
    IndicatorPayload, IndicatorSourcePayload, SourceDocumentPayload,
    WriterResult,
};
pub use ids::{RetryId, RunId};
pub use retry::{EnqueueRetry, RetryHandle, RetryRecord, RetryState};
pub use run::{NewRun, RunOutcome, RunRecord, RunStatus};
