use serde::Serialize;
use std::{fmt, sync::Arc, time::Duration};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::{
    backoff::Backoff,
    delivery::{BackendRegistry, DeliveryError},
};
use crate::{
    database::ports::retry_queue::RetryQueue,
    error::{IngestError, Result},
    types::RetryRecord,
};

#[derive(Clone, Debug)]
pub struct RetryWorkerConfig {
    /// Maximum records claimed per pass.
    pub batch_limit: usize,
    pub poll_interval: Duration,
    /// Attempts after which a record is abandoned. `0` abandons on the first
    /// transient failure.
    pub max_attempts: u32,
    pub backoff: Backoff,
    /// Log what would be replayed without claiming anything.
    pub dry_run: bool,
}

impl Default for RetryWorkerConfig {
    fn default() -> Self {
        Self {
            batch_limit: 25,
            poll_interval: Duration::from_secs(30),
            max_attempts: 3,
            backoff: Backoff::default(),
            dry_run: false,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct RetryBatchSummary {
    pub claimed: usize,
    pub delivered: usize,
    pub rescheduled: usize,
    pub abandoned: usize,
    /// Records finished by someone else while this pass held them.
    pub skipped: usize,
    /// Records a dry run would have replayed.
    pub previewed: usize,
}

enum Disposition {
    Delivered,
    Rescheduled,
    Abandoned,
}

pub struct RetryWorker {
    queue: Arc<dyn RetryQueue>,
    backends: BackendRegistry,
    config: RetryWorkerConfig,
}

impl fmt::Debug for RetryWorker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryWorker")
            .field("backends", &self.backends)
            .field("config", &self.config)
            .finish()
    }
}

impl RetryWorker {
    pub fn new(
        queue: Arc<dyn RetryQueue>,
        backends: BackendRegistry,
        config: RetryWorkerConfig,
    ) -> Self {
        Self {
            queue,
            backends,
            config,
        }
    }

    /// One claim-and-replay pass over the due records.
    pub async fn run_once(&self) -> Result<RetryBatchSummary> {
        let mut summary = RetryBatchSummary::default();

        if self.config.dry_run {
            let ready = self.queue.peek_ready(self.config.batch_limit).await?;
            for record in &ready {
                info!(
                    retry_id = %record.retry_id,
                    backend = %record.backend,
                    case_id = %record.case_id,
                    attempts = record.attempt_count,
                    "dry run: would replay retry"
                );
            }
            summary.previewed = ready.len();
            return Ok(summary);
        }

        let claimed = self.queue.fetch_ready(self.config.batch_limit).await?;
        summary.claimed = claimed.len();

        for record in &claimed {
            match self.process(record).await {
                Ok(Disposition::Delivered) => summary.delivered += 1,
                Ok(Disposition::Rescheduled) => summary.rescheduled += 1,
                Ok(Disposition::Abandoned) => summary.abandoned += 1,
                Err(IngestError::NotFound(_)) => {
                    warn!(
                        retry_id = %record.retry_id,
                        "retry finished elsewhere while claimed"
                    );
                    summary.skipped += 1;
                }
                Err(err) => return Err(err),
            }
        }

        if summary.claimed > 0 {
            info!(
                claimed = summary.claimed,
                delivered = summary.delivered,
                rescheduled = summary.rescheduled,
                abandoned = summary.abandoned,
                skipped = summary.skipped,
                "retry batch processed"
            );
        }
        Ok(summary)
    }

    /// Poll until `shutdown` fires. Storage errors end the loop.
    pub async fn run(&self, shutdown: CancellationToken) -> Result<()> {
        info!(
            batch_limit = self.config.batch_limit,
            poll_interval_ms = self.config.poll_interval.as_millis() as u64,
            backends = ?self.backends.names(),
            "retry worker started"
        );

        loop {
            if shutdown.is_cancelled() {
                break;
            }

            let summary = match self.run_once().await {
                Ok(summary) => summary,
                Err(err) => {
                    error!(error = %err, "retry worker pass failed");
                    return Err(err);
                }
            };

            // A full batch means more may be due right now.
            let drained = self.config.batch_limit == 0
                || summary.claimed < self.config.batch_limit;
            if !drained && !self.config.dry_run {
                continue;
            }

            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(self.config.poll_interval) => {}
            }
        }

        info!("retry worker shutting down");
        Ok(())
    }

    async fn process(&self, record: &RetryRecord) -> Result<Disposition> {
        let Some(backend) = self.backends.get(&record.backend) else {
            let reason = format!(
                "no delivery backend registered for '{}'",
                record.backend
            );
            self.queue
                .abandon(record.retry_id, Some(record.generation), &reason)
                .await?;
            return Ok(Disposition::Abandoned);
        };

        match backend.deliver(record).await {
            Ok(()) => {
                self.queue
                    .resolve(record.retry_id, Some(record.generation))
                    .await?;
                debug!(
                    retry_id = %record.retry_id,
                    backend = %record.backend,
                    "retry delivered"
                );
                Ok(Disposition::Delivered)
            }
            Err(DeliveryError::Malformed(message)) => {
                let reason = format!("malformed payload: {message}");
                self.queue
                    .abandon(record.retry_id, Some(record.generation), &reason)
                    .await?;
                Ok(Disposition::Abandoned)
            }
            Err(DeliveryError::Transient(message)) => {
                self.reschedule(record, &message).await
            }
        }
    }

    async fn reschedule(
        &self,
        record: &RetryRecord,
        message: &str,
    ) -> Result<Disposition> {
        let max_attempts = self.config.max_attempts;
        if max_attempts == 0 {
            let reason = format!("retries disabled: {message}");
            self.queue
                .abandon(record.retry_id, Some(record.generation), &reason)
                .await?;
            return Ok(Disposition::Abandoned);
        }

        let next_attempt = u32::try_from(record.attempt_count)
            .unwrap_or(0)
            .saturating_add(1);
        let delay = self.config.backoff.delay_for(next_attempt);
        let attempts = self
            .queue
            .schedule_retry(
                record.retry_id,
                Some(record.generation),
                delay,
                Some(message),
            )
            .await?;

        if u32::try_from(attempts).unwrap_or(u32::MAX) >= max_attempts {
            let reason =
                format!("gave up after {attempts} attempt(s): {message}");
            self.queue
                .abandon(record.retry_id, Some(record.generation), &reason)
                .await?;
            return Ok(Disposition::Abandoned);
        }

        info!(
            retry_id = %record.retry_id,
            backend = %record.backend,
            case_id = %record.case_id,
            attempts,
            max_attempts,
            delay_ms = delay.as_millis() as u64,
            "retry rescheduled after transient failure"
        );
        Ok(Disposition::Rescheduled)
    }
}
