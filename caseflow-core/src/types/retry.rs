use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::{fmt, str::FromStr, time::Duration};

use super::ids::RetryId;
use crate::error::IngestError;

/// Lifecycle of a retry record. Only `Pending` records are ever claimed.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryState {
    Pending,
    Resolved,
    Abandoned,
}

impl RetryState {
    pub fn as_str(self) -> &'static str {
        match self {
            RetryState::Pending => "pending",
            RetryState::Resolved => "resolved",
            RetryState::Abandoned => "abandoned",
        }
    }

    pub fn is_terminal(self) -> bool {
        !matches!(self, RetryState::Pending)
    }
}

impl fmt::Display for RetryState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RetryState {
    type Err = IngestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(RetryState::Pending),
            "resolved" => Ok(RetryState::Resolved),
            "abandoned" => Ok(RetryState::Abandoned),
            other => Err(IngestError::Internal(format!(
                "unknown retry state '{other}'"
            ))),
        }
    }
}

/// Durable record of a backend delivery that still owes an attempt.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetryRecord {
    pub retry_id: RetryId,
    /// Creation order, used to break ties between equally due records.
    pub seq: i64,
    pub case_id: String,
    pub backend: String,
    pub payload: Value,
    pub attempt_count: i32,
    pub next_attempt_at: DateTime<Utc>,
    pub state: RetryState,
    pub lease_expires_at: Option<DateTime<Utc>>,
    /// Payload generation; each merging enqueue increments it.
    pub generation: i64,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

/// Request to queue (or refresh) a failed delivery.
#[derive(Clone, Debug)]
pub struct EnqueueRetry {
    pub case_id: String,
    pub backend: String,
    pub payload: Value,
    /// Earliest time after now at which the record becomes due.
    pub initial_delay: Duration,
}

impl EnqueueRetry {
    pub fn new(
        case_id: impl Into<String>,
        backend: impl Into<String>,
        payload: Value,
    ) -> Self {
        Self {
            case_id: case_id.into(),
            backend: backend.into(),
            payload,
            initial_delay: Duration::ZERO,
        }
    }

    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }
}

/// Outcome of an enqueue: the pending record's id and whether an existing
/// pending record absorbed the request.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct RetryHandle {
    pub retry_id: RetryId,
    pub merged: bool,
}
