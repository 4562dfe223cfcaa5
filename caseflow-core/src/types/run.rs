use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, fmt, str::FromStr};

use super::ids::RunId;
use crate::error::IngestError;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Succeeded,
    Failed,
}

impl RunStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            RunStatus::Running => "running",
            RunStatus::Succeeded => "succeeded",
            RunStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(self) -> bool {
        !matches!(self, RunStatus::Running)
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RunStatus {
    type Err = IngestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "running" => Ok(RunStatus::Running),
            "succeeded" => Ok(RunStatus::Succeeded),
            "failed" => Ok(RunStatus::Failed),
            other => Err(IngestError::validation(format!(
                "unknown run status '{other}'"
            ))),
        }
    }
}

/// How a run ends. There is no way to "complete" back into `Running`.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum RunOutcome {
    Succeeded,
    Failed { error: String },
}

impl RunOutcome {
    pub fn failed(error: impl Into<String>) -> Self {
        RunOutcome::Failed {
            error: error.into(),
        }
    }

    pub fn status(&self) -> RunStatus {
        match self {
            RunOutcome::Succeeded => RunStatus::Succeeded,
            RunOutcome::Failed { .. } => RunStatus::Failed,
        }
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            RunOutcome::Succeeded => None,
            RunOutcome::Failed { error } => Some(error),
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct NewRun {
    pub dataset: String,
    pub source_bundle: Option<String>,
    pub vector_enabled: bool,
}

impl NewRun {
    pub fn new(dataset: impl Into<String>) -> Self {
        Self {
            dataset: dataset.into(),
            ..Self::default()
        }
    }
}

/// Aggregate metrics for one ingestion batch.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RunRecord {
    pub run_id: RunId,
    pub dataset: String,
    pub source_bundle: Option<String>,
    pub vector_enabled: bool,
    pub status: RunStatus,
    pub case_count: i64,
    pub document_count: i64,
    pub entity_count: i64,
    pub indicator_count: i64,
    pub sql_writes: i64,
    pub retry_count: i64,
    /// Successful deliveries per backend name.
    pub backend_writes: BTreeMap<String, i64>,
    pub last_error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl RunRecord {
    pub fn backend_write_count(&self, backend: &str) -> i64 {
        self.backend_writes.get(backend).copied().unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outcome_maps_to_terminal_status() {
        assert_eq!(RunOutcome::Succeeded.status(), RunStatus::Succeeded);
        let failed = RunOutcome::failed("vector store offline");
        assert_eq!(failed.status(), RunStatus::Failed);
        assert_eq!(failed.error(), Some("vector store offline"));
        assert!(failed.status().is_terminal());
    }

    #[test]
    fn status_parses_case_insensitively() {
        assert_eq!(
            " Succeeded ".parse::<RunStatus>().unwrap(),
            RunStatus::Succeeded
        );
        assert!("completed".parse::<RunStatus>().is_err());
    }
}
