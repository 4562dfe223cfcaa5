//! Post-run assertions used as a smoke-test gate after an ingestion batch.

use serde::Serialize;
use std::{collections::BTreeMap, fmt};

use crate::types::{RunRecord, RunStatus};

/// Operator expectations for a finished run. `None` fields are not checked.
#[derive(Clone, Debug, Default)]
pub struct RunExpectations {
    pub status: Option<RunStatus>,
    pub case_count: Option<i64>,
    pub min_case_count: Option<i64>,
    pub sql_writes: Option<i64>,
    pub max_retry_count: Option<i64>,
    pub require_vector_enabled: bool,
    /// Exact delivery counts per backend name.
    pub backend_writes: BTreeMap<String, i64>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ExpectationMismatch {
    pub field: String,
    pub expected: String,
    pub actual: String,
}

impl ExpectationMismatch {
    fn new(
        field: impl Into<String>,
        expected: impl fmt::Display,
        actual: impl fmt::Display,
    ) -> Self {
        Self {
            field: field.into(),
            expected: expected.to_string(),
            actual: actual.to_string(),
        }
    }
}

impl fmt::Display for ExpectationMismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} expected={} actual={}",
            self.field, self.expected, self.actual
        )
    }
}

impl RunExpectations {
    /// Every violated expectation; empty when the run passes.
    pub fn check(&self, run: &RunRecord) -> Vec<ExpectationMismatch> {
        let mut mismatches = Vec::new();

        if let Some(status) = self.status
            && run.status != status
        {
            mismatches.push(ExpectationMismatch::new(
                "status", status, run.status,
            ));
        }
        if let Some(expected) = self.case_count
            && run.case_count != expected
        {
            mismatches.push(ExpectationMismatch::new(
                "case_count",
                expected,
                run.case_count,
            ));
        }
        if let Some(minimum) = self.min_case_count
            && run.case_count < minimum
        {
            mismatches.push(ExpectationMismatch::new(
                "case_count",
                format!(">= {minimum}"),
                run.case_count,
            ));
        }
        if let Some(expected) = self.sql_writes
            && run.sql_writes != expected
        {
            mismatches.push(ExpectationMismatch::new(
                "sql_writes",
                expected,
                run.sql_writes,
            ));
        }
        if let Some(maximum) = self.max_retry_count
            && run.retry_count > maximum
        {
            mismatches.push(ExpectationMismatch::new(
                "retry_count",
                format!("<= {maximum}"),
                run.retry_count,
            ));
        }
        if self.require_vector_enabled && !run.vector_enabled {
            mismatches.push(ExpectationMismatch::new(
                "vector_enabled",
                true,
                false,
            ));
        }
        for (backend, expected) in &self.backend_writes {
            let actual = run.backend_write_count(backend);
            if actual != *expected {
                mismatches.push(ExpectationMismatch::new(
                    format!("backend_writes.{backend}"),
                    expected,
                    actual,
                ));
            }
        }

        mismatches
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::RunId;
    use chrono::Utc;

    fn finished_run() -> RunRecord {
        let now = Utc::now();
        RunRecord {
            run_id: RunId::new(),
            dataset: "account_list".into(),
            source_bundle: None,
            vector_enabled: false,
            status: RunStatus::Succeeded,
            case_count: 4,
            document_count: 6,
            entity_count: 9,
            indicator_count: 2,
            sql_writes: 4,
            retry_count: 1,
            backend_writes: BTreeMap::from([("index".to_string(), 4)]),
            last_error: None,
            started_at: now,
            completed_at: Some(now),
            updated_at: now,
        }
    }

    #[test]
    fn matching_run_passes() {
        let expectations = RunExpectations {
            status: Some(RunStatus::Succeeded),
            case_count: Some(4),
            min_case_count: Some(1),
            sql_writes: Some(4),
            max_retry_count: Some(1),
            backend_writes: BTreeMap::from([("index".to_string(), 4)]),
            ..RunExpectations::default()
        };
        assert!(expectations.check(&finished_run()).is_empty());
    }

    #[test]
    fn every_violation_is_reported() {
        let expectations = RunExpectations {
            status: Some(RunStatus::Failed),
            min_case_count: Some(10),
            max_retry_count: Some(0),
            require_vector_enabled: true,
            backend_writes: BTreeMap::from([("vector".to_string(), 4)]),
            ..RunExpectations::default()
        };
        let mismatches = expectations.check(&finished_run());
        let fields: Vec<&str> =
            mismatches.iter().map(|m| m.field.as_str()).collect();
        assert_eq!(
            fields,
            vec![
                "status",
                "case_count",
                "retry_count",
                "vector_enabled",
                "backend_writes.vector"
            ]
        );
        assert_eq!(
            mismatches[0].to_string(),
            "status expected=failed actual=succeeded"
        );
    }
}
