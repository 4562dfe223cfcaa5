use async_trait::async_trait;
use serde_json::Value;
use sqlx::{PgPool, Row, postgres::PgRow};
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

use crate::{
    database::ports::run_tracker::RunTracker,
    error::{IngestError, Result, storage},
    types::{
        NewRun, RunId, RunOutcome, RunRecord, RunStatus, WriterResult,
    },
};

const RUN_COLUMNS: &str = "run_id, dataset, source_bundle, vector_enabled, \
    status, case_count, document_count, entity_count, indicator_count, \
    sql_writes, retry_count, backend_writes, last_error, started_at, \
    completed_at, updated_at";

#[derive(Clone, Debug)]
pub struct PostgresRunTracker {
    pool: PgPool,
}

impl PostgresRunTracker {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Explain why an update guarded by `status = 'running'` touched nothing.
    async fn not_running(&self, run_id: RunId) -> IngestError {
        let status = sqlx::query_scalar::<_, String>(
            "SELECT status FROM ingestion_runs WHERE run_id = $1",
        )
        .bind(run_id.0)
        .fetch_optional(&self.pool)
        .await;

        match status {
            Ok(Some(status)) => IngestError::InvalidState(format!(
                "ingestion run {run_id} is already {status}"
            )),
            Ok(None) => {
                IngestError::NotFound(format!("ingestion run {run_id}"))
            }
            Err(source) => storage("load run status")(source),
        }
    }
}

#[async_trait]
impl RunTracker for PostgresRunTracker {
    async fn start_run(&self, run: &NewRun) -> Result<RunId> {
        if run.dataset.trim().is_empty() {
            return Err(IngestError::validation("run dataset is required"));
        }

        let run_id = RunId::new();
        sqlx::query(
            r#"
            INSERT INTO ingestion_runs (
                run_id, dataset, source_bundle, vector_enabled, status
            )
            VALUES ($1, $2, $3, $4, 'running')
            "#,
        )
        .bind(run_id.0)
        .bind(&run.dataset)
        .bind(&run.source_bundle)
        .bind(run.vector_enabled)
        .execute(&self.pool)
        .await
        .map_err(storage("start ingestion run"))?;

        info!(%run_id, dataset = %run.dataset, "ingestion run started");
        Ok(run_id)
    }

    async fn record_case(
        &self,
        run_id: RunId,
        result: &WriterResult,
    ) -> Result<()> {
        let updated = sqlx::query(
            r#"
            UPDATE ingestion_runs
            SET case_count = case_count + 1,
                document_count = document_count + $2,
                entity_count = entity_count + $3,
                indicator_count = indicator_count + $4,
                sql_writes = sql_writes + 1,
                updated_at = NOW()
            WHERE run_id = $1 AND status = 'running'
            "#,
        )
        .bind(run_id.0)
        .bind(count(result.document_ids.len()))
        .bind(count(result.entity_ids.len()))
        .bind(count(result.indicator_ids.len()))
        .execute(&self.pool)
        .await
        .map_err(storage("record case on run"))?;

        if updated.rows_affected() == 0 {
            return Err(self.not_running(run_id).await);
        }
        debug!(%run_id, case_id = %result.case_id, "run counters updated");
        Ok(())
    }

    async fn complete_run(
        &self,
        run_id: RunId,
        outcome: &RunOutcome,
    ) -> Result<()> {
        let status = outcome.status();
        let updated = sqlx::query(
            r#"
            UPDATE ingestion_runs
            SET status = $2,
                last_error = COALESCE($3, last_error),
                completed_at = NOW(),
                updated_at = NOW()
            WHERE run_id = $1 AND status = 'running'
            "#,
        )
        .bind(run_id.0)
        .bind(status.as_str())
        .bind(outcome.error())
        .execute(&self.pool)
        .await
        .map_err(storage("complete ingestion run"))?;

        if updated.rows_affected() == 0 {
            return Err(self.not_running(run_id).await);
        }

        match outcome {
            RunOutcome::Succeeded => {
                info!(%run_id, "ingestion run succeeded");
            }
            RunOutcome::Failed { error } => {
                warn!(%run_id, error = %error, "ingestion run failed");
            }
        }
        Ok(())
    }

    async fn record_backend_write(
        &self,
        run_id: RunId,
        backend: &str,
    ) -> Result<()> {
        if backend.trim().is_empty() {
            return Err(IngestError::validation("backend name is required"));
        }

        let updated = sqlx::query(
            r#"
            UPDATE ingestion_runs
            SET backend_writes = jsonb_set(
                    backend_writes,
                    ARRAY[$2::text],
                    to_jsonb(COALESCE((backend_writes ->> $2)::bigint, 0) + 1)
                ),
                updated_at = NOW()
            WHERE run_id = $1 AND status = 'running'
            "#,
        )
        .bind(run_id.0)
        .bind(backend)
        .execute(&self.pool)
        .await
        .map_err(storage("record backend write"))?;

        if updated.rows_affected() == 0 {
            return Err(self.not_running(run_id).await);
        }
        Ok(())
    }

    async fn record_retry_scheduled(&self, run_id: RunId) -> Result<()> {
        let updated = sqlx::query(
            r#"
            UPDATE ingestion_runs
            SET retry_count = retry_count + 1,
                updated_at = NOW()
            WHERE run_id = $1 AND status = 'running'
            "#,
        )
        .bind(run_id.0)
        .execute(&self.pool)
        .await
        .map_err(storage("record scheduled retry"))?;

        if updated.rows_affected() == 0 {
            return Err(self.not_running(run_id).await);
        }
        Ok(())
    }

    async fn get_run(&self, run_id: RunId) -> Result<Option<RunRecord>> {
        let sql =
            format!("SELECT {RUN_COLUMNS} FROM ingestion_runs WHERE run_id = $1");
        let row = sqlx::query(&sql)
            .bind(run_id.0)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage("load ingestion run"))?;
        row.as_ref().map(map_run_row).transpose()
    }

    async fn list_runs(
        &self,
        limit: usize,
        dataset: Option<&str>,
    ) -> Result<Vec<RunRecord>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let sql = format!(
            "SELECT {RUN_COLUMNS} FROM ingestion_runs \
             WHERE ($1::text IS NULL OR dataset = $1) \
             ORDER BY started_at DESC, run_id DESC \
             LIMIT $2"
        );
        let rows = sqlx::query(&sql)
            .bind(dataset)
            .bind(i64::try_from(limit).unwrap_or(i64::MAX))
            .fetch_all(&self.pool)
            .await
            .map_err(storage("list ingestion runs"))?;
        rows.iter().map(map_run_row).collect()
    }

    async fn latest_run(
        &self,
        dataset: Option<&str>,
    ) -> Result<Option<RunRecord>> {
        Ok(self.list_runs(1, dataset).await?.into_iter().next())
    }
}

fn map_run_row(row: &PgRow) -> Result<RunRecord> {
    let status: String =
        row.try_get("status").map_err(storage("decode run status"))?;
    let backend_writes: Value = row
        .try_get("backend_writes")
        .map_err(storage("decode backend writes"))?;

    Ok(RunRecord {
        run_id: RunId(row.try_get("run_id").map_err(storage("decode run id"))?),
        dataset: row
            .try_get("dataset")
            .map_err(storage("decode run dataset"))?,
        source_bundle: row
            .try_get("source_bundle")
            .map_err(storage("decode source bundle"))?,
        vector_enabled: row
            .try_get("vector_enabled")
            .map_err(storage("decode vector flag"))?,
        status: status.parse::<RunStatus>()?,
        case_count: row
            .try_get("case_count")
            .map_err(storage("decode case count"))?,
        document_count: row
            .try_get("document_count")
            .map_err(storage("decode document count"))?,
        entity_count: row
            .try_get("entity_count")
            .map_err(storage("decode entity count"))?,
        indicator_count: row
            .try_get("indicator_count")
            .map_err(storage("decode indicator count"))?,
        sql_writes: row
            .try_get("sql_writes")
            .map_err(storage("decode sql writes"))?,
        retry_count: row
            .try_get("retry_count")
            .map_err(storage("decode retry count"))?,
        backend_writes: serde_json::from_value::<BTreeMap<String, i64>>(
            backend_writes,
        )?,
        last_error: row
            .try_get("last_error")
            .map_err(storage("decode last error"))?,
        started_at: row
            .try_get("started_at")
            .map_err(storage("decode started_at"))?,
        completed_at: row
            .try_get("completed_at")
            .map_err(storage("decode completed_at"))?,
        updated_at: row
            .try_get("updated_at")
            .map_err(storage("decode updated_at"))?,
    })
}

fn count(len: usize) -> i64 {
    i64::try_from(len).unwrap_or(i64::MAX)
}
