use async_trait::async_trait;
use sqlx::{PgPool, Row, postgres::PgRow};
use std::{fmt, time::Duration};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    database::ports::retry_queue::RetryQueue,
    error::{IngestError, Result, storage},
    types::{EnqueueRetry, RetryHandle, RetryId, RetryRecord, RetryState},
};

const RETRY_COLUMNS: &str = "retry_id, seq, case_id, backend, payload, \
    attempt_count, next_attempt_at, state, lease_expires_at, generation, \
    last_error, created_at, updated_at, resolved_at";

/// Durable retry queue backed by the `ingestion_retries` table.
#[derive(Clone)]
pub struct PostgresRetryQueue {
    pool: PgPool,
    lease: Duration,
}

impl fmt::Debug for PostgresRetryQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PostgresRetryQueue")
            .field("pool_size", &self.pool.size())
            .field("idle_connections", &self.pool.num_idle())
            .field("lease", &self.lease)
            .finish()
    }
}

impl PostgresRetryQueue {
    pub const DEFAULT_LEASE: Duration = Duration::from_secs(60);

    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            lease: Self::DEFAULT_LEASE,
        }
    }

    /// How long a claim from `fetch_ready` hides a record from other pollers.
    pub fn with_lease(mut self, lease: Duration) -> Self {
        self.lease = lease;
        self
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Records in the given state, most recently touched first.
    pub async fn list_by_state(
        &self,
        state: RetryState,
        limit: usize,
    ) -> Result<Vec<RetryRecord>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let sql = format!(
            "SELECT {RETRY_COLUMNS} FROM ingestion_retries \
             WHERE state = $1 \
             ORDER BY updated_at DESC, seq DESC \
             LIMIT $2"
        );
        let rows = sqlx::query(&sql)
            .bind(state.as_str())
            .bind(sql_limit(limit))
            .fetch_all(&self.pool)
            .await
            .map_err(storage("list retries by state"))?;
        rows.iter().map(map_retry_row).collect()
    }

    async fn finish(
        &self,
        retry_id: RetryId,
        claimed_generation: Option<i64>,
        state: RetryState,
        reason: Option<&str>,
    ) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE ingestion_retries
            SET state = $2,
                resolved_at = NOW(),
                lease_expires_at = NULL,
                last_error = COALESCE($3, last_error),
                updated_at = NOW()
            WHERE retry_id = $1
              AND state = 'pending'
              AND ($4::bigint IS NULL OR generation = $4)
            "#,
        )
        .bind(retry_id.0)
        .bind(state.as_str())
        .bind(reason)
        .bind(claimed_generation)
        .execute(&self.pool)
        .await
        .map_err(storage("finish retry"))?;

        if result.rows_affected() == 0 {
            return Err(not_pending(retry_id, claimed_generation));
        }
        Ok(())
    }
}

#[async_trait]
impl RetryQueue for PostgresRetryQueue {
    async fn enqueue(&self, request: &EnqueueRetry) -> Result<RetryHandle> {
        if request.case_id.trim().is_empty() {
            return Err(IngestError::validation("retry case_id is required"));
        }
        if request.backend.trim().is_empty() {
            return Err(IngestError::validation("retry backend is required"));
        }

        // Racing first inserts converge on the partial unique index; the
        // loser takes the DO UPDATE branch. `xmax = 0` only for fresh rows.
        // A merge releases any lease and bumps the generation so that a
        // poller still holding the old payload cannot settle the new one.
        let row = sqlx::query(
            r#"
            INSERT INTO ingestion_retries (
                retry_id, case_id, backend, payload, next_attempt_at
            )
            VALUES (
                $1, $2, $3, $4,
                NOW() + ($5::bigint) * INTERVAL '1 millisecond'
            )
            ON CONFLICT (case_id, backend) WHERE state = 'pending'
            DO UPDATE SET
                payload = EXCLUDED.payload,
                next_attempt_at = GREATEST(
                    ingestion_retries.next_attempt_at,
                    EXCLUDED.next_attempt_at
                ),
                lease_expires_at = NULL,
                generation = ingestion_retries.generation + 1,
                updated_at = NOW()
            RETURNING retry_id, (xmax = 0) AS inserted
            "#,
        )
        .bind(RetryId::new().0)
        .bind(&request.case_id)
        .bind(&request.backend)
        .bind(&request.payload)
        .bind(duration_ms(request.initial_delay)?)
        .fetch_one(&self.pool)
        .await
        .map_err(storage("enqueue retry"))?;

        let retry_id = RetryId(
            row.try_get::<Uuid, _>("retry_id")
                .map_err(storage("decode retry id"))?,
        );
        let inserted: bool = row
            .try_get("inserted")
            .map_err(storage("decode retry insert flag"))?;

        if inserted {
            info!(
                %retry_id,
                case_id = %request.case_id,
                backend = %request.backend,
                "retry enqueued"
            );
        } else {
            debug!(
                %retry_id,
                case_id = %request.case_id,
                backend = %request.backend,
                "retry merged into pending record"
            );
        }

        Ok(RetryHandle {
            retry_id,
            merged: !inserted,
        })
    }

    async fn fetch_ready(&self, limit: usize) -> Result<Vec<RetryRecord>> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        // Selection, lock and lease stamp happen in one statement. Rows a
        // competing poller holds are skipped rather than waited on.
        let sql = format!(
            r#"
            WITH due AS (
                SELECT retry_id
                FROM ingestion_retries
                WHERE state = 'pending'
                  AND next_attempt_at <= NOW()
                  AND (lease_expires_at IS NULL OR lease_expires_at <= NOW())
                ORDER BY next_attempt_at, seq
                LIMIT $1
                FOR UPDATE SKIP LOCKED
            )
            UPDATE ingestion_retries AS r
            SET lease_expires_at =
                    NOW() + ($2::bigint) * INTERVAL '1 millisecond',
                updated_at = NOW()
            FROM due
            WHERE r.retry_id = due.retry_id
            RETURNING {}
            "#,
            qualified_columns("r")
        );

        let rows = sqlx::query(&sql)
            .bind(sql_limit(limit))
            .bind(duration_ms(self.lease)?)
            .fetch_all(&self.pool)
            .await
            .map_err(storage("claim ready retries"))?;

        let mut records = rows
            .iter()
            .map(map_retry_row)
            .collect::<Result<Vec<_>>>()?;
        // RETURNING carries no ordering guarantee.
        records.sort_by_key(|record| (record.next_attempt_at, record.seq));

        if !records.is_empty() {
            debug!(claimed = records.len(), "claimed ready retries");
        }
        Ok(records)
    }

    async fn schedule_retry(
        &self,
        retry_id: RetryId,
        claimed_generation: Option<i64>,
        delay: Duration,
        last_error: Option<&str>,
    ) -> Result<i32> {
        let row = sqlx::query(
            r#"
            UPDATE ingestion_retries
            SET attempt_count = attempt_count + 1,
                next_attempt_at = GREATEST(
                    next_attempt_at,
                    NOW() + ($2::bigint) * INTERVAL '1 millisecond'
                ),
                lease_expires_at = NULL,
                last_error = COALESCE($3, last_error),
                updated_at = NOW()
            WHERE retry_id = $1
              AND state = 'pending'
              AND ($4::bigint IS NULL OR generation = $4)
            RETURNING attempt_count
            "#,
        )
        .bind(retry_id.0)
        .bind(duration_ms(delay)?)
        .bind(last_error)
        .bind(claimed_generation)
        .fetch_optional(&self.pool)
        .await
        .map_err(storage("schedule retry"))?;

        let Some(row) = row else {
            return Err(not_pending(retry_id, claimed_generation));
        };
        let attempt_count: i32 = row
            .try_get("attempt_count")
            .map_err(storage("decode attempt count"))?;

        debug!(
            %retry_id,
            attempt_count,
            delay_ms = delay.as_millis() as u64,
            "retry rescheduled"
        );
        Ok(attempt_count)
    }

    async fn resolve(
        &self,
        retry_id: RetryId,
        claimed_generation: Option<i64>,
    ) -> Result<()> {
        self.finish(retry_id, claimed_generation, RetryState::Resolved, None)
            .await?;
        info!(%retry_id, "retry resolved");
        Ok(())
    }

    async fn abandon(
        &self,
        retry_id: RetryId,
        claimed_generation: Option<i64>,
        reason: &str,
    ) -> Result<()> {
        self.finish(
            retry_id,
            claimed_generation,
            RetryState::Abandoned,
            Some(reason),
        )
        .await?;
        warn!(%retry_id, reason, "retry abandoned");
        Ok(())
    }

    async fn get(&self, retry_id: RetryId) -> Result<Option<RetryRecord>> {
        let sql = format!(
            "SELECT {RETRY_COLUMNS} FROM ingestion_retries WHERE retry_id = $1"
        );
        let row = sqlx::query(&sql)
            .bind(retry_id.0)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage("load retry"))?;
        row.as_ref().map(map_retry_row).transpose()
    }

    async fn list_pending(&self, limit: usize) -> Result<Vec<RetryRecord>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let sql = format!(
            "SELECT {RETRY_COLUMNS} FROM ingestion_retries \
             WHERE state = 'pending' \
             ORDER BY next_attempt_at, seq \
             LIMIT $1"
        );
        let rows = sqlx::query(&sql)
            .bind(sql_limit(limit))
            .fetch_all(&self.pool)
            .await
            .map_err(storage("list pending retries"))?;
        rows.iter().map(map_retry_row).collect()
    }

    async fn peek_ready(&self, limit: usize) -> Result<Vec<RetryRecord>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let sql = format!(
            "SELECT {RETRY_COLUMNS} FROM ingestion_retries \
             WHERE state = 'pending' \
               AND next_attempt_at <= NOW() \
               AND (lease_expires_at IS NULL OR lease_expires_at <= NOW()) \
             ORDER BY next_attempt_at, seq \
             LIMIT $1"
        );
        let rows = sqlx::query(&sql)
            .bind(sql_limit(limit))
            .fetch_all(&self.pool)
            .await
            .map_err(storage("peek ready retries"))?;
        rows.iter().map(map_retry_row).collect()
    }

    async fn pending_count(&self) -> Result<i64> {
        sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*)::bigint FROM ingestion_retries \
             WHERE state = 'pending'",
        )
        .fetch_one(&self.pool)
        .await
        .map_err(storage("count pending retries"))
    }
}

fn map_retry_row(row: &PgRow) -> Result<RetryRecord> {
    let state: String =
        row.try_get("state").map_err(storage("decode retry state"))?;
    Ok(RetryRecord {
        retry_id: RetryId(
            row.try_get("retry_id").map_err(storage("decode retry id"))?,
        ),
        seq: row.try_get("seq").map_err(storage("decode retry seq"))?,
        case_id: row
            .try_get("case_id")
            .map_err(storage("decode retry case id"))?,
        backend: row
            .try_get("backend")
            .map_err(storage("decode retry backend"))?,
        payload: row
            .try_get("payload")
            .map_err(storage("decode retry payload"))?,
        attempt_count: row
            .try_get("attempt_count")
            .map_err(storage("decode attempt count"))?,
        next_attempt_at: row
            .try_get("next_attempt_at")
            .map_err(storage("decode next attempt"))?,
        state: state.parse()?,
        lease_expires_at: row
            .try_get("lease_expires_at")
            .map_err(storage("decode lease expiry"))?,
        generation: row
            .try_get("generation")
            .map_err(storage("decode retry generation"))?,
        last_error: row
            .try_get("last_error")
            .map_err(storage("decode last error"))?,
        created_at: row
            .try_get("created_at")
            .map_err(storage("decode created_at"))?,
        updated_at: row
            .try_get("updated_at")
            .map_err(storage("decode updated_at"))?,
        resolved_at: row
            .try_get("resolved_at")
            .map_err(storage("decode resolved_at"))?,
    })
}

fn qualified_columns(alias: &str) -> String {
    RETRY_COLUMNS
        .split(',')
        .map(|column| format!("{alias}.{}", column.trim()))
        .collect::<Vec<_>>()
        .join(", ")
}

fn not_pending(
    retry_id: RetryId,
    claimed_generation: Option<i64>,
) -> IngestError {
    match claimed_generation {
        Some(generation) => IngestError::NotFound(format!(
            "no pending retry with id {retry_id} at generation {generation}"
        )),
        None => IngestError::NotFound(format!(
            "no pending retry with id {retry_id}"
        )),
    }
}

fn sql_limit(limit: usize) -> i64 {
    i64::try_from(limit).unwrap_or(i64::MAX)
}

pub(crate) fn duration_ms(duration: Duration) -> Result<i64> {
    i64::try_from(duration.as_millis()).map_err(|_| {
        IngestError::validation(format!(
            "duration {duration:?} is too large to schedule"
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn qualified_columns_prefix_every_column() {
        let columns = qualified_columns("r");
        assert!(columns.starts_with("r.retry_id, r.seq, r.case_id"));
        assert!(columns.ends_with("r.resolved_at"));
        assert_eq!(columns.matches("r.").count(), 14);
    }

    #[test]
    fn durations_convert_to_whole_milliseconds() {
        assert_eq!(duration_ms(Duration::from_millis(1500)).unwrap(), 1500);
        assert_eq!(duration_ms(Duration::ZERO).unwrap(), 0);
        assert!(duration_ms(Duration::MAX).is_err());
    }
}
