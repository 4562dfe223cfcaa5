use std::str::FromStr;

use anyhow::Result;
use caseflow_core::database::PostgresRunTracker;
use caseflow_core::database::ports::RunTracker;
use caseflow_core::error::IngestError;
use caseflow_core::types::{
    NewRun, RunId, RunOutcome, RunStatus, WriterResult,
};
use caseflow_core::verify::RunExpectations;
use sqlx::PgPool;

fn written(case_id: &str, documents: usize, entities: usize) -> WriterResult {
    WriterResult {
        case_id: case_id.to_string(),
        document_ids: (0..documents).map(|i| format!("doc-{i}")).collect(),
        entity_ids: (0..entities).map(|i| format!("ent-{i}")).collect(),
        indicator_ids: vec!["ind-0".into()],
    }
}

#[sqlx::test(migrator = "caseflow_core::MIGRATOR")]
async fn run_lifecycle_accumulates_counters(pool: PgPool) -> Result<()> {
    let tracker = PostgresRunTracker::new(pool.clone());
    let run_id = tracker
        .start_run(&NewRun {
            dataset: "account_list".into(),
            source_bundle: Some("bundles/today.jsonl".into()),
            vector_enabled: true,
        })
        .await?;

    let fresh = tracker.get_run(run_id).await?.expect("run exists");
    assert_eq!(fresh.status, RunStatus::Running);
    assert!(fresh.completed_at.is_none());
    assert_eq!(fresh.case_count, 0);

    tracker.record_case(run_id, &written("case-1", 2, 3)).await?;
    tracker.record_case(run_id, &written("case-2", 1, 0)).await?;
    tracker.record_backend_write(run_id, "vector").await?;
    tracker.record_backend_write(run_id, "vector").await?;
    tracker.record_backend_write(run_id, "index").await?;
    tracker.record_retry_scheduled(run_id).await?;
    tracker.complete_run(run_id, &RunOutcome::Succeeded).await?;

    let done = tracker.get_run(run_id).await?.unwrap();
    assert_eq!(done.status, RunStatus::Succeeded);
    assert!(done.completed_at.is_some());
    assert_eq!(done.case_count, 2);
    assert_eq!(done.document_count, 3);
    assert_eq!(done.entity_count, 3);
    assert_eq!(done.indicator_count, 2);
    assert_eq!(done.sql_writes, 2);
    assert_eq!(done.retry_count, 1);
    assert_eq!(done.backend_write_count("vector"), 2);
    assert_eq!(done.backend_write_count("index"), 1);
    assert_eq!(done.backend_write_count("missing"), 0);
    Ok(())
}

#[sqlx::test(migrator = "caseflow_core::MIGRATOR")]
async fn concurrent_record_case_loses_no_updates(pool: PgPool) -> Result<()> {
    let tracker = PostgresRunTracker::new(pool.clone());
    let run_id = tracker.start_run(&NewRun::new("account_list")).await?;

    let mut handles = Vec::new();
    for i in 0..16 {
        let tracker = tracker.clone();
        handles.push(tokio::spawn(async move {
            tracker
                .record_case(run_id, &written(&format!("case-{i}"), 2, 1))
                .await
        }));
    }
    for handle in handles {
        handle.await??;
    }

    let run = tracker.get_run(run_id).await?.unwrap();
    assert_eq!(run.case_count, 16);
    assert_eq!(run.document_count, 32);
    assert_eq!(run.entity_count, 16);
    assert_eq!(run.sql_writes, 16);
    Ok(())
}

#[sqlx::test(migrator = "caseflow_core::MIGRATOR")]
async fn terminal_runs_reject_further_changes(pool: PgPool) -> Result<()> {
    let tracker = PostgresRunTracker::new(pool.clone());
    let run_id = tracker.start_run(&NewRun::new("chat_exports")).await?;
    tracker
        .complete_run(run_id, &RunOutcome::failed("index backend down"))
        .await?;

    let failed = tracker.get_run(run_id).await?.unwrap();
    assert_eq!(failed.status, RunStatus::Failed);
    assert_eq!(failed.last_error.as_deref(), Some("index backend down"));

    let err = tracker
        .complete_run(run_id, &RunOutcome::Succeeded)
        .await
        .unwrap_err();
    assert!(matches!(err, IngestError::InvalidState(_)), "{err}");

    let err = tracker
        .record_case(run_id, &written("late", 1, 1))
        .await
        .unwrap_err();
    assert!(matches!(err, IngestError::InvalidState(_)));

    // The schema itself refuses to touch a sealed row.
    let direct = sqlx::query(
        "UPDATE ingestion_runs SET case_count = 99 WHERE run_id = $1",
    )
    .bind(run_id.0)
    .execute(&pool)
    .await
    .unwrap_err();
    let code = direct
        .as_database_error()
        .and_then(|db| db.code().map(|c| c.to_string()));
    assert_eq!(code.as_deref(), Some("23514"));

    let unchanged = tracker.get_run(run_id).await?.unwrap();
    assert_eq!(unchanged.case_count, 0);
    assert_eq!(unchanged.completed_at, failed.completed_at);
    Ok(())
}

#[sqlx::test(migrator = "caseflow_core::MIGRATOR")]
async fn unknown_runs_are_not_found(pool: PgPool) -> Result<()> {
    let tracker = PostgresRunTracker::new(pool);
    let missing = RunId::new();

    assert!(tracker.get_run(missing).await?.is_none());
    assert!(
        tracker
            .complete_run(missing, &RunOutcome::Succeeded)
            .await
            .unwrap_err()
            .is_not_found()
    );
    assert!(
        tracker
            .record_backend_write(missing, "vector")
            .await
            .unwrap_err()
            .is_not_found()
    );
    Ok(())
}

#[sqlx::test(
    migrator = "caseflow_core::MIGRATOR",
    fixtures(path = "../fixtures", scripts("ingestion_runs"))
)]
async fn listing_filters_by_dataset_newest_first(pool: PgPool) -> Result<()> {
    let tracker = PostgresRunTracker::new(pool);
    let newest_account =
        RunId::from_str("0190f5d2-0000-7000-8000-000000000003")?;
    let oldest_account =
        RunId::from_str("0190f5d2-0000-7000-8000-000000000001")?;

    let all = tracker.list_runs(10, None).await?;
    assert_eq!(all.len(), 3);
    assert_eq!(all[0].run_id, newest_account);

    let accounts = tracker.list_runs(10, Some("account_list")).await?;
    let ids: Vec<RunId> = accounts.iter().map(|r| r.run_id).collect();
    assert_eq!(ids, vec![newest_account, oldest_account]);

    let latest_chat = tracker.latest_run(Some("chat_exports")).await?.unwrap();
    assert_eq!(latest_chat.status, RunStatus::Failed);
    assert_eq!(latest_chat.backend_write_count("index"), 1);

    assert!(tracker.latest_run(Some("nothing_here")).await?.is_none());
    assert_eq!(tracker.list_runs(1, None).await?.len(), 1);
    Ok(())
}

#[sqlx::test(
    migrator = "caseflow_core::MIGRATOR",
    fixtures(path = "../fixtures", scripts("ingestion_runs"))
)]
async fn stored_run_passes_matching_expectations(pool: PgPool) -> Result<()> {
    let tracker = PostgresRunTracker::new(pool);
    let run = tracker.latest_run(Some("account_list")).await?.unwrap();

    let expectations = RunExpectations {
        status: Some(RunStatus::Succeeded),
        case_count: Some(8),
        sql_writes: Some(8),
        max_retry_count: Some(1),
        require_vector_enabled: true,
        backend_writes: [("vector".to_string(), 8)].into_iter().collect(),
        ..RunExpectations::default()
    };
    assert!(expectations.check(&run).is_empty());

    let stricter = RunExpectations {
        backend_writes: [("index".to_string(), 8)].into_iter().collect(),
        ..expectations
    };
    let mismatches = stricter.check(&run);
    assert_eq!(mismatches.len(), 1);
    assert_eq!(mismatches[0].field, "backend_writes.index");
    Ok(())
}
