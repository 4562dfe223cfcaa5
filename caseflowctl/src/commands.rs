use std::process::ExitCode;

use anyhow::{Context, Result, anyhow};
use caseflow_config::Config;
use caseflow_core::{
    database::{
        PostgresRetryQueue, PostgresRunTracker,
        ports::{RetryQueue, RunTracker},
    },
    types::RetryState,
    verify::RunExpectations,
};
use serde::Serialize;
use sqlx::PgPool;
use tracing::{info, warn};

use crate::cli::{DbCommand, RetriesCommand, RunsCommand, VerifyArgs};

pub async fn db(pool: &PgPool, command: DbCommand) -> Result<ExitCode> {
    match command {
        DbCommand::Migrate => {
            caseflow_core::database::migrate(pool)
                .await
                .context("database migration failed")?;
            info!("database migrations applied successfully");
        }
    }
    Ok(ExitCode::SUCCESS)
}

pub async fn retries(
    pool: &PgPool,
    config: &Config,
    command: RetriesCommand,
) -> Result<ExitCode> {
    let queue = PostgresRetryQueue::new(pool.clone())
        .with_lease(config.retry.lease);

    match command {
        RetriesCommand::List { limit, state } => {
            let records = match state {
                RetryState::Pending => queue.list_pending(limit).await?,
                settled => queue.list_by_state(settled, limit).await?,
            };
            print_json(&records)?;
        }
        RetriesCommand::Ready { limit } => {
            print_json(&queue.peek_ready(limit).await?)?;
        }
        RetriesCommand::Show { retry_id } => {
            let record = queue
                .get(retry_id)
                .await?
                .ok_or_else(|| anyhow!("retry {retry_id} not found"))?;
            print_json(&record)?;
        }
        RetriesCommand::Resolve { retry_id } => {
            queue
                .resolve(retry_id, None)
                .await
                .with_context(|| {
                    format!("failed to resolve retry {retry_id}")
                })?;
            print_settled(&queue, retry_id).await?;
        }
        RetriesCommand::Abandon { retry_id, reason } => {
            queue
                .abandon(retry_id, None, &reason)
                .await
                .with_context(|| {
                    format!("failed to abandon retry {retry_id}")
                })?;
            print_settled(&queue, retry_id).await?;
        }
    }
    Ok(ExitCode::SUCCESS)
}

async fn print_settled(
    queue: &PostgresRetryQueue,
    retry_id: caseflow_core::types::RetryId,
) -> Result<()> {
    let record = queue
        .get(retry_id)
        .await?
        .ok_or_else(|| anyhow!("retry {retry_id} vanished after update"))?;
    info!(%retry_id, state = %record.state, "retry settled");
    print_json(&record)
}

pub async fn runs(pool: &PgPool, command: RunsCommand) -> Result<ExitCode> {
    let tracker = PostgresRunTracker::new(pool.clone());

    match command {
        RunsCommand::List { dataset, limit } => {
            print_json(&tracker.list_runs(limit, dataset.as_deref()).await?)?;
        }
        RunsCommand::Show { run_id } => {
            let run = tracker
                .get_run(run_id)
                .await?
                .ok_or_else(|| anyhow!("run {run_id} not found"))?;
            print_json(&run)?;
        }
        RunsCommand::Verify(args) => return verify(&tracker, args).await,
    }
    Ok(ExitCode::SUCCESS)
}

#[derive(Serialize)]
struct VerifyReport<'a> {
    run_id: caseflow_core::types::RunId,
    dataset: &'a str,
    passed: bool,
    mismatches: Vec<caseflow_core::verify::ExpectationMismatch>,
}

async fn verify(
    tracker: &PostgresRunTracker,
    args: VerifyArgs,
) -> Result<ExitCode> {
    let run = match args.run_id {
        Some(run_id) => tracker
            .get_run(run_id)
            .await?
            .ok_or_else(|| anyhow!("run {run_id} not found"))?,
        None => tracker
            .latest_run(args.dataset.as_deref())
            .await?
            .ok_or_else(|| match &args.dataset {
                Some(dataset) => anyhow!("no runs recorded for {dataset}"),
                None => anyhow!("no runs recorded"),
            })?,
    };

    let expectations = RunExpectations {
        status: args.status,
        case_count: args.expect_case_count,
        min_case_count: args.min_case_count,
        sql_writes: args.expect_sql_writes,
        max_retry_count: args.max_retry_count,
        require_vector_enabled: args.require_vector_enabled,
        backend_writes: args.backend_writes.into_iter().collect(),
    };
    let mismatches = expectations.check(&run);
    for mismatch in &mismatches {
        warn!(run_id = %run.run_id, %mismatch, "run expectation failed");
    }

    let passed = mismatches.is_empty();
    print_json(&VerifyReport {
        run_id: run.run_id,
        dataset: &run.dataset,
        passed,
        mismatches,
    })?;

    Ok(if passed {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    let rendered = serde_json::to_string_pretty(value)
        .context("failed to render JSON output")?;
    println!("{rendered}");
    Ok(())
}
