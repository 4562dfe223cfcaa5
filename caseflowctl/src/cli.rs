use std::path::PathBuf;

use caseflow_core::types::{RetryId, RetryState, RunId, RunStatus};
use clap::{Args, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "caseflowctl", version)]
#[command(about = "Operate the caseflow ingestion store")]
pub struct Cli {
    /// Path to caseflow.toml (defaults to ./caseflow.toml or ./config/caseflow.toml)
    #[arg(long, global = true, env = "CASEFLOW_CONFIG_PATH")]
    pub config: Option<PathBuf>,

    /// Path to a .env file to seed the environment from
    #[arg(long, global = true)]
    pub env_file: Option<PathBuf>,

    /// Database URL (overrides config)
    #[arg(long, global = true, hide_env_values = true, env = "DATABASE_URL")]
    pub database_url: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Schema management
    #[command(subcommand)]
    Db(DbCommand),
    /// Inspect and settle durable retry records
    #[command(subcommand)]
    Retries(RetriesCommand),
    /// Inspect and verify ingestion runs
    #[command(subcommand)]
    Runs(RunsCommand),
}

#[derive(Debug, Subcommand)]
pub enum DbCommand {
    /// Apply embedded migrations and exit
    Migrate,
}

#[derive(Debug, Subcommand)]
pub enum RetriesCommand {
    /// List retry records, oldest due first (pending) or most recently settled
    List {
        #[arg(long, default_value_t = 50)]
        limit: usize,
        /// pending, resolved or abandoned
        #[arg(long, default_value = "pending")]
        state: RetryState,
    },
    /// List records a worker would claim now, without claiming them
    Ready {
        #[arg(long, default_value_t = 25)]
        limit: usize,
    },
    /// Show one retry record
    Show { retry_id: RetryId },
    /// Mark a pending record as delivered
    Resolve { retry_id: RetryId },
    /// Give up on a pending record
    Abandon {
        retry_id: RetryId,
        #[arg(long)]
        reason: String,
    },
}

#[derive(Debug, Subcommand)]
pub enum RunsCommand {
    /// List runs, most recent first
    List {
        #[arg(long)]
        dataset: Option<String>,
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    /// Show one run
    Show { run_id: RunId },
    /// Check a run against expectations; exits 1 on any mismatch
    Verify(VerifyArgs),
}

#[derive(Debug, Args)]
pub struct VerifyArgs {
    /// Run to verify (defaults to the latest run)
    #[arg(long, conflicts_with = "dataset")]
    pub run_id: Option<RunId>,
    /// Verify the latest run of this dataset
    #[arg(long)]
    pub dataset: Option<String>,
    #[arg(long)]
    pub status: Option<RunStatus>,
    #[arg(long)]
    pub expect_case_count: Option<i64>,
    #[arg(long)]
    pub min_case_count: Option<i64>,
    #[arg(long)]
    pub expect_sql_writes: Option<i64>,
    #[arg(long)]
    pub max_retry_count: Option<i64>,
    #[arg(long)]
    pub require_vector_enabled: bool,
    /// Exact per-backend delivery count, e.g. `vector=12` (repeatable)
    #[arg(long = "expect-backend-writes", value_parser = parse_backend_count)]
    pub backend_writes: Vec<(String, i64)>,
}

fn parse_backend_count(raw: &str) -> Result<(String, i64), String> {
    let (name, count) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected NAME=COUNT, got '{raw}'"))?;
    let name = name.trim();
    if name.is_empty() {
        return Err(format!("missing backend name in '{raw}'"));
    }
    let count = count
        .trim()
        .parse::<i64>()
        .map_err(|err| format!("invalid count in '{raw}': {err}"))?;
    Ok((name.to_string(), count))
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn command_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn backend_counts_parse() {
        assert_eq!(
            parse_backend_count("vector=12").unwrap(),
            ("vector".to_string(), 12)
        );
        assert_eq!(
            parse_backend_count(" index = 0 ").unwrap(),
            ("index".to_string(), 0)
        );
        assert!(parse_backend_count("vector").is_err());
        assert!(parse_backend_count("=3").is_err());
        assert!(parse_backend_count("vector=lots").is_err());
    }

    #[test]
    fn verify_flags_parse() {
        let cli = Cli::try_parse_from([
            "caseflowctl",
            "runs",
            "verify",
            "--dataset",
            "account_list",
            "--status",
            "succeeded",
            "--min-case-count",
            "5",
            "--expect-backend-writes",
            "vector=8",
            "--expect-backend-writes",
            "index=7",
        ])
        .unwrap();
        let Command::Runs(RunsCommand::Verify(args)) = cli.command else {
            panic!("expected runs verify");
        };
        assert_eq!(args.dataset.as_deref(), Some("account_list"));
        assert_eq!(args.status, Some(RunStatus::Succeeded));
        assert_eq!(args.min_case_count, Some(5));
        assert_eq!(args.backend_writes.len(), 2);
    }

    #[test]
    fn run_id_and_dataset_conflict() {
        let result = Cli::try_parse_from([
            "caseflowctl",
            "runs",
            "verify",
            "--run-id",
            "0190b3a4-6f00-7000-8000-000000000001",
            "--dataset",
            "account_list",
        ]);
        assert!(result.is_err());
    }
}
