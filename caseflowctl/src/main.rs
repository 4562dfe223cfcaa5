mod cli;
mod commands;

use std::process::ExitCode;

use anyhow::Context;
use caseflow_config::{ConfigLoad, ConfigLoader, ConfigLoaderOptions};
use clap::Parser;
use tracing::{debug, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::cli::{Cli, Command};

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();

    let ConfigLoad {
        mut config,
        warnings,
    } = ConfigLoader::with_options(ConfigLoaderOptions {
        config_path: cli.config.clone(),
        env_file: cli.env_file.clone(),
    })
    .load()
    .context("failed to load configuration")?;

    if let Some(url) = cli.database_url.clone() {
        config.database.url = Some(url);
    }

    // Logs go to stderr; stdout carries the JSON output.
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.logging.filter.as_str().into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    if config.metadata.env_file_loaded {
        debug!("loaded .env file");
    }
    if let Some(path) = &config.metadata.config_path {
        debug!(path = %path.display(), "configuration file loaded");
    }
    for warning in &warnings.items {
        match &warning.hint {
            Some(hint) => {
                warn!(message = %warning.message, hint = %hint, "configuration warning")
            }
            None => {
                warn!(message = %warning.message, "configuration warning")
            }
        }
    }

    let settings = config
        .pool_settings()
        .context("a database connection is required")?;
    let pool = caseflow_core::database::connect(&settings)
        .await
        .context("failed to connect to PostgreSQL")?;

    match cli.command {
        Command::Db(command) => commands::db(&pool, command).await,
        Command::Retries(command) => {
            commands::retries(&pool, &config, command).await
        }
        Command::Runs(command) => commands::runs(&pool, command).await,
    }
}
