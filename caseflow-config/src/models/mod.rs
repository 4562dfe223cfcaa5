pub mod sources;

use caseflow_core::{
    database::PoolSettings,
    retry::{Backoff, RetryWorkerConfig},
};
use std::{fmt, path::PathBuf, time::Duration};

use crate::ConfigLoadError;

#[derive(Debug, Clone)]
pub struct Config {
    pub database: DatabaseConfig,
    pub retry: RetryConfig,
    pub logging: LoggingConfig,
    pub metadata: ConfigMetadata,
}

impl Config {
    /// Pool settings, failing when no database URL could be resolved.
    pub fn pool_settings(&self) -> Result<PoolSettings, ConfigLoadError> {
        let url = self
            .database
            .url
            .clone()
            .ok_or(ConfigLoadError::MissingDatabaseUrl)?;
        Ok(PoolSettings {
            url,
            max_connections: self.database.max_connections,
            min_connections: 0,
            acquire_timeout: self.database.acquire_timeout,
        })
    }

    /// Settings for a `RetryWorker` run by the embedding orchestrator. The
    /// `caseflowctl` binary settles records by hand and never builds one.
    pub fn worker_config(&self) -> RetryWorkerConfig {
        RetryWorkerConfig {
            batch_limit: self.retry.batch_limit,
            poll_interval: self.retry.poll_interval,
            max_attempts: self.retry.max_attempts,
            backoff: self.retry.backoff.into(),
            dry_run: self.retry.dry_run,
        }
    }
}

#[derive(Clone)]
pub struct DatabaseConfig {
    pub url: Option<String>,
    pub max_connections: u32,
    pub acquire_timeout: Duration,
}

impl fmt::Debug for DatabaseConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseConfig")
            .field("url", &self.url.as_ref().map(|_| "<redacted>"))
            .field("max_connections", &self.max_connections)
            .field("acquire_timeout", &self.acquire_timeout)
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub lease: Duration,
    pub batch_limit: usize,
    pub poll_interval: Duration,
    pub max_attempts: u32,
    pub backoff: BackoffConfig,
    pub dry_run: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        let worker = RetryWorkerConfig::default();
        Self {
            lease: Duration::from_secs(60),
            batch_limit: worker.batch_limit,
            poll_interval: worker.poll_interval,
            max_attempts: worker.max_attempts,
            backoff: BackoffConfig::Fixed {
                delay: Duration::from_secs(60),
            },
            dry_run: worker.dry_run,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackoffConfig {
    Fixed { delay: Duration },
    Exponential { base: Duration, max: Duration },
}

impl From<BackoffConfig> for Backoff {
    fn from(value: BackoffConfig) -> Self {
        match value {
            BackoffConfig::Fixed { delay } => Backoff::Fixed(delay),
            BackoffConfig::Exponential { base, max } => {
                Backoff::Exponential { base, max }
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// `tracing_subscriber::EnvFilter` directive string.
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "info,sqlx=warn".to_string(),
        }
    }
}

/// Where the effective configuration came from.
#[derive(Debug, Clone, Default)]
pub struct ConfigMetadata {
    pub config_path: Option<PathBuf>,
    pub env_file_loaded: bool,
}
