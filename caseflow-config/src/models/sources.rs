use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::util::{non_empty_var, parse_bool_var};

/// Raw configuration as defined in a TOML file.
#[derive(Debug, Default, Clone, Deserialize, Serialize)]
#[serde(rename_all = "snake_case", deny_unknown_fields)]
pub struct FileConfig {
    #[serde(default)]
    pub database: FileDatabaseConfig,
    #[serde(default)]
    pub retry: FileRetryConfig,
    #[serde(default)]
    pub logging: FileLoggingConfig,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct FileDatabaseConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password_file: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_connections: Option<u32>,
    /// Humantime duration, e.g. `"30s"`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub acquire_timeout: Option<String>,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct FileRetryConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lease: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub batch_limit: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub poll_interval: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_attempts: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backoff: Option<FileBackoffConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dry_run: Option<bool>,
}

/// `[retry.backoff]` table, discriminated by `kind`.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case", deny_unknown_fields)]
pub enum FileBackoffConfig {
    Fixed {
        delay: String,
    },
    Exponential {
        base: String,
        max: String,
    },
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct FileLoggingConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filter: Option<String>,
}

/// Environment-derived configuration values.
#[derive(Debug, Default, Clone)]
pub struct EnvConfig {
    pub config_path: Option<PathBuf>,
    pub database_url: Option<String>,
    pub database_url_file: Option<PathBuf>,
    pub database_host: Option<String>,
    pub database_port: Option<u16>,
    pub database_user: Option<String>,
    pub database_name: Option<String>,
    pub database_password: Option<String>,
    pub database_password_file: Option<PathBuf>,
    pub database_max_connections: Option<u32>,
    /// Kept raw so a malformed value is reported instead of ignored.
    pub retry_lease: Option<String>,
    pub retry_batch_limit: Option<usize>,
    pub retry_max_attempts: Option<u32>,
    pub retry_delay: Option<String>,
    pub retry_dry_run: Option<bool>,
    pub log_filter: Option<String>,
}

impl EnvConfig {
    pub fn gather() -> Self {
        Self {
            config_path: non_empty_var("CASEFLOW_CONFIG_PATH")
                .map(PathBuf::from),
            database_url: non_empty_var("DATABASE_URL"),
            database_url_file: non_empty_var("DATABASE_URL_FILE")
                .map(PathBuf::from),
            database_host: non_empty_var("DATABASE_HOST"),
            database_port: non_empty_var("DATABASE_PORT")
                .and_then(|s| s.parse().ok()),
            database_user: non_empty_var("DATABASE_USER"),
            database_name: non_empty_var("DATABASE_NAME"),
            database_password: non_empty_var("DATABASE_PASSWORD"),
            database_password_file: non_empty_var("DATABASE_PASSWORD_FILE")
                .map(PathBuf::from),
            database_max_connections: non_empty_var(
                "DATABASE_MAX_CONNECTIONS",
            )
            .and_then(|s| s.parse().ok()),
            retry_lease: non_empty_var("CASEFLOW_RETRY_LEASE"),
            retry_batch_limit: non_empty_var("CASEFLOW_RETRY_BATCH_LIMIT")
                .and_then(|s| s.parse().ok()),
            retry_max_attempts: non_empty_var("CASEFLOW_RETRY_MAX_ATTEMPTS")
                .and_then(|s| s.parse().ok()),
            retry_delay: non_empty_var("CASEFLOW_RETRY_DELAY"),
            retry_dry_run: parse_bool_var("CASEFLOW_RETRY_DRY_RUN"),
            log_filter: non_empty_var("CASEFLOW_LOG"),
        }
    }
}
