use std::path::PathBuf;
use thiserror::Error;

use crate::validation::ConfigGuardRailError;

#[derive(Debug, Error)]
pub enum ConfigLoadError {
    #[error("configuration file missing: {path}")]
    MissingConfig { path: PathBuf },
    #[error("failed to read configuration {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse configuration {path}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid database URL")]
    InvalidDatabaseUrl {
        #[source]
        source: url::ParseError,
    },
    #[error("invalid database username '{username}'")]
    InvalidDatabaseUsername { username: String },
    #[error("failed to encode database password into URL")]
    InvalidDatabasePassword,
    #[error("no database URL configured; set DATABASE_URL or database.url")]
    MissingDatabaseUrl,
    #[error("failed to read secret file {path}")]
    SecretFileIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid duration for {key}: '{value}'")]
    InvalidDuration {
        key: &'static str,
        value: String,
        #[source]
        source: humantime::DurationError,
    },
    #[error(transparent)]
    GuardRail(#[from] ConfigGuardRailError),
    #[error(transparent)]
    EnvFile(#[from] dotenvy::Error),
}
