pub mod db_url;
pub mod error;

use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use caseflow_core::database::PoolSettings;
use tracing::debug;

use crate::{
    models::{
        BackoffConfig, Config, ConfigMetadata, DatabaseConfig, LoggingConfig,
        RetryConfig,
        sources::{EnvConfig, FileBackoffConfig, FileConfig},
    },
    util::parse_duration,
    validation::{self, ConfigWarnings},
};

use self::{db_url::resolve_database_url, error::ConfigLoadError};

const DEFAULT_CONFIG_LOCATIONS: &[&str] =
    &["caseflow.toml", "config/caseflow.toml"];

#[derive(Debug, Default, Clone)]
pub struct ConfigLoaderOptions {
    pub config_path: Option<PathBuf>,
    pub env_file: Option<PathBuf>,
}

#[derive(Debug, Default)]
pub struct ConfigLoader {
    options: ConfigLoaderOptions,
}

#[derive(Debug)]
pub struct ConfigLoad {
    pub config: Config,
    pub warnings: ConfigWarnings,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_options(options: ConfigLoaderOptions) -> Self {
        Self { options }
    }

    pub fn with_config_path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.options.config_path = Some(path.into());
        self
    }

    pub fn with_env_file<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.options.env_file = Some(path.into());
        self
    }

    /// Seed the process environment from `.env`, then load.
    pub fn load(&self) -> Result<ConfigLoad, ConfigLoadError> {
        let env_file_loaded = match &self.options.env_file {
            Some(path) => dotenvy::from_path(path).map(|_| true).or_else(
                |err| match err {
                    dotenvy::Error::Io(_) => Ok(false),
                    _ => Err(err),
                },
            )?,
            None => {
                dotenvy::dotenv().map(|_| true).or_else(|err| match err {
                    dotenvy::Error::Io(_) => Ok(false),
                    _ => Err(err),
                })?
            }
        };

        let mut load = self.load_with_env(EnvConfig::gather())?;
        load.config.metadata.env_file_loaded = env_file_loaded;
        Ok(load)
    }

    /// Load against an explicit environment snapshot. The process
    /// environment is not consulted.
    pub fn load_with_env(
        &self,
        env: EnvConfig,
    ) -> Result<ConfigLoad, ConfigLoadError> {
        let (file_config, config_path) = self.load_file_config(&env)?;
        debug!(config_path = ?config_path, "resolved configuration file");
        compose_config(file_config, env, config_path)
    }

    fn load_file_config(
        &self,
        env: &EnvConfig,
    ) -> Result<(Option<FileConfig>, Option<PathBuf>), ConfigLoadError> {
        // An explicitly named file must exist; default locations are optional.
        let (path, explicit) = match (&self.options.config_path, &env.config_path)
        {
            (Some(path), _) | (None, Some(path)) => (Some(path.clone()), true),
            (None, None) => (
                DEFAULT_CONFIG_LOCATIONS
                    .iter()
                    .map(PathBuf::from)
                    .find(|candidate| candidate.exists()),
                false,
            ),
        };

        let Some(path) = path else {
            return Ok((None, None));
        };
        if !path.exists() {
            if explicit {
                return Err(ConfigLoadError::MissingConfig { path });
            }
            return Ok((None, None));
        }

        let file_config = read_file_config(&path)?;
        Ok((Some(file_config), Some(path)))
    }
}

fn read_file_config(path: &Path) -> Result<FileConfig, ConfigLoadError> {
    let contents =
        fs::read_to_string(path).map_err(|source| ConfigLoadError::Io {
            path: path.to_path_buf(),
            source,
        })?;
    toml::from_str(&contents).map_err(|source| ConfigLoadError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

fn compose_config(
    file_config: Option<FileConfig>,
    env: EnvConfig,
    config_path: Option<PathBuf>,
) -> Result<ConfigLoad, ConfigLoadError> {
    let mut warnings = ConfigWarnings::default();

    if file_config.is_none() {
        warnings.push_with_hint(
            "No caseflow.toml detected; falling back to environment variables",
            "Pass --config or set CASEFLOW_CONFIG_PATH to use a file",
        );
    }

    let file = file_config.unwrap_or_default();

    let database = DatabaseConfig {
        url: resolve_database_url(&env, &file.database)?,
        max_connections: env
            .database_max_connections
            .or(file.database.max_connections)
            .unwrap_or(PoolSettings::DEFAULT_MAX_CONNECTIONS),
        acquire_timeout: duration_or(
            "database.acquire_timeout",
            file.database.acquire_timeout.as_deref(),
            PoolSettings::DEFAULT_ACQUIRE_TIMEOUT,
        )?,
    };

    let defaults = RetryConfig::default();
    let file_backoff = match &file.retry.backoff {
        Some(backoff) => Some(backoff_from_file(backoff)?),
        None => None,
    };
    // CASEFLOW_RETRY_DELAY pins a fixed delay over whatever the file says.
    let backoff = match env.retry_delay.as_deref() {
        Some(raw) => BackoffConfig::Fixed {
            delay: duration("CASEFLOW_RETRY_DELAY", raw)?,
        },
        None => file_backoff.unwrap_or(defaults.backoff),
    };

    let lease = match env.retry_lease.as_deref() {
        Some(raw) => duration("CASEFLOW_RETRY_LEASE", raw)?,
        None => duration_or(
            "retry.lease",
            file.retry.lease.as_deref(),
            defaults.lease,
        )?,
    };

    let retry = RetryConfig {
        lease,
        batch_limit: env
            .retry_batch_limit
            .or(file.retry.batch_limit)
            .unwrap_or(defaults.batch_limit),
        poll_interval: duration_or(
            "retry.poll_interval",
            file.retry.poll_interval.as_deref(),
            defaults.poll_interval,
        )?,
        max_attempts: env
            .retry_max_attempts
            .or(file.retry.max_attempts)
            .unwrap_or(defaults.max_attempts),
        backoff,
        dry_run: env
            .retry_dry_run
            .or(file.retry.dry_run)
            .unwrap_or(defaults.dry_run),
    };

    let logging = LoggingConfig {
        filter: env
            .log_filter
            .or(file.logging.filter)
            .unwrap_or_else(|| LoggingConfig::default().filter),
    };

    let config = Config {
        database,
        retry,
        logging,
        metadata: ConfigMetadata {
            config_path,
            env_file_loaded: false,
        },
    };

    warnings.extend(validation::apply_guard_rails(&config)?);

    Ok(ConfigLoad { config, warnings })
}

fn backoff_from_file(
    backoff: &FileBackoffConfig,
) -> Result<BackoffConfig, ConfigLoadError> {
    Ok(match backoff {
        FileBackoffConfig::Fixed { delay } => BackoffConfig::Fixed {
            delay: duration("retry.backoff.delay", delay)?,
        },
        FileBackoffConfig::Exponential { base, max } => {
            BackoffConfig::Exponential {
                base: duration("retry.backoff.base", base)?,
                max: duration("retry.backoff.max", max)?,
            }
        }
    })
}

fn duration(key: &'static str, raw: &str) -> Result<Duration, ConfigLoadError> {
    parse_duration(raw).map_err(|source| ConfigLoadError::InvalidDuration {
        key,
        value: raw.to_string(),
        source,
    })
}

fn duration_or(
    key: &'static str,
    raw: Option<&str>,
    default: Duration,
) -> Result<Duration, ConfigLoadError> {
    raw.map_or(Ok(default), |raw| duration(key, raw))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ConfigGuardRailError;
    use std::io::Write;

    fn write_config(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new()
            .suffix(".toml")
            .tempfile()
            .unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn defaults_without_file_or_env() {
        let dir = tempfile::tempdir().unwrap();
        let loader =
            ConfigLoader::new().with_config_path(dir.path().join("absent"));
        // Explicit paths must exist.
        assert!(matches!(
            loader.load_with_env(EnvConfig::default()),
            Err(ConfigLoadError::MissingConfig { .. })
        ));

        let load = compose_config(None, EnvConfig::default(), None).unwrap();
        let config = load.config;
        assert!(config.database.url.is_none());
        assert_eq!(config.database.max_connections, 10);
        assert_eq!(config.retry.batch_limit, 25);
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.retry.lease, Duration::from_secs(60));
        assert_eq!(
            config.retry.backoff,
            BackoffConfig::Fixed {
                delay: Duration::from_secs(60)
            }
        );
        assert!(!config.retry.dry_run);
        assert_eq!(load.warnings.items.len(), 2);
        assert!(matches!(
            config.pool_settings(),
            Err(ConfigLoadError::MissingDatabaseUrl)
        ));
    }

    #[test]
    fn file_values_are_read() {
        let file = write_config(
            r#"
[database]
url = "postgres://ingest@localhost/cases"
max_connections = 4
acquire_timeout = "5s"

[retry]
lease = "2m"
batch_limit = 10
poll_interval = "15s"
max_attempts = 5
dry_run = true

[retry.backoff]
kind = "exponential"
base = "10s"
max = "10m"

[logging]
filter = "debug"
"#,
        );
        let load = ConfigLoader::new()
            .with_config_path(file.path())
            .load_with_env(EnvConfig::default())
            .unwrap();
        let config = load.config;

        assert_eq!(
            config.database.url.as_deref(),
            Some("postgres://ingest@localhost/cases")
        );
        assert_eq!(config.database.max_connections, 4);
        assert_eq!(config.database.acquire_timeout, Duration::from_secs(5));
        assert_eq!(config.retry.lease, Duration::from_secs(120));
        assert_eq!(config.retry.batch_limit, 10);
        assert_eq!(config.retry.poll_interval, Duration::from_secs(15));
        assert_eq!(
            config.retry.backoff,
            BackoffConfig::Exponential {
                base: Duration::from_secs(10),
                max: Duration::from_secs(600),
            }
        );
        assert_eq!(config.logging.filter, "debug");
        assert_eq!(config.metadata.config_path.as_deref(), Some(file.path()));

        let worker = config.worker_config();
        assert_eq!(worker.max_attempts, 5);
        assert!(worker.dry_run);
        assert_eq!(
            config.pool_settings().unwrap().max_connections,
            config.database.max_connections
        );
    }

    #[test]
    fn env_overrides_file() {
        let file = write_config(
            r#"
[database]
url = "postgres://file@localhost/cases"

[retry]
lease = "2m"
batch_limit = 10
max_attempts = 5

[retry.backoff]
kind = "fixed"
delay = "30s"
"#,
        );
        let env = EnvConfig {
            config_path: Some(file.path().to_path_buf()),
            database_url: Some("postgres://env@localhost/cases".into()),
            retry_lease: Some("90".into()),
            retry_batch_limit: Some(3),
            retry_max_attempts: Some(1),
            retry_delay: Some("5s".into()),
            retry_dry_run: Some(true),
            log_filter: Some("caseflow_core=trace".into()),
            ..EnvConfig::default()
        };
        let config = ConfigLoader::new().load_with_env(env).unwrap().config;

        assert_eq!(
            config.database.url.as_deref(),
            Some("postgres://env@localhost/cases")
        );
        assert_eq!(config.retry.lease, Duration::from_secs(90));
        assert_eq!(config.retry.batch_limit, 3);
        assert_eq!(config.retry.max_attempts, 1);
        assert_eq!(
            config.retry.backoff,
            BackoffConfig::Fixed {
                delay: Duration::from_secs(5)
            }
        );
        assert!(config.retry.dry_run);
        assert_eq!(config.logging.filter, "caseflow_core=trace");
    }

    #[test]
    fn malformed_duration_names_its_key() {
        let file = write_config("[retry]\npoll_interval = \"eventually\"\n");
        let err = ConfigLoader::new()
            .with_config_path(file.path())
            .load_with_env(EnvConfig::default())
            .unwrap_err();
        match err {
            ConfigLoadError::InvalidDuration { key, value, .. } => {
                assert_eq!(key, "retry.poll_interval");
                assert_eq!(value, "eventually");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn unknown_keys_fail_to_parse() {
        let file = write_config("[retry]\nmax_retries = 3\n");
        let err = ConfigLoader::new()
            .with_config_path(file.path())
            .load_with_env(EnvConfig::default())
            .unwrap_err();
        assert!(matches!(err, ConfigLoadError::Parse { .. }));
    }

    #[test]
    fn guard_rails_reject_empty_batches() {
        let env = EnvConfig {
            retry_batch_limit: Some(0),
            ..EnvConfig::default()
        };
        let err = compose_config(None, env, None).unwrap_err();
        assert!(matches!(
            err,
            ConfigLoadError::GuardRail(ConfigGuardRailError::EmptyBatch)
        ));
    }

    #[test]
    fn short_lease_is_warned_about() {
        let env = EnvConfig {
            database_url: Some("postgres://localhost/cases".into()),
            retry_lease: Some("5s".into()),
            ..EnvConfig::default()
        };
        let load = compose_config(None, env, None).unwrap();
        assert!(
            load.warnings
                .items
                .iter()
                .any(|w| w.message.starts_with("retry.lease"))
        );
    }
}
