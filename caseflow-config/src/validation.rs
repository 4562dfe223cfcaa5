use std::time::Duration;
use thiserror::Error;

use crate::Config;

#[derive(Debug, Error)]
pub enum ConfigGuardRailError {
    #[error("database.max_connections must be at least 1")]
    NoConnections,
    #[error("retry.batch_limit must be at least 1")]
    EmptyBatch,
    #[error("retry.lease must be longer than zero")]
    ZeroLease,
    #[error(
        "exponential backoff base {base:?} exceeds its cap {max:?}"
    )]
    BackoffInverted { base: Duration, max: Duration },
}

#[derive(Debug, Clone)]
pub struct ConfigWarning {
    pub message: String,
    pub hint: Option<String>,
}

#[derive(Debug, Default, Clone)]
pub struct ConfigWarnings {
    pub items: Vec<ConfigWarning>,
}

impl ConfigWarnings {
    pub fn push<S: Into<String>>(&mut self, message: S) {
        self.items.push(ConfigWarning {
            message: message.into(),
            hint: None,
        });
    }

    pub fn push_with_hint<S: Into<String>, H: Into<String>>(
        &mut self,
        message: S,
        hint: H,
    ) {
        self.items.push(ConfigWarning {
            message: message.into(),
            hint: Some(hint.into()),
        });
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn extend(&mut self, other: ConfigWarnings) {
        self.items.extend(other.items);
    }
}

pub fn apply_guard_rails(
    config: &Config,
) -> Result<ConfigWarnings, ConfigGuardRailError> {
    let mut warnings = ConfigWarnings::default();

    if config.database.max_connections == 0 {
        return Err(ConfigGuardRailError::NoConnections);
    }
    if config.retry.batch_limit == 0 {
        return Err(ConfigGuardRailError::EmptyBatch);
    }
    if config.retry.lease.is_zero() {
        return Err(ConfigGuardRailError::ZeroLease);
    }
    if let crate::BackoffConfig::Exponential { base, max } =
        config.retry.backoff
        && base > max
    {
        return Err(ConfigGuardRailError::BackoffInverted { base, max });
    }

    if config.database.url.is_none() {
        warnings.push_with_hint(
            "No database URL configured",
            "Set DATABASE_URL or database.url in caseflow.toml",
        );
    }
    if config.retry.max_attempts == 0 {
        warnings.push(
            "retry.max_attempts is 0; transient failures are abandoned immediately",
        );
    }
    // A claim that lapses mid-delivery lets a second poller replay it.
    if config.retry.lease < config.retry.poll_interval {
        warnings.push_with_hint(
            format!(
                "retry.lease ({:?}) is shorter than retry.poll_interval ({:?})",
                config.retry.lease, config.retry.poll_interval
            ),
            "Raise retry.lease above the longest expected delivery time",
        );
    }
    if config.retry.dry_run {
        warnings.push("retry.dry_run is enabled; no retries will be replayed");
    }

    Ok(warnings)
}
