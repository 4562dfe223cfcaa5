pub mod infrastructure;
pub mod ports;

pub use infrastructure::postgres::{
    PostgresCaseWriter, PostgresRetryQueue, PostgresRunTracker,
};

use sqlx::{PgPool, postgres::PgPoolOptions};
use std::{fmt, time::Duration};
use tracing::info;

use crate::{
    MIGRATOR,
    error::{IngestError, Result},
};

/// Explicit pool configuration. Nothing in this crate reads the environment.
#[derive(Clone)]
pub struct PoolSettings {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub acquire_timeout: Duration,
}

impl PoolSettings {
    pub const DEFAULT_MAX_CONNECTIONS: u32 = 10;
    pub const DEFAULT_ACQUIRE_TIMEOUT: Duration = Duration::from_secs(30);

    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            max_connections: Self::DEFAULT_MAX_CONNECTIONS,
            min_connections: 0,
            acquire_timeout: Self::DEFAULT_ACQUIRE_TIMEOUT,
        }
    }
}

// The URL can carry a password.
impl fmt::Debug for PoolSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PoolSettings")
            .field("url", &"<redacted>")
            .field("max_connections", &self.max_connections)
            .field("min_connections", &self.min_connections)
            .field("acquire_timeout", &self.acquire_timeout)
            .finish()
    }
}

/// Open a connection pool. Callers own the pool and hand clones to stores.
pub async fn connect(settings: &PoolSettings) -> Result<PgPool> {
    if settings.max_connections == 0 {
        return Err(IngestError::validation(
            "max_connections must be at least 1",
        ));
    }

    let pool = PgPoolOptions::new()
        .max_connections(settings.max_connections)
        .min_connections(settings.min_connections.min(settings.max_connections))
        .acquire_timeout(settings.acquire_timeout)
        .test_before_acquire(true)
        .connect(&settings.url)
        .await
        .map_err(crate::error::storage("connect to database"))?;

    info!(
        max_connections = settings.max_connections,
        min_connections = settings.min_connections,
        "database pool initialized"
    );
    Ok(pool)
}

/// Apply the embedded migrations.
pub async fn migrate(pool: &PgPool) -> Result<()> {
    MIGRATOR.run(pool).await?;
    info!("database migrations applied");
    Ok(())
}

/// Convenience bundle of the three stores sharing one pool.
#[derive(Clone, Debug)]
pub struct Stores {
    pub cases: PostgresCaseWriter,
    pub retries: PostgresRetryQueue,
    pub runs: PostgresRunTracker,
}

impl Stores {
    pub fn new(pool: PgPool) -> Self {
        Self {
            cases: PostgresCaseWriter::new(pool.clone()),
            retries: PostgresRetryQueue::new(pool.clone()),
            runs: PostgresRunTracker::new(pool),
        }
    }

    /// Claim lease for the retry store, usually `RetryConfig::lease`.
    pub fn with_retry_lease(mut self, lease: Duration) -> Self {
        self.retries = self.retries.with_lease(lease);
        self
    }
}
