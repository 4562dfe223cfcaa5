//! Configuration loading for caseflow binaries.
//!
//! Values come from an optional TOML file, overridden by environment
//! variables (optionally seeded from a `.env` file). The library crate
//! `caseflow-core` never reads configuration itself; this crate turns the
//! layered sources into the explicit settings its stores take.
//!
//! A process that replays retries wires the loaded values into the stores
//! and the worker itself, with its own delivery backends:
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use caseflow_config::ConfigLoader;
//! use caseflow_core::{
//!     database::{self, Stores},
//!     retry::{BackendRegistry, RetryWorker},
//! };
//!
//! async fn replay_due(
//!     backends: BackendRegistry,
//! ) -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ConfigLoader::new().load()?.config;
//!     let pool = database::connect(&config.pool_settings()?).await?;
//!     let stores = Stores::new(pool).with_retry_lease(config.retry.lease);
//!     let worker = RetryWorker::new(
//!         Arc::new(stores.retries),
//!         backends,
//!         config.worker_config(),
//!     );
//!     let summary = worker.run_once().await?;
//!     println!("{summary:?}");
//!     Ok(())
//! }
//! ```

pub mod loader;
pub mod models;
pub mod util;
pub mod validation;

pub use loader::{
    ConfigLoad, ConfigLoader, ConfigLoaderOptions, error::ConfigLoadError,
};
pub use models::{
    BackoffConfig, Config, ConfigMetadata, DatabaseConfig, LoggingConfig,
    RetryConfig,
};
pub use validation::{ConfigGuardRailError, ConfigWarning, ConfigWarnings};
