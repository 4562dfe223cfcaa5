//! # Caseflow Core
//!
//! Durable storage for case ingestion: an idempotent relational writer for
//! classified cases, a retry queue for failed downstream deliveries, and a
//! tracker for per-batch run metrics.
//!
//! ## Architecture
//!
//! - [`types`]: case bundles, retry records, run records and their ids
//! - [`database`]: storage ports plus the Postgres adapters implementing them
//! - [`retry`]: the worker that replays due retries against registered
//!   delivery backends
//! - [`verify`]: post-run expectation checks
//!
//! Every store is constructed from a caller-owned [`sqlx::PgPool`]; the
//! crate keeps no global connection state.
//!
//! ## Examples
//!
//! ```no_run
//! use caseflow_core::{
//!     database::{self, PoolSettings, Stores, ports::{CaseWriter, RunTracker}},
//!     types::{CaseBundle, CasePayload, NewRun, RunOutcome},
//! };
//!
//! async fn ingest_one() -> caseflow_core::error::Result<()> {
//!     let pool = database::connect(&PoolSettings::new(
//!         "postgres://caseflow@localhost/caseflow",
//!     ))
//!     .await?;
//!     database::migrate(&pool).await?;
//!     let stores = Stores::new(pool);
//!
//!     let run_id = stores.runs.start_run(&NewRun::new("account_list")).await?;
//!     let bundle = CaseBundle {
//!         case: CasePayload {
//!             case_id: "case-123".into(),
//!             dataset: "account_list".into(),
//!             source_type: "ocr".into(),
//!             classification: "crypto_investment".into(),
//!             confidence: 0.9,
//!             text: Some("Send USDT to 0xabc".into()),
//!             ..CasePayload::default()
//!         },
//!         ..CaseBundle::default()
//!     };
//!     let written = stores.cases.write_case(&bundle, Some(run_id)).await?;
//!     stores.runs.record_case(run_id, &written).await?;
//!     stores.runs.complete_run(run_id, &RunOutcome::Succeeded).await?;
//!     Ok(())
//! }
//! ```

pub mod database;
pub mod error;
pub mod retry;
pub mod types;
pub mod verify;

pub use error::{IngestError, Result};

/// Embedded schema migrations for every table the stores touch.
pub static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");
