use thiserror::Error;

#[derive(Error, Debug)]
pub enum IngestError {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Storage error: {context}: {source}")]
    Storage {
        context: String,
        #[source]
        source: sqlx::Error,
    },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Migration failed: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl IngestError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Postgres SQLSTATE of the underlying database error, if any.
    pub fn sqlstate(&self) -> Option<String> {
        match self {
            Self::Storage {
                source: sqlx::Error::Database(db_err),
                ..
            } => db_err.code().map(|code| code.to_string()),
            _ => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

/// Wrap a `sqlx::Error` with the operation that produced it.
///
/// ```no_run
/// # use caseflow_core::error::storage;
/// # async fn demo(pool: &sqlx::PgPool) -> caseflow_core::error::Result<()> {
/// sqlx::query("SELECT 1")
///     .execute(pool)
///     .await
///     .map_err(storage("health check"))?;
/// # Ok(())
/// # }
/// ```
pub fn storage(
    context: &'static str,
) -> impl FnOnce(sqlx::Error) -> IngestError {
    move |source| IngestError::Storage {
        context: context.to_string(),
        source,
    }
}

pub type Result<T> = std::result::Result<T, IngestError>;
