use async_trait::async_trait;
use std::{collections::HashMap, fmt, sync::Arc};
use thiserror::Error;

use crate::types::RetryRecord;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeliveryError {
    /// The backend may accept the payload later.
    #[error("transient delivery failure: {0}")]
    Transient(String),

    /// The payload can never be delivered as-is.
    #[error("malformed retry payload: {0}")]
    Malformed(String),
}

impl DeliveryError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Transient(message.into())
    }

    pub fn malformed(message: impl Into<String>) -> Self {
        Self::Malformed(message.into())
    }
}

/// A downstream store (document index, vector store, ...) that retried
/// deliveries are replayed against.
#[async_trait]
pub trait DeliveryBackend: Send + Sync {
    /// Matches `RetryRecord::backend`.
    fn name(&self) -> &str;

    async fn deliver(&self, record: &RetryRecord) -> Result<(), DeliveryError>;
}

#[derive(Clone, Default)]
pub struct BackendRegistry {
    backends: HashMap<String, Arc<dyn DeliveryBackend>>,
}

impl fmt::Debug for BackendRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackendRegistry")
            .field("backends", &self.names())
            .finish()
    }
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a backend under its own name, replacing any previous one.
    pub fn register(&mut self, backend: Arc<dyn DeliveryBackend>) {
        self.backends.insert(backend.name().to_string(), backend);
    }

    pub fn with(mut self, backend: Arc<dyn DeliveryBackend>) -> Self {
        self.register(backend);
        self
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn DeliveryBackend>> {
        self.backends.get(name)
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> =
            self.backends.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn is_empty(&self) -> bool {
        self.backends.is_empty()
    }
}
