//! Query store collaborator interface.
//!
//! The gateway treats the relational store as opaque: it hands over query
//! text and gets back rows or a descriptive error. Schema and seed data are
//! owned by the implementation.

use std::fmt;

use crate::encoder::Row;

/// Failure reported by a query store.
///
/// The message is surfaced to callers verbatim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreError {
    message: String,
}

impl StoreError {
    /// Create a store error carrying the store's own message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// The store's message.
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for StoreError {}

/// Executes arbitrary query text and returns rows as column maps.
///
/// Implementations may block; async callers run them on a blocking pool.
pub trait QueryStore: Send + Sync + 'static {
    /// Execute `query` and return every row it produces.
    fn execute(&self, query: &str) -> std::result::Result<Vec<Row>, StoreError>;
}

impl<S: QueryStore + ?Sized> QueryStore for std::sync::Arc<S> {
    fn execute(&self, query: &str) -> std::result::Result<Vec<Row>, StoreError> {
        (**self).execute(query)
    }
}
