//! Scripted query store for testing without SQLite.

use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use q2d_core::{QueryStore, Row, StoreError};

/// Build rows from a JSON array literal.
///
/// Panics if `value` is not an array of objects.
pub fn rows(value: serde_json::Value) -> Vec<Row> {
    serde_json::from_value(value).expect("rows must be an array of objects")
}

/// A query store that returns a scripted result and counts executions.
#[derive(Debug)]
pub struct FakeStore {
    response: Mutex<Result<Vec<Row>, StoreError>>,
    queries: Mutex<Vec<String>>,
    calls: AtomicUsize,
}

impl FakeStore {
    /// Store that answers every query with `rows`.
    pub fn with_rows(rows: Vec<Row>) -> Self {
        Self {
            response: Mutex::new(Ok(rows)),
            queries: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
        }
    }

    /// Store that rejects every query with `message`.
    pub fn failing(message: &str) -> Self {
        Self {
            response: Mutex::new(Err(StoreError::new(message))),
            queries: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
        }
    }

    /// Number of `execute` calls so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Query texts received, in order.
    pub fn queries(&self) -> Vec<String> {
        self.queries.lock().unwrap().clone()
    }
}

impl QueryStore for FakeStore {
    fn execute(&self, query: &str) -> Result<Vec<Row>, StoreError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.queries.lock().unwrap().push(query.to_string());
        self.response.lock().unwrap().clone()
    }
}
