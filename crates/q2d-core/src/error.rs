//! Error types for q2d-core.

use thiserror::Error;

/// Main error type for query2dance operations.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error from underlying system calls.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Codec error during encoding/decoding.
    #[error("codec error: {message}")]
    Codec { message: String },

    /// Connection was closed.
    #[error("connection closed")]
    ConnectionClosed,

    /// Transport layer error.
    #[error("transport error: {message}")]
    Transport { message: String },

    /// Query store failure.
    #[error("store error: {0}")]
    Store(#[from] crate::store::StoreError),

    /// Invalid configuration.
    #[error("config error: {message}")]
    Config { message: String },
}

impl Error {
    /// Returns true if retrying the same operation cannot succeed.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::Config { .. })
    }
}

/// Convenience result type for query2dance operations.
pub type Result<T> = std::result::Result<T, Error>;
