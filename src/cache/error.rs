//! Cache error types
//!
//! Defines all errors that can occur in the paging cache.

use rusqlite::ErrorCode;
use thiserror::Error;

/// Errors that can occur in the paging cache
#[derive(Error, Debug)]
pub enum CacheError {
    /// Page file absent from the page store
    #[error("Page not found: channel={channel} page={page}")]
    NotFound { channel: String, page: i64 },

    /// Malformed segment payload
    #[error("Corrupt segment: {0}")]
    CorruptSegment(String),

    /// (channel, page) row already present in the index
    #[error("Duplicate page: channel={channel} page={page}")]
    DuplicateKey { channel: String, page: i64 },

    /// Index database busy or locked by another connection
    #[error("Index locked: {0}")]
    IndexLocked(String),

    /// Index was initialized by an older client with an incompatible layout
    #[error("Stale cache format: {0}")]
    StaleFormat(String),

    /// I/O operation failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Settings the cache cannot operate with
    #[error("Invalid cache settings: {0}")]
    InvalidSettings(String),

    /// Any other index database failure
    #[error("Index error: {0}")]
    Index(String),

    /// Serialization/deserialization failed
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl CacheError {
    /// Whether the error is a transient lock on the index database
    pub fn is_locked(&self) -> bool {
        matches!(self, CacheError::IndexLocked(_))
    }
}

impl From<rusqlite::Error> for CacheError {
    fn from(err: rusqlite::Error) -> Self {
        match err.sqlite_error_code() {
            Some(ErrorCode::DatabaseBusy) | Some(ErrorCode::DatabaseLocked) => {
                CacheError::IndexLocked(err.to_string())
            }
            _ => CacheError::Index(err.to_string()),
        }
    }
}

impl From<bincode::Error> for CacheError {
    fn from(err: bincode::Error) -> Self {
        CacheError::CorruptSegment(err.to_string())
    }
}

/// Result type alias for cache operations
pub type CacheResult<T> = Result<T, CacheError>;
