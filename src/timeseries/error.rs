//! Time-series retrieval errors

use crate::cache::CacheError;
use crate::timeseries::remote::RemoteError;
use thiserror::Error;

/// Errors surfaced by channel page fetches and iterators
#[derive(Error, Debug)]
pub enum TimeSeriesError {
    #[error("Invalid time range: end {end} precedes start {start}")]
    InvalidRange { start: i64, end: i64 },

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Only corrupt cached pages reach callers; other cache failures are
    /// absorbed inside the cache.
    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error("Remote fetch failed: {0}")]
    Remote(#[from] RemoteError),
}

pub type TimeSeriesResult<T> = Result<T, TimeSeriesError>;
