//! Channel value type and page geometry
//!
//! Pages are laid out on an absolute grid anchored at the epoch:
//!
//! ```text
//! page p covers [p × width, (p + 1) × width)    width = page_size / rate × 1e6 µs
//! ```
//!
//! so two channels with the same rate share page boundaries regardless of
//! where their recordings start.

use crate::timeseries::error::{TimeSeriesError, TimeSeriesResult};
use std::ops::Range;

/// A sampled channel, identified by id
#[derive(Debug, Clone, PartialEq)]
pub struct Channel {
    pub id: String,
    /// Sampling rate in Hz
    pub rate: f64,
}

impl Channel {
    pub fn new(id: impl Into<String>, rate: f64) -> TimeSeriesResult<Self> {
        let id = id.into();
        if !(rate.is_finite() && rate > 0.0) {
            return Err(TimeSeriesError::InvalidArgument(format!(
                "channel {} has invalid rate {}",
                id, rate
            )));
        }
        Ok(Self { id, rate })
    }

    /// Width of one page in microseconds
    pub fn page_width(&self, page_size: u64) -> i64 {
        let width = (1e6 / self.rate * page_size as f64) as i64;
        width.max(1)
    }

    /// Time covered by `page`
    pub fn page_range(&self, page: i64, page_size: u64) -> TimeRange {
        let width = self.page_width(page_size);
        let start = page * width;
        TimeRange {
            start,
            end: start + width,
        }
    }

    /// Page numbers whose time spans intersect `range`
    pub fn pages_covering(&self, range: &TimeRange, page_size: u64) -> Range<i64> {
        let width = self.page_width(page_size);
        let first = range.start.div_euclid(width);
        if range.is_empty() {
            return first..first;
        }
        let last = -(-range.end).div_euclid(width);
        first..last.max(first)
    }
}

/// Half-open time window `[start, end)` in microseconds since the epoch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeRange {
    pub start: i64,
    pub end: i64,
}

impl TimeRange {
    pub fn new(start: i64, end: i64) -> Self {
        Self { start, end }
    }

    /// Window of `length` microseconds beginning at `start`
    pub fn from_length(start: i64, length: i64) -> Self {
        Self {
            start,
            end: start + length,
        }
    }

    pub fn duration(&self) -> i64 {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.end <= self.start
    }

    pub fn contains(&self, ts: i64) -> bool {
        ts >= self.start && ts < self.end
    }

    /// Overlap of two windows, possibly empty
    pub fn intersect(&self, other: &TimeRange) -> TimeRange {
        TimeRange {
            start: self.start.max(other.start),
            end: self.end.min(other.end),
        }
    }

    pub(crate) fn validate(&self) -> TimeSeriesResult<()> {
        if self.end < self.start {
            return Err(TimeSeriesError::InvalidRange {
                start: self.start,
                end: self.end,
            });
        }
        Ok(())
    }
}
