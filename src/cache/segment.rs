//! Segment type and binary codec for cached pages
//!
//! A segment is the sample data of one page: two equal-length arrays of
//! timestamps (microseconds since epoch) and values.
//!
//! On-disk layout (bincode envelope):
//! ```text
//! ┌─────────────────────────────────────────┐
//! │ channel_id: String                      │
//! │ index:  [u8] = i64 LE × N (timestamps)  │
//! │ data:   [u8] = f64 LE × N (values)      │
//! │ checksum: u32 (CRC32 of index ++ data)  │
//! └─────────────────────────────────────────┘
//! ```
//!
//! No compression: fixed-width raw arrays keep decode a straight copy.

use crate::cache::error::{CacheError, CacheResult};
use serde::{Deserialize, Serialize};

/// Format identifier recorded in the index settings table
pub const SEGMENT_FORMAT: &str = "BINCODE-CRC32";

const TIMESTAMP_WIDTH: usize = std::mem::size_of::<i64>();
const VALUE_WIDTH: usize = std::mem::size_of::<f64>();

/// Sample data of one channel over some time window
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Segment {
    timestamps: Vec<i64>,
    values: Vec<f64>,
}

impl Segment {
    /// Create an empty segment
    pub fn empty() -> Self {
        Self::default()
    }

    /// Build from parallel arrays that are already in timestamp order
    pub fn from_sorted(timestamps: Vec<i64>, values: Vec<f64>) -> CacheResult<Self> {
        if timestamps.len() != values.len() {
            return Err(CacheError::CorruptSegment(format!(
                "timestamp/value length mismatch: {} vs {}",
                timestamps.len(),
                values.len()
            )));
        }
        Ok(Self { timestamps, values })
    }

    /// Build from (timestamp, value) pairs in any order
    ///
    /// Pairs are sorted by timestamp with values carried along. The sort is
    /// stable, so samples sharing a timestamp keep their arrival order.
    pub fn from_pairs(mut pairs: Vec<(i64, f64)>) -> Self {
        pairs.sort_by_key(|&(ts, _)| ts);
        let (timestamps, values) = pairs.into_iter().unzip();
        Self { timestamps, values }
    }

    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }

    pub fn timestamps(&self) -> &[i64] {
        &self.timestamps
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn first_timestamp(&self) -> Option<i64> {
        self.timestamps.first().copied()
    }

    pub fn last_timestamp(&self) -> Option<i64> {
        self.timestamps.last().copied()
    }

    /// Iterate over (timestamp, value) pairs
    pub fn iter(&self) -> impl Iterator<Item = (i64, f64)> + '_ {
        self.timestamps
            .iter()
            .copied()
            .zip(self.values.iter().copied())
    }

    /// Samples with `start <= ts < stop`
    pub fn slice(&self, start: i64, stop: i64) -> Segment {
        let lo = self.timestamps.partition_point(|&ts| ts < start);
        let hi = self.timestamps.partition_point(|&ts| ts < stop).max(lo);
        Segment {
            timestamps: self.timestamps[lo..hi].to_vec(),
            values: self.values[lo..hi].to_vec(),
        }
    }

    /// Remove and return all samples with `ts < boundary`
    pub fn split_before(&mut self, boundary: i64) -> Segment {
        let at = self.timestamps.partition_point(|&ts| ts < boundary);
        let rest_ts = self.timestamps.split_off(at);
        let rest_vals = self.values.split_off(at);
        Segment {
            timestamps: std::mem::replace(&mut self.timestamps, rest_ts),
            values: std::mem::replace(&mut self.values, rest_vals),
        }
    }

    /// Append another segment whose samples follow this one
    pub fn append(&mut self, other: Segment) {
        self.timestamps.extend(other.timestamps);
        self.values.extend(other.values);
    }
}

/// Serialized envelope
#[derive(Serialize, Deserialize)]
struct EncodedSegment {
    channel_id: String,
    index: Vec<u8>,
    data: Vec<u8>,
    checksum: u32,
}

fn checksum(index: &[u8], data: &[u8]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(index);
    hasher.update(data);
    hasher.finalize()
}

/// Encode a segment for the page store
pub fn encode(channel_id: &str, segment: &Segment) -> CacheResult<Vec<u8>> {
    let mut index = Vec::with_capacity(segment.len() * TIMESTAMP_WIDTH);
    for ts in &segment.timestamps {
        index.extend_from_slice(&ts.to_le_bytes());
    }

    let mut data = Vec::with_capacity(segment.len() * VALUE_WIDTH);
    for value in &segment.values {
        data.extend_from_slice(&value.to_le_bytes());
    }

    let encoded = EncodedSegment {
        channel_id: channel_id.to_string(),
        checksum: checksum(&index, &data),
        index,
        data,
    };

    bincode::serialize(&encoded).map_err(|e| CacheError::Serialization(e.to_string()))
}

/// Decode a segment read from the page store
pub fn decode(channel_id: &str, bytes: &[u8]) -> CacheResult<Segment> {
    let encoded: EncodedSegment = bincode::deserialize(bytes)?;

    if encoded.index.len() % TIMESTAMP_WIDTH != 0 {
        return Err(CacheError::CorruptSegment(format!(
            "timestamp blob of {} bytes is not a multiple of {}",
            encoded.index.len(),
            TIMESTAMP_WIDTH
        )));
    }
    if encoded.data.len() % VALUE_WIDTH != 0 {
        return Err(CacheError::CorruptSegment(format!(
            "value blob of {} bytes is not a multiple of {}",
            encoded.data.len(),
            VALUE_WIDTH
        )));
    }

    let computed = checksum(&encoded.index, &encoded.data);
    if computed != encoded.checksum {
        return Err(CacheError::CorruptSegment(format!(
            "checksum mismatch for channel {}: stored={}, computed={}",
            channel_id, encoded.checksum, computed
        )));
    }

    if encoded.channel_id != channel_id {
        tracing::debug!(
            "Segment written for channel {} read as {}",
            encoded.channel_id,
            channel_id
        );
    }

    let timestamps: Vec<i64> = encoded
        .index
        .chunks_exact(TIMESTAMP_WIDTH)
        .map(|chunk| {
            let mut buf = [0u8; TIMESTAMP_WIDTH];
            buf.copy_from_slice(chunk);
            i64::from_le_bytes(buf)
        })
        .collect();

    let values: Vec<f64> = encoded
        .data
        .chunks_exact(VALUE_WIDTH)
        .map(|chunk| {
            let mut buf = [0u8; VALUE_WIDTH];
            buf.copy_from_slice(chunk);
            f64::from_le_bytes(buf)
        })
        .collect();

    Segment::from_sorted(timestamps, values)
}
