//! Budget-driven cache compaction
//!
//! ```text
//! size > 0.9 × max_bytes ?
//!   ├─ no  → done
//!   └─ yes → pick N least recently used pages
//!            delete files + index rows, VACUUM, measure again
//! ```
//!
//! A locked index makes the compactor sleep and retry with a doubling
//! delay; once the delay reaches the policy maximum it gives up and leaves
//! the cache for the next check.

use crate::cache::controller::PageCache;
use crate::cache::error::CacheResult;
use serde::Serialize;
use std::collections::BTreeMap;
use std::time::Duration;

/// Fraction of the budget compaction shrinks the cache to
pub const TARGET_RATIO: f64 = 0.9;

/// Retry delays while the index is locked
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub initial: Duration,
    pub max: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            initial: Duration::from_secs(2),
            max: Duration::from_secs(1024),
        }
    }
}

/// Outcome of one compaction run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CompactionReport {
    /// Eviction batches that removed at least one page
    pub passes: u32,
    pub pages_evicted: usize,
    pub initial_bytes: u64,
    pub final_bytes: u64,
    /// Gave up before reaching the target
    pub abandoned: bool,
}

impl CompactionReport {
    pub(crate) fn abandoned_at(bytes: u64) -> Self {
        Self {
            initial_bytes: bytes,
            final_bytes: bytes,
            abandoned: true,
            ..Default::default()
        }
    }
}

/// Pages to evict for an overage of `over_bytes`
///
/// Assumes roughly 100 bytes per sample and overshoots by half, plus a
/// fixed margin, so a single pass usually suffices.
pub fn batch_size(over_bytes: f64, page_size: u64) -> usize {
    let pages = (1.5 * (over_bytes / 100.0) / page_size.max(1) as f64).ceil();
    pages.max(0.0) as usize + 5
}

/// Evicts least recently used pages until the cache fits its budget
pub struct Compactor<'a> {
    cache: &'a PageCache,
    backoff: BackoffPolicy,
}

impl<'a> Compactor<'a> {
    pub fn new(cache: &'a PageCache) -> Self {
        Self {
            cache,
            backoff: BackoffPolicy::default(),
        }
    }

    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    /// Compact until at or below the target size
    pub fn run(&self) -> CompactionReport {
        let max_bytes = self.cache.settings().max_bytes;
        let target = max_bytes as f64 * TARGET_RATIO;
        let page_size = self.cache.page_size();

        let mut current = self.cache.size_bytes();
        let mut report = CompactionReport {
            initial_bytes: current,
            ..Default::default()
        };
        let mut wait = self.backoff.initial;

        tracing::debug!("Cache - inspecting (current: {} bytes, max: {} bytes)", current, max_bytes);

        while current as f64 > target {
            let n = batch_size(current as f64 - target, page_size);

            match self.evict_batch(n) {
                Ok(0) => {
                    tracing::warn!(
                        "Cache - {} bytes over budget with no pages left to evict",
                        current as f64 - target
                    );
                    break;
                }
                Ok(evicted) => {
                    report.passes += 1;
                    report.pages_evicted += evicted;
                    tracing::debug!("Cache - evicted {} pages", evicted);
                }
                Err(e) if e.is_locked() => {
                    if wait >= self.backoff.max {
                        tracing::error!("Cache - unable to compact cache: index stayed locked");
                        report.abandoned = true;
                        break;
                    }
                    tracing::debug!("Cache - index DB was locked, waiting {:?}", wait);
                    std::thread::sleep(wait);
                    wait *= 2;
                }
                Err(e) => {
                    tracing::error!("Cache - compaction failed: {}", e);
                    report.abandoned = true;
                    break;
                }
            }

            current = self.cache.size_bytes();
        }

        report.final_bytes = current;
        if report.pages_evicted > 0 {
            tracing::info!(
                "Cache - compacted {} pages ({} → {} bytes)",
                report.pages_evicted,
                report.initial_bytes,
                report.final_bytes
            );
        }
        report
    }

    fn evict_batch(&self, n: usize) -> CacheResult<usize> {
        let candidates = self.cache.eviction_candidates(n)?;
        if candidates.is_empty() {
            return Ok(0);
        }

        let mut by_channel: BTreeMap<&str, Vec<i64>> = BTreeMap::new();
        for candidate in &candidates {
            by_channel
                .entry(candidate.channel.as_str())
                .or_default()
                .push(candidate.page);
        }

        let mut removed = 0;
        for (channel, pages) in by_channel {
            removed += self.cache.remove_pages(channel, &pages)?;
        }

        if let Err(e) = self.cache.vacuum() {
            tracing::debug!("Cache - vacuum skipped: {}", e);
        }

        Ok(removed)
    }
}
