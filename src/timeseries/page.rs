//! Channel Page Fetcher
//!
//! Resolves one page of one channel: cache hit if possible, otherwise a
//! remote range fetch written through to the cache.

use crate::cache::{PageCache, Segment};
use crate::timeseries::channel::{Channel, TimeRange};
use crate::timeseries::error::TimeSeriesResult;
use crate::timeseries::remote::RangeSource;

/// One page request
pub struct ChannelPage<'a> {
    channel: &'a Channel,
    page: i64,
    range: TimeRange,
    cache: Option<&'a PageCache>,
}

impl<'a> ChannelPage<'a> {
    /// `page_size` is ignored when a cache is given; the cache's persisted
    /// page size defines the grid.
    pub fn new(
        channel: &'a Channel,
        page: i64,
        page_size: u64,
        cache: Option<&'a PageCache>,
    ) -> Self {
        let page_size = cache.map_or(page_size, |cache| cache.page_size());
        Self {
            channel,
            page,
            range: channel.page_range(page, page_size),
            cache,
        }
    }

    pub fn page(&self) -> i64 {
        self.page
    }

    /// Time covered by this page
    pub fn range(&self) -> TimeRange {
        self.range
    }

    /// The page's samples, sorted by timestamp
    pub async fn get(&self, source: &dyn RangeSource) -> TimeSeriesResult<Segment> {
        let mut cache_exists = false;

        if let Some(cache) = self.cache {
            cache_exists = cache.check_page(&self.channel.id, self.page);
            if cache_exists {
                if let Some(data) = cache.get_page_data(&self.channel.id, self.page)? {
                    tracing::debug!("Cache hit: {} page {}", self.channel.id, self.page);
                    return Ok(data);
                }
                tracing::debug!(
                    "Cache entry vanished: {} page {}, refetching",
                    self.channel.id,
                    self.page
                );
            }
        }

        let pairs = source
            .fetch_range(self.channel, self.range.start, self.range.end)
            .await?;
        let data = Segment::from_pairs(pairs);

        if let Some(cache) = self.cache {
            cache.set_page_data(&self.channel.id, self.page, Some(&data), cache_exists);
        }

        Ok(data)
    }
}
