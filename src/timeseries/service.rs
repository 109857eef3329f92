//! Time-series retrieval service
//!
//! Owns the page cache handle and the remote source for the life of a
//! client. Every iterator it hands out shares both.

use crate::cache::{get_or_create_cache, CacheSettings, PageCache, Segment};
use crate::config::Config;
use crate::timeseries::channel::{Channel, TimeRange};
use crate::timeseries::error::TimeSeriesResult;
use crate::timeseries::iter::{ChannelIterator, MultiChannelIterator};
use crate::timeseries::remote::{HttpRangeSource, RangeSource};
use std::sync::Arc;

pub struct TimeSeriesService {
    settings: CacheSettings,
    cache: Option<Arc<PageCache>>,
    source: Arc<dyn RangeSource>,
}

impl TimeSeriesService {
    /// Service backed by the streaming API
    pub fn new(config: &Config) -> TimeSeriesResult<Self> {
        let source = HttpRangeSource::new(config.api.clone())?;
        Ok(Self::with_source(
            config.cache_settings(),
            config.cache.use_cache,
            Arc::new(source),
        ))
    }

    /// Service over any range source
    ///
    /// A cache that cannot be opened is logged and skipped; retrieval then
    /// goes straight to the source.
    pub fn with_source(
        settings: CacheSettings,
        use_cache: bool,
        source: Arc<dyn RangeSource>,
    ) -> Self {
        let cache = if use_cache {
            match get_or_create_cache(settings.clone(), true) {
                Ok(cache) => Some(cache),
                Err(e) => {
                    tracing::warn!(
                        "Cache unavailable at {:?}, continuing without it: {}",
                        settings.cache_dir,
                        e
                    );
                    None
                }
            }
        } else {
            None
        };

        Self {
            settings,
            cache,
            source,
        }
    }

    pub fn cache(&self) -> Option<&Arc<PageCache>> {
        self.cache.as_ref()
    }

    /// Samples per page in effect
    pub fn page_size(&self) -> u64 {
        self.cache
            .as_ref()
            .map_or(self.settings.page_size, |cache| cache.page_size())
    }

    /// Iterator over one channel
    ///
    /// `chunk` is a window width in microseconds; `None` yields one segment
    /// per page.
    pub fn channel_iter(
        &self,
        channel: Channel,
        range: TimeRange,
        chunk: Option<i64>,
    ) -> TimeSeriesResult<ChannelIterator> {
        ChannelIterator::new(
            channel,
            range,
            chunk,
            self.page_size(),
            self.cache.clone(),
            self.source.clone(),
        )
    }

    /// Iterator stepping all `channels` through `range` together
    pub fn get_data_iter(
        &self,
        channels: &[Channel],
        range: TimeRange,
        chunk: Option<i64>,
    ) -> TimeSeriesResult<MultiChannelIterator> {
        let iterators = channels
            .iter()
            .map(|channel| self.channel_iter(channel.clone(), range, chunk))
            .collect::<TimeSeriesResult<Vec<_>>>()?;
        Ok(MultiChannelIterator::new(iterators))
    }

    /// All data of `channels` in `range`, one segment per channel
    pub async fn get_data(
        &self,
        channels: &[Channel],
        range: TimeRange,
    ) -> TimeSeriesResult<Vec<(String, Segment)>> {
        let mut results: Vec<(String, Segment)> = channels
            .iter()
            .map(|channel| (channel.id.clone(), Segment::empty()))
            .collect();

        let mut iter = self.get_data_iter(channels, range, None)?;
        while let Some(step) = iter.next_step().await? {
            for (channel_id, segment) in step {
                if let Some((_, all)) = results.iter_mut().find(|(id, _)| *id == channel_id) {
                    all.append(segment);
                }
            }
        }

        Ok(results)
    }
}
