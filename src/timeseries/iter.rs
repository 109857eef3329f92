//! Channel Iterator
//!
//! Reconciles two independent grids:
//!
//! ```text
//! pages:   |----p0----|----p1----|----p2----|      fixed, epoch aligned
//! request:      [start ......................stop)
//! chunks:       [--c0--)[--c1--)[--c2--)[-c3-)     aligned to start
//! ```
//!
//! Pages are fetched lazily, trimmed to the request, and either yielded one
//! per page or buffered and cut at chunk boundaries. Dropping an iterator
//! stops all further fetching.

use crate::cache::{PageCache, Segment};
use crate::timeseries::channel::{Channel, TimeRange};
use crate::timeseries::error::{TimeSeriesError, TimeSeriesResult};
use crate::timeseries::page::ChannelPage;
use crate::timeseries::remote::RangeSource;
use futures_util::future::try_join_all;
use futures_util::stream::{self, Stream};
use std::ops::Range;
use std::sync::Arc;

/// Lazily pulls one channel's data over a time range
pub struct ChannelIterator {
    channel: Channel,
    range: TimeRange,
    /// Chunk width in microseconds, `None` for one output per page
    chunk: Option<i64>,
    page_size: u64,
    pages: Range<i64>,
    cache: Option<Arc<PageCache>>,
    source: Arc<dyn RangeSource>,
    buffer: Segment,
    fetched_until: i64,
    window_start: i64,
}

impl ChannelIterator {
    pub fn new(
        channel: Channel,
        range: TimeRange,
        chunk: Option<i64>,
        page_size: u64,
        cache: Option<Arc<PageCache>>,
        source: Arc<dyn RangeSource>,
    ) -> TimeSeriesResult<Self> {
        range.validate()?;
        if let Some(width) = chunk {
            if width <= 0 {
                return Err(TimeSeriesError::InvalidArgument(format!(
                    "chunk width must be positive, got {}",
                    width
                )));
            }
        }

        let page_size = cache.as_ref().map_or(page_size, |cache| cache.page_size());
        if page_size == 0 {
            return Err(TimeSeriesError::InvalidArgument(
                "page size must be positive".to_string(),
            ));
        }
        let pages = channel.pages_covering(&range, page_size);

        Ok(Self {
            channel,
            range,
            chunk,
            page_size,
            pages,
            cache,
            source,
            buffer: Segment::empty(),
            fetched_until: range.start,
            window_start: range.start,
        })
    }

    pub fn channel(&self) -> &Channel {
        &self.channel
    }

    pub fn range(&self) -> TimeRange {
        self.range
    }

    /// Whether [`next_chunk`](Self::next_chunk) will return `None`
    pub fn is_exhausted(&self) -> bool {
        match self.chunk {
            None => self.pages.is_empty(),
            Some(_) => self.window_start >= self.range.end,
        }
    }

    /// Fetch the next page and trim it to both the page and the request
    async fn next_page(&mut self) -> TimeSeriesResult<Option<(TimeRange, Segment)>> {
        let Some(page) = self.pages.next() else {
            return Ok(None);
        };

        let request = ChannelPage::new(&self.channel, page, self.page_size, self.cache.as_deref());
        let data = request.get(self.source.as_ref()).await?;
        let span = request.range().intersect(&self.range);

        Ok(Some((span, data.slice(span.start, span.end))))
    }

    /// The next output segment, or `None` once the range is exhausted
    ///
    /// Per-page mode yields every covering page, empty or not. Chunk mode
    /// yields one segment per chunk window up to the end of the range; the
    /// last window may be shorter.
    pub async fn next_chunk(&mut self) -> TimeSeriesResult<Option<Segment>> {
        let Some(width) = self.chunk else {
            return Ok(self.next_page().await?.map(|(_, data)| data));
        };

        if self.window_start >= self.range.end {
            return Ok(None);
        }
        let window_end = self.window_start.saturating_add(width).min(self.range.end);

        while self.fetched_until < window_end {
            match self.next_page().await? {
                Some((span, data)) => {
                    self.buffer.append(data);
                    self.fetched_until = span.end.max(self.fetched_until);
                }
                None => break,
            }
        }

        let chunk = self.buffer.split_before(window_end);
        self.window_start = window_end;
        Ok(Some(chunk))
    }

    /// Drain the iterator into one segment
    pub async fn collect(mut self) -> TimeSeriesResult<Segment> {
        let mut all = Segment::empty();
        while let Some(chunk) = self.next_chunk().await? {
            all.append(chunk);
        }
        Ok(all)
    }

    /// Stream of chunks, pulled on demand
    pub fn into_stream(self) -> impl Stream<Item = TimeSeriesResult<Segment>> {
        stream::try_unfold(self, |mut iter| async move {
            Ok(iter.next_chunk().await?.map(|chunk| (chunk, iter)))
        })
    }
}

/// Steps several channel iterators in lockstep
pub struct MultiChannelIterator {
    iterators: Vec<ChannelIterator>,
}

impl MultiChannelIterator {
    pub fn new(iterators: Vec<ChannelIterator>) -> Self {
        Self { iterators }
    }

    /// Channels that still have output
    pub fn remaining(&self) -> usize {
        self.iterators.len()
    }

    /// The next chunk of every channel that still produces one
    ///
    /// Channels are fetched concurrently. Returns `None` once every
    /// iterator is exhausted.
    pub async fn next_step(&mut self) -> TimeSeriesResult<Option<Vec<(String, Segment)>>> {
        let chunks = try_join_all(self.iterators.iter_mut().map(|iter| iter.next_chunk())).await?;

        let step: Vec<(String, Segment)> = self
            .iterators
            .iter()
            .zip(chunks)
            .filter_map(|(iter, chunk)| chunk.map(|chunk| (iter.channel().id.clone(), chunk)))
            .collect();

        self.iterators.retain(|iter| !iter.is_exhausted());

        if step.is_empty() {
            Ok(None)
        } else {
            Ok(Some(step))
        }
    }
}
