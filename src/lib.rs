//! # Pennsieve time-series client
//!
//! Channel data retrieval with a local, size-bounded paging cache.
//!
//! ## Features
//!
//! - **Paging cache**: fixed-size, epoch-aligned pages stored one file per page
//! - **Durable index**: SQLite ledger of known pages and their access history
//! - **Compaction**: approximate-LRU eviction once the cache exceeds its budget
//! - **Chunked iteration**: caller-sized time windows assembled from cached pages
//!
//! ## Modules
//!
//! - [`cache`]: page store, index, codec, controller and compactor
//! - [`timeseries`]: channel page fetching, iteration and the retrieval service
//! - [`config`]: TOML configuration with environment overrides
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use pennsieve::config::Config;
//! use pennsieve::timeseries::{parse_timedelta, Channel, TimeRange, TimeSeriesService};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::load_default();
//!     let service = TimeSeriesService::new(&config)?;
//!
//!     let channel = Channel::new("N:channel:6d3b1c2a", 250.0)?;
//!     let range = TimeRange::from_length(1_500_000_000_000_000, 60_000_000);
//!
//!     // Ten-second chunks; pages are fetched and cached as needed
//!     let mut iter = service.channel_iter(channel, range, parse_timedelta("10s"))?;
//!     while let Some(chunk) = iter.next_chunk().await? {
//!         println!("{} samples", chunk.len());
//!     }
//!
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod config;
pub mod timeseries;

// Re-export top-level types for convenience
pub use cache::{
    get_or_create_cache, CacheError, CacheResult, CacheSettings, CacheStats, CompactionReport,
    PageCache, Segment,
};

pub use timeseries::{
    parse_timedelta, Channel, ChannelIterator, HttpRangeSource, MultiChannelIterator,
    RangeSource, RemoteError, TimeRange, TimeSeriesError, TimeSeriesResult, TimeSeriesService,
};

pub use config::{ApiConfig, CacheConfig, Config, ConfigError, LoggingConfig};
