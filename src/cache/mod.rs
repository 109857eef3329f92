//! Time-series page cache
//!
//! Architecture:
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │                  PageCache                   │
//! │   check_page / get_page_data / set_page_data │
//! └──────┬──────────────────┬──────────────┬─────┘
//!        │                  │              │
//!  ┌─────▼──────┐    ┌──────▼─────┐  ┌─────▼─────┐
//!  │ PageIndex  │    │ PageStore  │  │ Compactor │
//!  │  (SQLite)  │    │ page-N.bin │  │   (LRU)   │
//!  └────────────┘    └────────────┘  └───────────┘
//! ```
//!
//! A page is `page_size` consecutive sample periods of one channel. The
//! index records which pages are known and whether they hold data; the
//! store keeps one encoded [`Segment`] per page that holds data.

pub mod compactor;
pub mod controller;
pub mod error;
pub mod index;
pub mod segment;
pub mod store;

pub use compactor::{BackoffPolicy, CompactionReport, Compactor};
pub use controller::{get_or_create_cache, CacheSettings, CacheStats, PageCache};
pub use error::{CacheError, CacheResult};
pub use index::{EvictionCandidate, IndexSettings, PageIndex};
pub use segment::{Segment, SEGMENT_FORMAT};
pub use store::PageStore;
