//! Time-series channel retrieval
//!
//! Request flow:
//! ```text
//! TimeSeriesService
//!   └─ ChannelIterator        pages covering [start, stop), cut into chunks
//!        └─ ChannelPage       one page: cache hit or remote fetch
//!             ├─ PageCache    check / get / set
//!             └─ RangeSource  streaming API
//! ```

pub mod channel;
pub mod error;
pub mod iter;
pub mod page;
pub mod remote;
pub mod service;
pub mod timedelta;

pub use channel::{Channel, TimeRange};
pub use error::{TimeSeriesError, TimeSeriesResult};
pub use iter::{ChannelIterator, MultiChannelIterator};
pub use page::ChannelPage;
pub use remote::{HttpRangeSource, RangeSource, RemoteError};
pub use service::TimeSeriesService;
pub use timedelta::parse_timedelta;
