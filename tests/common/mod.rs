use async_trait::async_trait;
use pennsieve::cache::CacheSettings;
use pennsieve::timeseries::{Channel, RangeSource, RemoteError};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// In-memory streaming API: a fixed set of samples per channel, returned
/// newest first to exercise sorting
#[derive(Default)]
pub struct RecordedSource {
    samples: Vec<(String, i64, f64)>,
    calls: AtomicUsize,
    requests: Mutex<Vec<(String, i64, i64)>>,
}

impl RecordedSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Samples at `rate` Hz for `[0, until)` microseconds
    pub fn with_channel(mut self, channel_id: &str, rate: f64, until: i64) -> Self {
        let period = 1e6 / rate;
        let mut k = 0;
        loop {
            let ts = (k as f64 * period).round() as i64;
            if ts >= until {
                break;
            }
            self.samples.push((channel_id.to_string(), ts, k as f64));
            k += 1;
        }
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<(String, i64, i64)> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl RangeSource for RecordedSource {
    async fn fetch_range(
        &self,
        channel: &Channel,
        start: i64,
        end: i64,
    ) -> Result<Vec<(i64, f64)>, RemoteError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests
            .lock()
            .unwrap()
            .push((channel.id.clone(), start, end));

        Ok(self
            .samples
            .iter()
            .rev()
            .filter(|(id, ts, _)| *id == channel.id && *ts >= start && *ts < end)
            .map(|(_, ts, value)| (*ts, *value))
            .collect())
    }
}

pub fn cache_settings(dir: &Path, page_size: u64) -> CacheSettings {
    CacheSettings {
        page_size,
        index_timeout: Duration::from_secs(1),
        background_compaction: false,
        ..CacheSettings::new(dir.join("cache"))
    }
}
