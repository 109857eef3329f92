//! Page Cache Controller
//!
//! Coordinates the page store and the page index:
//! - Read path: index lookup → page file → decode → touch
//! - Write path: encode → page file → index insert/touch → compaction check
//!
//! Only [`CacheError::CorruptSegment`] escapes a read. Every other failure
//! is logged and reported as a cache miss, or for writes silently dropped,
//! so callers fall back to the remote source and the cache self-heals.

use crate::cache::compactor::{CompactionReport, Compactor};
use crate::cache::error::{CacheError, CacheResult};
use crate::cache::index::{EvictionCandidate, IndexSettings, PageIndex};
use crate::cache::segment::{self, Segment, SEGMENT_FORMAT};
use crate::cache::store::PageStore;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use std::time::Duration;

/// Settings for a page cache
#[derive(Debug, Clone)]
pub struct CacheSettings {
    /// Root directory holding page files
    pub cache_dir: PathBuf,
    /// Path of the index database
    pub cache_index: PathBuf,
    /// Eviction budget in bytes
    pub max_bytes: u64,
    /// Page writes between compaction checks
    pub inspect_interval: u64,
    /// Requested samples per page (a persisted value wins)
    pub page_size: u64,
    /// How long a statement waits on a locked index
    pub index_timeout: Duration,
    /// Run compaction on a background thread instead of inline
    pub background_compaction: bool,
}

impl Default for CacheSettings {
    fn default() -> Self {
        let cache_dir = PathBuf::from(".pennsieve").join("cache");
        Self {
            cache_index: cache_dir.join("index.db"),
            cache_dir,
            max_bytes: 2048 * 1024 * 1024, // 2GB
            inspect_interval: 1000,
            page_size: 3600,
            index_timeout: Duration::from_secs(60),
            background_compaction: true,
        }
    }
}

impl CacheSettings {
    /// Settings rooted at `cache_dir` with the index inside it
    pub fn new(cache_dir: impl Into<PathBuf>) -> Self {
        let cache_dir = cache_dir.into();
        Self {
            cache_index: cache_dir.join("index.db"),
            cache_dir,
            ..Default::default()
        }
    }

    fn index_settings(&self, page_size: u64) -> IndexSettings {
        IndexSettings {
            page_size,
            format: SEGMENT_FORMAT.to_string(),
            max_bytes: self.max_bytes,
            modified: None,
        }
    }
}

/// Snapshot of cache occupancy
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub pages: u64,
    pub data_pages: u64,
    pub size_bytes: u64,
    pub max_bytes: u64,
    pub page_size: u64,
}

impl std::fmt::Display for CacheStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Pages: {} ({} with data), Size: {:.2} MB / {:.2} MB, Page size: {}",
            self.pages,
            self.data_pages,
            self.size_bytes as f64 / (1024.0 * 1024.0),
            self.max_bytes as f64 / (1024.0 * 1024.0),
            self.page_size
        )
    }
}

/// Disk-backed page cache shared by all channels of a client
pub struct PageCache {
    settings: CacheSettings,
    page_size: u64,
    store: PageStore,
    index: Mutex<PageIndex>,
    write_counter: AtomicU64,
}

impl PageCache {
    /// Open the cache, creating or validating its index
    ///
    /// A page size already persisted in the index overrides the requested
    /// one. An index written by an incompatible client is wiped and rebuilt.
    pub fn open(settings: CacheSettings) -> CacheResult<Self> {
        if settings.page_size == 0 {
            return Err(CacheError::InvalidSettings(
                "page size must be positive".to_string(),
            ));
        }

        let store = PageStore::open(&settings.cache_dir)?;
        let mut index = PageIndex::new(&settings.cache_index, settings.index_timeout);
        let initial = settings.index_settings(settings.page_size);

        let persisted = match index.initialize(&initial) {
            Ok(persisted) => persisted,
            Err(CacheError::StaleFormat(reason)) => {
                tracing::warn!(
                    "Deprecated cache format detected - clearing & reinitializing cache ({})",
                    reason
                );
                wipe(&mut index, &store);
                index.initialize(&initial)?
            }
            Err(e) => return Err(e),
        };

        if persisted.page_size != settings.page_size {
            tracing::warn!(
                "Using existing page_size={} from cache settings (requested page_size={})",
                persisted.page_size,
                settings.page_size
            );
        }
        if persisted.page_size == 0 {
            return Err(CacheError::InvalidSettings(format!(
                "index {:?} records a page size of 0",
                settings.cache_index
            )));
        }

        tracing::info!(
            "Cache - opened {:?} (page_size={}, max_bytes={})",
            settings.cache_dir,
            persisted.page_size,
            settings.max_bytes
        );

        Ok(Self {
            page_size: persisted.page_size,
            store,
            index: Mutex::new(index),
            write_counter: AtomicU64::new(0),
            settings,
        })
    }

    /// Attach to an already initialized cache without touching its tables
    pub(crate) fn attach(settings: CacheSettings, page_size: u64) -> CacheResult<Self> {
        let store = PageStore::open(&settings.cache_dir)?;
        let index = PageIndex::new(&settings.cache_index, settings.index_timeout);
        Ok(Self {
            settings,
            page_size,
            store,
            index: Mutex::new(index),
            write_counter: AtomicU64::new(0),
        })
    }

    /// Authoritative samples per page
    pub fn page_size(&self) -> u64 {
        self.page_size
    }

    pub fn settings(&self) -> &CacheSettings {
        &self.settings
    }

    fn lock_index(&self) -> MutexGuard<'_, PageIndex> {
        self.index.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run `f` against the index, dropping the connection on a lock error
    fn with_index<T>(&self, f: impl FnOnce(&mut PageIndex) -> CacheResult<T>) -> CacheResult<T> {
        let mut index = self.lock_index();
        let result = f(&mut index);
        if let Err(e) = &result {
            if e.is_locked() {
                tracing::warn!("Indexing DB inaccessible, resetting connection ({})", e);
                index.reset();
            }
        }
        result
    }

    /// Whether the index knows the page (with or without data)
    pub fn check_page(&self, channel_id: &str, page: i64) -> bool {
        match self.with_index(|index| index.page_exists(channel_id, page)) {
            Ok(exists) => exists,
            Err(e) => {
                tracing::debug!("Cache - page check failed for {}:{}: {}", channel_id, page, e);
                false
            }
        }
    }

    /// Cached data for a page
    ///
    /// `Ok(None)` is a miss, `Ok(Some(empty))` a page known to hold no
    /// samples. A page file that fails to decode is an error.
    pub fn get_page_data(&self, channel_id: &str, page: i64) -> CacheResult<Option<Segment>> {
        let has_data = match self.with_index(|index| index.page_has_data(channel_id, page)) {
            Ok(has_data) => has_data,
            Err(e) => {
                tracing::warn!("Cache - index lookup failed for {}:{}: {}", channel_id, page, e);
                return Ok(None);
            }
        };

        match has_data {
            None => Ok(None),
            Some(false) => Ok(Some(Segment::empty())),
            Some(true) => {
                let bytes = match self.store.read(channel_id, page) {
                    Ok(bytes) => bytes,
                    Err(CacheError::NotFound { .. }) => {
                        tracing::warn!(
                            "Page file not found: {:?}",
                            self.store.page_path(channel_id, page)
                        );
                        return Ok(None);
                    }
                    Err(e) => {
                        tracing::warn!("Cache - could not read page {}:{}: {}", channel_id, page, e);
                        return Ok(None);
                    }
                };

                let segment = segment::decode(channel_id, &bytes)?;

                if let Err(e) = self.with_index(|index| index.touch_page(channel_id, page, true)) {
                    tracing::debug!("Cache - could not touch page {}:{}: {}", channel_id, page, e);
                }

                Ok(Some(segment))
            }
        }
    }

    /// Store a page's data
    ///
    /// `None` or an empty segment records the page as known-empty. With
    /// `update` the existing row is touched; otherwise a new row is inserted
    /// and an already known page is left as is. Failures are logged only.
    pub fn set_page_data(
        &self,
        channel_id: &str,
        page: i64,
        data: Option<&Segment>,
        update: bool,
    ) {
        let has_data = data.map_or(false, |segment| !segment.is_empty());

        // Only page files count toward the next inspection
        let wrote_file = if let Some(segment) = data.filter(|_| has_data) {
            let written = segment::encode(channel_id, segment)
                .and_then(|bytes| self.store.write(channel_id, page, &bytes));
            if let Err(e) = written {
                tracing::warn!("Cache - could not write page {}:{}: {}", channel_id, page, e);
                return;
            }
            true
        } else {
            false
        };

        let result = self.with_index(|index| {
            if update {
                index.touch_page(channel_id, page, has_data)
            } else {
                index.insert_page(channel_id, page, has_data)
            }
        });

        match result {
            Err(CacheError::DuplicateKey { .. }) => {
                tracing::debug!("Cache - page {}:{} already cached", channel_id, page);
            }
            Err(e) => {
                tracing::warn!("Cache - could not index page {}:{}: {}", channel_id, page, e);
            }
            Ok(()) => {}
        }

        if wrote_file {
            self.page_written();
        }
    }

    fn page_written(&self) {
        let writes = self.write_counter.fetch_add(1, Ordering::Relaxed) + 1;
        if writes > self.settings.inspect_interval {
            self.write_counter.store(0, Ordering::Relaxed);
            self.start_compaction();
        }
    }

    /// Total bytes of page files plus the index file
    pub fn size_bytes(&self) -> u64 {
        let pages = self.store.size_bytes().unwrap_or_else(|e| {
            tracing::warn!("Cache - could not size page store: {}", e);
            0
        });
        pages + self.lock_index().file_size()
    }

    /// Remove every cached page and reinitialize the index
    pub fn clear(&self) -> CacheResult<()> {
        let mut index = self.lock_index();
        wipe(&mut index, &self.store);
        index.initialize(&self.settings.index_settings(self.page_size))?;
        self.write_counter.store(0, Ordering::Relaxed);
        tracing::info!("Cache - cleared {:?}", self.settings.cache_dir);
        Ok(())
    }

    /// Current occupancy
    pub fn stats(&self) -> CacheResult<CacheStats> {
        let (pages, data_pages) =
            self.with_index(|index| Ok((index.page_count()?, index.data_page_count()?)))?;
        Ok(CacheStats {
            pages,
            data_pages,
            size_bytes: self.size_bytes(),
            max_bytes: self.settings.max_bytes,
            page_size: self.page_size,
        })
    }

    /// Bring the cache under budget on the calling thread
    pub fn compact(&self) -> CompactionReport {
        Compactor::new(self).run()
    }

    /// Bring the cache under budget on a dedicated thread
    ///
    /// The thread opens its own index connection so it never contends for
    /// this handle's mutex.
    pub fn spawn_compaction(&self) -> Option<JoinHandle<CompactionReport>> {
        let settings = self.settings.clone();
        let page_size = self.page_size;

        let spawned = std::thread::Builder::new()
            .name("cache-compactor".to_string())
            .spawn(move || match PageCache::attach(settings, page_size) {
                Ok(cache) => cache.compact(),
                Err(e) => {
                    tracing::error!("Cache - compactor could not attach: {}", e);
                    CompactionReport::abandoned_at(0)
                }
            });

        match spawned {
            Ok(handle) => Some(handle),
            Err(e) => {
                tracing::warn!("Cache - could not spawn compaction thread: {}", e);
                None
            }
        }
    }

    /// Start a compaction check the way the settings ask for
    pub fn start_compaction(&self) {
        if self.settings.background_compaction {
            // Detached; the thread exits once the cache is under budget.
            let _ = self.spawn_compaction();
        } else {
            self.compact();
        }
    }

    /// Pages ranked for eviction, oldest and least used first
    pub fn eviction_candidates(&self, limit: usize) -> CacheResult<Vec<EvictionCandidate>> {
        self.with_index(|index| index.eviction_candidates(limit))
    }

    /// Delete pages of one channel from disk and from the index
    pub fn remove_pages(&self, channel_id: &str, pages: &[i64]) -> CacheResult<usize> {
        for &page in pages {
            if let Err(e) = self.store.remove(channel_id, page) {
                tracing::debug!("Cache - could not remove page file {}:{}: {}", channel_id, page, e);
            }
        }
        self.with_index(|index| index.delete_pages(channel_id, pages))
    }

    /// Reclaim free space in the index file
    pub fn vacuum(&self) -> CacheResult<()> {
        self.with_index(|index| index.vacuum())
    }
}

fn wipe(index: &mut PageIndex, store: &PageStore) {
    if let Err(e) = index.delete_all_pages() {
        tracing::debug!("Cache - could not empty page table: {}", e);
    }
    if let Err(e) = index.delete_file() {
        tracing::warn!("Cache - could not delete index {:?}: {}", index.path(), e);
    }
    if let Err(e) = store.wipe() {
        tracing::warn!("Cache - could not wipe {:?}: {}", store.root(), e);
    }
}

/// Open the cache described by `settings` as a shareable handle
///
/// Opening the same directory again yields a handle over the same state.
/// With `start_compaction` a budget check is kicked off right away.
pub fn get_or_create_cache(
    settings: CacheSettings,
    start_compaction: bool,
) -> CacheResult<Arc<PageCache>> {
    let cache = Arc::new(PageCache::open(settings)?);
    if start_compaction {
        cache.start_compaction();
    }
    Ok(cache)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::Connection;
    use std::path::Path;
    use tempfile::tempdir;

    fn test_settings(dir: &Path) -> CacheSettings {
        CacheSettings {
            page_size: 10,
            max_bytes: 16 * 1024 * 1024,
            index_timeout: Duration::from_millis(50),
            background_compaction: false,
            ..CacheSettings::new(dir.join("cache"))
        }
    }

    fn segment(start: i64, n: i64) -> Segment {
        Segment::from_pairs((0..n).map(|i| (start + i * 1000, i as f64)).collect())
    }

    #[test]
    fn test_miss_then_hit() {
        let dir = tempdir().unwrap();
        let cache = PageCache::open(test_settings(dir.path())).unwrap();

        assert!(!cache.check_page("ch", 0));
        assert_eq!(cache.get_page_data("ch", 0).unwrap(), None);

        let data = segment(0, 10);
        cache.set_page_data("ch", 0, Some(&data), false);

        assert!(cache.check_page("ch", 0));
        assert_eq!(cache.get_page_data("ch", 0).unwrap(), Some(data));
    }

    #[test]
    fn test_empty_page_is_known() {
        let dir = tempdir().unwrap();
        let cache = PageCache::open(test_settings(dir.path())).unwrap();

        cache.set_page_data("ch", 4, None, false);
        cache.set_page_data("ch", 5, Some(&Segment::empty()), false);

        assert!(cache.check_page("ch", 4));
        assert_eq!(cache.get_page_data("ch", 4).unwrap(), Some(Segment::empty()));
        assert_eq!(cache.get_page_data("ch", 5).unwrap(), Some(Segment::empty()));
        assert!(cache.store.page_files().unwrap().is_empty());
    }

    #[test]
    fn test_second_insert_keeps_first() {
        let dir = tempdir().unwrap();
        let cache = PageCache::open(test_settings(dir.path())).unwrap();

        cache.set_page_data("ch", 0, None, false);
        cache.set_page_data("ch", 0, None, false);

        let stats = cache.stats().unwrap();
        assert_eq!(stats.pages, 1);
        assert_eq!(stats.data_pages, 0);
    }

    fn counting_settings(dir: &Path, inspect_interval: u64) -> CacheSettings {
        CacheSettings {
            max_bytes: 1,
            inspect_interval,
            ..test_settings(dir)
        }
    }

    #[test]
    fn test_empty_writes_do_not_count_toward_inspection() {
        let dir = tempdir().unwrap();
        let cache = PageCache::open(counting_settings(dir.path(), 3)).unwrap();

        cache.set_page_data("ch", 0, Some(&segment(0, 5)), false);
        cache.set_page_data("ch", 1, None, false);
        cache.set_page_data("ch", 2, Some(&Segment::empty()), false);
        cache.set_page_data("ch", 3, None, false);

        assert_eq!(cache.write_counter.load(Ordering::Relaxed), 1);
        assert!(cache.check_page("ch", 0));
    }

    #[test]
    fn test_data_write_counts_when_already_indexed() {
        let dir = tempdir().unwrap();
        let cache = PageCache::open(counting_settings(dir.path(), 1)).unwrap();

        cache.set_page_data("ch", 0, Some(&segment(0, 5)), false);
        assert_eq!(cache.write_counter.load(Ordering::Relaxed), 1);

        // File is rewritten, the index insert hits the existing row
        cache.set_page_data("ch", 0, Some(&segment(0, 5)), false);

        assert_eq!(cache.write_counter.load(Ordering::Relaxed), 0);
        assert!(!cache.check_page("ch", 0));
    }

    #[test]
    fn test_missing_file_is_a_miss_and_heals() {
        let dir = tempdir().unwrap();
        let cache = PageCache::open(test_settings(dir.path())).unwrap();

        let data = segment(0, 5);
        cache.set_page_data("ch", 2, Some(&data), false);
        std::fs::remove_file(cache.store.page_path("ch", 2)).unwrap();

        assert!(cache.check_page("ch", 2));
        assert_eq!(cache.get_page_data("ch", 2).unwrap(), None);

        cache.set_page_data("ch", 2, Some(&data), true);
        assert_eq!(cache.get_page_data("ch", 2).unwrap(), Some(data));
    }

    #[test]
    fn test_corrupt_file_is_an_error() {
        let dir = tempdir().unwrap();
        let cache = PageCache::open(test_settings(dir.path())).unwrap();

        cache.set_page_data("ch", 0, Some(&segment(0, 5)), false);
        std::fs::write(cache.store.page_path("ch", 0), b"garbage").unwrap();

        assert!(matches!(
            cache.get_page_data("ch", 0),
            Err(CacheError::CorruptSegment(_))
        ));
    }

    #[test]
    fn test_persisted_page_size_wins() {
        let dir = tempdir().unwrap();
        {
            let cache = PageCache::open(test_settings(dir.path())).unwrap();
            cache.set_page_data("ch", 0, Some(&segment(0, 3)), false);
        }

        let settings = CacheSettings {
            page_size: 500,
            ..test_settings(dir.path())
        };
        let cache = PageCache::open(settings).unwrap();

        assert_eq!(cache.page_size(), 10);
        assert!(cache.check_page("ch", 0));
    }

    #[test]
    fn test_zero_page_size_rejected() {
        let dir = tempdir().unwrap();
        let settings = CacheSettings {
            page_size: 0,
            ..test_settings(dir.path())
        };
        assert!(matches!(
            PageCache::open(settings),
            Err(CacheError::InvalidSettings(_))
        ));
    }

    #[test]
    fn test_legacy_index_is_wiped() {
        let dir = tempdir().unwrap();
        let settings = test_settings(dir.path());
        std::fs::create_dir_all(&settings.cache_dir).unwrap();
        std::fs::create_dir_all(settings.cache_dir.join("old_channel")).unwrap();
        std::fs::write(settings.cache_dir.join("old_channel").join("page-0.bin"), b"old").unwrap();
        {
            let conn = Connection::open(&settings.cache_index).unwrap();
            conn.execute_batch(
                "CREATE TABLE settings (ts_page_size INTEGER, max_bytes INTEGER, modified DATETIME);
                 INSERT INTO settings VALUES (3600, 1000, '2017-01-01T00:00:00');
                 CREATE TABLE ts_pages (channel CHAR(50), page INTEGER, access_count INTEGER,
                                        last_access DATETIME, has_data BOOLEAN,
                                        PRIMARY KEY (channel, page));
                 INSERT INTO ts_pages VALUES ('old_channel', 0, 1, '2017-01-01', 1);",
            )
            .unwrap();
        }

        let cache = PageCache::open(settings).unwrap();

        assert_eq!(cache.page_size(), 10);
        assert!(!cache.check_page("old_channel", 0));
        assert!(cache.store.page_files().unwrap().is_empty());
    }

    #[test]
    fn test_clear() {
        let dir = tempdir().unwrap();
        let cache = PageCache::open(test_settings(dir.path())).unwrap();

        for page in 0..4 {
            cache.set_page_data("ch", page, Some(&segment(page * 10_000, 10)), false);
        }
        cache.clear().unwrap();

        assert_eq!(cache.stats().unwrap().pages, 0);
        assert!(!cache.check_page("ch", 0));

        cache.set_page_data("ch", 0, Some(&segment(0, 2)), false);
        assert!(cache.check_page("ch", 0));
    }

    #[test]
    fn test_locked_index_is_absorbed() {
        let dir = tempdir().unwrap();
        let settings = test_settings(dir.path());
        let cache = PageCache::open(settings.clone()).unwrap();

        let blocker = Connection::open(&settings.cache_index).unwrap();
        blocker.execute_batch("BEGIN EXCLUSIVE;").unwrap();

        cache.set_page_data("ch", 0, Some(&segment(0, 3)), false);
        assert!(!cache.check_page("ch", 0));
        assert_eq!(cache.get_page_data("ch", 0).unwrap(), None);

        blocker.execute_batch("ROLLBACK;").unwrap();

        cache.set_page_data("ch", 0, Some(&segment(0, 3)), false);
        assert!(cache.check_page("ch", 0));
    }

    #[test]
    fn test_size_counts_pages_and_index() {
        let dir = tempdir().unwrap();
        let cache = PageCache::open(test_settings(dir.path())).unwrap();
        let before = cache.size_bytes();
        assert!(before > 0);

        cache.set_page_data("ch", 0, Some(&segment(0, 100)), false);
        assert!(cache.size_bytes() >= before + 1600);
    }

    #[test]
    fn test_get_or_create_is_repeatable() {
        let dir = tempdir().unwrap();
        let first = get_or_create_cache(test_settings(dir.path()), true).unwrap();
        first.set_page_data("ch", 1, Some(&segment(0, 3)), false);

        let second = get_or_create_cache(test_settings(dir.path()), false).unwrap();
        assert!(second.check_page("ch", 1));
    }

    #[test]
    fn test_stats_display() {
        let stats = CacheStats {
            pages: 3,
            data_pages: 2,
            size_bytes: 1024 * 1024,
            max_bytes: 2 * 1024 * 1024,
            page_size: 3600,
        };
        assert_eq!(
            stats.to_string(),
            "Pages: 3 (2 with data), Size: 1.00 MB / 2.00 MB, Page size: 3600"
        );
    }
}
