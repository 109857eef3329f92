//! Page Index - SQLite-backed page metadata and eviction ledger
//!
//! Two tables live in a single database file:
//!
//! ```text
//! ts_pages (channel, page, access_count, last_access, has_data)
//!          PRIMARY KEY (channel, page)
//! settings (ts_page_size, ts_format, max_bytes, modified)
//! ```
//!
//! The index is the source of truth for "is this page known" and for
//! eviction ranking. Several processes may open the same file; SQLite's own
//! file locking serializes statements and a busy connection surfaces as
//! [`CacheError::IndexLocked`] once the busy timeout elapses.

use crate::cache::error::{CacheError, CacheResult};
use chrono::{SecondsFormat, Utc};
use rusqlite::{params, Connection, ErrorCode, OpenFlags, OptionalExtension};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Persisted cache settings row
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexSettings {
    /// Samples per page
    pub page_size: u64,
    /// Segment codec identifier
    pub format: String,
    /// Eviction budget in bytes
    pub max_bytes: u64,
    /// Last modification time (RFC 3339)
    pub modified: Option<String>,
}

/// A page ranked for eviction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvictionCandidate {
    pub channel: String,
    pub page: i64,
    pub access_count: i64,
    pub last_access: String,
}

/// Current time in the index's timestamp format
///
/// Fixed-width UTC with microseconds, so text order equals time order.
pub(crate) fn now_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// SQLite-backed page metadata store
///
/// The connection is opened lazily and can be dropped with [`reset`] after
/// a lock error; the next operation reconnects.
///
/// [`reset`]: PageIndex::reset
pub struct PageIndex {
    conn: Option<Connection>,
    path: PathBuf,
    busy_timeout: Duration,
}

impl PageIndex {
    /// Create a handle for the index at `path` without connecting yet
    pub fn new(path: impl Into<PathBuf>, busy_timeout: Duration) -> Self {
        Self {
            conn: None,
            path: path.into(),
            busy_timeout,
        }
    }

    fn conn(&mut self) -> CacheResult<&mut Connection> {
        if self.conn.is_none() {
            if let Some(parent) = self.path.parent() {
                crate::cache::store::create_shared_dir(parent)?;
            }

            let conn = Connection::open_with_flags(
                &self.path,
                OpenFlags::SQLITE_OPEN_READ_WRITE
                    | OpenFlags::SQLITE_OPEN_CREATE
                    | OpenFlags::SQLITE_OPEN_NO_MUTEX,
            )?;
            conn.busy_timeout(self.busy_timeout)?;
            conn.execute_batch("PRAGMA synchronous = NORMAL;")?;

            self.conn = Some(conn);
        }

        self.conn
            .as_mut()
            .ok_or_else(|| CacheError::Index("index connection unavailable".to_string()))
    }

    /// Drop the current connection; the next call reopens it
    pub fn reset(&mut self) {
        if let Some(conn) = self.conn.take() {
            if let Err((_, e)) = conn.close() {
                tracing::debug!("Cache - error closing index connection: {}", e);
            }
        }
    }

    /// Whether both tables exist
    pub fn is_initialized(&mut self) -> CacheResult<bool> {
        let conn = self.conn()?;
        Ok(table_exists(conn, "ts_pages")? && table_exists(conn, "settings")?)
    }

    /// Create missing tables and return the authoritative settings
    ///
    /// A fresh index stores `initial`. An existing index returns its persisted
    /// settings, or [`CacheError::StaleFormat`] when the settings table
    /// predates the format column.
    pub fn initialize(&mut self, initial: &IndexSettings) -> CacheResult<IndexSettings> {
        let path = self.path.clone();
        let conn = self.conn()?;
        let tx = conn.transaction()?;

        if !table_exists(&tx, "ts_pages")? {
            tracing::info!("Cache - Creating 'ts_pages' table");
            tx.execute(
                "CREATE TABLE ts_pages (
                    channel      CHAR(50) NOT NULL,
                    page         INTEGER NOT NULL,
                    access_count INTEGER NOT NULL,
                    last_access  DATETIME NOT NULL,
                    has_data     BOOLEAN,
                    PRIMARY KEY (channel, page)
                )",
                [],
            )?;
        }

        let settings = if !table_exists(&tx, "settings")? {
            tracing::info!("Cache - Creating 'settings' table");
            tx.execute(
                "CREATE TABLE settings (
                    ts_page_size INTEGER NOT NULL,
                    ts_format    CHAR(50) NOT NULL,
                    max_bytes    INTEGER NOT NULL,
                    modified     DATETIME
                )",
                [],
            )?;

            let modified = now_timestamp();
            tx.execute(
                "INSERT INTO settings (ts_page_size, ts_format, max_bytes, modified)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    initial.page_size as i64,
                    initial.format,
                    initial.max_bytes as i64,
                    modified
                ],
            )?;

            IndexSettings {
                modified: Some(modified),
                ..initial.clone()
            }
        } else {
            let columns = table_columns(&tx, "settings")?;
            if !columns.iter().any(|c| c == "ts_format") {
                return Err(CacheError::StaleFormat(format!(
                    "settings table in {:?} has no ts_format column",
                    path
                )));
            }

            let persisted = tx
                .query_row(
                    "SELECT ts_page_size, ts_format, max_bytes, modified FROM settings LIMIT 1",
                    [],
                    |row| {
                        Ok(IndexSettings {
                            page_size: row.get::<_, i64>(0)? as u64,
                            format: row.get(1)?,
                            max_bytes: row.get::<_, i64>(2)? as u64,
                            modified: row.get(3)?,
                        })
                    },
                )
                .optional()?;

            persisted.unwrap_or_else(|| initial.clone())
        };

        tx.commit()?;
        Ok(settings)
    }

    /// Record a newly cached page
    ///
    /// Fails with [`CacheError::DuplicateKey`] if the page is already known.
    pub fn insert_page(&mut self, channel: &str, page: i64, has_data: bool) -> CacheResult<()> {
        let now = now_timestamp();
        let result = self.conn()?.execute(
            "INSERT INTO ts_pages (channel, page, access_count, last_access, has_data)
             VALUES (?1, ?2, 0, ?3, ?4)",
            params![channel, page, now, has_data],
        );

        match result {
            Ok(_) => Ok(()),
            Err(e) if e.sqlite_error_code() == Some(ErrorCode::ConstraintViolation) => {
                Err(CacheError::DuplicateKey {
                    channel: channel.to_string(),
                    page,
                })
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Whether the index knows the page
    pub fn page_exists(&mut self, channel: &str, page: i64) -> CacheResult<bool> {
        let found = self
            .conn()?
            .prepare_cached("SELECT 1 FROM ts_pages WHERE channel = ?1 AND page = ?2")?
            .exists(params![channel, page])?;
        Ok(found)
    }

    /// `Some(has_data)` for a known page, `None` for an unknown one
    pub fn page_has_data(&mut self, channel: &str, page: i64) -> CacheResult<Option<bool>> {
        let has_data = self
            .conn()?
            .prepare_cached("SELECT has_data FROM ts_pages WHERE channel = ?1 AND page = ?2")?
            .query_row(params![channel, page], |row| row.get::<_, Option<bool>>(0))
            .optional()?;
        Ok(has_data.map(|flag| flag.unwrap_or(false)))
    }

    /// Bump the access counter, refresh the access time and set `has_data`
    pub fn touch_page(&mut self, channel: &str, page: i64, has_data: bool) -> CacheResult<()> {
        let now = now_timestamp();
        self.conn()?.execute(
            "UPDATE ts_pages
             SET access_count = access_count + 1,
                 last_access  = ?1,
                 has_data     = ?2
             WHERE channel = ?3 AND page = ?4",
            params![now, has_data, channel, page],
        )?;
        Ok(())
    }

    /// Up to `limit` pages, oldest and least used first
    pub fn eviction_candidates(&mut self, limit: usize) -> CacheResult<Vec<EvictionCandidate>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare_cached(
            "SELECT channel, page, access_count, last_access
             FROM ts_pages
             ORDER BY last_access ASC, access_count ASC
             LIMIT ?1",
        )?;

        let rows = stmt.query_map(params![limit as i64], |row| {
            Ok(EvictionCandidate {
                channel: row.get(0)?,
                page: row.get(1)?,
                access_count: row.get(2)?,
                last_access: row.get(3)?,
            })
        })?;

        let mut candidates = Vec::new();
        for row in rows {
            candidates.push(row?);
        }
        Ok(candidates)
    }

    /// Remove the rows for `pages` of one channel
    pub fn delete_pages(&mut self, channel: &str, pages: &[i64]) -> CacheResult<usize> {
        if pages.is_empty() {
            return Ok(0);
        }

        let tx = self.conn()?.transaction()?;
        let mut removed = 0;
        {
            let mut stmt =
                tx.prepare_cached("DELETE FROM ts_pages WHERE channel = ?1 AND page = ?2")?;
            for page in pages {
                removed += stmt.execute(params![channel, page])?;
            }
        }
        tx.commit()?;

        Ok(removed)
    }

    /// Remove every page row
    pub fn delete_all_pages(&mut self) -> CacheResult<()> {
        let conn = self.conn()?;
        if table_exists(conn, "ts_pages")? {
            conn.execute("DELETE FROM ts_pages", [])?;
        }
        Ok(())
    }

    /// Number of pages known to the index
    pub fn page_count(&mut self) -> CacheResult<u64> {
        let count: i64 = self
            .conn()?
            .query_row("SELECT COUNT(*) FROM ts_pages", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    /// Number of known pages that carry data
    pub fn data_page_count(&mut self) -> CacheResult<u64> {
        let count: i64 = self.conn()?.query_row(
            "SELECT COUNT(*) FROM ts_pages WHERE has_data",
            [],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    /// Reclaim free pages in the database file
    pub fn vacuum(&mut self) -> CacheResult<()> {
        self.conn()?.execute_batch("VACUUM;")?;
        Ok(())
    }

    /// Close the connection and delete the database file
    pub fn delete_file(&mut self) -> CacheResult<()> {
        self.reset();
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Size of the database file in bytes
    pub fn file_size(&self) -> u64 {
        std::fs::metadata(&self.path).map(|m| m.len()).unwrap_or(0)
    }

    /// Get the database file path
    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn table_exists(conn: &Connection, name: &str) -> CacheResult<bool> {
    let found = conn
        .prepare_cached("SELECT name FROM sqlite_master WHERE type = 'table' AND name = ?1")?
        .exists(params![name])?;
    Ok(found)
}

fn table_columns(conn: &Connection, table: &str) -> CacheResult<Vec<String>> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info('{}')", table))?;
    let names = stmt.query_map([], |row| row.get::<_, String>(1))?;

    let mut columns = Vec::new();
    for name in names {
        columns.push(name?);
    }
    Ok(columns)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn initial_settings() -> IndexSettings {
        IndexSettings {
            page_size: 3600,
            format: "BINCODE-CRC32".to_string(),
            max_bytes: 1024 * 1024,
            modified: None,
        }
    }

    fn create_test_index(dir: &Path) -> PageIndex {
        let mut index = PageIndex::new(dir.join("index.db"), Duration::from_secs(5));
        index.initialize(&initial_settings()).unwrap();
        index
    }

    #[test]
    fn test_initialize_fresh() {
        let dir = tempdir().unwrap();
        let mut index = PageIndex::new(dir.path().join("index.db"), Duration::from_secs(5));

        assert!(!index.is_initialized().unwrap());
        let settings = index.initialize(&initial_settings()).unwrap();

        assert!(index.is_initialized().unwrap());
        assert_eq!(settings.page_size, 3600);
        assert!(settings.modified.is_some());
        assert_eq!(index.page_count().unwrap(), 0);
    }

    #[test]
    fn test_persisted_settings_win() {
        let dir = tempdir().unwrap();
        create_test_index(dir.path());

        let mut reopened = PageIndex::new(dir.path().join("index.db"), Duration::from_secs(5));
        let requested = IndexSettings {
            page_size: 100,
            ..initial_settings()
        };
        let settings = reopened.initialize(&requested).unwrap();

        assert_eq!(settings.page_size, 3600);
    }

    #[test]
    fn test_legacy_settings_table_is_stale() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("index.db");
        {
            let conn = Connection::open(&path).unwrap();
            conn.execute_batch(
                "CREATE TABLE settings (ts_page_size INTEGER NOT NULL, max_bytes INTEGER NOT NULL, modified DATETIME);
                 INSERT INTO settings VALUES (3600, 1000, '2017-01-01T00:00:00');",
            )
            .unwrap();
        }

        let mut index = PageIndex::new(&path, Duration::from_secs(5));
        let result = index.initialize(&initial_settings());
        assert!(matches!(result, Err(CacheError::StaleFormat(_))));
    }

    #[test]
    fn test_insert_and_lookup() {
        let dir = tempdir().unwrap();
        let mut index = create_test_index(dir.path());

        index.insert_page("ch1", 0, true).unwrap();
        index.insert_page("ch1", 1, false).unwrap();

        assert!(index.page_exists("ch1", 0).unwrap());
        assert!(!index.page_exists("ch2", 0).unwrap());
        assert_eq!(index.page_has_data("ch1", 0).unwrap(), Some(true));
        assert_eq!(index.page_has_data("ch1", 1).unwrap(), Some(false));
        assert_eq!(index.page_has_data("ch1", 2).unwrap(), None);
        assert_eq!(index.data_page_count().unwrap(), 1);
    }

    #[test]
    fn test_duplicate_insert() {
        let dir = tempdir().unwrap();
        let mut index = create_test_index(dir.path());

        index.insert_page("ch1", 7, true).unwrap();
        let before = index.eviction_candidates(1).unwrap();
        let result = index.insert_page("ch1", 7, false);

        assert!(matches!(result, Err(CacheError::DuplicateKey { page: 7, .. })));
        assert_eq!(index.page_has_data("ch1", 7).unwrap(), Some(true));

        let after = index.eviction_candidates(1).unwrap();
        assert_eq!(after.len(), 1);
        assert_eq!(after[0].access_count, before[0].access_count);
        assert_eq!(after[0].last_access, before[0].last_access);
    }

    #[test]
    fn test_touch_updates_metadata() {
        let dir = tempdir().unwrap();
        let mut index = create_test_index(dir.path());

        index.insert_page("ch1", 0, false).unwrap();
        index.touch_page("ch1", 0, true).unwrap();
        index.touch_page("ch1", 0, true).unwrap();

        let candidates = index.eviction_candidates(10).unwrap();
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].access_count, 2);
        assert_eq!(index.page_has_data("ch1", 0).unwrap(), Some(true));
    }

    #[test]
    fn test_eviction_order() {
        let dir = tempdir().unwrap();
        let mut index = create_test_index(dir.path());

        index.insert_page("a", 0, true).unwrap();
        index.insert_page("b", 0, true).unwrap();
        index.insert_page("c", 0, true).unwrap();

        // "a" becomes the most recently used
        index.touch_page("a", 0, true).unwrap();

        let candidates = index.eviction_candidates(2).unwrap();
        let mut channels: Vec<&str> = candidates.iter().map(|c| c.channel.as_str()).collect();
        channels.sort();
        assert_eq!(channels, vec!["b", "c"]);
    }

    #[test]
    fn test_delete_pages() {
        let dir = tempdir().unwrap();
        let mut index = create_test_index(dir.path());

        for page in 0..5 {
            index.insert_page("ch1", page, true).unwrap();
        }
        index.insert_page("ch2", 0, true).unwrap();

        let removed = index.delete_pages("ch1", &[0, 2, 4]).unwrap();
        assert_eq!(removed, 3);
        assert_eq!(index.page_count().unwrap(), 3);
        assert!(index.page_exists("ch1", 1).unwrap());
        assert!(!index.page_exists("ch1", 2).unwrap());
    }

    #[test]
    fn test_reset_reconnects() {
        let dir = tempdir().unwrap();
        let mut index = create_test_index(dir.path());

        index.insert_page("ch1", 0, true).unwrap();
        index.reset();

        assert!(index.page_exists("ch1", 0).unwrap());
    }

    #[test]
    fn test_delete_file() {
        let dir = tempdir().unwrap();
        let mut index = create_test_index(dir.path());
        assert!(index.file_size() > 0);

        index.delete_file().unwrap();
        assert!(!index.path().exists());
        assert_eq!(index.file_size(), 0);
    }

    #[test]
    fn test_persistence() {
        let dir = tempdir().unwrap();

        {
            let mut index = create_test_index(dir.path());
            index.insert_page("ch1", 3, true).unwrap();
        }

        {
            let mut index = create_test_index(dir.path());
            assert!(index.page_exists("ch1", 3).unwrap());
        }
    }
}
