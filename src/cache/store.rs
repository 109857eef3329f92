//! Page Store - one binary file per cached page
//!
//! Layout:
//! ```text
//! <cache_dir>/
//!   N_channel_0a1b/         channel id with ':' and '-' replaced by '_'
//!     page-0.bin
//!     page-1.bin
//!   N_channel_77ff/
//!     page-12.bin
//! ```
//!
//! Writes go to a temporary sibling first and are renamed into place, so a
//! reader never observes a partially written page.

use crate::cache::error::{CacheError, CacheResult};
use std::fs::{self, File};
use std::io::{BufWriter, ErrorKind, Write};
use std::path::{Path, PathBuf};

const PAGE_EXTENSION: &str = "bin";

/// Make a channel id safe to use as a directory name
pub fn filter_id(channel_id: &str) -> String {
    channel_id.replace(&[':', '-'][..], "_")
}

/// Create a directory tree shared by cooperating processes
pub(crate) fn create_shared_dir(dir: &Path) -> std::io::Result<()> {
    if dir.exists() {
        return Ok(());
    }
    fs::create_dir_all(dir)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(dir, fs::Permissions::from_mode(0o775))?;
    }
    Ok(())
}

/// File-per-page binary storage
#[derive(Debug, Clone)]
pub struct PageStore {
    root: PathBuf,
}

impl PageStore {
    /// Open a page store rooted at `root`, creating the directory if needed
    pub fn open(root: impl Into<PathBuf>) -> CacheResult<Self> {
        let root = root.into();
        create_shared_dir(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn channel_dir(&self, channel_id: &str) -> PathBuf {
        self.root.join(filter_id(channel_id))
    }

    /// Path of the file backing a page
    pub fn page_path(&self, channel_id: &str, page: i64) -> PathBuf {
        self.channel_dir(channel_id)
            .join(format!("page-{}.{}", page, PAGE_EXTENSION))
    }

    /// Durably write a page's bytes
    pub fn write(&self, channel_id: &str, page: i64, bytes: &[u8]) -> CacheResult<()> {
        let dir = self.channel_dir(channel_id);
        fs::create_dir_all(&dir)?;

        let path = self.page_path(channel_id, page);
        let tmp = path.with_extension(format!("{}.tmp", PAGE_EXTENSION));

        {
            let mut writer = BufWriter::new(File::create(&tmp)?);
            writer.write_all(bytes)?;
            writer.flush()?;
            writer.get_ref().sync_all()?;
        }

        fs::rename(&tmp, &path)?;
        Ok(())
    }

    /// Read a page's bytes
    ///
    /// A missing file is reported as [`CacheError::NotFound`]; callers treat
    /// it as a cache miss.
    pub fn read(&self, channel_id: &str, page: i64) -> CacheResult<Vec<u8>> {
        let path = self.page_path(channel_id, page);
        match fs::read(&path) {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(CacheError::NotFound {
                channel: channel_id.to_string(),
                page,
            }),
            Err(e) => Err(e.into()),
        }
    }

    /// Delete a page's file, then the channel directory if it became empty
    pub fn remove(&self, channel_id: &str, page: i64) -> CacheResult<()> {
        let path = self.page_path(channel_id, page);
        match fs::remove_file(&path) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        // Fails while other pages remain, or if another writer raced us.
        let _ = fs::remove_dir(self.channel_dir(channel_id));
        Ok(())
    }

    /// All page files currently on disk
    pub fn page_files(&self) -> CacheResult<Vec<PathBuf>> {
        let mut files = Vec::new();
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(files),
            Err(e) => return Err(e.into()),
        };

        for entry in entries {
            let channel_dir = entry?.path();
            if !channel_dir.is_dir() {
                continue;
            }
            // The directory may vanish under a concurrent eviction.
            let Ok(pages) = fs::read_dir(&channel_dir) else {
                continue;
            };
            for page in pages.flatten() {
                let path = page.path();
                if path.extension().map(|e| e == PAGE_EXTENSION).unwrap_or(false) {
                    files.push(path);
                }
            }
        }

        Ok(files)
    }

    /// Sum of all page file sizes in bytes
    pub fn size_bytes(&self) -> CacheResult<u64> {
        let total = self
            .page_files()?
            .iter()
            .filter_map(|path| fs::metadata(path).ok())
            .map(|meta| meta.len())
            .sum();
        Ok(total)
    }

    /// Remove every page file and channel directory
    pub fn wipe(&self) -> CacheResult<()> {
        match fs::remove_dir_all(&self.root) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => tracing::warn!("Could not remove cache directory {:?}: {}", self.root, e),
        }
        create_shared_dir(&self.root)?;
        Ok(())
    }
}
