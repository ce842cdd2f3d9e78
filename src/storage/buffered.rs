//! Write-buffered file storage
//!
//! Writes land in a dirty-page cache keyed by page index and reach the file
//! when a page is evicted or on `sync`. Backs the tree's directory file,
//! whose write pattern is random and write-heavy: node rewrites hit the
//! same few pages over and over, so buffering collapses most of them.

use crate::storage::PagedStorage;
use crate::{ProcessError, Result};
use lru::LruCache;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};

/// Page size of the dirty-page cache
pub const PAGE_SIZE: usize = 4096;

/// Default cache bound, in pages (1 MiB)
pub const DEFAULT_CACHE_PAGES: usize = 256;

struct Page {
    data: Vec<u8>,
    dirty: bool,
}

/// Storage with a bounded dirty-page write cache
pub struct BufferedStorage {
    file: File,
    path: PathBuf,
    pages: LruCache<u64, Page>,
    /// Logical length (covers bytes that only exist in the cache)
    len: u64,
    /// Length of the backing file on disk; flushed pages extend it in
    /// whole-page steps
    disk_len: u64,
}

impl BufferedStorage {
    /// Create a fresh file with the default cache bound
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::with_cache(path, DEFAULT_CACHE_PAGES, true)
    }

    /// Open an existing file with the default cache bound
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::with_cache(path, DEFAULT_CACHE_PAGES, false)
    }

    /// Create or open with an explicit cache bound
    pub fn with_cache<P: AsRef<Path>>(path: P, cache_pages: usize, truncate: bool) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(truncate)
            .open(&path)?;
        let disk_len = file.metadata()?.len();
        let cache_pages = NonZeroUsize::new(cache_pages.max(1)).expect("cache bound is nonzero");
        Ok(Self {
            file,
            path,
            pages: LruCache::new(cache_pages),
            len: disk_len,
            disk_len,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load a page into the cache (flushing whatever it evicts) and return it
    fn page_mut(&mut self, index: u64) -> Result<&mut Page> {
        if !self.pages.contains(&index) {
            let mut data = vec![0u8; PAGE_SIZE];
            let start = index * PAGE_SIZE as u64;
            if start < self.disk_len {
                let available = ((self.disk_len - start) as usize).min(PAGE_SIZE);
                self.file.seek(SeekFrom::Start(start))?;
                self.file.read_exact(&mut data[..available])?;
            }

            let evicted = self.pages.push(index, Page { data, dirty: false });
            if let Some((evicted_index, page)) = evicted {
                if page.dirty {
                    Self::flush_to(&mut self.file, evicted_index, &page.data)?;
                    self.disk_len = self
                        .disk_len
                        .max((evicted_index + 1) * PAGE_SIZE as u64);
                }
            }
        }
        Ok(self
            .pages
            .get_mut(&index)
            .expect("page present after insertion"))
    }

    fn flush_to(file: &mut File, index: u64, data: &[u8]) -> Result<()> {
        file.seek(SeekFrom::Start(index * PAGE_SIZE as u64))?;
        file.write_all(data)?;
        Ok(())
    }
}

impl PagedStorage for BufferedStorage {
    fn read(&mut self, offset: u64, len: usize) -> Result<Vec<u8>> {
        if offset + len as u64 > self.len {
            return Err(ProcessError::CorruptTree(format!(
                "truncated read at {}+{} in {} (length {})",
                offset,
                len,
                self.path.display(),
                self.len
            )));
        }

        let mut out = vec![0u8; len];
        let mut pos = 0usize;
        while pos < len {
            let absolute = offset + pos as u64;
            let index = absolute / PAGE_SIZE as u64;
            let in_page = (absolute % PAGE_SIZE as u64) as usize;
            let step = (len - pos).min(PAGE_SIZE - in_page);

            let page = self.page_mut(index)?;
            out[pos..pos + step].copy_from_slice(&page.data[in_page..in_page + step]);
            pos += step;
        }
        Ok(out)
    }

    fn write(&mut self, offset: u64, data: &[u8]) -> Result<()> {
        let mut pos = 0usize;
        while pos < data.len() {
            let absolute = offset + pos as u64;
            let index = absolute / PAGE_SIZE as u64;
            let in_page = (absolute % PAGE_SIZE as u64) as usize;
            let step = (data.len() - pos).min(PAGE_SIZE - in_page);

            let page = self.page_mut(index)?;
            page.data[in_page..in_page + step].copy_from_slice(&data[pos..pos + step]);
            page.dirty = true;
            pos += step;
        }
        self.len = self.len.max(offset + data.len() as u64);
        Ok(())
    }

    fn len(&self) -> u64 {
        self.len
    }

    fn sync(&mut self) -> Result<()> {
        let Self {
            ref mut file,
            ref mut pages,
            ref mut disk_len,
            ..
        } = *self;
        for (index, page) in pages.iter_mut() {
            if page.dirty {
                Self::flush_to(file, *index, &page.data)?;
                *disk_len = (*disk_len).max((*index + 1) * PAGE_SIZE as u64);
                page.dirty = false;
            }
        }
        self.file.sync_all()?;
        Ok(())
    }
}

impl Drop for BufferedStorage {
    fn drop(&mut self) {
        let _ = self.sync();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_write_read_through_cache() {
        let dir = TempDir::new().unwrap();
        let mut storage = BufferedStorage::create(dir.path().join("buffered.dir")).unwrap();

        storage.write(0, b"hello").unwrap();
        storage.write(5, b" world").unwrap();
        assert_eq!(storage.len(), 11);
        // nothing synced yet, reads still see the buffered bytes
        assert_eq!(storage.read(0, 11).unwrap(), b"hello world");
    }

    #[test]
    fn test_write_spanning_pages() {
        let dir = TempDir::new().unwrap();
        let mut storage = BufferedStorage::create(dir.path().join("buffered.dir")).unwrap();

        let data: Vec<u8> = (0..(PAGE_SIZE * 2 + 100)).map(|i| (i % 251) as u8).collect();
        let offset = PAGE_SIZE as u64 - 17;
        storage.write(offset, &data).unwrap();
        assert_eq!(storage.read(offset, data.len()).unwrap(), data);
    }

    #[test]
    fn test_eviction_preserves_dirty_pages() {
        let dir = TempDir::new().unwrap();
        // two-page cache forces constant eviction
        let mut storage =
            BufferedStorage::with_cache(dir.path().join("buffered.dir"), 2, true).unwrap();

        for i in 0..8u64 {
            let payload = vec![i as u8; PAGE_SIZE];
            storage.write(i * PAGE_SIZE as u64, &payload).unwrap();
        }
        for i in 0..8u64 {
            let page = storage.read(i * PAGE_SIZE as u64, PAGE_SIZE).unwrap();
            assert!(page.iter().all(|&b| b == i as u8), "page {} corrupted", i);
        }
    }

    #[test]
    fn test_sync_makes_writes_durable() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("buffered.dir");
        {
            let mut storage = BufferedStorage::create(&path).unwrap();
            storage.write(100, b"durable").unwrap();
            storage.sync().unwrap();
        }
        let mut reopened = BufferedStorage::open(&path).unwrap();
        assert_eq!(reopened.read(100, 7).unwrap(), b"durable");
    }

    #[test]
    fn test_append() {
        let dir = TempDir::new().unwrap();
        let mut storage = BufferedStorage::create(dir.path().join("buffered.dir")).unwrap();

        assert_eq!(storage.append(b"one").unwrap(), 0);
        assert_eq!(storage.append(b"two").unwrap(), 3);
        assert_eq!(storage.read(0, 6).unwrap(), b"onetwo");
    }

    #[test]
    fn test_read_past_end_fails() {
        let dir = TempDir::new().unwrap();
        let mut storage = BufferedStorage::create(dir.path().join("buffered.dir")).unwrap();
        storage.write(0, b"abc").unwrap();
        assert!(storage.read(0, 4).is_err());
    }
}
