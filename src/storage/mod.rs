//! Byte-level storage layer
//!
//! Result trees are built over two [`PagedStorage`] files: a write-buffered
//! directory file (random, write-heavy) and a direct data file (append-only
//! streaming plus occasional reads).

pub mod direct;
pub mod buffered;
pub mod serializer;

pub use direct::DirectStorage;
pub use buffered::BufferedStorage;
pub use serializer::{DistanceListSerializer, PointIdSerializer, ValueSerializer};

use crate::Result;

/// A byte-addressable store over one file
///
/// Ownership is exclusive while open. After `sync` all issued writes are
/// durable; implementations also sync on drop as a last resort.
pub trait PagedStorage {
    /// Read exactly `len` bytes starting at `offset`
    ///
    /// Reading past the current length is a corruption-level failure: the
    /// callers of this layer only ever read extents they previously wrote.
    fn read(&mut self, offset: u64, len: usize) -> Result<Vec<u8>>;

    /// Write `data` at `offset`, extending the store if needed
    fn write(&mut self, offset: u64, data: &[u8]) -> Result<()>;

    /// Append `data` at the end, returning the offset it was written at
    fn append(&mut self, data: &[u8]) -> Result<u64> {
        let offset = self.len();
        self.write(offset, data)?;
        Ok(offset)
    }

    /// Current logical length in bytes
    fn len(&self) -> u64;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Flush buffered writes and fsync the backing file
    fn sync(&mut self) -> Result<()>;
}
