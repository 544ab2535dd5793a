//! Storage backend trait.

use crate::error::StorageResult;

/// A low-level byte store underneath the record log.
///
/// Backends provide append, random read, flush and truncate over an opaque
/// byte sequence. The record log above owns all framing; a backend never
/// inspects the bytes it stores.
///
/// # Invariants
///
/// - `append` returns the offset the data was written at
/// - `read_at` returns exactly the bytes previously written at that offset
/// - after `sync` returns, all appended data survives process death
/// - backends are `Send + Sync`; interior locking keeps reads consistent
///   with concurrent appends
pub trait StorageBackend: Send + Sync {
    /// Reads `len` bytes starting at `offset`.
    ///
    /// # Errors
    ///
    /// Fails with `ReadPastEnd` if the range extends beyond the current
    /// size, or with an I/O error.
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>>;

    /// Appends data at the end of the store and returns the write offset.
    fn append(&mut self, data: &[u8]) -> StorageResult<u64>;

    /// Pushes buffered writes to the OS.
    fn flush(&mut self) -> StorageResult<()>;

    /// Flushes and then syncs data and metadata to durable storage.
    ///
    /// This is the durability barrier used at commit time.
    fn sync(&mut self) -> StorageResult<()>;

    /// Returns the current size in bytes (the next append offset).
    fn size(&self) -> StorageResult<u64>;

    /// Discards all data at and after `new_size`.
    ///
    /// Used to drop a torn tail after crash recovery and to rewrite the
    /// log during compaction.
    ///
    /// # Errors
    ///
    /// Fails with `BadTruncate` if `new_size` exceeds the current size.
    fn truncate(&mut self, new_size: u64) -> StorageResult<()>;
}

impl<T: StorageBackend + ?Sized> StorageBackend for Box<T> {
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        (**self).read_at(offset, len)
    }

    fn append(&mut self, data: &[u8]) -> StorageResult<u64> {
        (**self).append(data)
    }

    fn flush(&mut self) -> StorageResult<()> {
        (**self).flush()
    }

    fn sync(&mut self) -> StorageResult<()> {
        (**self).sync()
    }

    fn size(&self) -> StorageResult<u64> {
        (**self).size()
    }

    fn truncate(&mut self, new_size: u64) -> StorageResult<()> {
        (**self).truncate(new_size)
    }
}
