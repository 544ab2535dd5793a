//! In-memory backend.

use crate::backend::StorageBackend;
use crate::error::{StorageError, StorageResult};
use parking_lot::RwLock;

/// A backend that keeps everything in a memory buffer.
///
/// Used for unit tests and for ephemeral databases whose contents may
/// vanish with the process. Thread-safe.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    buf: RwLock<Vec<u8>>,
}

impl MemoryBackend {
    /// Creates an empty backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a backend seeded with existing bytes.
    ///
    /// Useful for replay and corruption tests.
    #[must_use]
    pub fn with_contents(buf: Vec<u8>) -> Self {
        Self {
            buf: RwLock::new(buf),
        }
    }

    /// Returns a copy of the stored bytes.
    #[must_use]
    pub fn contents(&self) -> Vec<u8> {
        self.buf.read().clone()
    }
}

impl StorageBackend for MemoryBackend {
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        let buf = self.buf.read();
        let size = buf.len() as u64;
        let start = offset as usize;
        let end = start.saturating_add(len);
        if offset > size || end > buf.len() {
            return Err(StorageError::ReadPastEnd { offset, len, size });
        }
        Ok(buf[start..end].to_vec())
    }

    fn append(&mut self, data: &[u8]) -> StorageResult<u64> {
        let mut buf = self.buf.write();
        let offset = buf.len() as u64;
        buf.extend_from_slice(data);
        Ok(offset)
    }

    fn flush(&mut self) -> StorageResult<()> {
        Ok(())
    }

    fn sync(&mut self) -> StorageResult<()> {
        Ok(())
    }

    fn size(&self) -> StorageResult<u64> {
        Ok(self.buf.read().len() as u64)
    }

    fn truncate(&mut self, new_size: u64) -> StorageResult<()> {
        let mut buf = self.buf.write();
        let size = buf.len() as u64;
        if new_size > size {
            return Err(StorageError::BadTruncate {
                requested: new_size,
                size,
            });
        }
        buf.truncate(new_size as usize);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_returns_offsets() {
        let mut backend = MemoryBackend::new();
        assert_eq!(backend.append(b"hello").unwrap(), 0);
        assert_eq!(backend.append(b" world").unwrap(), 5);
        assert_eq!(backend.size().unwrap(), 11);
    }

    #[test]
    fn read_back_exact_bytes() {
        let mut backend = MemoryBackend::new();
        backend.append(b"hello world").unwrap();
        assert_eq!(backend.read_at(6, 5).unwrap(), b"world");
        assert!(backend.read_at(2, 0).unwrap().is_empty());
    }

    #[test]
    fn read_past_end_fails() {
        let mut backend = MemoryBackend::new();
        backend.append(b"abc").unwrap();
        assert!(matches!(
            backend.read_at(2, 5),
            Err(StorageError::ReadPastEnd { .. })
        ));
    }

    #[test]
    fn truncate_drops_tail() {
        let mut backend = MemoryBackend::new();
        backend.append(b"hello world").unwrap();
        backend.truncate(5).unwrap();
        assert_eq!(backend.size().unwrap(), 5);
        assert_eq!(backend.contents(), b"hello");
    }

    #[test]
    fn truncate_beyond_size_fails() {
        let mut backend = MemoryBackend::new();
        backend.append(b"abc").unwrap();
        assert!(matches!(
            backend.truncate(10),
            Err(StorageError::BadTruncate { .. })
        ));
    }

    #[test]
    fn seeded_contents_visible() {
        let backend = MemoryBackend::with_contents(b"seed".to_vec());
        assert_eq!(backend.read_at(0, 4).unwrap(), b"seed");
    }
}
