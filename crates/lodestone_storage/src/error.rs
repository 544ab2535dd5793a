//! Error types for storage backends.

use std::io;
use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur inside a storage backend.
#[derive(Debug, Error)]
pub enum StorageError {
    /// An I/O error from the operating system.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A read that extends beyond the end of the store.
    #[error("read beyond end of store: offset {offset}, len {len}, size {size}")]
    ReadPastEnd {
        /// Requested read offset.
        offset: u64,
        /// Requested read length.
        len: usize,
        /// Current store size.
        size: u64,
    },

    /// The store contents are not what the backend expects.
    #[error("store corrupted: {0}")]
    Corrupt(String),

    /// Encryption or decryption failed, including wrong-key detection.
    #[error("crypto error: {0}")]
    Crypto(String),

    /// A truncate request larger than the current store.
    #[error("cannot truncate to {requested} bytes, store is {size} bytes")]
    BadTruncate {
        /// Requested new size.
        requested: u64,
        /// Current store size.
        size: u64,
    },
}

impl StorageError {
    /// Creates a corruption error.
    pub fn corrupt(message: impl Into<String>) -> Self {
        Self::Corrupt(message.into())
    }

    /// Creates a crypto error.
    pub fn crypto(message: impl Into<String>) -> Self {
        Self::Crypto(message.into())
    }

    /// True if this error indicates a wrong or unusable encryption key.
    #[must_use]
    pub fn is_crypto(&self) -> bool {
        matches!(self, Self::Crypto(_))
    }
}
