//! # Lodestone Storage
//!
//! Byte-store backends for the Lodestone document database engine.
//!
//! A backend is an opaque, append-oriented byte store. It knows nothing
//! about records, key stores or transactions; the engine above owns all
//! format interpretation. Keeping the backends this dumb is what makes the
//! record store pluggable: the same record log runs unchanged over a plain
//! file, an in-memory buffer, or an encrypted file.
//!
//! ## Available Backends
//!
//! - [`MemoryBackend`] - ephemeral storage for tests and in-memory databases
//! - [`FileBackend`] - persistent storage over OS file APIs
//! - [`EncryptedBackend`] - AES-256-GCM encryption wrapped around any backend
//!
//! ## Example
//!
//! ```rust
//! use lodestone_storage::{StorageBackend, MemoryBackend};
//!
//! let mut backend = MemoryBackend::new();
//! let offset = backend.append(b"hello world").unwrap();
//! let data = backend.read_at(offset, 11).unwrap();
//! assert_eq!(&data, b"hello world");
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod encrypted;
mod error;
mod file;
mod memory;

pub use backend::StorageBackend;
pub use encrypted::{
    looks_encrypted, EncryptedBackend, EncryptionKey, KEY_SIZE, NONCE_SIZE, TAG_SIZE,
};
pub use error::{StorageError, StorageResult};
pub use file::FileBackend;
pub use memory::MemoryBackend;
