//! AES-256-GCM encryption wrapped around another backend.
//!
//! Layout:
//!
//! ```text
//! | header (64) | block 0 | block 1 | ... | tail block |
//! ```
//!
//! The header carries magic bytes, a format version, a random file salt and
//! a key-check value (SHA-256 over salt and key). The key check lets an
//! open with the wrong key fail immediately instead of producing garbage
//! reads later.
//!
//! Plaintext is split into 4 KiB blocks. Every full block occupies a fixed
//! physical size, so logical offsets map to physical offsets with plain
//! arithmetic; only the final block may be short. A stored block is
//! `nonce (12) || ciphertext (plaintext len + 16-byte tag)` with a fresh
//! random nonce on every write and the block index as associated data, so
//! blocks cannot be swapped without failing authentication.
//!
//! Appending rewrites the tail block: the partial block is decrypted,
//! extended and re-encrypted under a new nonce. The record log above
//! appends in commit-sized batches, so the rewrite amortizes well.

use crate::backend::StorageBackend;
use crate::error::{StorageError, StorageResult};

use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes256Gcm, Nonce};
use rand::RngCore;
use sha2::{Digest, Sha256};
use zeroize::{Zeroize, ZeroizeOnDrop};

/// AES-256 key size in bytes.
pub const KEY_SIZE: usize = 32;
/// GCM nonce size in bytes.
pub const NONCE_SIZE: usize = 12;
/// GCM authentication tag size in bytes.
pub const TAG_SIZE: usize = 16;

/// Plaintext bytes per block.
const BLOCK_SIZE: usize = 4096;
/// Physical size of a full block.
const BLOCK_PHYS: usize = NONCE_SIZE + BLOCK_SIZE + TAG_SIZE;
/// Header: magic (8) + version (4) + salt (16) + key check (32) + reserved (4).
const HEADER_SIZE: usize = 64;
const MAGIC: &[u8; 8] = b"LSENC\x01\x00\x00";
const FORMAT_VERSION: u32 = 1;
const SALT_SIZE: usize = 16;
const KEY_CHECK_SIZE: usize = 32;
const KEY_CHECK_DOMAIN: &[u8] = b"lodestone.storage.key-check.v1";

/// An AES-256 encryption key, zeroized on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct EncryptionKey {
    bytes: [u8; KEY_SIZE],
}

impl EncryptionKey {
    /// Builds a key from exactly 32 raw bytes.
    pub fn from_bytes(bytes: &[u8]) -> StorageResult<Self> {
        if bytes.len() != KEY_SIZE {
            return Err(StorageError::crypto(format!(
                "invalid key size: expected {KEY_SIZE} bytes, got {}",
                bytes.len()
            )));
        }
        let mut key = [0u8; KEY_SIZE];
        key.copy_from_slice(bytes);
        Ok(Self { bytes: key })
    }

    /// Generates a fresh random key.
    #[must_use]
    pub fn generate() -> Self {
        let mut key = [0u8; KEY_SIZE];
        rand::thread_rng().fill_bytes(&mut key);
        Self { bytes: key }
    }

    /// Raw key bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }
}

impl std::fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncryptionKey")
            .field("bytes", &"[redacted]")
            .finish()
    }
}

/// True if `prefix` (the first bytes of a store) carries the encrypted
/// store magic. Lets callers distinguish "wrong key" from "this file was
/// never encrypted" before wrapping a backend.
#[must_use]
pub fn looks_encrypted(prefix: &[u8]) -> bool {
    prefix.len() >= MAGIC.len() && &prefix[..MAGIC.len()] == MAGIC
}

fn key_check(salt: &[u8], key: &EncryptionKey) -> [u8; KEY_CHECK_SIZE] {
    let mut hasher = Sha256::new();
    hasher.update(KEY_CHECK_DOMAIN);
    hasher.update(salt);
    hasher.update(key.as_bytes());
    hasher.finalize().into()
}

/// A backend that encrypts everything written through it.
pub struct EncryptedBackend<B: StorageBackend> {
    inner: B,
    cipher: Aes256Gcm,
}

impl<B: StorageBackend> EncryptedBackend<B> {
    /// Wraps `inner` with encryption under `key`.
    ///
    /// An empty inner store gets a fresh header. A non-empty store must
    /// start with a valid header whose key check matches `key`; a mismatch
    /// fails with a crypto error (wrong key or not an encrypted store).
    pub fn open(mut inner: B, key: &EncryptionKey) -> StorageResult<Self> {
        let size = inner.size()?;
        if size == 0 {
            let mut salt = [0u8; SALT_SIZE];
            rand::thread_rng().fill_bytes(&mut salt);
            let mut header = [0u8; HEADER_SIZE];
            header[0..8].copy_from_slice(MAGIC);
            header[8..12].copy_from_slice(&FORMAT_VERSION.to_le_bytes());
            header[12..12 + SALT_SIZE].copy_from_slice(&salt);
            header[28..28 + KEY_CHECK_SIZE].copy_from_slice(&key_check(&salt, key));
            inner.append(&header)?;
        } else {
            if size < HEADER_SIZE as u64 {
                return Err(StorageError::crypto("not an encrypted store"));
            }
            let header = inner.read_at(0, HEADER_SIZE)?;
            if &header[0..8] != MAGIC {
                return Err(StorageError::crypto("not an encrypted store"));
            }
            let version = u32::from_le_bytes(header[8..12].try_into().expect("4 bytes"));
            if version != FORMAT_VERSION {
                return Err(StorageError::corrupt(format!(
                    "unsupported encrypted store version {version}"
                )));
            }
            let salt = &header[12..12 + SALT_SIZE];
            let stored = &header[28..28 + KEY_CHECK_SIZE];
            if stored != key_check(salt, key) {
                return Err(StorageError::crypto("encryption key does not match store"));
            }
        }
        let cipher = Aes256Gcm::new_from_slice(key.as_bytes())
            .map_err(|_| StorageError::crypto("cipher init failed"))?;
        Ok(Self { inner, cipher })
    }

    /// Consumes the wrapper and returns the inner backend.
    pub fn into_inner(self) -> B {
        self.inner
    }

    fn logical_size(&self) -> StorageResult<u64> {
        let phys = self.inner.size()?.saturating_sub(HEADER_SIZE as u64);
        let full_blocks = phys / BLOCK_PHYS as u64;
        let tail_phys = (phys % BLOCK_PHYS as u64) as usize;
        let tail_plain = if tail_phys == 0 {
            0
        } else {
            if tail_phys < NONCE_SIZE + TAG_SIZE {
                return Err(StorageError::corrupt("torn encrypted tail block"));
            }
            tail_phys - NONCE_SIZE - TAG_SIZE
        };
        Ok(full_blocks * BLOCK_SIZE as u64 + tail_plain as u64)
    }

    fn read_block(&self, index: u64, logical: u64) -> StorageResult<Vec<u8>> {
        let offset = HEADER_SIZE as u64 + index * BLOCK_PHYS as u64;
        let block_start_logical = index * BLOCK_SIZE as u64;
        let plain_len = (logical - block_start_logical).min(BLOCK_SIZE as u64) as usize;
        let phys_len = NONCE_SIZE + plain_len + TAG_SIZE;
        let raw = self.inner.read_at(offset, phys_len)?;
        self.decrypt_block(index, &raw)
    }

    fn decrypt_block(&self, index: u64, raw: &[u8]) -> StorageResult<Vec<u8>> {
        let nonce = Nonce::from_slice(&raw[..NONCE_SIZE]);
        let aad = index.to_le_bytes();
        self.cipher
            .decrypt(
                nonce,
                Payload {
                    msg: &raw[NONCE_SIZE..],
                    aad: &aad,
                },
            )
            .map_err(|_| StorageError::crypto(format!("block {index} failed authentication")))
    }

    fn encrypt_block(&self, index: u64, plain: &[u8]) -> StorageResult<Vec<u8>> {
        let mut nonce_bytes = [0u8; NONCE_SIZE];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);
        let aad = index.to_le_bytes();
        let ct = self
            .cipher
            .encrypt(nonce, Payload { msg: plain, aad: &aad })
            .map_err(|_| StorageError::crypto("block encryption failed"))?;
        let mut out = Vec::with_capacity(NONCE_SIZE + ct.len());
        out.extend_from_slice(&nonce_bytes);
        out.extend_from_slice(&ct);
        Ok(out)
    }

    /// Rewrites everything from logical offset `from` (a block boundary is
    /// chosen at or below it) with `tail_plain` as the new contents of the
    /// affected range.
    fn rewrite_tail(&mut self, first_block: u64, plain: &[u8]) -> StorageResult<()> {
        self.inner
            .truncate(HEADER_SIZE as u64 + first_block * BLOCK_PHYS as u64)?;
        let mut index = first_block;
        for chunk in plain.chunks(BLOCK_SIZE) {
            let block = self.encrypt_block(index, chunk)?;
            self.inner.append(&block)?;
            index += 1;
        }
        Ok(())
    }
}

impl<B: StorageBackend> StorageBackend for EncryptedBackend<B> {
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        let logical = self.logical_size()?;
        let end = offset.saturating_add(len as u64);
        if offset > logical || end > logical {
            return Err(StorageError::ReadPastEnd {
                offset,
                len,
                size: logical,
            });
        }
        if len == 0 {
            return Ok(Vec::new());
        }
        let first_block = offset / BLOCK_SIZE as u64;
        let last_block = (end - 1) / BLOCK_SIZE as u64;
        let mut plain = Vec::with_capacity(len + BLOCK_SIZE);
        for index in first_block..=last_block {
            plain.extend_from_slice(&self.read_block(index, logical)?);
        }
        let skip = (offset - first_block * BLOCK_SIZE as u64) as usize;
        Ok(plain[skip..skip + len].to_vec())
    }

    fn append(&mut self, data: &[u8]) -> StorageResult<u64> {
        let logical = self.logical_size()?;
        if data.is_empty() {
            return Ok(logical);
        }
        let tail_block = logical / BLOCK_SIZE as u64;
        let tail_used = (logical % BLOCK_SIZE as u64) as usize;
        let mut plain = if tail_used > 0 {
            self.read_block(tail_block, logical)?
        } else {
            Vec::new()
        };
        plain.extend_from_slice(data);
        self.rewrite_tail(tail_block, &plain)?;
        Ok(logical)
    }

    fn flush(&mut self) -> StorageResult<()> {
        self.inner.flush()
    }

    fn sync(&mut self) -> StorageResult<()> {
        self.inner.sync()
    }

    fn size(&self) -> StorageResult<u64> {
        self.logical_size()
    }

    fn truncate(&mut self, new_size: u64) -> StorageResult<()> {
        let logical = self.logical_size()?;
        if new_size > logical {
            return Err(StorageError::BadTruncate {
                requested: new_size,
                size: logical,
            });
        }
        if new_size == logical {
            return Ok(());
        }
        let keep_block = new_size / BLOCK_SIZE as u64;
        let keep_in_block = (new_size % BLOCK_SIZE as u64) as usize;
        let tail = if keep_in_block > 0 {
            let mut block = self.read_block(keep_block, logical)?;
            block.truncate(keep_in_block);
            block
        } else {
            Vec::new()
        };
        self.rewrite_tail(keep_block, &tail)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryBackend;

    fn open_mem(key: &EncryptionKey) -> EncryptedBackend<MemoryBackend> {
        EncryptedBackend::open(MemoryBackend::new(), key).unwrap()
    }

    #[test]
    fn round_trip_small() {
        let key = EncryptionKey::generate();
        let mut backend = open_mem(&key);
        let offset = backend.append(b"secret payload").unwrap();
        assert_eq!(offset, 0);
        assert_eq!(backend.read_at(0, 14).unwrap(), b"secret payload");
        assert_eq!(backend.size().unwrap(), 14);
    }

    #[test]
    fn round_trip_across_blocks() {
        let key = EncryptionKey::generate();
        let mut backend = open_mem(&key);
        let data: Vec<u8> = (0..10_000u32).map(|i| (i % 251) as u8).collect();
        backend.append(&data).unwrap();
        assert_eq!(backend.size().unwrap(), 10_000);
        assert_eq!(backend.read_at(0, 10_000).unwrap(), data);
        assert_eq!(backend.read_at(4090, 20).unwrap(), &data[4090..4110]);
    }

    #[test]
    fn append_extends_tail_block() {
        let key = EncryptionKey::generate();
        let mut backend = open_mem(&key);
        backend.append(b"first").unwrap();
        let offset = backend.append(b" second").unwrap();
        assert_eq!(offset, 5);
        assert_eq!(backend.read_at(0, 12).unwrap(), b"first second");
    }

    #[test]
    fn ciphertext_does_not_leak_plaintext() {
        let key = EncryptionKey::generate();
        let inner = MemoryBackend::new();
        let mut backend = EncryptedBackend::open(inner, &key).unwrap();
        backend.append(b"very secret words").unwrap();
        let raw = backend.into_inner().contents();
        assert!(!raw
            .windows(b"very secret".len())
            .any(|w| w == b"very secret"));
    }

    #[test]
    fn wrong_key_rejected_at_open() {
        let key = EncryptionKey::generate();
        let mut backend = open_mem(&key);
        backend.append(b"data").unwrap();
        let raw = backend.into_inner().contents();

        let other = EncryptionKey::generate();
        let result = EncryptedBackend::open(MemoryBackend::with_contents(raw), &other);
        assert!(matches!(result, Err(StorageError::Crypto(_))));
    }

    #[test]
    fn reopen_with_same_key_reads_data() {
        let key = EncryptionKey::generate();
        let mut backend = open_mem(&key);
        backend.append(b"persisted").unwrap();
        let raw = backend.into_inner().contents();

        let backend = EncryptedBackend::open(MemoryBackend::with_contents(raw), &key).unwrap();
        assert_eq!(backend.read_at(0, 9).unwrap(), b"persisted");
    }

    #[test]
    fn tampered_block_fails_authentication() {
        let key = EncryptionKey::generate();
        let mut backend = open_mem(&key);
        backend.append(b"integrity matters").unwrap();
        let mut raw = backend.into_inner().contents();
        let flip = HEADER_SIZE + NONCE_SIZE + 3;
        raw[flip] ^= 0xFF;

        let backend = EncryptedBackend::open(MemoryBackend::with_contents(raw), &key).unwrap();
        assert!(matches!(
            backend.read_at(0, 17),
            Err(StorageError::Crypto(_))
        ));
    }

    #[test]
    fn truncate_preserves_prefix() {
        let key = EncryptionKey::generate();
        let mut backend = open_mem(&key);
        let data: Vec<u8> = (0..6000u32).map(|i| (i % 251) as u8).collect();
        backend.append(&data).unwrap();
        backend.truncate(5000).unwrap();
        assert_eq!(backend.size().unwrap(), 5000);
        assert_eq!(backend.read_at(0, 5000).unwrap(), &data[..5000]);
    }

    #[test]
    fn key_from_bytes_validates_length() {
        assert!(EncryptionKey::from_bytes(&[0u8; 16]).is_err());
        assert!(EncryptionKey::from_bytes(&[0u8; 32]).is_ok());
    }
}
