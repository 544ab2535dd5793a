//! The immutable record value.

use crate::types::{ContentOption, DocumentFlags, SequenceNumber, Timestamp};

/// A stored document record.
///
/// Records are immutable values: key, version, caller metadata, body,
/// plus the bookkeeping the engine stamps on every mutation (sequence,
/// flags, expiration). All byte fields are opaque to the engine; the body
/// is commonly a self-describing encoded dictionary but nothing here
/// depends on that.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    /// Record key, non-empty and unique within a key store.
    pub key: Vec<u8>,
    /// Revision id or version vector (see [`crate::version`]).
    pub version: Vec<u8>,
    /// Caller-defined metadata.
    pub meta: Vec<u8>,
    /// Document payload. Empty for tombstones and meta-only reads.
    pub body: Vec<u8>,
    /// Sequence assigned when this record was written.
    pub sequence: SequenceNumber,
    /// Flag bits.
    pub flags: DocumentFlags,
    /// Expiration time in milliseconds, 0 for none.
    pub expiration: Timestamp,
}

impl Record {
    /// Creates an empty record with just a key.
    #[must_use]
    pub fn new(key: impl Into<Vec<u8>>) -> Self {
        Self {
            key: key.into(),
            version: Vec::new(),
            meta: Vec::new(),
            body: Vec::new(),
            sequence: SequenceNumber::default(),
            flags: DocumentFlags::NONE,
            expiration: Timestamp::NONE,
        }
    }

    /// True if the record exists (was read back from the store).
    #[must_use]
    pub fn exists(&self) -> bool {
        self.flags.contains(DocumentFlags::EXISTS)
    }

    /// True if the record is a deletion tombstone.
    #[must_use]
    pub fn is_deleted(&self) -> bool {
        self.flags.contains(DocumentFlags::DELETED)
    }

    /// Body size in bytes.
    #[must_use]
    pub fn body_size(&self) -> usize {
        self.body.len()
    }

    /// Metadata size in bytes.
    #[must_use]
    pub fn meta_size(&self) -> usize {
        self.meta.len()
    }

    /// Applies a content option, dropping the body for meta-only reads.
    #[must_use]
    pub fn with_content(mut self, content: ContentOption) -> Self {
        if content == ContentOption::MetaOnly {
            self.body.clear();
        }
        self
    }
}
