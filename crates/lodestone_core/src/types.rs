//! Core type definitions.

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// Sequence number of a mutation within a key store.
///
/// Sequences are assigned on every insert, update or delete, increase
/// monotonically, and are never reused. They provide a total order
/// consistent with commit order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct SequenceNumber(pub u64);

impl SequenceNumber {
    /// Creates a sequence number.
    #[must_use]
    pub const fn new(seq: u64) -> Self {
        Self(seq)
    }

    /// Raw value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// The following sequence number.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for SequenceNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "seq:{}", self.0)
    }
}

/// An absolute timestamp in milliseconds since the Unix epoch.
///
/// Zero means "none"; record expirations use that as the unset value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Timestamp(pub i64);

impl Timestamp {
    /// The unset timestamp.
    pub const NONE: Self = Self(0);

    /// Creates a timestamp from milliseconds.
    #[must_use]
    pub const fn from_millis(ms: i64) -> Self {
        Self(ms)
    }

    /// The current wall-clock time.
    #[must_use]
    pub fn now() -> Self {
        let ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as i64)
            .unwrap_or(0);
        Self(ms)
    }

    /// Milliseconds since the epoch, 0 if unset.
    #[must_use]
    pub const fn as_millis(self) -> i64 {
        self.0
    }

    /// True if this timestamp is unset.
    #[must_use]
    pub const fn is_none(self) -> bool {
        self.0 == 0
    }
}

/// Per-record flag bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DocumentFlags(u8);

impl DocumentFlags {
    /// No flags.
    pub const NONE: Self = Self(0);
    /// The record exists (always set on stored records).
    pub const EXISTS: Self = Self(0x01);
    /// The record is a deletion tombstone.
    pub const DELETED: Self = Self(0x02);
    /// The document has unresolved conflicting revisions.
    pub const CONFLICTED: Self = Self(0x04);
    /// The document body references attachments.
    pub const HAS_ATTACHMENTS: Self = Self(0x08);
    /// The revision has been pushed to a peer.
    pub const SYNCED: Self = Self(0x10);

    /// Builds flags from a raw byte.
    #[must_use]
    pub const fn from_byte(b: u8) -> Self {
        Self(b)
    }

    /// Raw byte value.
    #[must_use]
    pub const fn as_byte(self) -> u8 {
        self.0
    }

    /// True if every bit of `other` is set in `self`.
    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Union of two flag sets.
    #[must_use]
    pub const fn with(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    /// `self` minus the bits of `other`.
    #[must_use]
    pub const fn without(self, other: Self) -> Self {
        Self(self.0 & !other.0)
    }
}

/// How much of a record to materialize when reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ContentOption {
    /// Key, version, meta and bookkeeping only; the body is skipped.
    MetaOnly,
    /// The full record including the body.
    #[default]
    EntireBody,
}

/// Traversal order for enumeration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOption {
    /// Ascending by key.
    #[default]
    Ascending,
    /// Descending by key.
    Descending,
    /// Whatever order is cheapest for the engine (sequence order here).
    Unsorted,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequence_ordering_and_next() {
        let a = SequenceNumber::new(5);
        assert!(a < a.next());
        assert_eq!(a.next().as_u64(), 6);
    }

    #[test]
    fn timestamp_none() {
        assert!(Timestamp::NONE.is_none());
        assert!(!Timestamp::from_millis(1).is_none());
        assert!(Timestamp::now().as_millis() > 0);
    }

    #[test]
    fn flag_algebra() {
        let f = DocumentFlags::EXISTS.with(DocumentFlags::DELETED);
        assert!(f.contains(DocumentFlags::EXISTS));
        assert!(f.contains(DocumentFlags::DELETED));
        assert!(!f.contains(DocumentFlags::CONFLICTED));
        assert!(!f.without(DocumentFlags::DELETED).contains(DocumentFlags::DELETED));
    }
}
