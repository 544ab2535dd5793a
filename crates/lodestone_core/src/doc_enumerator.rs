//! Document-oriented enumeration over a key store.

use crate::error::{Error, Result};
use crate::keystore::{EnumeratorOptions, KeyStore, RecordEnumerator};
use crate::record::Record;
use crate::types::{ContentOption, DocumentFlags, SequenceNumber, SortOption, Timestamp};
use crate::version::Version;

/// Option bits for [`DocEnumerator`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DocEnumFlags(u8);

impl DocEnumFlags {
    /// Traverse keys in descending order.
    pub const DESCENDING: Self = Self(0x01);
    /// Traverse in engine order (sequence order) instead of key order.
    pub const UNSORTED: Self = Self(0x02);
    /// Yield deletion tombstones too.
    pub const INCLUDE_DELETED: Self = Self(0x04);
    /// Yield non-conflicted documents; when unset, only conflicted ones
    /// are yielded.
    pub const INCLUDE_NON_CONFLICTED: Self = Self(0x08);
    /// Load document bodies; when unset, records are meta-only.
    pub const INCLUDE_BODIES: Self = Self(0x10);
    /// Materialize the full revision history of version vectors.
    pub const INCLUDE_REV_HISTORY: Self = Self(0x20);

    /// The default: non-conflicted documents with bodies, ascending.
    pub const DEFAULT: Self = Self(0x08 | 0x10);

    /// Builds flags from a raw byte.
    #[must_use]
    pub const fn from_byte(b: u8) -> Self {
        Self(b)
    }

    /// True if every bit of `other` is set.
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

impl Default for DocEnumFlags {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Summary of a document yielded by the enumerator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentInfo {
    /// Document id (the record key).
    pub doc_id: Vec<u8>,
    /// Revision id in ASCII form (see `INCLUDE_REV_HISTORY`).
    pub rev_id: String,
    /// Record flags, with `EXISTS` always set.
    pub flags: DocumentFlags,
    /// Sequence of the current revision.
    pub sequence: SequenceNumber,
    /// Body size in bytes.
    pub body_size: usize,
    /// Metadata size in bytes.
    pub meta_size: usize,
    /// Expiration timestamp, 0 for none.
    pub expiration: Timestamp,
}

/// A fully materialized document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    /// Document id (the record key).
    pub key: Vec<u8>,
    /// Revision id in ASCII form.
    pub rev_id: String,
    /// Caller metadata.
    pub meta: Vec<u8>,
    /// Document body (empty under meta-only enumeration).
    pub body: Vec<u8>,
    /// Sequence of the current revision.
    pub sequence: SequenceNumber,
    /// Record flags.
    pub flags: DocumentFlags,
    /// Expiration timestamp, 0 for none.
    pub expiration: Timestamp,
}

/// Forward-only, single-use iterator over the documents of a key store.
///
/// Wraps a record enumerator with document-oriented options. The
/// snapshot is taken at construction; the enumerator stays valid after
/// its transaction ends, as long as the database is open. After `close`
/// or a `next` that returned false, every call returns false or `None`
/// without error.
#[derive(Debug)]
pub struct DocEnumerator {
    inner: Option<RecordEnumerator>,
    flags: DocEnumFlags,
}

impl DocEnumerator {
    /// Enumerates all documents of a store.
    pub fn new(store: &KeyStore, flags: DocEnumFlags) -> Result<Self> {
        let options = Self::record_options(flags)?;
        Ok(Self {
            inner: Some(store.enumerate(options)),
            flags,
        })
    }

    /// Enumerates documents changed after `since`, in sequence order.
    pub fn since(
        store: &KeyStore,
        since: SequenceNumber,
        flags: DocEnumFlags,
    ) -> Result<Self> {
        let mut options = Self::record_options(flags)?;
        options.sort = SortOption::Unsorted;
        Ok(Self {
            inner: Some(store.enumerate_since(since, options)?),
            flags,
        })
    }

    fn record_options(flags: DocEnumFlags) -> Result<EnumeratorOptions> {
        if flags.contains(DocEnumFlags::DESCENDING) && flags.contains(DocEnumFlags::UNSORTED) {
            return Err(Error::invalid_parameter(
                "Descending and Unsorted are mutually exclusive",
            ));
        }
        let sort = if flags.contains(DocEnumFlags::DESCENDING) {
            SortOption::Descending
        } else if flags.contains(DocEnumFlags::UNSORTED) {
            SortOption::Unsorted
        } else {
            SortOption::Ascending
        };
        let content = if flags.contains(DocEnumFlags::INCLUDE_BODIES) {
            ContentOption::EntireBody
        } else {
            ContentOption::MetaOnly
        };
        Ok(EnumeratorOptions {
            sort,
            content,
            include_deleted: flags.contains(DocEnumFlags::INCLUDE_DELETED),
            only_conflicts: !flags.contains(DocEnumFlags::INCLUDE_NON_CONFLICTED),
        })
    }

    /// Advances to the next document. Returns false at the end.
    pub fn next(&mut self) -> bool {
        match self.inner.as_mut() {
            Some(inner) => {
                if inner.next() {
                    true
                } else {
                    self.inner = None;
                    false
                }
            }
            None => false,
        }
    }

    /// Info for the current document, or `None` when not positioned.
    #[must_use]
    pub fn document_info(&self) -> Option<DocumentInfo> {
        let record = self.current()?;
        Some(DocumentInfo {
            doc_id: record.key.clone(),
            rev_id: self.rev_id_of(record),
            flags: record.flags.with(DocumentFlags::EXISTS),
            sequence: record.sequence,
            body_size: record.body_size(),
            meta_size: record.meta_size(),
            expiration: record.expiration,
        })
    }

    /// The current document, or `None` when not positioned.
    #[must_use]
    pub fn document(&self) -> Option<Document> {
        let record = self.current()?;
        Some(Document {
            key: record.key.clone(),
            rev_id: self.rev_id_of(record),
            meta: record.meta.clone(),
            body: record.body.clone(),
            sequence: record.sequence,
            flags: record.flags.with(DocumentFlags::EXISTS),
            expiration: record.expiration,
        })
    }

    /// Ends the enumeration early.
    pub fn close(&mut self) {
        self.inner = None;
    }

    fn current(&self) -> Option<&Record> {
        self.inner.as_ref()?.record()
    }

    /// ASCII revision id. With `INCLUDE_REV_HISTORY`, a version vector is
    /// materialized in full; otherwise only the current version appears.
    fn rev_id_of(&self, record: &Record) -> String {
        match Version::parse(&record.version) {
            Ok(Version::Vector(vv))
                if self.flags.contains(DocEnumFlags::INCLUDE_REV_HISTORY) =>
            {
                vv.as_ascii()
            }
            Ok(version) => version.expanded(),
            Err(_) => String::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::{Database, Options};
    use crate::version::VersionVector;

    fn seeded_db() -> Database {
        let db = Database::open_in_memory(Options::default()).unwrap();
        let store = db.default_keystore().unwrap();
        db.with_transaction(|txn| {
            let rev1 = Version::tree(1, vec![0xAA]).unwrap().encode();
            let vv = Version::Vector(VersionVector::new(vec![
                (b"alice".to_vec(), 4),
                (b"bob".to_vec(), 2),
            ]))
            .encode();
            store.set_with_version(b"doc-a", &rev1, b"m", b"body-a", txn)?;
            store.set_with_version(b"doc-b", &vv, b"m", b"body-b", txn)?;
            store.set_with_version(b"doc-c", &rev1, b"m", b"body-c", txn)?;
            Ok(())
        })
        .unwrap();
        db.with_transaction(|txn| {
            store.del(b"doc-c", txn)?;
            Ok(())
        })
        .unwrap();
        db
    }

    #[test]
    fn ascending_skips_tombstones_by_default() {
        let db = seeded_db();
        let store = db.default_keystore().unwrap();
        let mut e = DocEnumerator::new(&store, DocEnumFlags::DEFAULT).unwrap();

        let mut ids = Vec::new();
        while e.next() {
            ids.push(e.document_info().unwrap().doc_id);
        }
        assert_eq!(ids, vec![b"doc-a".to_vec(), b"doc-b".to_vec()]);
        // Exhausted: everything returns empty now.
        assert!(!e.next());
        assert!(e.document_info().is_none());
        assert!(e.document().is_none());
    }

    #[test]
    fn descending_includes_deleted_when_asked() {
        let db = seeded_db();
        let store = db.default_keystore().unwrap();
        let flags = DocEnumFlags::DEFAULT
            .with(DocEnumFlags::DESCENDING)
            .with(DocEnumFlags::INCLUDE_DELETED);
        let mut e = DocEnumerator::new(&store, flags).unwrap();

        let mut ids = Vec::new();
        let mut deleted = 0;
        while e.next() {
            let info = e.document_info().unwrap();
            if info.flags.contains(DocumentFlags::DELETED) {
                deleted += 1;
            }
            ids.push(info.doc_id);
        }
        assert_eq!(
            ids,
            vec![b"doc-c".to_vec(), b"doc-b".to_vec(), b"doc-a".to_vec()]
        );
        assert_eq!(deleted, 1);
    }

    #[test]
    fn meta_only_without_include_bodies() {
        let db = seeded_db();
        let store = db.default_keystore().unwrap();
        let flags = DocEnumFlags::DEFAULT.without(DocEnumFlags::INCLUDE_BODIES);
        let mut e = DocEnumerator::new(&store, flags).unwrap();
        assert!(e.next());
        let doc = e.document().unwrap();
        assert!(doc.body.is_empty());
        assert_eq!(doc.meta, b"m");
        // Size bookkeeping reflects the trimmed body.
        assert_eq!(e.document_info().unwrap().body_size, 0);
    }

    #[test]
    fn only_conflicts_when_non_conflicted_excluded() {
        let db = seeded_db();
        let store = db.default_keystore().unwrap();

        // Nothing is conflicted yet, so excluding non-conflicted yields
        // nothing.
        let flags = DocEnumFlags::DEFAULT.without(DocEnumFlags::INCLUDE_NON_CONFLICTED);
        let mut e = DocEnumerator::new(&store, flags).unwrap();
        assert!(!e.next());

        // Mark doc-b conflicted; now it is the only document yielded.
        db.with_transaction(|txn| {
            store.update_flags(
                b"doc-b",
                DocumentFlags::CONFLICTED,
                DocumentFlags::NONE,
                txn,
            )?;
            Ok(())
        })
        .unwrap();
        let mut e = DocEnumerator::new(&store, flags).unwrap();
        assert!(e.next());
        let info = e.document_info().unwrap();
        assert_eq!(info.doc_id, b"doc-b");
        assert!(info.flags.contains(DocumentFlags::CONFLICTED));
        assert!(!e.next());

        // With the default flags it still shows up alongside doc-a.
        let mut e = DocEnumerator::new(&store, DocEnumFlags::DEFAULT).unwrap();
        let mut count = 0;
        while e.next() {
            count += 1;
        }
        assert_eq!(count, 2);
    }

    #[test]
    fn rev_history_materializes_version_vectors() {
        let db = seeded_db();
        let store = db.default_keystore().unwrap();

        let plain = DocEnumFlags::DEFAULT;
        let mut e = DocEnumerator::new(&store, plain).unwrap();
        let mut revs = Vec::new();
        while e.next() {
            revs.push(e.document_info().unwrap().rev_id);
        }
        assert_eq!(revs, vec!["1-aa".to_string(), "4@alice".to_string()]);

        let with_history = plain.with(DocEnumFlags::INCLUDE_REV_HISTORY);
        let mut e = DocEnumerator::new(&store, with_history).unwrap();
        let mut revs = Vec::new();
        while e.next() {
            revs.push(e.document_info().unwrap().rev_id);
        }
        // Tree revisions are unchanged; vectors expand in full.
        assert_eq!(
            revs,
            vec!["1-aa".to_string(), "4@alice,2@bob".to_string()]
        );
    }

    #[test]
    fn descending_and_unsorted_conflict() {
        let db = seeded_db();
        let store = db.default_keystore().unwrap();
        let flags = DocEnumFlags::DEFAULT
            .with(DocEnumFlags::DESCENDING)
            .with(DocEnumFlags::UNSORTED);
        assert!(matches!(
            DocEnumerator::new(&store, flags),
            Err(Error::InvalidParameter(_))
        ));
    }

    #[test]
    fn since_yields_changes_in_sequence_order() {
        let db = seeded_db();
        let store = db.default_keystore().unwrap();
        // Sequences: doc-a=1, doc-b=2, doc-c=3, tombstone(doc-c)=4.
        let flags = DocEnumFlags::DEFAULT.with(DocEnumFlags::INCLUDE_DELETED);
        let mut e = DocEnumerator::since(&store, SequenceNumber::new(1), flags).unwrap();
        let mut seqs = Vec::new();
        while e.next() {
            seqs.push(e.document_info().unwrap().sequence.as_u64());
        }
        assert_eq!(seqs, vec![2, 4]);
    }

    #[test]
    fn close_is_terminal() {
        let db = seeded_db();
        let store = db.default_keystore().unwrap();
        let mut e = DocEnumerator::new(&store, DocEnumFlags::DEFAULT).unwrap();
        assert!(e.next());
        e.close();
        assert!(!e.next());
        assert!(e.document().is_none());
    }
}
