//! Key stores: ordered maps of keys to records.

use crate::database::DbInner;
use crate::error::{Error, Result};
use crate::log::LogOp;
use crate::record::Record;
use crate::shared_file::SharedFile;
use crate::transaction::Transaction;
use crate::types::{ContentOption, DocumentFlags, SequenceNumber, SortOption, Timestamp};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::{Arc, Weak};
use std::thread;

/// Name of the default key store.
pub const DEFAULT_KEYSTORE: &str = "default";

/// Capabilities fixed when a key store is created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Capabilities {
    /// Assign a sequence to every mutation and index records by it.
    pub sequences: bool,
    /// Deletions leave tombstones that survive until compaction.
    pub soft_deletes: bool,
}

impl Capabilities {
    /// Sequences and soft deletes both on; what document stores use.
    #[must_use]
    pub const fn full() -> Self {
        Self {
            sequences: true,
            soft_deletes: true,
        }
    }
}

/// Options controlling [`KeyStore::enumerate`].
#[derive(Debug, Clone, Copy, Default)]
pub struct EnumeratorOptions {
    /// Traversal order.
    pub sort: SortOption,
    /// How much of each record to materialize.
    pub content: ContentOption,
    /// Yield deletion tombstones too.
    pub include_deleted: bool,
    /// Yield only records flagged as conflicted.
    pub only_conflicts: bool,
}

/// An ordered map of keys to records inside a database file.
///
/// Reads are lock-free with respect to the file (they never take the
/// file-level transaction lock); mutations require an active
/// [`Transaction`]. Changes made inside a transaction are visible to
/// reads from the transaction's thread immediately and to everyone else
/// after commit.
pub struct KeyStore {
    name: String,
    id: u32,
    caps: Capabilities,
    db: Weak<DbInner>,
    file: Arc<SharedFile>,
    state: RwLock<StoreState>,
}

#[derive(Debug, Default)]
struct StoreState {
    committed: BTreeMap<Vec<u8>, Record>,
    by_seq: BTreeMap<u64, Vec<u8>>,
    last_seq: u64,
    purge_count: u64,
    overlay: Option<Overlay>,
}

/// Uncommitted view of a store inside the open transaction.
#[derive(Debug)]
struct Overlay {
    /// Key to new record; `None` marks a hard deletion.
    writes: BTreeMap<Vec<u8>, Option<Record>>,
    last_seq: u64,
}

impl KeyStore {
    pub(crate) fn new(
        name: String,
        id: u32,
        caps: Capabilities,
        db: Weak<DbInner>,
        file: Arc<SharedFile>,
    ) -> Self {
        Self {
            name,
            id,
            caps,
            db,
            file,
            state: RwLock::new(StoreState::default()),
        }
    }

    /// Store name, unique within its database.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Stable id from the manifest.
    #[must_use]
    pub fn id(&self) -> u32 {
        self.id
    }

    /// The capabilities fixed at creation.
    #[must_use]
    pub fn capabilities(&self) -> Capabilities {
        self.caps
    }

    /// True when the current thread runs this file's open transaction,
    /// meaning uncommitted state is visible here.
    fn sees_overlay(&self) -> bool {
        self.file.transaction_thread() == Some(thread::current().id())
    }

    /// Fetches a record by key.
    pub fn get(&self, key: &[u8]) -> Result<Option<Record>> {
        self.get_with_content(key, ContentOption::EntireBody)
    }

    /// Fetches a record by key with a content option.
    pub fn get_with_content(
        &self,
        key: &[u8],
        content: ContentOption,
    ) -> Result<Option<Record>> {
        let state = self.state.read();
        if self.sees_overlay() {
            if let Some(overlay) = &state.overlay {
                if let Some(entry) = overlay.writes.get(key) {
                    return Ok(entry.clone().map(|r| r.with_content(content)));
                }
            }
        }
        Ok(state.committed.get(key).cloned().map(|r| r.with_content(content)))
    }

    /// Fetches the record at the given sequence.
    ///
    /// # Errors
    ///
    /// `Unsupported` if this store does not track sequences.
    pub fn get_by_sequence(
        &self,
        sequence: SequenceNumber,
        content: ContentOption,
    ) -> Result<Option<Record>> {
        self.require_sequences()?;
        let state = self.state.read();
        if self.sees_overlay() {
            if let Some(overlay) = &state.overlay {
                if let Some(found) = overlay
                    .writes
                    .values()
                    .flatten()
                    .find(|r| r.sequence == sequence)
                {
                    return Ok(Some(found.clone().with_content(content)));
                }
            }
        }
        let key = match state.by_seq.get(&sequence.as_u64()) {
            Some(key) => key,
            None => return Ok(None),
        };
        Ok(state
            .committed
            .get(key)
            .cloned()
            .map(|r| r.with_content(content)))
    }

    /// The largest sequence assigned in this store.
    #[must_use]
    pub fn last_sequence(&self) -> SequenceNumber {
        let state = self.state.read();
        if self.sees_overlay() {
            if let Some(overlay) = &state.overlay {
                return SequenceNumber::new(overlay.last_seq);
            }
        }
        SequenceNumber::new(state.last_seq)
    }

    /// Number of deleted records purged by compaction.
    #[must_use]
    pub fn purge_count(&self) -> u64 {
        self.state.read().purge_count
    }

    /// Number of live (non-tombstone) records.
    #[must_use]
    pub fn document_count(&self) -> usize {
        let state = self.state.read();
        let mut count = state
            .committed
            .values()
            .filter(|r| !r.is_deleted())
            .count();
        if self.sees_overlay() {
            if let Some(overlay) = &state.overlay {
                for (key, entry) in &overlay.writes {
                    let was_live = state
                        .committed
                        .get(key)
                        .is_some_and(|r| !r.is_deleted());
                    let is_live = entry.as_ref().is_some_and(|r| !r.is_deleted());
                    match (was_live, is_live) {
                        (false, true) => count += 1,
                        (true, false) => count -= 1,
                        _ => {}
                    }
                }
            }
        }
        count
    }

    /// Inserts or replaces a record, leaving its version bytes empty.
    ///
    /// Returns the assigned sequence (zero in stores without sequences).
    pub fn set(
        &self,
        key: &[u8],
        meta: &[u8],
        body: &[u8],
        txn: &Transaction,
    ) -> Result<SequenceNumber> {
        self.set_with_version(key, &[], meta, body, txn)
    }

    /// Inserts or replaces a record with explicit version bytes.
    pub fn set_with_version(
        &self,
        key: &[u8],
        version: &[u8],
        meta: &[u8],
        body: &[u8],
        txn: &Transaction,
    ) -> Result<SequenceNumber> {
        if key.is_empty() {
            return Err(Error::invalid_parameter("record key must not be empty").surfaced());
        }
        let db = self.require_txn(txn)?;

        let mut state = self.state.write();
        let prior = Self::lookup(&state, key);
        let expiration = prior.map_or(Timestamp::NONE, |r| r.expiration);

        let overlay = Self::overlay_mut(&mut state);
        let sequence = if self.caps.sequences {
            overlay.last_seq += 1;
            SequenceNumber::new(overlay.last_seq)
        } else {
            SequenceNumber::default()
        };
        let record = Record {
            key: key.to_vec(),
            version: version.to_vec(),
            meta: meta.to_vec(),
            body: body.to_vec(),
            sequence,
            flags: DocumentFlags::EXISTS,
            expiration,
        };
        overlay.writes.insert(key.to_vec(), Some(record.clone()));
        drop(state);

        db.stage(LogOp::Put {
            store_id: self.id,
            record,
        });
        Ok(sequence)
    }

    /// Deletes a record. Returns true if the key existed.
    ///
    /// With soft deletes, a tombstone replaces the record until
    /// compaction; otherwise the record is removed outright. Either way a
    /// sequence is consumed in sequence-tracking stores.
    pub fn del(&self, key: &[u8], txn: &Transaction) -> Result<bool> {
        let db = self.require_txn(txn)?;

        let mut state = self.state.write();
        let existing = match Self::lookup(&state, key) {
            Some(record) if !record.is_deleted() => record,
            _ => return Ok(false),
        };

        let overlay = Self::overlay_mut(&mut state);
        let sequence = if self.caps.sequences {
            overlay.last_seq += 1;
            SequenceNumber::new(overlay.last_seq)
        } else {
            SequenceNumber::default()
        };

        let op = if self.caps.soft_deletes {
            let tombstone = Record {
                key: key.to_vec(),
                version: existing.version,
                meta: existing.meta,
                body: Vec::new(),
                sequence,
                flags: DocumentFlags::EXISTS.with(DocumentFlags::DELETED),
                expiration: Timestamp::NONE,
            };
            overlay.writes.insert(key.to_vec(), Some(tombstone.clone()));
            LogOp::Put {
                store_id: self.id,
                record: tombstone,
            }
        } else {
            overlay.writes.insert(key.to_vec(), None);
            LogOp::Delete {
                store_id: self.id,
                key: key.to_vec(),
                sequence,
            }
        };
        drop(state);

        db.stage(op);
        Ok(true)
    }

    /// Adds and removes flag bits on a record without consuming a
    /// sequence. Used to mark and clear conflict and attachment state.
    /// Returns true if the key existed.
    pub fn update_flags(
        &self,
        key: &[u8],
        add: DocumentFlags,
        remove: DocumentFlags,
        txn: &Transaction,
    ) -> Result<bool> {
        let db = self.require_txn(txn)?;

        let mut state = self.state.write();
        let mut record = match Self::lookup(&state, key) {
            Some(record) if !record.is_deleted() => record,
            _ => return Ok(false),
        };
        record.flags = record.flags.with(add).without(remove);
        let overlay = Self::overlay_mut(&mut state);
        overlay.writes.insert(key.to_vec(), Some(record.clone()));
        drop(state);

        db.stage(LogOp::Put {
            store_id: self.id,
            record,
        });
        Ok(true)
    }

    /// Sets or clears a record's expiration time without consuming a
    /// sequence. Returns true if the key existed.
    pub fn set_expiration(
        &self,
        key: &[u8],
        when: Timestamp,
        txn: &Transaction,
    ) -> Result<bool> {
        let db = self.require_txn(txn)?;

        let mut state = self.state.write();
        let mut record = match Self::lookup(&state, key) {
            Some(record) if !record.is_deleted() => record,
            _ => return Ok(false),
        };
        record.expiration = when;
        let overlay = Self::overlay_mut(&mut state);
        overlay.writes.insert(key.to_vec(), Some(record.clone()));
        drop(state);

        db.stage(LogOp::Put {
            store_id: self.id,
            record,
        });
        Ok(true)
    }

    /// The earliest pending expiration, or none.
    #[must_use]
    pub fn next_expiration(&self) -> Timestamp {
        let state = self.state.read();
        state
            .committed
            .values()
            .filter(|r| !r.expiration.is_none() && !r.is_deleted())
            .map(|r| r.expiration)
            .min()
            .unwrap_or(Timestamp::NONE)
    }

    /// Deletes every record whose expiration is at or before `now`.
    /// Returns the number of records expired.
    pub fn expire_records(&self, now: Timestamp, txn: &Transaction) -> Result<u64> {
        let due: Vec<Vec<u8>> = {
            let state = self.state.read();
            state
                .committed
                .values()
                .filter(|r| {
                    !r.is_deleted() && !r.expiration.is_none() && r.expiration <= now
                })
                .map(|r| r.key.clone())
                .collect()
        };
        let mut expired = 0u64;
        for key in due {
            if self.del(&key, txn)? {
                expired += 1;
            }
        }
        Ok(expired)
    }

    /// Enumerates records in the order and shape the options ask for.
    ///
    /// The enumerator iterates a snapshot taken now: later mutations are
    /// not re-observed, and the enumerator outlives any transaction as
    /// long as the database stays open.
    #[must_use]
    pub fn enumerate(&self, options: EnumeratorOptions) -> RecordEnumerator {
        let mut records = self.snapshot(options);
        match options.sort {
            SortOption::Ascending => records.sort_by(|a, b| a.key.cmp(&b.key)),
            SortOption::Descending => records.sort_by(|a, b| b.key.cmp(&a.key)),
            SortOption::Unsorted => records.sort_by_key(|r| r.sequence),
        }
        RecordEnumerator::new(records)
    }

    /// Enumerates records with sequences greater than `since`, in
    /// sequence order.
    ///
    /// # Errors
    ///
    /// `Unsupported` if this store does not track sequences.
    pub fn enumerate_since(
        &self,
        since: SequenceNumber,
        options: EnumeratorOptions,
    ) -> Result<RecordEnumerator> {
        self.require_sequences()?;
        let mut records = self.snapshot(options);
        records.retain(|r| r.sequence > since);
        records.sort_by_key(|r| r.sequence);
        Ok(RecordEnumerator::new(records))
    }

    fn snapshot(&self, options: EnumeratorOptions) -> Vec<Record> {
        let state = self.state.read();
        let mut merged: BTreeMap<&[u8], &Record> = state
            .committed
            .iter()
            .map(|(k, v)| (k.as_slice(), v))
            .collect();
        if self.sees_overlay() {
            if let Some(overlay) = &state.overlay {
                for (key, entry) in &overlay.writes {
                    match entry {
                        Some(record) => {
                            merged.insert(key.as_slice(), record);
                        }
                        None => {
                            merged.remove(key.as_slice());
                        }
                    }
                }
            }
        }
        merged
            .into_values()
            .filter(|r| options.include_deleted || !r.is_deleted())
            .filter(|r| !options.only_conflicts || r.flags.contains(DocumentFlags::CONFLICTED))
            .map(|r| r.clone().with_content(options.content))
            .collect()
    }

    fn require_sequences(&self) -> Result<()> {
        if self.caps.sequences {
            Ok(())
        } else {
            Err(Error::unsupported(format!(
                "key store '{}' does not track sequences",
                self.name
            )))
        }
    }

    fn require_txn(&self, txn: &Transaction) -> Result<Arc<DbInner>> {
        let db = self.db.upgrade().ok_or(Error::NotOpen)?;
        if !Arc::ptr_eq(&db, &txn.db) {
            return Err(Error::invalid_parameter(
                "transaction belongs to a different database",
            ));
        }
        db.require_active_transaction()?;
        Ok(db)
    }

    /// The record visible for `key` inside the current transaction (the
    /// overlay entry wins over committed state).
    fn lookup(state: &StoreState, key: &[u8]) -> Option<Record> {
        match state.overlay.as_ref().and_then(|o| o.writes.get(key)) {
            Some(entry) => entry.clone(),
            None => state.committed.get(key).cloned(),
        }
    }

    fn overlay_mut(state: &mut StoreState) -> &mut Overlay {
        let last_seq = state.last_seq;
        state.overlay.get_or_insert_with(|| Overlay {
            writes: BTreeMap::new(),
            last_seq,
        })
    }

    // ---- commit/abort plumbing, called by the owning database ----

    /// Applies a committed operation to the durable in-memory state.
    pub(crate) fn apply_committed(&self, op: &LogOp) {
        let mut state = self.state.write();
        match op {
            LogOp::Put { record, .. } => {
                let seq = record.sequence.as_u64();
                if seq > 0 {
                    if let Some(old) = state.committed.get(&record.key) {
                        let old_seq = old.sequence.as_u64();
                        if old_seq > 0 {
                            state.by_seq.remove(&old_seq);
                        }
                    }
                    state.by_seq.insert(seq, record.key.clone());
                    state.last_seq = state.last_seq.max(seq);
                }
                state.committed.insert(record.key.clone(), record.clone());
            }
            LogOp::Delete { key, sequence, .. } => {
                // An empty key is the sequence high-water marker written
                // by compaction; it carries no record.
                if !key.is_empty() {
                    if let Some(old) = state.committed.remove(key) {
                        let old_seq = old.sequence.as_u64();
                        if old_seq > 0 {
                            state.by_seq.remove(&old_seq);
                        }
                    }
                }
                state.last_seq = state.last_seq.max(sequence.as_u64());
            }
        }
    }

    /// Drops the transaction overlay, keeping or discarding nothing from
    /// it; committed state is untouched either way.
    pub(crate) fn discard_overlay(&self) {
        self.state.write().overlay = None;
    }

    /// All committed records (tombstones included), by key. Used by
    /// compaction and rekey.
    pub(crate) fn committed_records(&self) -> Vec<Record> {
        self.state.read().committed.values().cloned().collect()
    }

    /// Removes committed tombstones, materializing their deletions.
    /// Returns the number purged.
    pub(crate) fn purge_tombstones(&self) -> u64 {
        let mut state = self.state.write();
        let doomed: Vec<Vec<u8>> = state
            .committed
            .values()
            .filter(|r| r.is_deleted())
            .map(|r| r.key.clone())
            .collect();
        let purged = doomed.len() as u64;
        for key in doomed {
            if let Some(old) = state.committed.remove(&key) {
                let old_seq = old.sequence.as_u64();
                if old_seq > 0 {
                    state.by_seq.remove(&old_seq);
                }
            }
        }
        state.purge_count += purged;
        purged
    }
}

impl std::fmt::Debug for KeyStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyStore")
            .field("name", &self.name)
            .field("id", &self.id)
            .field("capabilities", &self.caps)
            .field("last_sequence", &self.last_sequence())
            .finish_non_exhaustive()
    }
}

/// Forward-only iterator over a snapshot of records.
#[derive(Debug)]
pub struct RecordEnumerator {
    records: Vec<Record>,
    /// Index of the current record plus one; 0 before the first `next`.
    pos: usize,
    closed: bool,
}

impl RecordEnumerator {
    fn new(records: Vec<Record>) -> Self {
        Self {
            records,
            pos: 0,
            closed: false,
        }
    }

    /// Advances to the next record. Returns false at the end.
    pub fn next(&mut self) -> bool {
        if self.closed || self.pos >= self.records.len() {
            self.closed = true;
            return false;
        }
        self.pos += 1;
        true
    }

    /// The current record, if positioned on one.
    #[must_use]
    pub fn record(&self) -> Option<&Record> {
        if self.closed || self.pos == 0 {
            return None;
        }
        self.records.get(self.pos - 1)
    }

    /// Ends the enumeration; further calls return false/None.
    pub fn close(&mut self) {
        self.closed = true;
    }
}
