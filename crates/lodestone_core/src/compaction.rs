//! Log compaction planning.
//!
//! Compaction rewrites the record log so it holds exactly one entry per
//! live record. Tombstones are purged, materializing their deletions.
//! Surviving records keep their sequences; when a store's highest
//! assigned sequence belonged to a purged or hard-deleted record, a
//! high-water marker (an empty-key delete entry) preserves it so
//! sequences are never reused after a reopen.

use crate::keystore::KeyStore;
use crate::log::LogOp;
use crate::types::SequenceNumber;
use std::sync::Arc;

/// Statistics from one compaction run.
#[derive(Debug, Clone, Default)]
pub struct CompactionStats {
    /// Records examined across all key stores.
    pub input_records: usize,
    /// Live records written to the new log.
    pub live_records: usize,
    /// Tombstones whose deletion was materialized.
    pub tombstones_purged: u64,
}

/// The rewrite batch for a new log, plus statistics.
#[derive(Debug)]
pub(crate) struct CompactionPlan {
    pub ops: Vec<LogOp>,
    pub stats: CompactionStats,
}

/// Purges tombstones from the given stores and plans the replacement
/// log contents.
pub(crate) fn compact_stores(stores: &[Arc<KeyStore>]) -> CompactionPlan {
    let mut stats = CompactionStats::default();
    let mut ops = Vec::new();
    for store in sorted_by_id(stores) {
        let live_before = store.committed_records().len();
        let purged = store.purge_tombstones();
        stats.input_records += live_before;
        stats.tombstones_purged += purged;
        append_store_contents(&mut ops, &store);
    }
    stats.live_records = ops
        .iter()
        .filter(|op| matches!(op, LogOp::Put { .. }))
        .count();
    CompactionPlan { ops, stats }
}

/// Plans a byte-faithful rewrite: every record including tombstones.
/// Used by rekey, which must not change logical state.
pub(crate) fn full_contents(stores: &[Arc<KeyStore>]) -> Vec<LogOp> {
    let mut ops = Vec::new();
    for store in sorted_by_id(stores) {
        append_store_contents(&mut ops, &store);
    }
    ops
}

fn append_store_contents(ops: &mut Vec<LogOp>, store: &Arc<KeyStore>) {
    let store_id = store.id();
    let mut max_seq = 0u64;
    for record in store.committed_records() {
        max_seq = max_seq.max(record.sequence.as_u64());
        ops.push(LogOp::Put { store_id, record });
    }
    let last_seq = store.last_sequence().as_u64();
    if store.capabilities().sequences && last_seq > max_seq {
        ops.push(LogOp::Delete {
            store_id,
            key: Vec::new(),
            sequence: SequenceNumber::new(last_seq),
        });
    }
}

fn sorted_by_id(stores: &[Arc<KeyStore>]) -> Vec<Arc<KeyStore>> {
    let mut sorted = stores.to_vec();
    sorted.sort_by_key(|s| s.id());
    sorted
}
