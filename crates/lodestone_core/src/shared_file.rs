//! Process-wide shared state per database file.
//!
//! Every open database handle resolves its canonical path to one
//! [`SharedFile`] record through a process-wide registry. The record owns
//! the file-level exclusion: at most one transaction (or maintenance
//! section) runs against a file at a time, across all handles in the
//! process. Readers never touch it.
//!
//! Records are reference-counted; the registry holds weak references and
//! a record dies with its last database handle, which is also how
//! `delete_database` detects that a file is still in use.

use parking_lot::{Condvar, Mutex};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, ThreadId};

static REGISTRY: Mutex<Option<HashMap<PathBuf, Weak<SharedFile>>>> = Mutex::new(None);
static COMPACTING: AtomicUsize = AtomicUsize::new(0);

/// Shared per-file state: the transaction flag and compaction marker.
#[derive(Debug)]
pub struct SharedFile {
    key: PathBuf,
    state: Mutex<FileState>,
    cond: Condvar,
    compacting: AtomicBool,
    /// Database handles currently open (not just allocated) on this file.
    handles: AtomicUsize,
}

#[derive(Debug, Default)]
struct FileState {
    /// A transaction or maintenance section holds the file.
    busy: bool,
    /// Thread running the current transaction, if the holder is one.
    txn_thread: Option<ThreadId>,
}

impl SharedFile {
    /// Returns the shared record for a canonical path, creating it if no
    /// handle currently holds one.
    pub fn for_path(key: PathBuf) -> Arc<Self> {
        let mut registry = REGISTRY.lock();
        let map = registry.get_or_insert_with(HashMap::new);
        map.retain(|_, weak| weak.strong_count() > 0);
        if let Some(existing) = map.get(&key).and_then(Weak::upgrade) {
            return existing;
        }
        let file = Arc::new(Self {
            key: key.clone(),
            state: Mutex::new(FileState::default()),
            cond: Condvar::new(),
            compacting: AtomicBool::new(false),
            handles: AtomicUsize::new(0),
        });
        map.insert(key, Arc::downgrade(&file));
        file
    }

    /// True if any open database handle shares the record for this path.
    pub fn is_in_use(key: &Path) -> bool {
        let registry = REGISTRY.lock();
        registry
            .as_ref()
            .and_then(|map| map.get(key))
            .and_then(Weak::upgrade)
            .is_some_and(|file| file.handles.load(Ordering::SeqCst) > 0)
    }

    /// Counts a newly opened database handle.
    pub fn retain_handle(&self) {
        self.handles.fetch_add(1, Ordering::SeqCst);
    }

    /// Releases a handle counted by [`SharedFile::retain_handle`].
    pub fn release_handle(&self) {
        self.handles.fetch_sub(1, Ordering::SeqCst);
    }

    /// The registry key (canonical path).
    #[must_use]
    pub fn key(&self) -> &Path {
        &self.key
    }

    /// Acquires the file for a transaction, blocking while another
    /// transaction or maintenance section holds it.
    pub fn begin_transaction(&self) {
        let mut state = self.state.lock();
        while state.busy {
            self.cond.wait(&mut state);
        }
        state.busy = true;
        state.txn_thread = Some(thread::current().id());
    }

    /// Releases the file after a transaction.
    pub fn end_transaction(&self) {
        let mut state = self.state.lock();
        state.busy = false;
        state.txn_thread = None;
        drop(state);
        self.cond.notify_all();
    }

    /// True while a transaction holds the file.
    pub fn in_transaction(&self) -> bool {
        let state = self.state.lock();
        state.busy && state.txn_thread.is_some()
    }

    /// The thread running the current transaction, if any.
    pub fn transaction_thread(&self) -> Option<ThreadId> {
        self.state.lock().txn_thread
    }

    /// Runs `f` while holding the file without opening a transaction.
    ///
    /// Excludes transactions from starting for the duration; used by
    /// compaction, rekey and key store deletion.
    pub fn with_lock<T>(&self, f: impl FnOnce() -> T) -> T {
        let mut state = self.state.lock();
        while state.busy {
            self.cond.wait(&mut state);
        }
        state.busy = true;
        state.txn_thread = None;
        drop(state);

        let _release = ReleaseOnDrop(self);
        f()
    }

    /// Marks this file as compacting. Returns false if already marked.
    pub fn set_compacting(&self, on: bool) -> bool {
        let was = self.compacting.swap(on, Ordering::SeqCst);
        match (was, on) {
            (false, true) => {
                COMPACTING.fetch_add(1, Ordering::SeqCst);
                true
            }
            (true, false) => {
                COMPACTING.fetch_sub(1, Ordering::SeqCst);
                true
            }
            _ => false,
        }
    }

    /// True while this file is being compacted.
    pub fn is_compacting(&self) -> bool {
        self.compacting.load(Ordering::SeqCst)
    }
}

struct ReleaseOnDrop<'a>(&'a SharedFile);

impl Drop for ReleaseOnDrop<'_> {
    fn drop(&mut self) {
        let mut state = self.0.state.lock();
        state.busy = false;
        drop(state);
        self.0.cond.notify_all();
    }
}

/// True while any database in the process is compacting.
pub fn any_compacting() -> bool {
    COMPACTING.load(Ordering::SeqCst) > 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn same_key_shares_record() {
        let key = PathBuf::from("/shared-file-test/a.cblite2");
        let a = SharedFile::for_path(key.clone());
        let b = SharedFile::for_path(key.clone());
        assert!(Arc::ptr_eq(&a, &b));

        // In-use tracks open handles, not allocations.
        assert!(!SharedFile::is_in_use(&key));
        a.retain_handle();
        assert!(SharedFile::is_in_use(&key));
        a.release_handle();
        assert!(!SharedFile::is_in_use(&key));
        drop((a, b));
        assert!(!SharedFile::is_in_use(&key));
    }

    #[test]
    fn record_is_recreated_after_all_handles_drop() {
        let key = PathBuf::from("/shared-file-test/b.cblite2");
        let a = SharedFile::for_path(key.clone());
        let ptr = Arc::as_ptr(&a) as usize;
        drop(a);
        let b = SharedFile::for_path(key);
        // May or may not reuse the allocation; what matters is liveness.
        let _ = ptr;
        assert!(!b.in_transaction());
    }

    #[test]
    fn transaction_flag_tracks_thread() {
        let file = SharedFile::for_path(PathBuf::from("/shared-file-test/c.cblite2"));
        assert!(!file.in_transaction());
        file.begin_transaction();
        assert!(file.in_transaction());
        assert_eq!(file.transaction_thread(), Some(thread::current().id()));
        file.end_transaction();
        assert!(!file.in_transaction());
    }

    #[test]
    fn with_lock_excludes_transactions() {
        let file = SharedFile::for_path(PathBuf::from("/shared-file-test/d.cblite2"));
        let file2 = Arc::clone(&file);

        file.with_lock(|| {
            // A transaction on another thread must wait until the lock
            // section ends.
            let handle = thread::spawn(move || {
                file2.begin_transaction();
                file2.end_transaction();
            });
            thread::sleep(Duration::from_millis(20));
            assert!(!handle.is_finished());
            handle
        })
        .join()
        .unwrap();
    }

    #[test]
    fn compacting_counters() {
        let file = SharedFile::for_path(PathBuf::from("/shared-file-test/e.cblite2"));
        assert!(!file.is_compacting());
        assert!(file.set_compacting(true));
        assert!(file.is_compacting());
        assert!(any_compacting());
        assert!(file.set_compacting(false));
        assert!(!file.is_compacting());
    }
}
