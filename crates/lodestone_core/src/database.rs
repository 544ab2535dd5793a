//! Database facade: a container of key stores backed by a single file.

use crate::compaction::{self, CompactionStats};
use crate::dir::{self, DatabaseDir};
use crate::error::{Error, Result};
use crate::global::{self, EngineConfig};
use crate::keystore::{Capabilities, KeyStore, DEFAULT_KEYSTORE};
use crate::log::{Durability, LogOp, RecordLog};
use crate::manifest::Manifest;
use crate::shared_file::{self, SharedFile};
use crate::transaction::{Transaction, TransactionState};
use lodestone_storage::{
    looks_encrypted, EncryptedBackend, EncryptionKey, FileBackend, MemoryBackend, StorageBackend,
};
use parking_lot::{Condvar, MappedMutexGuard, Mutex, MutexGuard, RwLock};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, ThreadId};

/// Encryption applied to the database file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EncryptionAlgorithm {
    /// No encryption.
    #[default]
    None,
    /// AES with a 256-bit key.
    Aes256,
}

/// Options for opening a database.
#[derive(Clone)]
pub struct Options {
    /// Create the database if it does not exist.
    pub create: bool,
    /// Open read-write; a read-only database rejects transactions.
    pub writeable: bool,
    /// Encryption algorithm for the database file.
    pub encryption_algorithm: EncryptionAlgorithm,
    /// Raw key bytes (32 for AES-256). Required iff encryption is on.
    pub encryption_key: Option<Vec<u8>>,
    /// Capabilities given to the default key store on creation.
    pub default_keystore: Capabilities,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            create: true,
            writeable: true,
            encryption_algorithm: EncryptionAlgorithm::None,
            encryption_key: None,
            default_keystore: Capabilities::full(),
        }
    }
}

impl std::fmt::Debug for Options {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Options")
            .field("create", &self.create)
            .field("writeable", &self.writeable)
            .field("encryption_algorithm", &self.encryption_algorithm)
            .field("encryption_key", &self.encryption_key.as_ref().map(|_| "[redacted]"))
            .field("default_keystore", &self.default_keystore)
            .finish()
    }
}

/// Callback fired when compaction starts (`true`) and ends (`false`).
pub type OnCompactCallback = Box<dyn Fn(bool) + Send + Sync>;

static MEMORY_DB_COUNTER: AtomicU64 = AtomicU64::new(0);

/// A database file: a container of key stores, the single-writer
/// transaction gate, and maintenance (compaction, rekey).
///
/// Dropping the handle closes the database. Several handles may open the
/// same file; they share one file-level transaction lock through the
/// process-wide registry.
pub struct Database {
    inner: Arc<DbInner>,
}

pub(crate) struct DbInner {
    path: Option<PathBuf>,
    options: RwLock<Options>,
    dir: Mutex<Option<DatabaseDir>>,
    file: Arc<SharedFile>,
    log: Mutex<RecordLog>,
    manifest: Mutex<Manifest>,
    /// Open stores by name; closing a store only removes it here.
    stores: RwLock<HashMap<String, Arc<KeyStore>>>,
    /// Every instantiated store by id, kept for log application.
    stores_by_id: RwLock<HashMap<u32, Arc<KeyStore>>>,
    physical: Mutex<PhysicalTxn>,
    nested: Mutex<NestedTxn>,
    nested_cond: Condvar,
    open: AtomicBool,
    handle_released: AtomicBool,
    on_compact: Mutex<Option<OnCompactCallback>>,
}

#[derive(Default)]
struct PhysicalTxn {
    active: bool,
    staged: Vec<LogOp>,
}

#[derive(Default)]
struct NestedTxn {
    depth: u32,
    poison: bool,
    owner: Option<ThreadId>,
    /// The physical transaction owned by the counter API while nested.
    current: Option<Transaction>,
}

impl Database {
    /// Opens or creates a database at `path`.
    ///
    /// The `.cblite2` extension is appended if missing. The engine
    /// configuration is fixed at the first open (see
    /// [`EngineConfig`]); this variant uses the environment defaults.
    pub fn open(path: &Path, options: Options) -> Result<Self> {
        Self::open_with_config(path, options, EngineConfig::default())
    }

    /// Opens a database, fixing the engine configuration if this is the
    /// first open in the process.
    pub fn open_with_config(
        path: &Path,
        options: Options,
        engine: EngineConfig,
    ) -> Result<Self> {
        global::init_engine_config(engine);
        validate_encryption(&options)?;

        let dir_path = dir::with_db_extension(path);
        let file = SharedFile::for_path(global::canonical_key(&dir_path));
        let dir = DatabaseDir::open(&dir_path, options.create)?;
        if !options.create && dir.is_new_database() {
            return Err(Error::not_found(format!(
                "no database at {}",
                dir_path.display()
            ))
            .surfaced());
        }
        let manifest = dir.load_manifest()?.unwrap_or_default();

        let backend = open_backend(&dir.log_path(), &options)?;
        let (log, ops) = RecordLog::open(backend)?;
        tracing::debug!(path = %dir_path.display(), replayed = ops.len(), "opened database");

        Self::finish_open(Some(dir_path), Some(dir), file, manifest, log, ops, options)
    }

    /// Opens an ephemeral in-memory database.
    pub fn open_in_memory(options: Options) -> Result<Self> {
        global::init_engine_config(EngineConfig::default());
        validate_encryption(&options)?;
        let n = MEMORY_DB_COUNTER.fetch_add(1, Ordering::SeqCst);
        let file = SharedFile::for_path(PathBuf::from(format!("/lodestone/memory/{n}")));
        let backend = wrap_encryption(Box::new(MemoryBackend::new()), &options)?;
        let (log, ops) = RecordLog::open(backend)?;
        Self::finish_open(None, None, file, Manifest::new(), log, ops, options)
    }

    fn finish_open(
        path: Option<PathBuf>,
        dir: Option<DatabaseDir>,
        file: Arc<SharedFile>,
        manifest: Manifest,
        log: RecordLog,
        replayed: Vec<LogOp>,
        options: Options,
    ) -> Result<Self> {
        let catalog: Vec<String> = manifest.names();
        let inner = Arc::new(DbInner {
            path,
            options: RwLock::new(options),
            dir: Mutex::new(dir),
            file: Arc::clone(&file),
            log: Mutex::new(log),
            manifest: Mutex::new(manifest),
            stores: RwLock::new(HashMap::new()),
            stores_by_id: RwLock::new(HashMap::new()),
            physical: Mutex::new(PhysicalTxn::default()),
            nested: Mutex::new(NestedTxn::default()),
            nested_cond: Condvar::new(),
            open: AtomicBool::new(true),
            handle_released: AtomicBool::new(false),
            on_compact: Mutex::new(None),
        });
        file.retain_handle();

        for name in catalog {
            DbInner::instantiate_store(&inner, &name)?;
        }
        for op in &replayed {
            match inner.store_by_id(op.store_id()) {
                Some(store) => store.apply_committed(op),
                // A store deleted after these records were logged; its
                // leftovers die at the next compaction.
                None => tracing::debug!(store_id = op.store_id(), "skipping orphaned log entry"),
            }
        }
        Ok(Self { inner })
    }

    /// The database directory path, or `None` for in-memory databases.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.inner.path.as_deref()
    }

    /// A copy of the open options.
    #[must_use]
    pub fn options(&self) -> Options {
        self.inner.options.read().clone()
    }

    /// True until `close` is called.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.inner.open.load(Ordering::SeqCst)
    }

    /// Closes the database, flushing state and releasing the file.
    ///
    /// Idempotent. Fails with `TransactionNotClosed` while a transaction
    /// is open.
    pub fn close(&self) -> Result<()> {
        if !self.is_open() {
            return Ok(());
        }
        if self.inner.physical.lock().active {
            return Err(Error::TransactionNotClosed.surfaced());
        }
        if let Some(dir) = self.inner.dir.lock().as_ref() {
            let manifest = self.inner.manifest.lock();
            dir.save_manifest(&manifest)?;
        }
        {
            let mut log = self.inner.log.lock();
            log.flush()?;
        }
        self.inner.open.store(false, Ordering::SeqCst);
        *self.inner.dir.lock() = None; // releases the LOCK file
        if !self.inner.handle_released.swap(true, Ordering::SeqCst) {
            self.inner.file.release_handle();
        }
        tracing::debug!("closed database");
        Ok(())
    }

    /// Erases a database that no handle holds open.
    ///
    /// # Errors
    ///
    /// `Busy` while any open handle exists, `NotFound` if there is no
    /// database at `path`.
    pub fn delete_database(path: &Path) -> Result<()> {
        let dir_path = dir::with_db_extension(path);
        let key = global::canonical_key(&dir_path);
        if SharedFile::is_in_use(&key) {
            return Err(Error::busy(format!(
                "database is open: {}",
                dir_path.display()
            ))
            .surfaced());
        }
        DatabaseDir::erase(&dir_path)
    }

    // ---- key stores ----

    /// The default key store, created on first use with the capabilities
    /// from the open options.
    pub fn default_keystore(&self) -> Result<Arc<KeyStore>> {
        let caps = self.inner.options.read().default_keystore;
        self.get_keystore_with(DEFAULT_KEYSTORE, caps)
    }

    /// Gets or lazily creates a key store by name.
    ///
    /// New stores get no capabilities; use [`Database::get_keystore_with`]
    /// to create one with sequences or soft deletes. Capabilities are
    /// fixed at creation, so they are ignored for existing stores.
    pub fn get_keystore(&self, name: &str) -> Result<Arc<KeyStore>> {
        self.get_keystore_with(name, Capabilities::default())
    }

    /// Gets or lazily creates a key store with explicit capabilities.
    pub fn get_keystore_with(&self, name: &str, caps: Capabilities) -> Result<Arc<KeyStore>> {
        self.inner.require_open()?;
        if name.is_empty() {
            return Err(Error::invalid_parameter("key store name must not be empty").surfaced());
        }
        if let Some(store) = self.inner.stores.read().get(name) {
            return Ok(Arc::clone(store));
        }

        let (entry, is_new) = {
            let mut manifest = self.inner.manifest.lock();
            let is_new = manifest.get(name).is_none();
            (manifest.get_or_create(name, caps), is_new)
        };
        if is_new {
            self.inner.persist_manifest_best_effort();
        }

        // A previously closed store keeps its state; reattach it.
        if let Some(store) = self.inner.stores_by_id.read().get(&entry.id) {
            self.inner
                .stores
                .write()
                .insert(name.to_string(), Arc::clone(store));
            return Ok(Arc::clone(store));
        }
        DbInner::instantiate_store(&self.inner, name)
    }

    /// Closes a key store handle. Its records stay; a later
    /// `get_keystore` reopens it.
    pub fn close_keystore(&self, name: &str) {
        self.inner.stores.write().remove(name);
    }

    /// Permanently deletes a key store and forgets its records.
    ///
    /// Illegal inside a transaction. The records already in the log are
    /// dropped at the next compaction.
    pub fn delete_keystore(&self, name: &str) -> Result<()> {
        self.inner.require_open()?;
        if self.inner.physical.lock().active {
            return Err(Error::TransactionNotClosed.surfaced());
        }
        let inner = &self.inner;
        inner.file.with_lock(|| {
            let removed = {
                let mut manifest = inner.manifest.lock();
                manifest.remove(name)
            };
            if !removed {
                return Err(Error::not_found(format!("no key store named '{name}'")).surfaced());
            }
            inner.persist_manifest_best_effort();
            let id = inner
                .stores
                .write()
                .remove(name)
                .map(|s| s.id());
            let mut by_id = inner.stores_by_id.write();
            if let Some(id) = id {
                by_id.remove(&id);
            } else {
                by_id.retain(|_, s| s.name() != name);
            }
            Ok(())
        })
    }

    /// Names of all key stores, opened or not.
    #[must_use]
    pub fn all_keystore_names(&self) -> Vec<String> {
        self.inner.manifest.lock().names()
    }

    // ---- transactions ----

    /// Begins a scoped transaction (see [`Transaction`]). Blocks while
    /// another transaction holds the file.
    pub fn transaction(&self) -> Result<Transaction> {
        Transaction::begin(Arc::clone(&self.inner))
    }

    /// Runs `f` inside a transaction, committing on `Ok` and rolling
    /// back on `Err`.
    pub fn with_transaction<T>(&self, f: impl FnOnce(&Transaction) -> Result<T>) -> Result<T> {
        let mut txn = self.transaction()?;
        match f(&txn) {
            Ok(value) => {
                txn.end()?;
                Ok(value)
            }
            Err(err) => {
                txn.abort();
                let _ = txn.end();
                Err(err)
            }
        }
    }

    /// Begins a caller-level transaction, nesting on the same thread.
    ///
    /// Only the outermost begin opens the physical transaction; other
    /// threads block until this thread's nesting fully unwinds. Use
    /// [`Database::current_transaction`] to get the transaction handle
    /// mutations require.
    pub fn begin_transaction(&self) -> Result<()> {
        let inner = &self.inner;
        let me = thread::current().id();
        let mut nested = inner.nested.lock();
        while nested.depth > 0 && nested.owner != Some(me) {
            inner.nested_cond.wait(&mut nested);
        }
        if nested.depth == 0 {
            nested.current = Some(Transaction::begin(Arc::clone(inner))?);
            nested.owner = Some(me);
            nested.poison = false;
        }
        nested.depth += 1;
        Ok(())
    }

    /// Ends one level of caller-level transaction.
    ///
    /// `commit = false` at any level poisons the outermost commit into a
    /// rollback. Only the outermost end touches the physical transaction.
    pub fn end_transaction(&self, commit: bool) -> Result<()> {
        let inner = &self.inner;
        let me = thread::current().id();
        let mut nested = inner.nested.lock();
        if nested.depth == 0 || nested.owner != Some(me) {
            return Err(Error::NotInTransaction.surfaced());
        }
        if !commit {
            nested.poison = true;
        }
        nested.depth -= 1;
        if nested.depth > 0 {
            return Ok(());
        }
        let mut txn = nested
            .current
            .take()
            .expect("outermost end has a physical transaction");
        if nested.poison {
            txn.abort();
        }
        nested.owner = None;
        nested.poison = false;
        drop(nested);
        let result = txn.end();
        inner.nested_cond.notify_all();
        result
    }

    /// The transaction opened by [`Database::begin_transaction`], for
    /// passing to key store mutations. `None` outside one.
    pub fn current_transaction(&self) -> Option<MappedMutexGuard<'_, Transaction>> {
        let guard = self.inner.nested.lock();
        MutexGuard::try_map(guard, |nested| nested.current.as_mut()).ok()
    }

    /// True while any transaction (scoped or caller-level) is open on
    /// this handle's file.
    #[must_use]
    pub fn is_in_transaction(&self) -> bool {
        self.inner.physical.lock().active
    }

    // ---- maintenance ----

    /// Compacts the database: reclaims log space and materializes
    /// tombstoned deletions. Runs with writes excluded; reads proceed.
    pub fn compact(&self) -> Result<CompactionStats> {
        self.inner.require_open()?;
        if self.inner.physical.lock().active {
            return Err(Error::TransactionNotClosed.surfaced());
        }
        let inner = &self.inner;
        inner.file.with_lock(|| inner.compact_locked())
    }

    /// True while this database's file is being compacted.
    #[must_use]
    pub fn is_compacting(&self) -> bool {
        self.inner.file.is_compacting()
    }

    /// True while any database in the process is compacting.
    #[must_use]
    pub fn is_any_compacting() -> bool {
        shared_file::any_compacting()
    }

    /// Installs the compaction callback, fired at start and end.
    pub fn set_on_compact(&self, callback: OnCompactCallback) {
        *self.inner.on_compact.lock() = Some(callback);
    }

    /// Re-encrypts the database file under a new algorithm and key,
    /// atomically. Legal only outside a transaction.
    pub fn rekey(&self, algorithm: EncryptionAlgorithm, key: Option<&[u8]>) -> Result<()> {
        self.inner.require_open()?;
        if self.inner.physical.lock().active {
            return Err(Error::TransactionNotClosed.surfaced());
        }
        let new_options = {
            let mut options = self.inner.options.read().clone();
            options.encryption_algorithm = algorithm;
            options.encryption_key = key.map(<[u8]>::to_vec);
            validate_encryption(&options)?;
            options
        };
        let inner = &self.inner;
        inner.file.with_lock(|| inner.rekey_locked(new_options))
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("path", &self.inner.path)
            .field("is_open", &self.is_open())
            .field("in_transaction", &self.is_in_transaction())
            .finish_non_exhaustive()
    }
}

impl Drop for Database {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

impl DbInner {
    pub(crate) fn require_open(&self) -> Result<()> {
        if self.open.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(Error::NotOpen.surfaced())
        }
    }

    pub(crate) fn require_active_transaction(&self) -> Result<()> {
        self.require_open()?;
        if self.physical.lock().active {
            Ok(())
        } else {
            Err(Error::NotInTransaction.surfaced())
        }
    }

    /// Queues a mutation for the commit batch, in mutation order.
    pub(crate) fn stage(&self, op: LogOp) {
        self.physical.lock().staged.push(op);
    }

    pub(crate) fn begin_physical(&self) -> Result<()> {
        self.require_open()?;
        if !self.options.read().writeable {
            return Err(Error::NotWriteable.surfaced());
        }
        self.file.begin_transaction();
        let mut physical = self.physical.lock();
        physical.active = true;
        physical.staged.clear();
        Ok(())
    }

    pub(crate) fn end_physical(&self, state: TransactionState) -> Result<()> {
        let result = match state {
            TransactionState::Commit => self.commit_staged(Durability::Flush),
            TransactionState::CommitManualWalFlush => self.commit_staged(Durability::Sync),
            TransactionState::Abort | TransactionState::NoOp => {
                self.discard_staged();
                Ok(())
            }
        };
        self.physical.lock().active = false;
        self.file.end_transaction();
        result
    }

    fn commit_staged(&self, durability: Durability) -> Result<()> {
        let staged = {
            let mut physical = self.physical.lock();
            std::mem::take(&mut physical.staged)
        };
        if staged.is_empty() {
            self.drop_overlays();
            return Ok(());
        }
        let appended = {
            let mut log = self.log.lock();
            log.append_commit(&staged, durability)
        };
        match appended {
            Ok(()) => {
                for op in &staged {
                    if let Some(store) = self.store_by_id(op.store_id()) {
                        store.apply_committed(op);
                    }
                }
                self.drop_overlays();
                tracing::debug!(ops = staged.len(), "committed transaction");
                Ok(())
            }
            Err(err) => {
                // The failed batch was truncated away; dropping the
                // overlays restores the pre-transaction state.
                self.drop_overlays();
                Err(err.surfaced())
            }
        }
    }

    fn discard_staged(&self) {
        self.physical.lock().staged.clear();
        self.drop_overlays();
    }

    fn drop_overlays(&self) {
        for store in self.stores_by_id.read().values() {
            store.discard_overlay();
        }
    }

    pub(crate) fn store_by_id(&self, id: u32) -> Option<Arc<KeyStore>> {
        self.stores_by_id.read().get(&id).cloned()
    }

    fn instantiate_store(inner: &Arc<Self>, name: &str) -> Result<Arc<KeyStore>> {
        let entry = {
            let manifest = inner.manifest.lock();
            manifest
                .get(name)
                .cloned()
                .ok_or_else(|| Error::not_found(format!("no key store named '{name}'")))?
        };
        let store = Arc::new(KeyStore::new(
            name.to_string(),
            entry.id,
            entry.capabilities(),
            Arc::downgrade(inner),
            Arc::clone(&inner.file),
        ));
        inner
            .stores
            .write()
            .insert(name.to_string(), Arc::clone(&store));
        inner
            .stores_by_id
            .write()
            .insert(entry.id, Arc::clone(&store));
        Ok(store)
    }

    fn persist_manifest_best_effort(&self) {
        if let Some(dir) = self.dir.lock().as_ref() {
            let manifest = self.manifest.lock();
            if let Err(err) = dir.save_manifest(&manifest) {
                tracing::warn!("failed to persist manifest: {err}");
            }
        }
    }

    fn all_stores(&self) -> Vec<Arc<KeyStore>> {
        self.stores_by_id.read().values().cloned().collect()
    }

    fn fire_compact_callback(&self, compacting: bool) {
        if let Some(callback) = self.on_compact.lock().as_ref() {
            callback(compacting);
        }
    }

    fn compact_locked(&self) -> Result<CompactionStats> {
        self.file.set_compacting(true);
        self.fire_compact_callback(true);
        tracing::info!("compaction started");

        let result = self.compact_inner();

        self.file.set_compacting(false);
        self.fire_compact_callback(false);
        match &result {
            Ok(stats) => tracing::info!(
                live = stats.live_records,
                purged = stats.tombstones_purged,
                "compaction finished"
            ),
            Err(err) => tracing::warn!("compaction failed: {err}"),
        }
        result
    }

    fn compact_inner(&self) -> Result<CompactionStats> {
        let stores = self.all_stores();
        let plan = compaction::compact_stores(&stores);
        self.replace_log(&plan.ops, None)?;
        Ok(plan.stats)
    }

    fn rekey_locked(&self, new_options: Options) -> Result<()> {
        if self.path.is_none() {
            return Err(Error::unsupported("cannot rekey an ephemeral database").surfaced());
        }
        let ops = compaction::full_contents(&self.all_stores());
        self.replace_log(&ops, Some(&new_options))?;
        *self.options.write() = new_options;
        tracing::info!("database rekeyed");
        Ok(())
    }

    /// Rewrites the record log with `ops`. File-backed databases build
    /// the replacement beside the live log and promote it with a rename;
    /// ephemeral databases rewrite in place.
    fn replace_log(&self, ops: &[LogOp], new_options: Option<&Options>) -> Result<()> {
        let dir_guard = self.dir.lock();
        match dir_guard.as_ref() {
            Some(db_dir) => {
                let options = match new_options {
                    Some(options) => options.clone(),
                    None => self.options.read().clone(),
                };
                db_dir.discard_temp_log();
                let temp_path = db_dir.log_temp_path();
                {
                    let mut backend = open_backend(&temp_path, &options)?;
                    RecordLog::write_full(backend.as_mut(), ops)?;
                }
                db_dir.swap_log()?;
                let backend = open_backend(&db_dir.log_path(), &options)?;
                let (log, _) = RecordLog::open(backend)?;
                *self.log.lock() = log;
            }
            None => {
                if new_options.is_some() {
                    return Err(Error::unsupported("cannot rekey an ephemeral database"));
                }
                self.log.lock().rewrite(ops)?;
            }
        }
        Ok(())
    }
}

fn validate_encryption(options: &Options) -> Result<()> {
    match options.encryption_algorithm {
        EncryptionAlgorithm::None => {
            if options.encryption_key.is_some() {
                return Err(Error::invalid_parameter(
                    "encryption key given without an algorithm",
                )
                .surfaced());
            }
        }
        EncryptionAlgorithm::Aes256 => {
            let key = options
                .encryption_key
                .as_ref()
                .ok_or_else(|| Error::crypto("AES-256 requires a key"))?;
            if key.len() != 32 {
                return Err(Error::crypto(format!(
                    "AES-256 key must be 32 bytes, got {}",
                    key.len()
                ))
                .surfaced());
            }
        }
    }
    Ok(())
}

fn wrap_encryption(
    backend: Box<dyn StorageBackend>,
    options: &Options,
) -> Result<Box<dyn StorageBackend>> {
    match options.encryption_algorithm {
        EncryptionAlgorithm::None => Ok(backend),
        EncryptionAlgorithm::Aes256 => {
            let key_bytes = options
                .encryption_key
                .as_ref()
                .ok_or_else(|| Error::crypto("AES-256 requires a key"))?;
            let key = EncryptionKey::from_bytes(key_bytes)?;
            Ok(Box::new(EncryptedBackend::open(backend, &key)?))
        }
    }
}

fn open_backend(path: &Path, options: &Options) -> Result<Box<dyn StorageBackend>> {
    let file = FileBackend::open(path)?;
    if options.encryption_algorithm == EncryptionAlgorithm::None {
        let size = file.size()?;
        if size >= 8 && looks_encrypted(&file.read_at(0, 8)?) {
            return Err(Error::crypto("database file is encrypted; a key is required").surfaced());
        }
    }
    wrap_encryption(Box::new(file), options)
}
