//! Process-wide engine state.
//!
//! Three pieces of state are process-global by contract:
//!
//! - the vector-search extension directory, fixed at first database open;
//! - the override temporary directory, settable exactly once;
//! - the test-suite fault accounting (expected-fault counter and the
//!   warn-on-error flag).

use crate::error::{Error, Result};
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::OnceLock;

/// Environment variable naming the vector-search extension directory.
pub const EXTENSION_PATH_ENV: &str = "LiteCoreExtensionPath";

static EXTENSION_PATH: OnceLock<Option<PathBuf>> = OnceLock::new();
static TEMP_DIR: Mutex<Option<PathBuf>> = Mutex::new(None);
static EXPECTING_FAULTS: AtomicI32 = AtomicI32::new(0);
static WARN_ON_ERROR: AtomicBool = AtomicBool::new(false);

/// Configuration applied at the first database open.
///
/// The extension path must be fixed before any database opens so the
/// backend can load the vector-search module; it is not a live-mutable
/// global. When unset, the `LiteCoreExtensionPath` environment variable
/// is consulted once.
#[derive(Debug, Clone, Default)]
pub struct EngineConfig {
    /// Directory containing the vector-search backend extension.
    pub extension_path: Option<PathBuf>,
}

/// Fixes the engine configuration if it has not been fixed yet.
///
/// The first caller wins; later calls are no-ops. `Database::open` routes
/// through here, so an explicit call is only needed to override the
/// environment.
pub fn init_engine_config(config: EngineConfig) {
    EXTENSION_PATH.get_or_init(|| {
        config
            .extension_path
            .or_else(|| std::env::var_os(EXTENSION_PATH_ENV).map(PathBuf::from))
    });
}

/// The fixed vector-search extension directory, if any.
#[must_use]
pub fn extension_path() -> Option<PathBuf> {
    EXTENSION_PATH.get().cloned().flatten()
}

/// Sets the process-wide temporary directory.
///
/// # Errors
///
/// A second call fails with `Unsupported`; the setting cannot change once
/// anything may have placed files under it.
pub fn set_temp_directory(path: impl Into<PathBuf>) -> Result<()> {
    let mut dir = TEMP_DIR.lock();
    if dir.is_some() {
        return Err(Error::unsupported("temporary directory is already set"));
    }
    *dir = Some(path.into());
    Ok(())
}

/// The effective temporary directory.
#[must_use]
pub fn temp_directory() -> PathBuf {
    TEMP_DIR
        .lock()
        .clone()
        .unwrap_or_else(std::env::temp_dir)
}

/// Enables or disables warn-on-error escalation.
pub fn set_warn_on_error(enabled: bool) {
    WARN_ON_ERROR.store(enabled, Ordering::Relaxed);
}

/// Whether surfaced errors should be escalated to log warnings.
#[must_use]
pub fn warn_on_error() -> bool {
    WARN_ON_ERROR.load(Ordering::Relaxed)
}

/// True while at least one [`ExpectingFaults`] guard is alive.
#[must_use]
pub fn expecting_faults() -> bool {
    EXPECTING_FAULTS.load(Ordering::Relaxed) > 0
}

/// Guard that marks errors as expected while it lives.
///
/// Tests that deliberately provoke failures hold one of these so the
/// warn-on-error escalation stays quiet.
#[derive(Debug)]
pub struct ExpectingFaults(());

impl ExpectingFaults {
    /// Starts expecting faults.
    #[must_use]
    pub fn new() -> Self {
        EXPECTING_FAULTS.fetch_add(1, Ordering::Relaxed);
        Self(())
    }
}

impl Default for ExpectingFaults {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ExpectingFaults {
    fn drop(&mut self) {
        EXPECTING_FAULTS.fetch_sub(1, Ordering::Relaxed);
    }
}

/// Normalizes a path for use as a registry key.
///
/// Canonicalizes the deepest existing ancestor so two spellings of the
/// same location share one shared-file record even before the database
/// directory exists.
#[must_use]
pub fn canonical_key(path: &Path) -> PathBuf {
    if let Ok(canon) = path.canonicalize() {
        return canon;
    }
    if let (Some(parent), Some(name)) = (path.parent(), path.file_name()) {
        if let Ok(canon_parent) = parent.canonicalize() {
            return canon_parent.join(name);
        }
    }
    path.to_path_buf()
}
