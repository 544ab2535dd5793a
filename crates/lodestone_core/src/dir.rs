//! Database directory layout and locking.
//!
//! A database on disk is a single directory with the identifying
//! `.cblite2` extension:
//!
//! ```text
//! <name>.cblite2/
//! ├─ MANIFEST      # format version + key store catalog
//! ├─ LOCK          # advisory lock, held while any handle is open
//! ├─ data.log      # the record log
//! └─ data.log.tmp  # transient, during compaction/rekey rewrites
//! ```

use crate::error::{Error, Result};
use crate::global;
use crate::manifest::Manifest;
use fs2::FileExt;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

/// Identifying extension of a database directory.
pub const DB_EXTENSION: &str = "cblite2";

const MANIFEST_FILE: &str = "MANIFEST";
const MANIFEST_TEMP: &str = "MANIFEST.tmp";
const LOCK_FILE: &str = "LOCK";
const LOG_FILE: &str = "data.log";
const LOG_TEMP: &str = "data.log.tmp";

/// Appends the `.cblite2` extension if `path` does not carry it yet.
#[must_use]
pub fn with_db_extension(path: &Path) -> PathBuf {
    match path.extension() {
        Some(ext) if ext == DB_EXTENSION => path.to_path_buf(),
        _ => {
            let mut name = path
                .file_name()
                .map(std::ffi::OsStr::to_os_string)
                .unwrap_or_default();
            name.push(".");
            name.push(DB_EXTENSION);
            path.with_file_name(name)
        }
    }
}

/// Advisory locks this process already holds, refcounted so several
/// in-process handles can share one database while other processes stay
/// excluded (fs2 locks are per file description, not per process).
static HELD_LOCKS: Mutex<Option<HashMap<PathBuf, (File, usize)>>> = Mutex::new(None);

/// An open database directory, sharing the process's advisory lock.
#[derive(Debug)]
pub struct DatabaseDir {
    path: PathBuf,
    lock_key: PathBuf,
}

impl DatabaseDir {
    /// Opens or creates the directory and takes (or joins) the advisory
    /// lock.
    ///
    /// # Errors
    ///
    /// - `NotFound` if the directory is missing and `create` is false
    /// - `Busy` if another process holds the lock
    pub fn open(path: &Path, create: bool) -> Result<Self> {
        if !path.exists() {
            if create {
                fs::create_dir_all(path)?;
            } else {
                return Err(Error::not_found(format!(
                    "no database at {}",
                    path.display()
                )));
            }
        }
        if !path.is_dir() {
            return Err(Error::invalid_parameter(format!(
                "not a database directory: {}",
                path.display()
            )));
        }

        let lock_key = global::canonical_key(&path.join(LOCK_FILE));
        let mut held = HELD_LOCKS.lock();
        let held = held.get_or_insert_with(HashMap::new);
        if let Some((_, count)) = held.get_mut(&lock_key) {
            *count += 1;
        } else {
            let lock_file = OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .truncate(false)
                .open(path.join(LOCK_FILE))?;
            if lock_file.try_lock_exclusive().is_err() {
                return Err(Error::busy(format!(
                    "database is locked by another process: {}",
                    path.display()
                )));
            }
            held.insert(lock_key.clone(), (lock_file, 1));
        }

        Ok(Self {
            path: path.to_path_buf(),
            lock_key,
        })
    }

    /// The database directory path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Path of the record log.
    #[must_use]
    pub fn log_path(&self) -> PathBuf {
        self.path.join(LOG_FILE)
    }

    /// Path used while building a replacement log.
    #[must_use]
    pub fn log_temp_path(&self) -> PathBuf {
        self.path.join(LOG_TEMP)
    }

    /// True if the directory holds no database yet.
    #[must_use]
    pub fn is_new_database(&self) -> bool {
        !self.path.join(MANIFEST_FILE).exists() && !self.log_path().exists()
    }

    /// Loads the manifest, or `None` for a new database.
    pub fn load_manifest(&self) -> Result<Option<Manifest>> {
        let path = self.path.join(MANIFEST_FILE);
        if !path.exists() {
            return Ok(None);
        }
        let mut data = Vec::new();
        File::open(&path)?.read_to_end(&mut data)?;
        if data.is_empty() {
            return Ok(None);
        }
        Ok(Some(Manifest::decode(&data)?))
    }

    /// Saves the manifest atomically (write temp, fsync, rename, fsync dir).
    pub fn save_manifest(&self, manifest: &Manifest) -> Result<()> {
        let temp = self.path.join(MANIFEST_TEMP);
        let mut file = File::create(&temp)?;
        file.write_all(&manifest.encode())?;
        file.sync_all()?;
        drop(file);
        fs::rename(&temp, self.path.join(MANIFEST_FILE))?;
        self.sync_directory()
    }

    /// Promotes the replacement log over the live one atomically.
    pub fn swap_log(&self) -> Result<()> {
        fs::rename(self.log_temp_path(), self.log_path())?;
        self.sync_directory()
    }

    /// Removes a stale replacement log left by an interrupted rewrite.
    pub fn discard_temp_log(&self) {
        let _ = fs::remove_file(self.log_temp_path());
    }

    #[cfg(unix)]
    fn sync_directory(&self) -> Result<()> {
        let dir = File::open(&self.path)?;
        dir.sync_all()?;
        Ok(())
    }

    #[cfg(not(unix))]
    fn sync_directory(&self) -> Result<()> {
        // NTFS journaling covers metadata durability; directory fsync is
        // not available there.
        Ok(())
    }

    /// Erases a database directory that is not open.
    ///
    /// The caller is responsible for the not-open check; this only does
    /// the filesystem work.
    pub fn erase(path: &Path) -> Result<()> {
        if !path.exists() {
            return Err(Error::not_found(format!(
                "no database at {}",
                path.display()
            )));
        }
        fs::remove_dir_all(path)?;
        Ok(())
    }
}

impl Drop for DatabaseDir {
    fn drop(&mut self) {
        let mut held = HELD_LOCKS.lock();
        if let Some(map) = held.as_mut() {
            if let Some((_, count)) = map.get_mut(&self.lock_key) {
                *count -= 1;
                if *count == 0 {
                    // Dropping the File releases the advisory lock.
                    map.remove(&self.lock_key);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keystore::Capabilities;
    use tempfile::tempdir;

    #[test]
    fn extension_is_appended_once() {
        let p = with_db_extension(Path::new("/tmp/mydb"));
        assert_eq!(p, Path::new("/tmp/mydb.cblite2"));
        assert_eq!(with_db_extension(&p), p);
    }

    #[test]
    fn open_creates_directory() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("db.cblite2");
        let dir = DatabaseDir::open(&path, true).unwrap();
        assert!(dir.is_new_database());
        assert!(path.is_dir());
    }

    #[test]
    fn lock_is_shared_within_the_process() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("db.cblite2");

        // Two in-process handles join the same advisory lock; the lock is
        // only released when the last one drops.
        let first = DatabaseDir::open(&path, true).unwrap();
        let second = DatabaseDir::open(&path, true).unwrap();
        drop(first);
        drop(second);

        DatabaseDir::open(&path, true).unwrap();
    }

    #[test]
    fn missing_without_create_fails() {
        let temp = tempdir().unwrap();
        let result = DatabaseDir::open(&temp.path().join("nope.cblite2"), false);
        assert!(matches!(result, Err(Error::NotFound(_))));
    }

    #[test]
    fn manifest_round_trip() {
        let temp = tempdir().unwrap();
        let dir = DatabaseDir::open(&temp.path().join("db.cblite2"), true).unwrap();
        assert!(dir.load_manifest().unwrap().is_none());

        let mut manifest = Manifest::new();
        manifest.get_or_create("default", Capabilities::full());
        dir.save_manifest(&manifest).unwrap();

        let loaded = dir.load_manifest().unwrap().unwrap();
        assert_eq!(loaded.names(), vec!["default".to_string()]);
        assert!(!dir.is_new_database());
    }

    #[test]
    fn erase_removes_directory() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("db.cblite2");
        {
            let _dir = DatabaseDir::open(&path, true).unwrap();
        }
        DatabaseDir::erase(&path).unwrap();
        assert!(!path.exists());
        assert!(matches!(DatabaseDir::erase(&path), Err(Error::NotFound(_))));
    }
}
