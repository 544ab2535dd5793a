//! The database manifest.
//!
//! The manifest is the small metadata file in the database directory:
//! format version plus the catalog of key stores (name, id, capabilities).
//! Key stores exist from the moment they are cataloged, whether or not a
//! handle is currently open on them.

use crate::error::{Error, Result};
use crate::keystore::Capabilities;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Current manifest format version.
pub const FORMAT_VERSION: (u16, u16) = (1, 0);

/// Catalog entry for one key store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyStoreEntry {
    /// Stable numeric id used in the record log.
    pub id: u32,
    /// Whether the store tracks sequences.
    pub sequences: bool,
    /// Whether deletions leave tombstones until compaction.
    pub soft_deletes: bool,
}

/// Database metadata persisted in the directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Manifest {
    /// Format version of the database files.
    pub format_version: (u16, u16),
    /// Key store catalog by name.
    stores: BTreeMap<String, KeyStoreEntry>,
    /// Next key store id to assign.
    next_store_id: u32,
}

impl Manifest {
    /// Creates an empty manifest.
    #[must_use]
    pub fn new() -> Self {
        Self {
            format_version: FORMAT_VERSION,
            stores: BTreeMap::new(),
            next_store_id: 1,
        }
    }

    /// Looks up a key store entry.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&KeyStoreEntry> {
        self.stores.get(name)
    }

    /// Returns the entry for `name`, cataloging it if new.
    pub fn get_or_create(&mut self, name: &str, caps: Capabilities) -> KeyStoreEntry {
        if let Some(entry) = self.stores.get(name) {
            return entry.clone();
        }
        let entry = KeyStoreEntry {
            id: self.next_store_id,
            sequences: caps.sequences,
            soft_deletes: caps.soft_deletes,
        };
        self.next_store_id += 1;
        self.stores.insert(name.to_string(), entry.clone());
        entry
    }

    /// Removes a key store from the catalog. Returns true if it existed.
    pub fn remove(&mut self, name: &str) -> bool {
        self.stores.remove(name).is_some()
    }

    /// All cataloged key store names, sorted.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        self.stores.keys().cloned().collect()
    }

    /// Resolves a store id back to its name.
    #[must_use]
    pub fn name_for_id(&self, id: u32) -> Option<&str> {
        self.stores
            .iter()
            .find(|(_, e)| e.id == id)
            .map(|(name, _)| name.as_str())
    }

    /// Serializes to JSON bytes.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        serde_json::to_vec_pretty(self).expect("manifest serialization is infallible")
    }

    /// Parses manifest bytes.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let manifest: Self = serde_json::from_slice(bytes)
            .map_err(|e| Error::corrupt_data(format!("bad manifest: {e}")))?;
        if manifest.format_version.0 != FORMAT_VERSION.0 {
            return Err(Error::unsupported(format!(
                "database format v{}.{} is not supported (expected v{}.{})",
                manifest.format_version.0,
                manifest.format_version.1,
                FORMAT_VERSION.0,
                FORMAT_VERSION.1,
            )));
        }
        Ok(manifest)
    }
}

impl Default for Manifest {
    fn default() -> Self {
        Self::new()
    }
}

impl KeyStoreEntry {
    /// The capabilities recorded for this store.
    #[must_use]
    pub fn capabilities(&self) -> Capabilities {
        Capabilities {
            sequences: self.sequences,
            soft_deletes: self.soft_deletes,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_assigns_stable_ids() {
        let mut m = Manifest::new();
        let a = m.get_or_create("default", Capabilities::full());
        let b = m.get_or_create("expiry", Capabilities::default());
        let a2 = m.get_or_create("default", Capabilities::default());
        assert_eq!(a.id, a2.id);
        assert_ne!(a.id, b.id);
        // Capabilities are fixed at creation.
        assert!(a2.sequences);
    }

    #[test]
    fn round_trip() {
        let mut m = Manifest::new();
        m.get_or_create("default", Capabilities::full());
        let decoded = Manifest::decode(&m.encode()).unwrap();
        assert_eq!(decoded.names(), vec!["default".to_string()]);
        assert_eq!(decoded.get("default").unwrap().id, 1);
    }

    #[test]
    fn remove_and_names() {
        let mut m = Manifest::new();
        m.get_or_create("a", Capabilities::default());
        m.get_or_create("b", Capabilities::default());
        assert!(m.remove("a"));
        assert!(!m.remove("a"));
        assert_eq!(m.names(), vec!["b".to_string()]);
    }

    #[test]
    fn id_lookup() {
        let mut m = Manifest::new();
        let e = m.get_or_create("stuff", Capabilities::default());
        assert_eq!(m.name_for_id(e.id), Some("stuff"));
        assert_eq!(m.name_for_id(999), None);
    }

    #[test]
    fn future_format_rejected() {
        let mut m = Manifest::new();
        m.format_version = (99, 0);
        assert!(matches!(
            Manifest::decode(&m.encode()),
            Err(Error::Unsupported(_))
        ));
    }
}
