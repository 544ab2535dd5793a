//! # Lodestone Core
//!
//! The core of the Lodestone embedded document database:
//!
//! - a record store ([`KeyStore`]) with sequence numbering, tombstones
//!   and snapshot enumeration, persisted through an append-only record
//!   log over pluggable byte-store backends
//! - scoped and nested [`Transaction`]s with file-level single-writer
//!   exclusion shared across every handle in the process
//! - [`Database`]: open/close/delete, compaction, at-rest encryption and
//!   rekeying
//! - [`DocEnumerator`]: document-oriented iteration with revision-id
//!   materialization for both tree revisions and version vectors
//!
//! The query layer, including vector-search planning, lives in the
//! `lodestone_query` crate.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod compaction;
mod database;
mod dir;
mod doc_enumerator;
mod error;
pub mod global;
mod keystore;
mod log;
mod manifest;
mod record;
mod shared_file;
mod transaction;
mod types;
pub mod version;

pub use compaction::CompactionStats;
pub use database::{Database, EncryptionAlgorithm, OnCompactCallback, Options};
pub use dir::{with_db_extension, DB_EXTENSION};
pub use doc_enumerator::{DocEnumFlags, DocEnumerator, Document, DocumentInfo};
pub use error::{Error, ErrorCode, ErrorDomain, Result};
pub use global::{EngineConfig, ExpectingFaults};
pub use keystore::{
    Capabilities, EnumeratorOptions, KeyStore, RecordEnumerator, DEFAULT_KEYSTORE,
};
pub use manifest::Manifest;
pub use record::Record;
pub use transaction::{Transaction, TransactionState};
pub use types::{ContentOption, DocumentFlags, SequenceNumber, SortOption, Timestamp};
