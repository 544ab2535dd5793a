//! # Lodestone Query
//!
//! Query translation for the Lodestone document database: a JSON-shaped
//! query AST is compiled into backend SQL, including the planning of
//! `APPROX_VECTOR_DISTANCE` against companion vector index tables.
//!
//! The crate also owns declarative index configuration: [`IndexSpec`]
//! and [`VectorOptions`] describe a vector index, [`IndexManager`]
//! registers them and acts as the translator's [`IndexDelegate`], and
//! [`LazyIndexUpdate`] drives out-of-band vector computation for lazy
//! indexes.
//!
//! The vector-similarity math itself is an external backend extension;
//! this crate emits the SQL that drives it (`vector MATCH
//! encode_vector(...)`, `vectorsearch_probes(...)`,
//! `fl_vector_to_index(...)`) and never computes a distance.

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod ast;
mod index;
mod query;
mod translator;

pub use index::{
    vector_to_index_sql, IndexDelegate, IndexManager, IndexSpec, IndexType, LazyIndexUpdate,
    VectorClustering, VectorEncoding, VectorMetric, VectorOptions,
};
pub use query::{PreparedQuery, QueryBackend, QueryCompiler, ResultCursor};
pub use translator::{CompiledQuery, QueryTranslator, VECTOR_DISTANCE_FN};
