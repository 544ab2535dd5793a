//! Index specifications and the index manager.
//!
//! A vector index pairs an indexed expression with a companion table in
//! the backend that the vector-search extension populates and queries.
//! The manager is the "delegate" the query translator consults to map an
//! expression (by canonical JSON) to that table.

use crate::ast;
use lodestone_core::{Error, Result};
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::HashMap;
use std::collections::VecDeque;

/// Distance metric of a vector index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VectorMetric {
    /// Use the backend's default metric (squared Euclidean).
    #[default]
    Default,
    /// Euclidean (L2) distance.
    Euclidean,
    /// Cosine distance.
    Cosine,
}

impl VectorMetric {
    /// The metric's name as written in queries, empty for the default.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Default => "",
            Self::Euclidean => "euclidean",
            Self::Cosine => "cosine",
        }
    }

    /// True if `name` selects this metric. The empty string selects the
    /// index's own metric and matches anything; an unspecified index
    /// metric means Euclidean, so `Default` also answers to that name.
    #[must_use]
    pub fn matches(self, name: &str) -> bool {
        if name.is_empty() {
            return true;
        }
        match self {
            Self::Default => ast::eq_ignore_case(name, "euclidean"),
            other => ast::eq_ignore_case(name, other.name()),
        }
    }
}

/// How vectors are clustered for approximate search.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VectorClustering {
    /// Flat clustering with a fixed number of centroids.
    Flat {
        /// Number of centroids, 1 ..= 64000.
        centroids: u32,
    },
    /// Multi-index clustering over subquantizers.
    Multi {
        /// Number of subquantizers; must divide the dimension count.
        subquantizers: u32,
        /// Bits per subquantizer.
        bits: u32,
    },
}

impl Default for VectorClustering {
    fn default() -> Self {
        Self::Flat { centroids: 64 }
    }
}

/// How stored vectors are compressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VectorEncoding {
    /// Backend default (8-bit scalar quantization).
    #[default]
    Default,
    /// No compression.
    None,
    /// Product quantization.
    PQ {
        /// Number of subquantizers; must divide the dimension count.
        subquantizers: u32,
    },
    /// Scalar quantization.
    SQ {
        /// Bits per component: 4, 6 or 8.
        bits: u32,
    },
}

/// Declarative configuration of a vector index.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorOptions {
    /// Number of dimensions, 2 ..= 4096.
    pub dimensions: u32,
    /// Distance metric.
    pub metric: VectorMetric,
    /// Clustering strategy.
    pub clustering: VectorClustering,
    /// Vector compression.
    pub encoding: VectorEncoding,
    /// Minimum vectors required before training, 0 for the default.
    pub min_training_size: u32,
    /// Maximum vectors used for training, 0 for the default.
    pub max_training_size: u32,
    /// Default probe count at query time, 0 for the backend default.
    pub num_probes: u32,
    /// Defer vector computation to an out-of-band updater.
    pub lazy: bool,
}

impl VectorOptions {
    /// Options with defaults for the given dimensionality.
    #[must_use]
    pub fn new(dimensions: u32) -> Self {
        Self {
            dimensions,
            metric: VectorMetric::Default,
            clustering: VectorClustering::default(),
            encoding: VectorEncoding::Default,
            min_training_size: 0,
            max_training_size: 0,
            num_probes: 0,
            lazy: false,
        }
    }

    /// Validates the option combination.
    pub fn validate(&self) -> Result<()> {
        if !(2..=4096).contains(&self.dimensions) {
            return Err(Error::invalid_parameter(format!(
                "vector dimensions must be 2..=4096, got {}",
                self.dimensions
            )));
        }
        match self.clustering {
            VectorClustering::Flat { centroids } => {
                if !(1..=64_000).contains(&centroids) {
                    return Err(Error::invalid_parameter(format!(
                        "centroid count must be 1..=64000, got {centroids}"
                    )));
                }
            }
            VectorClustering::Multi {
                subquantizers,
                bits,
            } => {
                if subquantizers == 0 || self.dimensions % subquantizers != 0 {
                    return Err(Error::invalid_parameter(
                        "subquantizer count must divide the dimension count",
                    ));
                }
                if !(4..=12).contains(&bits) {
                    return Err(Error::invalid_parameter("bits per subquantizer must be 4..=12"));
                }
            }
        }
        match self.encoding {
            VectorEncoding::PQ { subquantizers } => {
                if subquantizers == 0 || self.dimensions % subquantizers != 0 {
                    return Err(Error::invalid_parameter(
                        "PQ subquantizer count must divide the dimension count",
                    ));
                }
            }
            VectorEncoding::SQ { bits } => {
                if !matches!(bits, 4 | 6 | 8) {
                    return Err(Error::invalid_parameter("SQ bits must be 4, 6 or 8"));
                }
            }
            VectorEncoding::Default | VectorEncoding::None => {}
        }
        if self.max_training_size != 0 && self.max_training_size < self.min_training_size {
            return Err(Error::invalid_parameter(
                "max training size is below min training size",
            ));
        }
        Ok(())
    }
}

/// What kind of index a spec declares.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexType {
    /// Plain value index.
    Value,
    /// Full-text index.
    FullText,
    /// Approximate-nearest-neighbor vector index.
    Vector,
}

/// A declarative index definition.
///
/// `expression` is the JSON expression list the index covers, e.g.
/// `[[".vector"]]`; the first entry keys delegate lookups by its
/// canonical JSON.
#[derive(Debug, Clone)]
pub struct IndexSpec {
    /// Index name, unique within a collection.
    pub name: String,
    /// Kind of index.
    pub index_type: IndexType,
    /// The indexed expression list (JSON).
    pub expression: Value,
    /// Vector options; required for vector indexes.
    pub vector: Option<VectorOptions>,
}

impl IndexSpec {
    /// Builds a vector index spec.
    #[must_use]
    pub fn vector(name: impl Into<String>, expression: Value, options: VectorOptions) -> Self {
        Self {
            name: name.into(),
            index_type: IndexType::Vector,
            expression,
            vector: Some(options),
        }
    }

    /// Canonical JSON of the first indexed expression.
    pub(crate) fn canonical_expression(&self) -> Result<String> {
        let first = self
            .expression
            .as_array()
            .and_then(|list| list.first())
            .ok_or_else(|| {
                Error::invalid_parameter("index expression must be a non-empty array")
            })?;
        Ok(ast::canonical_json(first))
    }
}

/// Resolves vector expressions to their companion index tables.
///
/// The translator calls this while planning `APPROX_VECTOR_DISTANCE`;
/// [`IndexManager`] is the standard implementation.
pub trait IndexDelegate: Send + Sync {
    /// The name of the vector table indexing `expr_json` (canonical
    /// form) on `default_table`, honoring the requested metric (empty
    /// string means the index default).
    ///
    /// # Errors
    ///
    /// `NoSuchIndex` if no matching index exists.
    fn vector_table_name(
        &self,
        default_table: &str,
        expr_json: &str,
        metric: &str,
    ) -> Result<String>;
}

struct IndexRecord {
    spec: IndexSpec,
    table_name: String,
    canonical_expr: String,
    /// Keys queued for a lazy updater, in arrival order.
    lazy_pending: VecDeque<Vec<u8>>,
    /// Rows the external updater has recorded.
    indexed_rows: u64,
}

/// Registry of index definitions for one collection table.
pub struct IndexManager {
    default_table: String,
    indexes: RwLock<HashMap<String, IndexRecord>>,
}

impl IndexManager {
    /// Creates a manager for the given collection table (e.g.
    /// `kv_default`).
    #[must_use]
    pub fn new(default_table: impl Into<String>) -> Self {
        Self {
            default_table: default_table.into(),
            indexes: RwLock::new(HashMap::new()),
        }
    }

    /// Creates an index. The companion table name is derived from the
    /// collection table and index name; the storage side is expected to
    /// populate it with [`vector_to_index_sql`] values.
    pub fn create_index(&self, spec: IndexSpec) -> Result<()> {
        if spec.name.is_empty() {
            return Err(Error::invalid_parameter("index name must not be empty"));
        }
        let canonical_expr = spec.canonical_expression()?;
        if spec.index_type == IndexType::Vector {
            let options = spec
                .vector
                .as_ref()
                .ok_or_else(|| Error::invalid_parameter("vector index needs vector options"))?;
            options.validate()?;
        }
        let table_name = format!("{}::vector::{}", self.default_table, spec.name);
        let mut indexes = self.indexes.write();
        if indexes.contains_key(&spec.name) {
            return Err(Error::invalid_parameter(format!(
                "an index named '{}' already exists",
                spec.name
            )));
        }
        tracing::debug!(name = %spec.name, table = %table_name, "created index");
        indexes.insert(
            spec.name.clone(),
            IndexRecord {
                spec,
                table_name,
                canonical_expr,
                lazy_pending: VecDeque::new(),
                indexed_rows: 0,
            },
        );
        Ok(())
    }

    /// Fetches a copy of an index definition.
    #[must_use]
    pub fn get_index(&self, name: &str) -> Option<IndexSpec> {
        self.indexes.read().get(name).map(|r| r.spec.clone())
    }

    /// All index names, sorted.
    #[must_use]
    pub fn index_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.indexes.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Deletes an index definition.
    pub fn delete_index(&self, name: &str) -> Result<()> {
        if self.indexes.write().remove(name).is_none() {
            return Err(Error::no_such_index(format!("no index named '{name}'")));
        }
        Ok(())
    }

    /// Queues a document key for a lazy index's next update pass. The
    /// storage glue calls this when an indexed document changes.
    pub fn enqueue_lazy(&self, name: &str, key: &[u8]) -> Result<()> {
        let mut indexes = self.indexes.write();
        let record = indexes
            .get_mut(name)
            .ok_or_else(|| Error::no_such_index(format!("no index named '{name}'")))?;
        if !record.spec.vector.as_ref().is_some_and(|v| v.lazy) {
            return Err(Error::unsupported(format!(
                "index '{name}' is not a lazy vector index"
            )));
        }
        record.lazy_pending.push_back(key.to_vec());
        Ok(())
    }

    /// Starts a lazy update pass over up to `limit` pending documents.
    ///
    /// Returns `None` when the index is up to date.
    pub fn begin_update(&self, name: &str, limit: usize) -> Result<Option<LazyIndexUpdate>> {
        if limit == 0 {
            return Err(Error::invalid_parameter("update limit must be positive"));
        }
        let mut indexes = self.indexes.write();
        let record = indexes
            .get_mut(name)
            .ok_or_else(|| Error::no_such_index(format!("no index named '{name}'")))?;
        if !record.spec.vector.as_ref().is_some_and(|v| v.lazy) {
            return Err(Error::unsupported(format!(
                "index '{name}' is not a lazy vector index"
            )));
        }
        let take = record.lazy_pending.len().min(limit);
        if take == 0 {
            return Ok(None);
        }
        let keys: Vec<Vec<u8>> = record.lazy_pending.drain(..take).collect();
        let dimensions = record
            .spec
            .vector
            .as_ref()
            .map_or(0, |v| v.dimensions);
        Ok(Some(LazyIndexUpdate {
            index_name: name.to_string(),
            dimensions,
            items: keys.into_iter().map(|key| (key, ItemState::Pending)).collect(),
        }))
    }

    /// Records the outcome of a finished lazy update pass.
    fn complete_update(&self, name: &str, recorded: u64, skipped: Vec<Vec<u8>>) {
        let mut indexes = self.indexes.write();
        if let Some(record) = indexes.get_mut(name) {
            record.indexed_rows += recorded;
            // Skipped documents go back to the queue for a later pass.
            for key in skipped {
                record.lazy_pending.push_back(key);
            }
        }
    }

    /// Rows the lazy updater has recorded for an index.
    #[must_use]
    pub fn indexed_row_count(&self, name: &str) -> u64 {
        self.indexes
            .read()
            .get(name)
            .map_or(0, |r| r.indexed_rows)
    }
}

impl IndexDelegate for IndexManager {
    fn vector_table_name(
        &self,
        default_table: &str,
        expr_json: &str,
        metric: &str,
    ) -> Result<String> {
        let indexes = self.indexes.read();
        let found = indexes.values().find(|record| {
            record.spec.index_type == IndexType::Vector
                && self.default_table == default_table
                && record.canonical_expr == expr_json
                && record
                    .spec
                    .vector
                    .as_ref()
                    .is_some_and(|v| v.metric.matches(metric))
        });
        match found {
            Some(record) => Ok(record.table_name.clone()),
            None => Err(Error::no_such_index(format!(
                "no vector index on expression {expr_json}"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum ItemState {
    Pending,
    Recorded(Vec<f32>),
    Skipped,
}

/// One pass of out-of-band vector computation for a lazy index.
///
/// The caller fills in a vector (or skips) for each item, then calls
/// [`LazyIndexUpdate::finish`] against the owning manager. A pass that
/// recorded no vectors cannot be marked finished.
#[derive(Debug)]
pub struct LazyIndexUpdate {
    index_name: String,
    dimensions: u32,
    items: Vec<(Vec<u8>, ItemState)>,
}

impl LazyIndexUpdate {
    /// Number of documents in this pass.
    #[must_use]
    pub fn count(&self) -> usize {
        self.items.len()
    }

    /// The document key at position `i`.
    #[must_use]
    pub fn key_at(&self, i: usize) -> Option<&[u8]> {
        self.items.get(i).map(|(key, _)| key.as_slice())
    }

    /// Records the computed vector for item `i`.
    pub fn set_vector(&mut self, i: usize, vector: &[f32]) -> Result<()> {
        if vector.len() as u32 != self.dimensions {
            return Err(Error::invalid_parameter(format!(
                "vector has {} dimensions, index wants {}",
                vector.len(),
                self.dimensions
            )));
        }
        let item = self
            .items
            .get_mut(i)
            .ok_or_else(|| Error::invalid_parameter("item index out of range"))?;
        item.1 = ItemState::Recorded(vector.to_vec());
        Ok(())
    }

    /// Skips item `i`; it returns to the pending queue.
    pub fn skip(&mut self, i: usize) -> Result<()> {
        let item = self
            .items
            .get_mut(i)
            .ok_or_else(|| Error::invalid_parameter("item index out of range"))?;
        item.1 = ItemState::Skipped;
        Ok(())
    }

    /// Completes the pass, publishing recorded rows to the index.
    ///
    /// # Errors
    ///
    /// `Unsupported` if no vector was recorded; an empty pass must not
    /// be marked finished.
    pub fn finish(self, manager: &IndexManager) -> Result<u64> {
        let recorded = self
            .items
            .iter()
            .filter(|(_, state)| matches!(state, ItemState::Recorded(_)))
            .count() as u64;
        if recorded == 0 {
            return Err(Error::unsupported(
                "lazy index update recorded no vectors and cannot finish",
            ));
        }
        let skipped: Vec<Vec<u8>> = self
            .items
            .into_iter()
            .filter(|(_, state)| !matches!(state, ItemState::Recorded(_)))
            .map(|(key, _)| key)
            .collect();
        manager.complete_update(&self.index_name, recorded, skipped);
        Ok(recorded)
    }
}

/// SQL for the backend call that turns an indexed expression into the
/// binary vector inserted into the index table.
#[must_use]
pub fn vector_to_index_sql(expr_sql: &str, dimensions: u32) -> String {
    format!("fl_vector_to_index({expr_sql}, {dimensions})")
}
