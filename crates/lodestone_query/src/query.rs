//! Compiled queries and execution plumbing.
//!
//! The SQL engine and the vector-search extension are external; a
//! [`QueryBackend`] implementation bridges to them. Compilation is pure
//! and deterministic, so it is fully testable without a backend.

use crate::index::IndexDelegate;
use crate::translator::{CompiledQuery, QueryTranslator};
use lodestone_core::{Error, Result};
use serde_json::Value;

/// Compiles JSON query ASTs into prepared queries.
pub struct QueryCompiler<'a> {
    delegate: &'a dyn IndexDelegate,
}

impl<'a> QueryCompiler<'a> {
    /// Creates a compiler resolving indexes through `delegate`.
    pub fn new(delegate: &'a dyn IndexDelegate) -> Self {
        Self { delegate }
    }

    /// Compiles a query AST.
    pub fn compile(&self, ast: &Value) -> Result<PreparedQuery> {
        let compiled = QueryTranslator::new(self.delegate).compile(ast)?;
        Ok(PreparedQuery { compiled })
    }
}

/// A compiled, reusable query.
#[derive(Debug, Clone)]
pub struct PreparedQuery {
    compiled: CompiledQuery,
}

impl PreparedQuery {
    /// The emitted SQL.
    #[must_use]
    pub fn sql(&self) -> &str {
        &self.compiled.sql
    }

    /// Names of the parameters the query expects, without `$`.
    #[must_use]
    pub fn parameter_names(&self) -> &[String] {
        &self.compiled.parameters
    }

    /// Runs the query through a backend with the given named parameters.
    ///
    /// # Errors
    ///
    /// `InvalidQuery` if a required parameter is missing; backend errors
    /// pass through.
    pub fn run(
        &self,
        params: &serde_json::Map<String, Value>,
        backend: &dyn QueryBackend,
    ) -> Result<ResultCursor> {
        let mut bound = Vec::with_capacity(self.compiled.parameters.len());
        for name in &self.compiled.parameters {
            let value = params.get(name).ok_or_else(|| {
                Error::invalid_query(format!("query parameter '${name}' was not provided"))
            })?;
            bound.push((format!("$_{name}"), value.clone()));
        }
        let rows = backend.execute(&self.compiled.sql, &bound)?;
        Ok(ResultCursor { rows, pos: 0 })
    }
}

/// Executes SQL against the storage backend and its loaded extensions.
pub trait QueryBackend {
    /// Runs `sql` with the given named parameter bindings, returning
    /// result rows as JSON values.
    fn execute(&self, sql: &str, params: &[(String, Value)]) -> Result<Vec<Vec<Value>>>;
}

/// Forward-only cursor over query results.
#[derive(Debug)]
pub struct ResultCursor {
    rows: Vec<Vec<Value>>,
    /// Row index plus one; 0 before the first `next`.
    pos: usize,
}

impl ResultCursor {
    /// Total number of rows.
    #[must_use]
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// Advances to the next row. Returns false at the end.
    pub fn next(&mut self) -> bool {
        if self.pos >= self.rows.len() {
            return false;
        }
        self.pos += 1;
        true
    }

    /// The current row's columns, if positioned on one.
    #[must_use]
    pub fn columns(&self) -> Option<&[Value]> {
        if self.pos == 0 {
            return None;
        }
        self.rows.get(self.pos - 1).map(Vec::as_slice)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::{IndexManager, IndexSpec, VectorOptions};
    use parking_lot::Mutex;
    use serde_json::json;

    /// Backend stub that records what it was asked to run.
    #[derive(Default)]
    struct RecordingBackend {
        seen: Mutex<Vec<(String, Vec<(String, Value)>)>>,
        rows: Vec<Vec<Value>>,
    }

    impl QueryBackend for RecordingBackend {
        fn execute(&self, sql: &str, params: &[(String, Value)]) -> Result<Vec<Vec<Value>>> {
            self.seen.lock().push((sql.to_string(), params.to_vec()));
            Ok(self.rows.clone())
        }
    }

    fn compiler_fixture() -> IndexManager {
        let manager = IndexManager::new("kv_default");
        manager
            .create_index(IndexSpec::vector(
                "byVector",
                json!([[".vector"]]),
                VectorOptions::new(128),
            ))
            .unwrap();
        manager
    }

    #[test]
    fn run_binds_named_parameters() {
        let manager = compiler_fixture();
        let compiler = QueryCompiler::new(&manager);
        let query = compiler
            .compile(&json!(["SELECT", {
                "WHAT": [["._id"], ["APPROX_VECTOR_DISTANCE()", [".vector"], ["$target"]]],
                "LIMIT": 5,
            }]))
            .unwrap();
        assert_eq!(query.parameter_names(), ["target".to_string()]);

        let backend = RecordingBackend {
            rows: vec![vec![json!("rec-0010"), json!(0.0)]],
            ..Default::default()
        };
        let mut params = serde_json::Map::new();
        params.insert("target".to_string(), json!([0.5, 0.25]));
        let mut cursor = query.run(&params, &backend).unwrap();

        assert_eq!(cursor.row_count(), 1);
        assert!(cursor.columns().is_none());
        assert!(cursor.next());
        assert_eq!(cursor.columns().unwrap()[0], json!("rec-0010"));
        assert!(!cursor.next());

        let seen = backend.seen.lock();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].0, query.sql());
        assert_eq!(seen[0].1, vec![("$_target".to_string(), json!([0.5, 0.25]))]);
    }

    #[test]
    fn missing_parameter_is_an_error() {
        let manager = compiler_fixture();
        let compiler = QueryCompiler::new(&manager);
        let query = compiler
            .compile(&json!(["SELECT", {
                "WHAT": [["APPROX_VECTOR_DISTANCE()", [".vector"], ["$target"]]],
                "LIMIT": 5,
            }]))
            .unwrap();
        let backend = RecordingBackend::default();
        let err = query.run(&serde_json::Map::new(), &backend).unwrap_err();
        assert!(err.to_string().contains("$target"));
    }
}
