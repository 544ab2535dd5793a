//! Vector search planning, end to end through the compiler surface.
//!
//! The ANN math lives in an external backend extension, so these tests
//! pin the plans the compiler hands that backend: join shapes, MATCH
//! predicates, limits and diagnostics.

use lodestone_core::ErrorCode;
use lodestone_query::{
    IndexManager, IndexSpec, QueryBackend, QueryCompiler, VectorMetric, VectorOptions,
};
use serde_json::{json, Value};

fn words_fixture() -> IndexManager {
    let manager = IndexManager::new("kv_default");
    let mut options = VectorOptions::new(128);
    options.metric = VectorMetric::Euclidean;
    manager
        .create_index(IndexSpec::vector("vecIndex", json!([[".vector"]]), options))
        .unwrap();
    manager
}

struct NullBackend;

impl QueryBackend for NullBackend {
    fn execute(
        &self,
        _sql: &str,
        _params: &[(String, Value)],
    ) -> lodestone_core::Result<Vec<Vec<Value>>> {
        Ok(Vec::new())
    }
}

#[test]
fn nearest_neighbor_query_plan() {
    let manager = words_fixture();
    let compiler = QueryCompiler::new(&manager);

    // SELECT _id, APPROX_VECTOR_DISTANCE(.vector, $target, "euclidean") AS d
    // FROM default ORDER BY d LIMIT 5
    let query = compiler
        .compile(&json!(["SELECT", {
            "WHAT": [
                ["._id"],
                ["AS",
                 ["APPROX_VECTOR_DISTANCE()", [".vector"], ["$target"], "euclidean"],
                 "d"],
            ],
            "ORDER_BY": [["APPROX_VECTOR_DISTANCE()", [".vector"], ["$target"], "euclidean"]],
            "LIMIT": 5,
        }]))
        .unwrap();

    // One nested sub-select bounded by the outer LIMIT, joined by rowid;
    // both distance occurrences collapse onto the join's column.
    let sql = query.sql();
    assert_eq!(sql.matches("JOIN").count(), 1);
    assert!(sql.contains(
        "JOIN (SELECT rowid, distance FROM \"kv_default::vector::vecIndex\" \
         WHERE vector MATCH encode_vector($_target) LIMIT 5)"
    ));
    assert!(sql.contains("\"vs_1\".rowid = \"kv_default\".rowid"));
    assert_eq!(sql.matches("\"vs_1\".distance").count(), 2);
    assert!(!sql.contains("APPROX_VECTOR_DISTANCE"));

    // Executable through a backend without touching the extension here.
    let mut params = serde_json::Map::new();
    params.insert("target".to_string(), json!([0.0, 0.0, 0.0, 0.0]));
    assert_eq!(query.run(&params, &NullBackend).unwrap().row_count(), 0);
}

#[test]
fn hybrid_query_plan() {
    let manager = words_fixture();
    let compiler = QueryCompiler::new(&manager);

    // WHERE .kind == 'even' AND APPROX_VECTOR_DISTANCE(.vector, $target) < 50000
    // is hybrid: a plain JOIN carrying the MATCH in its ON clause, and no
    // LIMIT requirement.
    let query = compiler
        .compile(&json!(["SELECT", {
            "WHAT": [["._id"]],
            "WHERE": ["AND",
                ["=", [".kind"], "even"],
                ["<", ["APPROX_VECTOR_DISTANCE()", [".vector"], ["$target"]], 50000]],
        }]))
        .unwrap();

    let sql = query.sql();
    assert!(!sql.contains("SELECT rowid, distance"));
    assert!(sql.contains(
        "JOIN \"kv_default::vector::vecIndex\" AS \"vs_1\" \
         ON \"vs_1\".rowid = \"kv_default\".rowid \
         AND \"vs_1\".vector MATCH encode_vector($_target)"
    ));
    assert!(sql.contains("(\"vs_1\".distance < 50000)"));
    assert!(sql.contains("fl_value(\"kv_default\".body, 'kind') = 'even'"));
}

#[test]
fn missing_limit_names_limit_in_the_error() {
    let manager = words_fixture();
    let compiler = QueryCompiler::new(&manager);
    let err = compiler
        .compile(&json!(["SELECT", {
            "WHAT": [["APPROX_VECTOR_DISTANCE()", [".vector"], ["$target"]]],
        }]))
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::InvalidQuery);
    assert!(err.to_string().contains("LIMIT"));
}

#[test]
fn accurate_true_is_unsupported() {
    let manager = words_fixture();
    let compiler = QueryCompiler::new(&manager);
    let err = compiler
        .compile(&json!(["SELECT", {
            "WHAT": [["APPROX_VECTOR_DISTANCE()",
                      [".vector"], ["$target"], null, null, true]],
            "LIMIT": 5,
        }]))
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::Unsupported);
}

#[test]
fn distance_in_or_is_rejected_with_a_diagnostic() {
    let manager = words_fixture();
    let compiler = QueryCompiler::new(&manager);
    let err = compiler
        .compile(&json!(["SELECT", {
            "WHAT": [["._id"]],
            "WHERE": ["OR",
                ["=", [".kind"], "odd"],
                ["<=", ["APPROX_VECTOR_DISTANCE()", [".vector"], ["$target"]], 100]],
            "LIMIT": 5,
        }]))
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::InvalidQuery);
    assert!(err.to_string().contains("OR"));
    assert!(err.to_string().contains("WHERE"));
}

#[test]
fn deleting_the_index_breaks_resolution() {
    let manager = words_fixture();
    {
        let compiler = QueryCompiler::new(&manager);
        assert!(compiler
            .compile(&json!(["SELECT", {
                "WHAT": [["APPROX_VECTOR_DISTANCE()", [".vector"], ["$target"]]],
                "LIMIT": 5,
            }]))
            .is_ok());
    }
    manager.delete_index("vecIndex").unwrap();
    let compiler = QueryCompiler::new(&manager);
    let err = compiler
        .compile(&json!(["SELECT", {
            "WHAT": [["APPROX_VECTOR_DISTANCE()", [".vector"], ["$target"]]],
            "LIMIT": 5,
        }]))
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::NoSuchIndex);
}

#[test]
fn same_plan_for_equal_asts() {
    let manager = words_fixture();
    let compiler = QueryCompiler::new(&manager);
    let ast = json!(["SELECT", {
        "WHAT": [["._id"], ["APPROX_VECTOR_DISTANCE()", [".vector"], ["$target"]]],
        "WHERE": ["AND",
            ["=", [".kind"], "even"],
            ["<", ["APPROX_VECTOR_DISTANCE()", [".vector"], ["$target"]], 50000]],
        "ORDER_BY": [["APPROX_VECTOR_DISTANCE()", [".vector"], ["$target"]]],
    }]);
    let first = compiler.compile(&ast).unwrap();
    for _ in 0..3 {
        let again = compiler.compile(&ast).unwrap();
        assert_eq!(again.sql(), first.sql());
        assert_eq!(again.parameter_names(), first.parameter_names());
    }
}
