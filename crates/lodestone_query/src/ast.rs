//! Helpers over the JSON-shaped query AST.
//!
//! A query is nested JSON arrays: the first element of an array names an
//! operator or selects a property (`.field`); `$name` references a
//! parameter; `{"COLLECTION": "x"}` references a collection. Operator
//! names compare case-insensitively, and function-call operators carry a
//! trailing `()`.

use serde_json::Value;

/// Case-insensitive string equality (ASCII).
#[must_use]
pub fn eq_ignore_case(a: &str, b: &str) -> bool {
    a.eq_ignore_ascii_case(b)
}

/// The operator name of an array node, if it has one.
#[must_use]
pub fn op_name(node: &Value) -> Option<&str> {
    node.as_array()?.first()?.as_str()
}

/// True if `name` names the function `expected`, where `expected` is
/// written with its `()` suffix (e.g. `"APPROX_VECTOR_DISTANCE()"`).
/// The suffix is optional in the query.
#[must_use]
pub fn is_function(name: &str, expected: &str) -> bool {
    let bare = expected.strip_suffix("()").unwrap_or(expected);
    let name = name.strip_suffix("()").unwrap_or(name);
    eq_ignore_case(name, bare)
}

/// Looks up a dictionary key case-insensitively.
#[must_use]
pub fn get_case_insensitive<'a>(dict: &'a Value, key: &str) -> Option<&'a Value> {
    dict.as_object()?
        .iter()
        .find(|(k, _)| eq_ignore_case(k, key))
        .map(|(_, v)| v)
}

/// The canonical JSON form of an expression, used to key index lookups.
///
/// Canonical means deterministic: compact separators and sorted object
/// keys, so the same expression always produces the same bytes.
#[must_use]
pub fn canonical_json(expr: &Value) -> String {
    // serde_json's default map preserves sorted key order, and
    // `to_string` emits compact separators; together that is canonical.
    serde_json::to_string(expr).unwrap_or_default()
}

/// Walks `node` depth-first, invoking `visit` on every array whose
/// operator names the function `fn_name` (with-parens form).
pub fn find_function_calls<'a>(
    node: &'a Value,
    fn_name: &str,
    visit: &mut dyn FnMut(&'a [Value]),
) {
    match node {
        Value::Array(items) => {
            if let Some(op) = items.first().and_then(Value::as_str) {
                if is_function(op, fn_name) {
                    visit(items);
                }
            }
            for item in items {
                find_function_calls(item, fn_name, visit);
            }
        }
        Value::Object(map) => {
            for value in map.values() {
                find_function_calls(value, fn_name, visit);
            }
        }
        _ => {}
    }
}
