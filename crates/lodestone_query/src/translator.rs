//! Translation of JSON query ASTs into backend SQL.
//!
//! Only the fragments vector search needs are supported: property
//! paths, parameters, literals, comparisons, boolean combinators,
//! `AS` aliases, generic function calls, `ORDER_BY`, `LIMIT`/`OFFSET`,
//! and the `APPROX_VECTOR_DISTANCE` operator with its planning rules.
//!
//! ## Vector planning
//!
//! Whether a query is *hybrid* decides the join shape. A WHERE clause is
//! non-hybrid iff it is absent or is a single comparison bounding
//! `APPROX_VECTOR_DISTANCE(...)` (`<`, `<=` with the call on the left,
//! `>`, `>=` with it on the right). Anything else is hybrid.
//!
//! - **Simple**: the vector table is wrapped in a nested sub-SELECT with
//!   the `vector MATCH` predicate and a mandatory `LIMIT` taken from the
//!   outer query. The isolation is deliberate: if the backend's planner
//!   saw the outer rowid constraint it would treat the query as hybrid
//!   and misbehave.
//! - **Hybrid**: the vector table joins normally and the MATCH predicate
//!   extends the JOIN's ON clause; the caller's WHERE does the
//!   filtering, and no LIMIT is required.
//!
//! Every textual occurrence of `APPROX_VECTOR_DISTANCE(...)` elsewhere
//! in the query is rewritten to the join alias's `distance` column so
//! the backend never recomputes distances.

use crate::ast;
use crate::index::IndexDelegate;
use lodestone_core::{Error, Result};
use serde_json::Value;

/// Hard ceiling on the outer LIMIT of a simple vector query.
const MAX_VECTOR_RESULTS: i64 = 10_000;
/// The vector-distance operator, with-parens form.
pub const VECTOR_DISTANCE_FN: &str = "APPROX_VECTOR_DISTANCE()";

/// A compiled query: SQL plus the named parameters it expects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledQuery {
    /// The emitted SQL. Byte-equal for equal ASTs.
    pub sql: String,
    /// Parameter names (without `$`), in first-use order.
    pub parameters: Vec<String>,
}

/// Translates JSON query ASTs against one collection's tables.
pub struct QueryTranslator<'a> {
    delegate: &'a dyn IndexDelegate,
}

impl<'a> QueryTranslator<'a> {
    /// Creates a translator resolving vector indexes through `delegate`.
    pub fn new(delegate: &'a dyn IndexDelegate) -> Self {
        Self { delegate }
    }

    /// Compiles a `SELECT` AST (either `["SELECT", {...}]` or the bare
    /// dictionary) into SQL.
    pub fn compile(&self, query: &Value) -> Result<CompiledQuery> {
        let select = unwrap_select(query)?;
        let table = from_table(select)?;

        let mut emitter = Emitter {
            delegate: self.delegate,
            table,
            sql: String::new(),
            context: Vec::new(),
            joins: Vec::new(),
            parameters: Vec::new(),
        };
        emitter.plan_vector_joins(select)?;
        emitter.write_select(select)?;
        Ok(CompiledQuery {
            sql: emitter.sql,
            parameters: emitter.parameters,
        })
    }
}

fn unwrap_select(query: &Value) -> Result<&Value> {
    if let Some(items) = query.as_array() {
        let op = items
            .first()
            .and_then(Value::as_str)
            .ok_or_else(|| Error::invalid_query("query must start with an operator"))?;
        if !ast::eq_ignore_case(op, "SELECT") {
            return Err(Error::invalid_query(format!(
                "expected a SELECT query, got '{op}'"
            )));
        }
        return items
            .get(1)
            .filter(|v| v.is_object())
            .ok_or_else(|| Error::invalid_query("SELECT needs a dictionary argument"));
    }
    if query.is_object() {
        return Ok(query);
    }
    Err(Error::invalid_query("query must be an array or dictionary"))
}

fn from_table(select: &Value) -> Result<String> {
    let from = match ast::get_case_insensitive(select, "FROM") {
        None => return Ok("kv_default".to_string()),
        Some(from) => from,
    };
    let entry = from
        .as_array()
        .and_then(|list| list.first())
        .ok_or_else(|| Error::invalid_query("FROM must be a non-empty array"))?;
    let collection = ast::get_case_insensitive(entry, "COLLECTION")
        .and_then(Value::as_str)
        .ok_or_else(|| Error::invalid_query("FROM entry needs a COLLECTION name"))?;
    Ok(format!("kv_{collection}"))
}

/// Returns true if the WHERE clause does *not* force a hybrid query:
/// it is absent, or a single comparison bounding the distance call.
fn non_hybrid_where(where_clause: Option<&Value>) -> bool {
    let expr = match where_clause {
        None => return true,
        Some(expr) => expr,
    };
    let items = match expr.as_array() {
        Some(items) if items.len() == 3 => items,
        _ => return false,
    };
    let op = match items[0].as_str() {
        Some(op) => op,
        None => return false,
    };
    let bounded = match op {
        "<" | "<=" => &items[1],
        ">" | ">=" => &items[2],
        _ => return false,
    };
    ast::op_name(bounded).is_some_and(|name| ast::is_function(name, VECTOR_DISTANCE_FN))
}

/// One vector index table joined into the query.
struct VectorJoin {
    table: String,
    alias: String,
    /// Extra ON predicate for hybrid joins.
    extra_on: Option<String>,
    /// Nested sub-SELECT standing in for the table in simple queries.
    nested_select: Option<String>,
}

/// Context-stack frames, for the OR-above-WHERE placement rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Frame {
    Where,
    Or,
    Other,
}

struct Emitter<'a> {
    delegate: &'a dyn IndexDelegate,
    table: String,
    sql: String,
    context: Vec<Frame>,
    joins: Vec<VectorJoin>,
    parameters: Vec<String>,
}

impl Emitter<'_> {
    // ---- vector pre-pass ----

    /// Scans the whole query for `APPROX_VECTOR_DISTANCE` calls,
    /// validates their arguments, and registers one join per index
    /// table.
    fn plan_vector_joins(&mut self, select: &Value) -> Result<()> {
        let mut calls: Vec<&[Value]> = Vec::new();
        ast::find_function_calls(select, VECTOR_DISTANCE_FN, &mut |items| calls.push(items));
        if calls.is_empty() {
            return Ok(());
        }
        let non_hybrid = non_hybrid_where(ast::get_case_insensitive(select, "WHERE"));

        for items in calls {
            let params = &items[1..];
            self.check_accurate_arg(params)?;
            let table = self.vector_table_for(params)?;
            if self.joins.iter().any(|j| j.table == table) {
                continue;
            }
            let alias = format!("vs_{}", self.joins.len() + 1);
            let target_sql = self.render_subexpression(
                params
                    .get(1)
                    .ok_or_else(|| Error::invalid_query(
                        "APPROX_VECTOR_DISTANCE needs a target vector argument",
                    ))?,
            )?;
            let probes = self.probes_argument(params)?;

            let join = if non_hybrid {
                // The outer LIMIT bounds the nested vector search.
                let max_results = self.required_limit(select)?;
                let probes_sql = match probes {
                    Some(n) => format!(" AND vectorsearch_probes(vector, {n})"),
                    None => String::new(),
                };
                VectorJoin {
                    nested_select: Some(format!(
                        "(SELECT rowid, distance FROM {} WHERE vector MATCH \
                         encode_vector({target_sql}){probes_sql} LIMIT {max_results})",
                        sql_identifier(&table),
                    )),
                    table,
                    alias,
                    extra_on: None,
                }
            } else {
                let alias_q = sql_identifier(&alias);
                let probes_sql = match probes {
                    Some(n) => format!(" AND vectorsearch_probes({alias_q}.vector, {n})"),
                    None => String::new(),
                };
                VectorJoin {
                    extra_on: Some(format!(
                        "{alias_q}.vector MATCH encode_vector({target_sql}){probes_sql}"
                    )),
                    table,
                    alias,
                    nested_select: None,
                }
            };
            self.joins.push(join);
        }
        Ok(())
    }

    fn check_accurate_arg(&self, params: &[Value]) -> Result<()> {
        match params.get(4) {
            None | Some(Value::Null) => Ok(()),
            Some(Value::Bool(false)) => Ok(()),
            Some(Value::Bool(true)) => Err(Error::unsupported(
                "APPROX_VECTOR_DISTANCE does not support 'accurate'=true",
            )),
            Some(_) => Err(Error::invalid_query(
                "APPROX_VECTOR_DISTANCE 'accurate' arg must be boolean",
            )),
        }
    }

    /// Resolves the index table from the call's vector expression and
    /// optional metric name.
    fn vector_table_for(&self, params: &[Value]) -> Result<String> {
        let expr = params.first().ok_or_else(|| {
            Error::invalid_query("APPROX_VECTOR_DISTANCE needs a vector expression argument")
        })?;
        let metric = match params.get(2) {
            None | Some(Value::Null) => "",
            Some(Value::String(name)) => name.as_str(),
            Some(_) => {
                return Err(Error::invalid_query(
                    "3rd argument (metric) to APPROX_VECTOR_DISTANCE must be a string",
                ))
            }
        };
        let canonical = ast::canonical_json(expr);
        if !expr.is_array() {
            return Err(Error::invalid_query(format!(
                "first argument to APPROX_VECTOR_DISTANCE must evaluate to a vector; \
                 did you pass the index name {canonical} instead?"
            )));
        }
        self.delegate
            .vector_table_name(&self.table, &canonical, metric)
    }

    fn probes_argument(&self, params: &[Value]) -> Result<Option<i64>> {
        match params.get(3) {
            None | Some(Value::Null) => Ok(None),
            Some(value) => {
                let probes = value.as_i64().unwrap_or(0);
                if value.is_i64() && probes > 0 {
                    Ok(Some(probes))
                } else {
                    Err(Error::invalid_query(
                        "4th argument (numProbes) to APPROX_VECTOR_DISTANCE must be a \
                         positive integer",
                    ))
                }
            }
        }
    }

    /// The outer LIMIT a simple vector query must carry.
    fn required_limit(&self, select: &Value) -> Result<i64> {
        let limit = ast::get_case_insensitive(select, "LIMIT").ok_or_else(|| {
            Error::invalid_query("a LIMIT must be given when using APPROX_VECTOR_DISTANCE()")
        })?;
        let max_results = limit.as_i64().unwrap_or(0);
        if !limit.is_i64() || max_results <= 0 {
            return Err(Error::invalid_query(
                "LIMIT must be a positive integer when using APPROX_VECTOR_DISTANCE()",
            ));
        }
        if max_results > MAX_VECTOR_RESULTS {
            return Err(Error::invalid_query(format!(
                "LIMIT must not exceed {MAX_VECTOR_RESULTS} when using \
                 APPROX_VECTOR_DISTANCE()"
            )));
        }
        Ok(max_results)
    }

    /// Renders an expression in isolation (used for MATCH targets).
    fn render_subexpression(&mut self, expr: &Value) -> Result<String> {
        let mut sub = Emitter {
            delegate: self.delegate,
            table: self.table.clone(),
            sql: String::new(),
            context: vec![Frame::Other],
            joins: Vec::new(),
            parameters: Vec::new(),
        };
        sub.write_expr(expr)?;
        for name in sub.parameters {
            self.note_parameter(name);
        }
        Ok(sub.sql)
    }

    // ---- SELECT emission ----

    fn write_select(&mut self, select: &Value) -> Result<()> {
        self.sql.push_str("SELECT ");
        match ast::get_case_insensitive(select, "WHAT") {
            Some(what) => {
                let items = what
                    .as_array()
                    .ok_or_else(|| Error::invalid_query("WHAT must be an array"))?;
                if items.is_empty() {
                    return Err(Error::invalid_query("WHAT must not be empty"));
                }
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        self.sql.push_str(", ");
                    }
                    self.context.push(Frame::Other);
                    self.write_result_column(item)?;
                    self.context.pop();
                }
            }
            None => {
                let table = sql_identifier(&self.table);
                self.sql.push_str(&format!("{table}.key"));
            }
        }

        self.sql.push_str(" FROM ");
        self.sql.push_str(&sql_identifier(&self.table));
        let joins: Vec<String> = self
            .joins
            .iter()
            .map(|join| {
                let alias = sql_identifier(&join.alias);
                let base = sql_identifier(&self.table);
                let source = match &join.nested_select {
                    Some(nested) => nested.clone(),
                    None => sql_identifier(&join.table),
                };
                let mut on = format!("{alias}.rowid = {base}.rowid");
                if let Some(extra) = &join.extra_on {
                    on.push_str(" AND ");
                    on.push_str(extra);
                }
                format!(" JOIN {source} AS {alias} ON {on}")
            })
            .collect();
        for join in joins {
            self.sql.push_str(&join);
        }

        if let Some(where_clause) = ast::get_case_insensitive(select, "WHERE") {
            self.sql.push_str(" WHERE ");
            self.context.push(Frame::Where);
            self.write_expr(where_clause)?;
            self.context.pop();
        }

        if let Some(order_by) = ast::get_case_insensitive(select, "ORDER_BY") {
            let items = order_by
                .as_array()
                .ok_or_else(|| Error::invalid_query("ORDER_BY must be an array"))?;
            self.sql.push_str(" ORDER BY ");
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    self.sql.push_str(", ");
                }
                self.context.push(Frame::Other);
                self.write_ordering(item)?;
                self.context.pop();
            }
        }

        if let Some(limit) = ast::get_case_insensitive(select, "LIMIT") {
            let n = limit
                .as_i64()
                .ok_or_else(|| Error::invalid_query("LIMIT must be an integer"))?;
            self.sql.push_str(&format!(" LIMIT {n}"));
        }
        if let Some(offset) = ast::get_case_insensitive(select, "OFFSET") {
            let n = offset
                .as_i64()
                .ok_or_else(|| Error::invalid_query("OFFSET must be an integer"))?;
            self.sql.push_str(&format!(" OFFSET {n}"));
        }
        Ok(())
    }

    fn write_result_column(&mut self, item: &Value) -> Result<()> {
        if let Some(items) = item.as_array() {
            if let Some(op) = items.first().and_then(Value::as_str) {
                if ast::eq_ignore_case(op, "AS") {
                    if items.len() != 3 {
                        return Err(Error::invalid_query("AS takes an expression and a name"));
                    }
                    let name = items[2]
                        .as_str()
                        .ok_or_else(|| Error::invalid_query("AS alias must be a string"))?;
                    self.write_expr(&items[1])?;
                    self.sql.push_str(" AS ");
                    self.sql.push_str(&sql_identifier(name));
                    return Ok(());
                }
            }
        }
        self.write_expr(item)
    }

    fn write_ordering(&mut self, item: &Value) -> Result<()> {
        if let Some(items) = item.as_array() {
            if let Some(op) = items.first().and_then(Value::as_str) {
                let direction = if ast::eq_ignore_case(op, "ASC") {
                    Some(" ASC")
                } else if ast::eq_ignore_case(op, "DESC") {
                    Some(" DESC")
                } else {
                    None
                };
                if let Some(direction) = direction {
                    let expr = items
                        .get(1)
                        .ok_or_else(|| Error::invalid_query("ordering needs an expression"))?;
                    self.write_expr(expr)?;
                    self.sql.push_str(direction);
                    return Ok(());
                }
            }
        }
        self.write_expr(item)
    }

    fn write_expr(&mut self, expr: &Value) -> Result<()> {
        match expr {
            Value::Null => self.sql.push_str("NULL"),
            Value::Bool(true) => self.sql.push_str("TRUE"),
            Value::Bool(false) => self.sql.push_str("FALSE"),
            Value::Number(n) => self.sql.push_str(&n.to_string()),
            Value::String(s) => self.sql.push_str(&sql_string(s)),
            Value::Array(items) => self.write_operation(items)?,
            Value::Object(_) => {
                return Err(Error::invalid_query(format!(
                    "unexpected dictionary in expression: {}",
                    ast::canonical_json(expr)
                )))
            }
        }
        Ok(())
    }

    fn write_operation(&mut self, items: &[Value]) -> Result<()> {
        let op = items
            .first()
            .and_then(Value::as_str)
            .ok_or_else(|| Error::invalid_query("expression array must start with an operator"))?;

        if let Some(path) = op.strip_prefix('.') {
            return self.write_property(path, &items[1..]);
        }
        if op == "." {
            return self.write_property("", &items[1..]);
        }
        if let Some(name) = op.strip_prefix('$') {
            self.note_parameter(name.to_string());
            self.sql.push_str(&format!("$_{name}"));
            return Ok(());
        }
        if ast::is_function(op, VECTOR_DISTANCE_FN) {
            return self.write_vector_distance(&items[1..]);
        }
        match op.to_ascii_uppercase().as_str() {
            "AND" | "OR" => {
                let frame = if op.eq_ignore_ascii_case("OR") {
                    Frame::Or
                } else {
                    Frame::Other
                };
                if items.len() < 3 {
                    return Err(Error::invalid_query(format!("{op} needs two operands")));
                }
                let keyword = if frame == Frame::Or { " OR " } else { " AND " };
                self.sql.push('(');
                self.context.push(frame);
                for (i, operand) in items[1..].iter().enumerate() {
                    if i > 0 {
                        self.sql.push_str(keyword);
                    }
                    self.write_expr(operand)?;
                }
                self.context.pop();
                self.sql.push(')');
                Ok(())
            }
            "NOT" => {
                if items.len() != 2 {
                    return Err(Error::invalid_query("NOT takes one operand"));
                }
                self.sql.push_str("(NOT ");
                self.context.push(Frame::Other);
                self.write_expr(&items[1])?;
                self.context.pop();
                self.sql.push(')');
                Ok(())
            }
            "=" | "!=" | "<" | "<=" | ">" | ">=" => {
                if items.len() != 3 {
                    return Err(Error::invalid_query(format!("{op} needs two operands")));
                }
                let sql_op = match op {
                    "=" => "=",
                    "!=" => "<>",
                    other => other,
                };
                self.sql.push('(');
                self.context.push(Frame::Other);
                self.write_expr(&items[1])?;
                self.sql.push(' ');
                self.sql.push_str(sql_op);
                self.sql.push(' ');
                self.write_expr(&items[2])?;
                self.context.pop();
                self.sql.push(')');
                Ok(())
            }
            "[]" => {
                self.sql.push_str("array_of(");
                self.context.push(Frame::Other);
                for (i, operand) in items[1..].iter().enumerate() {
                    if i > 0 {
                        self.sql.push_str(", ");
                    }
                    self.write_expr(operand)?;
                }
                self.context.pop();
                self.sql.push(')');
                Ok(())
            }
            _ if op.ends_with("()") => {
                let name = op.trim_end_matches("()").to_ascii_lowercase();
                self.sql.push_str(&name);
                self.sql.push('(');
                self.context.push(Frame::Other);
                for (i, operand) in items[1..].iter().enumerate() {
                    if i > 0 {
                        self.sql.push_str(", ");
                    }
                    self.write_expr(operand)?;
                }
                self.context.pop();
                self.sql.push(')');
                Ok(())
            }
            _ => Err(Error::invalid_query(format!("unsupported operator '{op}'"))),
        }
    }

    fn write_property(&mut self, head: &str, rest: &[Value]) -> Result<()> {
        let mut parts: Vec<&str> = if head.is_empty() {
            Vec::new()
        } else {
            head.split('.').collect()
        };
        for item in rest {
            let part = item
                .as_str()
                .ok_or_else(|| Error::invalid_query("property path parts must be strings"))?;
            parts.push(part);
        }
        let table = sql_identifier(&self.table);
        match parts.as_slice() {
            ["_id"] => self.sql.push_str(&format!("{table}.key")),
            ["_sequence"] => self.sql.push_str(&format!("{table}.sequence")),
            [] => self.sql.push_str(&format!("{table}.body")),
            _ => {
                let path = parts.join(".");
                self.sql
                    .push_str(&format!("fl_value({table}.body, {})", sql_string(&path)));
            }
        }
        Ok(())
    }

    /// Writes the distance column for an `APPROX_VECTOR_DISTANCE` call,
    /// enforcing its placement rule.
    fn write_vector_distance(&mut self, params: &[Value]) -> Result<()> {
        // Legal in a WHERE clause only if no OR sits between here and
        // the WHERE; evaluated purely from the context stack.
        let mut found_or = false;
        let mut allowed = true;
        for frame in self.context.iter().rev() {
            match frame {
                Frame::Or => found_or = true,
                Frame::Where => {
                    allowed = !found_or;
                    break;
                }
                Frame::Other => {}
            }
        }
        if !allowed {
            return Err(Error::invalid_query(
                "APPROX_VECTOR_DISTANCE can't be used within an OR in a WHERE clause",
            ));
        }
        let table = self.vector_table_for(params)?;
        let alias = self
            .joins
            .iter()
            .find(|j| j.table == table)
            .map(|j| j.alias.clone())
            .ok_or_else(|| {
                Error::invalid_query("APPROX_VECTOR_DISTANCE is not allowed in this context")
            })?;
        self.sql
            .push_str(&format!("{}.distance", sql_identifier(&alias)));
        Ok(())
    }

    fn note_parameter(&mut self, name: String) {
        if !self.parameters.contains(&name) {
            self.parameters.push(name);
        }
    }
}

/// Quotes an SQL identifier.
fn sql_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Quotes an SQL string literal.
fn sql_string(s: &str) -> String {
    format!("'{}'", s.replace('\'', "''"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::{IndexManager, IndexSpec, VectorOptions};
    use lodestone_core::ErrorCode;
    use serde_json::json;

    fn manager_with_index() -> IndexManager {
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

    fn distance_call() -> Value {
        json!(["APPROX_VECTOR_DISTANCE()", [".vector"], ["$target"]])
    }

    #[test]
    fn simple_query_uses_nested_select() {
        let manager = manager_with_index();
        let translator = QueryTranslator::new(&manager);
        let query = json!(["SELECT", {
            "WHAT": [["._id"], ["AS", distance_call(), "d"]],
            "ORDER_BY": [distance_call()],
            "LIMIT": 5,
        }]);
        let compiled = translator.compile(&query).unwrap();
        assert_eq!(
            compiled.sql,
            "SELECT \"kv_default\".key, \"vs_1\".distance AS \"d\" \
             FROM \"kv_default\" \
             JOIN (SELECT rowid, distance FROM \"kv_default::vector::byVector\" \
             WHERE vector MATCH encode_vector($_target) LIMIT 5) AS \"vs_1\" \
             ON \"vs_1\".rowid = \"kv_default\".rowid \
             ORDER BY \"vs_1\".distance LIMIT 5"
        );
        assert_eq!(compiled.parameters, vec!["target".to_string()]);
    }

    #[test]
    fn compilation_is_deterministic() {
        let manager = manager_with_index();
        let translator = QueryTranslator::new(&manager);
        let query = json!(["SELECT", {
            "WHAT": [["._id"], distance_call()],
            "LIMIT": 20,
        }]);
        let a = translator.compile(&query).unwrap();
        let b = translator.compile(&query).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn bounded_where_is_still_simple() {
        let manager = manager_with_index();
        let translator = QueryTranslator::new(&manager);
        // WHERE AVD(...) < 50000 is the one WHERE shape that stays
        // non-hybrid; the bound rewrites to the distance column.
        let query = json!(["SELECT", {
            "WHAT": [["._id"]],
            "WHERE": ["<", distance_call(), 50000],
            "LIMIT": 10,
        }]);
        let compiled = translator.compile(&query).unwrap();
        assert!(compiled.sql.contains("JOIN (SELECT rowid, distance FROM"));
        assert!(compiled.sql.contains("WHERE (\"vs_1\".distance < 50000)"));

        // Flipped comparison with the call on the right is simple too.
        let flipped = json!(["SELECT", {
            "WHAT": [["._id"]],
            "WHERE": [">", 50000, distance_call()],
            "LIMIT": 10,
        }]);
        let compiled = translator.compile(&flipped).unwrap();
        assert!(compiled.sql.contains("JOIN (SELECT rowid, distance FROM"));
    }

    #[test]
    fn hybrid_query_uses_plain_join_and_needs_no_limit() {
        let manager = manager_with_index();
        let translator = QueryTranslator::new(&manager);
        let query = json!(["SELECT", {
            "WHAT": [["._id"]],
            "WHERE": ["AND",
                ["=", [".kind"], "even"],
                ["<", distance_call(), 50000]],
        }]);
        let compiled = translator.compile(&query).unwrap();
        assert_eq!(
            compiled.sql,
            "SELECT \"kv_default\".key FROM \"kv_default\" \
             JOIN \"kv_default::vector::byVector\" AS \"vs_1\" \
             ON \"vs_1\".rowid = \"kv_default\".rowid \
             AND \"vs_1\".vector MATCH encode_vector($_target) \
             WHERE ((fl_value(\"kv_default\".body, 'kind') = 'even') \
             AND (\"vs_1\".distance < 50000))"
        );
    }

    #[test]
    fn probes_argument_passes_through() {
        let manager = manager_with_index();
        let translator = QueryTranslator::new(&manager);
        let call = json!(["APPROX_VECTOR_DISTANCE()", [".vector"], ["$target"], null, 12]);
        let simple = json!(["SELECT", {"WHAT": [call.clone()], "LIMIT": 3}]);
        let compiled = translator.compile(&simple).unwrap();
        assert!(compiled
            .sql
            .contains("encode_vector($_target) AND vectorsearch_probes(vector, 12) LIMIT 3"));

        let hybrid = json!(["SELECT", {
            "WHAT": [call.clone()],
            "WHERE": ["=", [".kind"], "even"],
        }]);
        let compiled = translator.compile(&hybrid).unwrap();
        assert!(compiled
            .sql
            .contains("AND vectorsearch_probes(\"vs_1\".vector, 12)"));
    }

    #[test]
    fn missing_limit_on_simple_query_fails() {
        let manager = manager_with_index();
        let translator = QueryTranslator::new(&manager);
        let query = json!(["SELECT", {"WHAT": [distance_call()]}]);
        let err = translator.compile(&query).unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidQuery);
        assert!(err.to_string().contains("LIMIT"));
    }

    #[test]
    fn limit_bounds_are_enforced() {
        let manager = manager_with_index();
        let translator = QueryTranslator::new(&manager);
        for bad in [json!(0), json!(-4), json!(10_001), json!("5")] {
            let query = json!(["SELECT", {"WHAT": [distance_call()], "LIMIT": bad}]);
            let err = translator.compile(&query).unwrap_err();
            assert_eq!(err.code(), ErrorCode::InvalidQuery);
            assert!(err.to_string().contains("LIMIT"));
        }
        // 10000 exactly is fine.
        let query = json!(["SELECT", {"WHAT": [distance_call()], "LIMIT": 10_000}]);
        assert!(translator.compile(&query).is_ok());
    }

    #[test]
    fn accurate_true_is_unsupported() {
        let manager = manager_with_index();
        let translator = QueryTranslator::new(&manager);
        let call = json!([
            "APPROX_VECTOR_DISTANCE()", [".vector"], ["$target"], null, null, true
        ]);
        let query = json!(["SELECT", {"WHAT": [call], "LIMIT": 5}]);
        let err = translator.compile(&query).unwrap_err();
        assert_eq!(err.code(), ErrorCode::Unsupported);

        let call = json!([
            "APPROX_VECTOR_DISTANCE()", [".vector"], ["$target"], null, null, false
        ]);
        let query = json!(["SELECT", {"WHAT": [call], "LIMIT": 5}]);
        assert!(translator.compile(&query).is_ok());
    }

    #[test]
    fn or_above_where_is_rejected() {
        let manager = manager_with_index();
        let translator = QueryTranslator::new(&manager);
        let query = json!(["SELECT", {
            "WHAT": [["._id"]],
            "WHERE": ["OR",
                ["=", [".kind"], "even"],
                ["<", distance_call(), 50000]],
            "LIMIT": 5,
        }]);
        let err = translator.compile(&query).unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidQuery);
        assert!(err.to_string().contains("OR"));

        // Even buried under an AND inside the OR.
        let query = json!(["SELECT", {
            "WHAT": [["._id"]],
            "WHERE": ["OR",
                ["=", [".kind"], "even"],
                ["AND", ["=", [".kind"], "odd"], ["<", distance_call(), 50000]]],
            "LIMIT": 5,
        }]);
        assert!(translator.compile(&query).is_err());
    }

    #[test]
    fn distance_outside_where_is_fine_with_or_in_where() {
        let manager = manager_with_index();
        let translator = QueryTranslator::new(&manager);
        // The OR is inside WHERE, but the distance call is in WHAT, so
        // the placement rule does not apply to it.
        let query = json!(["SELECT", {
            "WHAT": [distance_call()],
            "WHERE": ["OR", ["=", [".a"], 1], ["=", [".b"], 2]],
        }]);
        assert!(translator.compile(&query).is_ok());
    }

    #[test]
    fn index_name_instead_of_expression() {
        let manager = manager_with_index();
        let translator = QueryTranslator::new(&manager);
        let call = json!(["APPROX_VECTOR_DISTANCE()", "byVector", ["$target"]]);
        let query = json!(["SELECT", {"WHAT": [call], "LIMIT": 5}]);
        let err = translator.compile(&query).unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidQuery);
        assert!(err.to_string().contains("did you pass the index name"));
    }

    #[test]
    fn unindexed_expression_fails() {
        let manager = manager_with_index();
        let translator = QueryTranslator::new(&manager);
        let call = json!(["APPROX_VECTOR_DISTANCE()", [".embedding"], ["$target"]]);
        let query = json!(["SELECT", {"WHAT": [call], "LIMIT": 5}]);
        let err = translator.compile(&query).unwrap_err();
        assert_eq!(err.code(), ErrorCode::NoSuchIndex);
    }

    #[test]
    fn bad_metric_and_probes_arguments() {
        let manager = manager_with_index();
        let translator = QueryTranslator::new(&manager);

        let call = json!(["APPROX_VECTOR_DISTANCE()", [".vector"], ["$t"], 7]);
        let query = json!(["SELECT", {"WHAT": [call], "LIMIT": 5}]);
        let err = translator.compile(&query).unwrap_err();
        assert!(err.to_string().contains("metric"));

        for bad in [json!(0), json!(-1), json!(2.5)] {
            let call = json!(["APPROX_VECTOR_DISTANCE()", [".vector"], ["$t"], null, bad]);
            let query = json!(["SELECT", {"WHAT": [call], "LIMIT": 5}]);
            let err = translator.compile(&query).unwrap_err();
            assert!(err.to_string().contains("numProbes"));
        }
    }

    #[test]
    fn metric_name_selects_index() {
        let manager = manager_with_index();
        let translator = QueryTranslator::new(&manager);
        let call = json!(["APPROX_VECTOR_DISTANCE()", [".vector"], ["$t"], "euclidean"]);
        let query = json!(["SELECT", {"WHAT": [call], "LIMIT": 5}]);
        assert!(translator.compile(&query).is_ok());

        let call = json!(["APPROX_VECTOR_DISTANCE()", [".vector"], ["$t"], "cosine"]);
        let query = json!(["SELECT", {"WHAT": [call], "LIMIT": 5}]);
        assert_eq!(
            translator.compile(&query).unwrap_err().code(),
            ErrorCode::NoSuchIndex
        );

        // Empty string means "index default".
        let call = json!(["APPROX_VECTOR_DISTANCE()", [".vector"], ["$t"], ""]);
        let query = json!(["SELECT", {"WHAT": [call], "LIMIT": 5}]);
        assert!(translator.compile(&query).is_ok());
    }

    #[test]
    fn plain_queries_translate_without_indexes() {
        let manager = IndexManager::new("kv_default");
        let translator = QueryTranslator::new(&manager);
        let query = json!(["SELECT", {
            "WHAT": [["._id"], [".name"], ["._sequence"]],
            "FROM": [{"COLLECTION": "people"}],
            "WHERE": ["AND", [">=", [".age"], 21], ["NOT", ["=", [".banned"], true]]],
            "ORDER_BY": [["DESC", [".age"]], [".name"]],
            "LIMIT": 10,
            "OFFSET": 20,
        }]);
        let compiled = translator.compile(&query).unwrap();
        assert_eq!(
            compiled.sql,
            "SELECT \"kv_people\".key, fl_value(\"kv_people\".body, 'name'), \
             \"kv_people\".sequence FROM \"kv_people\" \
             WHERE ((fl_value(\"kv_people\".body, 'age') >= 21) \
             AND (NOT (fl_value(\"kv_people\".body, 'banned') = TRUE))) \
             ORDER BY fl_value(\"kv_people\".body, 'age') DESC, \
             fl_value(\"kv_people\".body, 'name') LIMIT 10 OFFSET 20"
        );
        assert!(compiled.parameters.is_empty());
    }

    #[test]
    fn operator_names_are_case_insensitive() {
        let manager = manager_with_index();
        let translator = QueryTranslator::new(&manager);
        let query = json!(["select", {
            "what": [["approx_vector_distance()", [".vector"], ["$target"]]],
            "limit": 5,
        }]);
        let compiled = translator.compile(&query).unwrap();
        assert!(compiled.sql.contains("\"vs_1\".distance"));
    }

    #[test]
    fn string_literals_are_escaped() {
        let manager = IndexManager::new("kv_default");
        let translator = QueryTranslator::new(&manager);
        let query = json!(["SELECT", {
            "WHAT": [["._id"]],
            "WHERE": ["=", [".note"], "it's quoted"],
        }]);
        let compiled = translator.compile(&query).unwrap();
        assert!(compiled.sql.contains("'it''s quoted'"));
    }
}
