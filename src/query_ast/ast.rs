//! Engine-native statement tree.
//!
//! The engine serializes SQL to a JSON document and formats a (possibly
//! rewritten) document back to SQL. The document is handled as a dynamic
//! `serde_json::Value`; its schema belongs to the engine.

use log::{debug, trace};
use serde_json::Value;

use super::errors::{PositionError, QueryError, RewriteError};
use super::executor::QueryEngine;
use super::node::{self, SELECT_NODE, SET_OPERATION_NODE};

/// Kind of node a statement's root resolved to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RootKind {
    Select,
    SetOperation,
}

#[derive(Debug, Clone)]
pub struct Ast {
    document: Value,
    /// JSON pointers into `document`
    roots: Vec<String>,
    visited: usize,
}

impl Ast {
    /// Ask the engine for the tree of `sql`.
    pub async fn parse(engine: &dyn QueryEngine, sql: &str) -> Result<Self, QueryError> {
        let json = engine.serialize_sql(sql).await?;
        let ast = Self::from_json(&json)?;
        debug!("parsed statement into {} node(s), root at {:?}", ast.visited, ast.roots.first());
        Ok(ast)
    }

    /// Decode a serialized document. Numbers keep their literal text.
    pub fn from_json(json: &str) -> Result<Self, QueryError> {
        let document: Value = serde_json::from_str(json)
            .map_err(|e| QueryError::InvalidQuery(format!("engine returned a malformed tree: {}", e)))?;
        Self::from_document(document)
    }

    pub fn from_document(document: Value) -> Result<Self, QueryError> {
        if document.get("error").and_then(Value::as_bool).unwrap_or(false) {
            return Err(position_error(&document).into());
        }
        let mut ast = Self { document, roots: Vec::new(), visited: 0 };
        ast.traverse()?;
        Ok(ast)
    }

    fn traverse(&mut self) -> Result<(), QueryError> {
        let statements = self
            .document
            .get("statements")
            .and_then(Value::as_array)
            .ok_or_else(|| QueryError::InvalidQuery("tree has no statement list".into()))?;
        match statements.len() {
            0 => return Err(QueryError::InvalidQuery("no statement to execute".into())),
            1 => {}
            _ => return Err(QueryError::MultipleStatements),
        }
        let node = statements[0]
            .get("node")
            .ok_or_else(|| QueryError::InvalidQuery("statement has no query node".into()))?;

        let mut roots = Vec::new();
        let visited = visit(node, "/statements/0/node".to_string(), true, &mut roots);
        if roots.is_empty() {
            return Err(QueryError::InvalidQuery(format!(
                "unsupported statement node: {}",
                node::node_type(node).unwrap_or("unknown")
            )));
        }
        self.roots = roots;
        self.visited = visited;
        Ok(())
    }

    pub fn document(&self) -> &Value { &self.document }

    pub fn into_document(self) -> Value { self.document }

    pub fn roots(&self) -> &[String] { &self.roots }

    /// Number of query nodes (root, set-operation branches and CTE bodies) seen.
    pub fn node_count(&self) -> usize { self.visited }

    pub(crate) fn root_pointer(&self) -> Result<&str, RewriteError> {
        self.roots.first().map(String::as_str).ok_or(RewriteError::MissingRoot)
    }

    pub fn root(&self) -> Result<&Value, RewriteError> {
        let pointer = self.root_pointer()?;
        self.document.pointer(pointer).ok_or(RewriteError::MissingRoot)
    }

    pub fn root_kind(&self) -> Option<RootKind> {
        match self.root().ok().and_then(node::node_type) {
            Some(SELECT_NODE) => Some(RootKind::Select),
            Some(SET_OPERATION_NODE) => Some(RootKind::SetOperation),
            _ => None,
        }
    }

    pub(crate) fn root_object_mut(&mut self) -> Result<&mut serde_json::Map<String, Value>, RewriteError> {
        let pointer = self.root_pointer()?.to_string();
        self.document
            .pointer_mut(&pointer)
            .and_then(Value::as_object_mut)
            .ok_or_else(|| RewriteError::Malformed("root node is not an object".into()))
    }

    /// Ask the engine to turn the current tree back into SQL.
    pub async fn format(&self, engine: &dyn QueryEngine) -> Result<String, QueryError> {
        format_document(engine, &self.document).await
    }
}

pub(crate) async fn format_document(engine: &dyn QueryEngine, document: &Value) -> Result<String, QueryError> {
    let json = serde_json::to_string(document)
        .map_err(|e| QueryError::InvalidQuery(format!("tree could not be encoded: {}", e)))?;
    let sql = engine
        .deserialize_sql(&json)
        .await
        .map_err(|e| QueryError::InvalidQuery(format!("engine could not format tree: {}", e)))?;
    Ok(sql.trim().trim_end_matches(';').trim_end().to_string())
}

/// Record roots and count query nodes below `node`.
fn visit(node: &Value, pointer: String, top: bool, roots: &mut Vec<String>) -> usize {
    let mut seen = 0;
    match node::node_type(node) {
        Some(SELECT_NODE) => {
            seen += 1;
            if top {
                roots.push(pointer.clone());
            }
        }
        Some(SET_OPERATION_NODE) => {
            seen += 1;
            // LIMIT/OFFSET bound the combined result, so the operation itself is the root
            if top {
                roots.push(pointer.clone());
            }
            for side in ["left", "right"] {
                if let Some(child) = node.get(side) {
                    seen += visit(child, format!("{}/{}", pointer, side), false, roots);
                }
            }
            if let Some(children) = node.get("children").and_then(Value::as_array) {
                for (i, child) in children.iter().enumerate() {
                    seen += visit(child, format!("{}/children/{}", pointer, i), false, roots);
                }
            }
        }
        other => {
            trace!("skipping node of type {:?} at {}", other, pointer);
            return 0;
        }
    }
    if let Some(entries) = node.pointer("/cte_map/map").and_then(Value::as_array) {
        for (i, entry) in entries.iter().enumerate() {
            if let Some(child) = entry.pointer("/value/query/node") {
                seen += visit(child, format!("{}/cte_map/map/{}/value/query/node", pointer, i), false, roots);
            }
        }
    }
    seen
}

fn position_error(document: &Value) -> PositionError {
    let message = document
        .get("error_message")
        .and_then(Value::as_str)
        .unwrap_or("engine could not parse the statement");
    let position = match document.get("position") {
        Some(Value::Number(n)) => n.to_string().parse().ok(),
        Some(Value::String(s)) => s.trim().parse().ok(),
        _ => None,
    };
    PositionError::new(message, position)
}

/// Serialized trees in the engine's shape, for tests.
#[cfg(test)]
pub(crate) mod fixtures {
    use serde_json::{Value, json};

    use crate::query_ast::node::constant_integer;

    pub fn star() -> Value {
        json!({
            "class": "STAR", "type": "STAR", "alias": "", "query_location": 7,
            "relation_name": "", "exclude_list": [], "replace_list": [],
            "columns": false, "expr": null, "unpacked": false
        })
    }

    pub fn base_table(name: &str) -> Value {
        json!({
            "type": "BASE_TABLE", "alias": "", "sample": null, "query_location": 14,
            "schema_name": "", "table_name": name, "column_name_alias": [], "catalog_name": ""
        })
    }

    pub fn column(name: &str) -> Value {
        json!({ "class": "COLUMN_REF", "type": "COLUMN_REF", "alias": "", "query_location": 30, "column_names": [name] })
    }

    pub fn order_by(name: &str) -> Value {
        json!({
            "type": "ORDER_MODIFIER",
            "orders": [{ "type": "ORDER_DEFAULT", "null_order": "ORDER_DEFAULT", "expression": column(name) }]
        })
    }

    pub fn limit(limit: Option<i64>, offset: Option<i64>) -> Value {
        json!({
            "type": "LIMIT_MODIFIER",
            "limit": limit.map(constant_integer).unwrap_or(Value::Null),
            "offset": offset.map(constant_integer).unwrap_or(Value::Null)
        })
    }

    pub fn equals(col: &str, value: i64) -> Value {
        json!({
            "class": "COMPARISON", "type": "COMPARE_EQUAL", "alias": "", "query_location": 25,
            "left": column(col), "right": constant_integer(value)
        })
    }

    pub fn select_node(table: &str, where_clause: Option<Value>, modifiers: Vec<Value>) -> Value {
        json!({
            "type": "SELECT_NODE",
            "modifiers": modifiers,
            "cte_map": { "map": [] },
            "select_list": [star()],
            "from_table": base_table(table),
            "where_clause": where_clause.unwrap_or(Value::Null),
            "group_expressions": [],
            "group_sets": [],
            "aggregate_handling": "STANDARD_HANDLING",
            "having": null,
            "sample": null,
            "qualify": null
        })
    }

    pub fn union_node(left: Value, right: Value, modifiers: Vec<Value>) -> Value {
        json!({
            "type": "SET_OPERATION_NODE",
            "modifiers": modifiers,
            "cte_map": { "map": [] },
            "setop_type": "UNION",
            "left": left,
            "right": right,
            "setop_all": false
        })
    }

    pub fn with_cte(mut node: Value, name: &str, body: Value) -> Value {
        node["cte_map"] = json!({
            "map": [{
                "key": name,
                "value": { "aliases": [], "query": { "node": body }, "materialized": "CTE_MATERIALIZE_DEFAULT" }
            }]
        });
        node
    }

    pub fn document(nodes: Vec<Value>) -> String {
        let statements: Vec<Value> = nodes.into_iter().map(|n| json!({ "node": n, "named_param_map": [] })).collect();
        json!({ "error": false, "statements": statements }).to_string()
    }
}
