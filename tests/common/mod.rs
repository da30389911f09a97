#![allow(dead_code)]

//! In-memory engine for integration tests.
//!
//! Understands `SELECT * FROM t [WHERE col = n] [ORDER BY col] [LIMIT n] [OFFSET n]`
//! and `UNION` of such selects, serializes them in the engine's tree shape and
//! renders trees back the way DuckDB prints them.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Value, json};

use sqlgate::query_ast::node::constant_integer;
use sqlgate::{EngineError, EngineSession, QueryEngine, Row, SqlValue};

static SELECT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)^\s*SELECT \* FROM (\w+)(?: WHERE (\w+) = (\d+))?(?: ORDER BY (\w+))?(?: LIMIT (\d+))?(?: OFFSET (\d+))?\s*;?\s*$",
    )
    .unwrap()
});
static UNION_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\s+UNION\s+").unwrap());

#[derive(Default)]
pub struct FakeState {
    pub executed: Vec<String>,
    pub session_log: Vec<String>,
    pub rows: Vec<Row>,
    /// `None` makes the count query return no rows.
    pub count_value: Option<SqlValue>,
    pub count_error: Option<String>,
    pub data_error: Option<String>,
    /// `(statement prefix, message)`
    pub session_failures: Vec<(String, String)>,
    pub delay: Option<Duration>,
}

#[derive(Clone, Default)]
pub struct FakeEngine {
    state: Arc<Mutex<FakeState>>,
}

impl FakeEngine {
    pub fn new() -> Self { Self::with_rows(0) }

    /// `n` rows of `{id: i}` and a count of `n`.
    pub fn with_rows(n: i32) -> Self {
        let engine = Self::default();
        {
            let mut state = engine.state.lock().unwrap();
            state.rows = (0..n).map(|i| std::iter::once(("id", SqlValue::Int(i))).collect::<Row>()).collect();
            state.count_value = Some(SqlValue::BigInt(i64::from(n)));
        }
        engine
    }

    pub fn executed(&self) -> Vec<String> { self.state.lock().unwrap().executed.clone() }

    pub fn session_log(&self) -> Vec<String> { self.state.lock().unwrap().session_log.clone() }

    pub fn set_count(&self, value: Option<SqlValue>) { self.state.lock().unwrap().count_value = value; }

    pub fn fail_count(&self, message: &str) { self.state.lock().unwrap().count_error = Some(message.into()); }

    pub fn fail_data(&self, message: &str) { self.state.lock().unwrap().data_error = Some(message.into()); }

    pub fn fail_session(&self, prefix: &str, message: &str) {
        self.state.lock().unwrap().session_failures.push((prefix.into(), message.into()));
    }

    pub fn set_delay(&self, delay: Duration) { self.state.lock().unwrap().delay = Some(delay); }

    /// Data statements, i.e. everything but the count companion.
    pub fn data_queries(&self) -> Vec<String> {
        self.executed().into_iter().filter(|s| !s.starts_with("SELECT count(*)")).collect()
    }

    pub fn count_queries(&self) -> Vec<String> {
        self.executed().into_iter().filter(|s| s.starts_with("SELECT count(*)")).collect()
    }
}

#[async_trait::async_trait]
impl QueryEngine for FakeEngine {
    async fn query(&self, sql: &str) -> Result<Vec<Row>, EngineError> {
        let delay = {
            let mut state = self.state.lock().unwrap();
            state.executed.push(sql.to_string());
            state.delay
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let state = self.state.lock().unwrap();
        if sql.starts_with("SELECT count(*)") {
            if let Some(message) = &state.count_error {
                return Err(EngineError::new(message.clone()));
            }
            return Ok(state
                .count_value
                .clone()
                .map(|v| vec![std::iter::once(("count_star()", v)).collect::<Row>()])
                .unwrap_or_default());
        }
        if let Some(message) = &state.data_error {
            return Err(EngineError::new(message.clone()));
        }
        Ok(state.rows.clone())
    }

    async fn session(&self) -> Result<Box<dyn EngineSession>, EngineError> {
        Ok(Box::new(FakeSession { state: Arc::clone(&self.state) }))
    }

    async fn serialize_sql(&self, sql: &str) -> Result<String, EngineError> {
        let branches: Vec<&str> = UNION_RE.split(sql.trim()).collect();
        let mut nodes = Vec::new();
        for branch in &branches {
            match select_node(branch) {
                Some(node) => nodes.push(node),
                None => return Ok(parse_error(sql)),
            }
        }
        let node = nodes
            .into_iter()
            .reduce(|left, right| {
                json!({
                    "type": "SET_OPERATION_NODE", "modifiers": [], "cte_map": { "map": [] },
                    "setop_type": "UNION", "setop_all": false, "left": left, "right": right
                })
            })
            .ok_or_else(|| EngineError::new("empty statement"))?;
        Ok(json!({ "error": false, "statements": [{ "node": node, "named_param_map": [] }] }).to_string())
    }

    async fn deserialize_sql(&self, json: &str) -> Result<String, EngineError> {
        let document: Value = serde_json::from_str(json).map_err(|e| EngineError::new(e.to_string()))?;
        let node = document
            .pointer("/statements/0/node")
            .ok_or_else(|| EngineError::new("no statement"))?;
        render(node)
    }
}

fn parse_error(sql: &str) -> String {
    // position of the third token, where the tiny grammar gives up
    let position = sql
        .match_indices(char::is_whitespace)
        .nth(1)
        .map(|(i, _)| i + 1)
        .unwrap_or(0);
    let near: String = sql[position..].split_whitespace().next().unwrap_or("").to_string();
    json!({
        "error": true,
        "error_type": "parser",
        "error_message": format!("syntax error at or near \"{}\"", near),
        "position": position.to_string()
    })
    .to_string()
}

fn select_node(sql: &str) -> Option<Value> {
    let caps = SELECT_RE.captures(sql)?;
    let mut modifiers = Vec::new();
    if let Some(col) = caps.get(4) {
        modifiers.push(json!({
            "type": "ORDER_MODIFIER",
            "orders": [{ "type": "ORDER_DEFAULT", "null_order": "ORDER_DEFAULT", "expression": column(col.as_str()) }]
        }));
    }
    let limit = caps.get(5).map(|m| constant_integer(m.as_str().parse().unwrap()));
    let offset = caps.get(6).map(|m| constant_integer(m.as_str().parse().unwrap()));
    if limit.is_some() || offset.is_some() {
        modifiers.push(json!({
            "type": "LIMIT_MODIFIER",
            "limit": limit.unwrap_or(Value::Null),
            "offset": offset.unwrap_or(Value::Null)
        }));
    }
    let where_clause = match (caps.get(2), caps.get(3)) {
        (Some(col), Some(val)) => json!({
            "class": "COMPARISON", "type": "COMPARE_EQUAL", "alias": "",
            "left": column(col.as_str()),
            "right": constant_integer(val.as_str().parse().unwrap())
        }),
        _ => Value::Null,
    };
    Some(json!({
        "type": "SELECT_NODE",
        "modifiers": modifiers,
        "cte_map": { "map": [] },
        "select_list": [{ "class": "STAR", "type": "STAR", "alias": "" }],
        "from_table": { "type": "BASE_TABLE", "alias": "", "schema_name": "", "table_name": &caps[1] },
        "where_clause": where_clause,
        "group_expressions": [],
        "having": null,
        "sample": null
    }))
}

fn column(name: &str) -> Value {
    json!({ "class": "COLUMN_REF", "type": "COLUMN_REF", "alias": "", "column_names": [name] })
}

fn render(node: &Value) -> Result<String, EngineError> {
    let mut sql = match node["type"].as_str() {
        Some("SELECT_NODE") => {
            let table = node["from_table"]["table_name"].as_str().unwrap_or_default();
            let mut sql = format!("SELECT * FROM {}", table);
            if !node["where_clause"].is_null() {
                sql.push_str(&format!(" WHERE ({} = {})", column_name(&node["where_clause"]["left"]), constant(&node["where_clause"]["right"])?));
            }
            sql
        }
        Some("SET_OPERATION_NODE") => format!("({}) UNION ({})", render(&node["left"])?, render(&node["right"])?),
        other => return Err(EngineError::new(format!("cannot render {:?}", other))),
    };
    if let Some(modifiers) = node.get("modifiers").and_then(Value::as_array) {
        for modifier in modifiers {
            match modifier["type"].as_str() {
                Some("ORDER_MODIFIER") => {
                    sql.push_str(&format!(" ORDER BY {}", column_name(&modifier["orders"][0]["expression"])));
                }
                Some("LIMIT_MODIFIER") => {
                    if !modifier["limit"].is_null() {
                        sql.push_str(&format!(" LIMIT {}", constant(&modifier["limit"])?));
                    }
                    if !modifier["offset"].is_null() {
                        sql.push_str(&format!(" OFFSET {}", constant(&modifier["offset"])?));
                    }
                }
                other => return Err(EngineError::new(format!("unknown modifier {:?}", other))),
            }
        }
    }
    Ok(sql)
}

fn column_name(expr: &Value) -> String {
    expr["column_names"][0].as_str().unwrap_or_default().to_string()
}

fn constant(expr: &Value) -> Result<i64, EngineError> {
    if expr["class"] != "CONSTANT" || expr["type"] != "VALUE_CONSTANT" {
        return Err(EngineError::new("expected a constant"));
    }
    expr["value"]["value"]
        .as_i64()
        .ok_or_else(|| EngineError::new("constant is not an integer"))
}

pub struct FakeSession {
    state: Arc<Mutex<FakeState>>,
}

#[async_trait::async_trait]
impl EngineSession for FakeSession {
    async fn execute(&mut self, sql: &str) -> Result<(), EngineError> {
        let mut state = self.state.lock().unwrap();
        state.session_log.push(sql.to_string());
        let failure = state
            .session_failures
            .iter()
            .find(|(prefix, _)| sql.starts_with(prefix.as_str()))
            .map(|(_, message)| message.clone());
        match failure {
            Some(message) => Err(EngineError::new(message)),
            None => Ok(()),
        }
    }
}
