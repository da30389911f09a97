//! Node shapes of the engine's serialized statement tree.
//!
//! The tree is owned by the engine; only the handful of shapes the rewriters
//! read or synthesize are named here.

use serde_json::{Value, json};

pub const SELECT_NODE: &str = "SELECT_NODE";
pub const SET_OPERATION_NODE: &str = "SET_OPERATION_NODE";
pub const ORDER_MODIFIER: &str = "ORDER_MODIFIER";
pub const LIMIT_MODIFIER: &str = "LIMIT_MODIFIER";
pub const LIMIT_PERCENT_MODIFIER: &str = "LIMIT_PERCENT_MODIFIER";

/// Logical type ids whose constants compare as row counts.
const INTEGER_TYPE_IDS: &[&str] = &[
    "TINYINT", "SMALLINT", "INTEGER", "BIGINT", "HUGEINT",
    "UTINYINT", "USMALLINT", "UINTEGER", "UBIGINT", "UHUGEINT",
];

pub fn node_type(node: &Value) -> Option<&str> {
    node.get("type").and_then(Value::as_str)
}

/// True for a missing field or an explicit JSON null.
pub fn is_unset(value: Option<&Value>) -> bool {
    matches!(value, None | Some(Value::Null))
}

/// Constant integer expression in the engine's native literal shape.
///
/// `query_location` is left out: the engine only writes it for text it parsed,
/// and reads its absence as "no location".
pub fn constant_integer(value: i64) -> Value {
    let type_id = if i32::try_from(value).is_ok() { "INTEGER" } else { "BIGINT" };
    json!({
        "class": "CONSTANT",
        "type": "VALUE_CONSTANT",
        "alias": "",
        "value": {
            "type": { "id": type_id, "type_info": null },
            "is_null": false,
            "value": value
        }
    })
}

/// Integer held by a constant expression, if `expr` is one.
pub fn constant_int_value(expr: &Value) -> Option<i128> {
    if expr.get("class").and_then(Value::as_str) != Some("CONSTANT") {
        return None;
    }
    let value = expr.get("value")?;
    if value.get("is_null").and_then(Value::as_bool).unwrap_or(false) {
        return None;
    }
    let type_id = value.pointer("/type/id").and_then(Value::as_str)?;
    if !INTEGER_TYPE_IDS.contains(&type_id) {
        return None;
    }
    match value.get("value")? {
        // arbitrary_precision: the literal text is kept verbatim
        Value::Number(n) => n.to_string().parse().ok(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

pub fn limit_modifier(limit: i64, offset: Option<i64>) -> Value {
    json!({
        "type": LIMIT_MODIFIER,
        "limit": constant_integer(limit),
        "offset": offset.map(constant_integer).unwrap_or(Value::Null)
    })
}
