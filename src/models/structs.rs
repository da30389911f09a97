use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::ser::{SerializeMap, Serializer};
use serde::{Deserialize, Serialize};

use crate::models::enums::{Dialect, StatementKind};

/// Result of the lightweight textual classification of one statement.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SqlStatement {
    pub kind: StatementKind,
    pub columns: Vec<String>,
    pub table: Option<String>,
    pub where_clause: Option<String>,
    pub group_by: Option<String>,
    pub order_by: Option<String>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
    /// Sample fraction in `0.0..=1.0` for percentage samples.
    pub sample: Option<f64>,
    pub raw: String,
}

/// One cell as delivered by the engine, keeping its wire type.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Boolean(bool),
    Int(i32),
    BigInt(i64),
    HugeInt(i128),
    Double(f64),
    Decimal(Decimal),
    Text(String),
    Blob(Vec<u8>),
}

impl SqlValue {
    pub fn type_name(&self) -> &'static str {
        match self {
            SqlValue::Null => "NULL",
            SqlValue::Boolean(_) => "BOOLEAN",
            SqlValue::Int(_) => "INTEGER",
            SqlValue::BigInt(_) => "BIGINT",
            SqlValue::HugeInt(_) => "HUGEINT",
            SqlValue::Double(_) => "DOUBLE",
            SqlValue::Decimal(_) => "DECIMAL",
            SqlValue::Text(_) => "VARCHAR",
            SqlValue::Blob(_) => "BLOB",
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            SqlValue::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl Serialize for SqlValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            SqlValue::Null => serializer.serialize_none(),
            SqlValue::Boolean(b) => serializer.serialize_bool(*b),
            SqlValue::Int(n) => serializer.serialize_i32(*n),
            SqlValue::BigInt(n) => serializer.serialize_i64(*n),
            // JSON consumers lose precision past 2^53
            SqlValue::HugeInt(n) => serializer.serialize_str(&n.to_string()),
            SqlValue::Double(n) => serializer.serialize_f64(*n),
            SqlValue::Decimal(d) => serializer.serialize_str(&d.to_string()),
            SqlValue::Text(s) => serializer.serialize_str(s),
            SqlValue::Blob(bytes) => serializer.serialize_str(&hex::encode(bytes)),
        }
    }
}

/// String-keyed row that keeps the engine's column order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Row {
    cells: Vec<(String, SqlValue)>,
}

impl Row {
    pub fn new() -> Self { Self::default() }

    pub fn with_capacity(capacity: usize) -> Self {
        Self { cells: Vec::with_capacity(capacity) }
    }

    pub fn push(&mut self, column: impl Into<String>, value: SqlValue) {
        self.cells.push((column.into(), value));
    }

    pub fn get(&self, column: &str) -> Option<&SqlValue> {
        self.cells.iter().find(|(name, _)| name == column).map(|(_, v)| v)
    }

    pub fn first_value(&self) -> Option<&SqlValue> { self.cells.first().map(|(_, v)| v) }

    pub fn columns(&self) -> impl Iterator<Item = &str> { self.cells.iter().map(|(name, _)| name.as_str()) }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &SqlValue)> {
        self.cells.iter().map(|(name, v)| (name.as_str(), v))
    }

    pub fn len(&self) -> usize { self.cells.len() }

    pub fn is_empty(&self) -> bool { self.cells.is_empty() }
}

impl<K: Into<String>> FromIterator<(K, SqlValue)> for Row {
    fn from_iter<I: IntoIterator<Item = (K, SqlValue)>>(iter: I) -> Self {
        Self { cells: iter.into_iter().map(|(k, v)| (k.into(), v)).collect() }
    }
}

impl Serialize for Row {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.cells.len()))?;
        for (name, value) in &self.cells {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}

/// Merged output of one bounded data query and its count companion.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct QueryResult {
    pub count: i64,
    pub rows: Vec<Row>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FederationRequest {
    pub dialect: Dialect,
    pub connection_string: String,
    pub sql: String,
    pub target_table: String,
    /// `(from, to)` pairs applied after the table is created.
    #[serde(default)]
    pub column_renames: Vec<(String, String)>,
}

impl FederationRequest {
    pub fn new(
        dialect: Dialect,
        connection_string: impl Into<String>,
        sql: impl Into<String>,
        target_table: impl Into<String>,
    ) -> Self {
        Self {
            dialect,
            connection_string: connection_string.into(),
            sql: sql.into(),
            target_table: target_table.into(),
            column_renames: Vec::new(),
        }
    }

    pub fn rename_column(mut self, from: impl Into<String>, to: impl Into<String>) -> Self {
        self.column_renames.push((from.into(), to.into()));
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FederationOutcome {
    pub table: String,
    pub alias: String,
    pub renamed_columns: usize,
    /// Set when the table was created but the attachment could not be detached.
    pub detach_warning: Option<String>,
    pub completed_at: DateTime<Utc>,
}
