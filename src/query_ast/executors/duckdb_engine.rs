//! DuckDB-backed query engine

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate};
use duckdb::Connection;
use duckdb::types::{TimeUnit, Value, ValueRef};
use log::{debug, info};

use crate::config::GuardConfig;
use crate::directory;
use crate::models::structs::{Row, SqlValue};
use crate::query_ast::errors::EngineError;
use crate::query_ast::executor::{EngineSession, QueryEngine};
use crate::query_tools::classifier::lexes_as_multiple_statements;

/// Engine over one DuckDB database. Every query and session gets its own
/// cloned connection, so concurrent work does not serialize on one handle.
#[derive(Clone)]
pub struct DuckDbEngine {
    base: Arc<Mutex<Connection>>,
    path: Option<PathBuf>,
}

impl DuckDbEngine {
    pub fn open_in_memory() -> Result<Self, EngineError> {
        let conn = Connection::open_in_memory()?;
        Ok(Self { base: Arc::new(Mutex::new(conn)), path: None })
    }

    pub fn open(path: impl AsRef<Path>) -> Result<Self, EngineError> {
        let path = path.as_ref().to_path_buf();
        info!("opening DuckDB database at {}", path.display());
        let conn = Connection::open(&path)?;
        Ok(Self { base: Arc::new(Mutex::new(conn)), path: Some(path) })
    }

    /// Configured database file, or the default one in the app data directory.
    pub fn from_config(config: &GuardConfig) -> Result<Self, EngineError> {
        match &config.engine_path {
            Some(path) if path.as_os_str() == ":memory:" => Self::open_in_memory(),
            Some(path) => Self::open(path),
            None => {
                directory::ensure_app_directories()
                    .map_err(|e| EngineError::new(format!("cannot create data directory: {}", e)))?;
                Self::open(directory::default_engine_path())
            }
        }
    }

    pub fn path(&self) -> Option<&Path> { self.path.as_deref() }

    fn connection(&self) -> Result<Connection, EngineError> {
        let base = self
            .base
            .lock()
            .map_err(|_| EngineError::new("engine connection lock poisoned"))?;
        Ok(base.try_clone()?)
    }
}

#[async_trait]
impl QueryEngine for DuckDbEngine {
    async fn query(&self, sql: &str) -> Result<Vec<Row>, EngineError> {
        ensure_single_statement(sql)?;
        let conn = self.connection()?;
        let sql = sql.to_string();
        let rows = tokio::task::spawn_blocking(move || run_query(&conn, &sql))
            .await
            .map_err(|e| EngineError::new(format!("engine task failed: {}", e)))??;
        debug!("DuckDbEngine: query returned {} rows", rows.len());
        Ok(rows)
    }

    async fn session(&self) -> Result<Box<dyn EngineSession>, EngineError> {
        let conn = self.connection()?;
        Ok(Box::new(DuckDbSession { conn: Arc::new(Mutex::new(conn)) }))
    }
}

/// `Connection::prepare` runs every statement ahead of the last one, so text
/// that lexes as more than one statement never reaches it.
fn ensure_single_statement(sql: &str) -> Result<(), EngineError> {
    match lexes_as_multiple_statements(sql) {
        Ok(false) => Ok(()),
        Ok(true) => Err(EngineError::new("refusing to run more than one statement per query")),
        Err(e) => Err(EngineError::new(format!("cannot split statement text: {}", e))),
    }
}

fn run_query(conn: &Connection, sql: &str) -> Result<Vec<Row>, EngineError> {
    let mut stmt = conn.prepare(sql)?;
    let mut rows = stmt.query([])?;
    let columns: Vec<String> = rows.as_ref().map(|s| s.column_names()).unwrap_or_default();

    let mut out = Vec::new();
    while let Some(row) = rows.next()? {
        let mut converted = Row::with_capacity(columns.len());
        for (i, name) in columns.iter().enumerate() {
            converted.push(name.as_str(), to_sql_value(row.get_ref(i)?));
        }
        out.push(converted);
    }
    Ok(out)
}

fn to_sql_value(value: ValueRef<'_>) -> SqlValue {
    match value {
        ValueRef::Null => SqlValue::Null,
        ValueRef::Boolean(b) => SqlValue::Boolean(b),
        ValueRef::TinyInt(n) => SqlValue::Int(i32::from(n)),
        ValueRef::SmallInt(n) => SqlValue::Int(i32::from(n)),
        ValueRef::Int(n) => SqlValue::Int(n),
        ValueRef::BigInt(n) => SqlValue::BigInt(n),
        ValueRef::HugeInt(n) => SqlValue::HugeInt(n),
        ValueRef::UTinyInt(n) => SqlValue::Int(i32::from(n)),
        ValueRef::USmallInt(n) => SqlValue::Int(i32::from(n)),
        ValueRef::UInt(n) => SqlValue::BigInt(i64::from(n)),
        ValueRef::UBigInt(n) => SqlValue::HugeInt(i128::from(n)),
        ValueRef::Float(f) => SqlValue::Double(f64::from(f)),
        ValueRef::Double(f) => SqlValue::Double(f),
        ValueRef::Decimal(d) => SqlValue::Decimal(d),
        ValueRef::Text(bytes) => SqlValue::Text(String::from_utf8_lossy(bytes).into_owned()),
        ValueRef::Blob(bytes) => SqlValue::Blob(bytes.to_vec()),
        ValueRef::Date32(days) => SqlValue::Text(format_date(days)),
        ValueRef::Timestamp(unit, raw) => SqlValue::Text(format_timestamp(unit, raw)),
        other => SqlValue::Text(format!("{:?}", Value::from(other))),
    }
}

fn format_date(days: i32) -> String {
    NaiveDate::from_ymd_opt(1970, 1, 1)
        .and_then(|epoch| epoch.checked_add_signed(Duration::days(i64::from(days))))
        .map(|d| d.format("%Y-%m-%d").to_string())
        .unwrap_or_else(|| days.to_string())
}

fn format_timestamp(unit: TimeUnit, raw: i64) -> String {
    let micros = match unit {
        TimeUnit::Second => raw.saturating_mul(1_000_000),
        TimeUnit::Millisecond => raw.saturating_mul(1_000),
        TimeUnit::Microsecond => raw,
        TimeUnit::Nanosecond => raw / 1_000,
    };
    DateTime::from_timestamp_micros(micros)
        .map(|ts| ts.naive_utc().format("%Y-%m-%d %H:%M:%S%.f").to_string())
        .unwrap_or_else(|| raw.to_string())
}

/// Dedicated connection for transactional work.
pub struct DuckDbSession {
    conn: Arc<Mutex<Connection>>,
}

#[async_trait]
impl EngineSession for DuckDbSession {
    async fn execute(&mut self, sql: &str) -> Result<(), EngineError> {
        debug!("DuckDbSession: {}", sql);
        let conn = Arc::clone(&self.conn);
        let sql = sql.to_string();
        tokio::task::spawn_blocking(move || {
            let conn = conn
                .lock()
                .map_err(|_| EngineError::new("session connection lock poisoned"))?;
            conn.execute_batch(&sql).map_err(EngineError::from)
        })
        .await
        .map_err(|e| EngineError::new(format!("engine task failed: {}", e)))?
    }
}
