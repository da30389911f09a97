//! Engine capability and the guarded count + data executor.
//!
//! The engine is injected as a trait object, so the whole pipeline can run
//! against DuckDB or against an in-memory fake.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use log::debug;
use rust_decimal::prelude::ToPrimitive;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::ast::Ast;
use super::errors::{EngineError, QueryError};
use crate::config::GuardConfig;
use crate::models::enums::QueryPhase;
use crate::models::structs::{QueryResult, Row, SqlValue};
use crate::query_tools::validate_read_only_single;

/// Analytical engine the guard runs statements against.
#[async_trait::async_trait]
pub trait QueryEngine: Send + Sync {
    /// Run one statement and materialize all of its rows.
    async fn query(&self, sql: &str) -> Result<Vec<Row>, EngineError>;

    /// Dedicated handle for multi-statement work such as transactions.
    async fn session(&self) -> Result<Box<dyn EngineSession>, EngineError>;

    /// Serialized statement tree of `sql` as JSON text.
    async fn serialize_sql(&self, sql: &str) -> Result<String, EngineError> {
        let rows = self
            .query(&format!("SELECT CAST(json_serialize_sql({}) AS VARCHAR)", quote_literal(sql)))
            .await?;
        single_text(rows)
    }

    /// SQL text for a serialized statement tree.
    async fn deserialize_sql(&self, json: &str) -> Result<String, EngineError> {
        let rows = self
            .query(&format!("SELECT json_deserialize_sql({}::JSON)", quote_literal(json)))
            .await?;
        single_text(rows)
    }
}

#[async_trait::async_trait]
pub trait EngineSession: Send {
    async fn execute(&mut self, sql: &str) -> Result<(), EngineError>;
}

fn single_text(rows: Vec<Row>) -> Result<String, EngineError> {
    match rows.first().and_then(Row::first_value) {
        Some(SqlValue::Text(s)) => Ok(s.clone()),
        Some(other) => Err(EngineError::new(format!("expected text, engine returned {}", other.type_name()))),
        None => Err(EngineError::new("engine returned no rows")),
    }
}

/// Single-quoted SQL string literal.
pub fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// Double-quoted SQL identifier.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Cancellation and deadline shared by both halves of one execution.
#[derive(Debug, Clone, Default)]
pub struct QueryContext {
    pub cancel: CancellationToken,
    pub timeout: Option<Duration>,
}

impl QueryContext {
    pub fn new() -> Self { Self::default() }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self { cancel: CancellationToken::new(), timeout: Some(timeout) }
    }

    pub fn from_config(config: &GuardConfig) -> Self {
        Self { cancel: CancellationToken::new(), timeout: config.query_timeout() }
    }

    pub fn cancel(&self) { self.cancel.cancel(); }

    fn deadline(&self) -> Option<Instant> {
        self.timeout.map(|t| Instant::now() + t)
    }

    /// Run `work` until it finishes, the token fires, or `deadline` passes.
    async fn guard<T, F>(&self, deadline: Option<Instant>, work: F) -> Result<T, QueryError>
    where
        F: Future<Output = Result<T, QueryError>>,
    {
        let timeout = self.timeout.unwrap_or_default();
        let bounded = async move {
            match deadline {
                Some(at) => tokio::time::timeout_at(at, work).await.map_err(|_| QueryError::Timeout(timeout))?,
                None => work.await,
            }
        };
        tokio::select! {
            _ = self.cancel.cancelled() => Err(QueryError::Cancelled),
            res = bounded => res,
        }
    }
}

/// Validates, bounds and runs read-only statements with a row count.
#[derive(Clone)]
pub struct SafeQueryExecutor {
    engine: Arc<dyn QueryEngine>,
    config: GuardConfig,
}

impl SafeQueryExecutor {
    pub fn new(engine: Arc<dyn QueryEngine>, config: GuardConfig) -> Self {
        Self { engine, config: config.normalized() }
    }

    pub fn engine(&self) -> &Arc<dyn QueryEngine> { &self.engine }

    pub fn config(&self) -> &GuardConfig { &self.config }

    /// Requested page size forced into `1..=max_rows`.
    pub fn clamp_limit(&self, limit: i64) -> i64 {
        let max = i64::try_from(self.config.max_rows).unwrap_or(i64::MAX);
        if limit <= 0 || limit > max {
            i64::try_from(self.config.default_limit).unwrap_or(i64::MAX).min(max)
        } else {
            limit
        }
    }

    pub async fn execute(
        &self,
        sql: &str,
        limit: i64,
        offset: i64,
        impose_limits: bool,
    ) -> Result<QueryResult, QueryError> {
        let ctx = QueryContext::from_config(&self.config);
        self.execute_with(sql, limit, offset, impose_limits, &ctx).await
    }

    pub async fn execute_with(
        &self,
        sql: &str,
        limit: i64,
        offset: i64,
        impose_limits: bool,
        ctx: &QueryContext,
    ) -> Result<QueryResult, QueryError> {
        let kind = validate_read_only_single(sql)?;
        let deadline = ctx.deadline();
        let engine = self.engine.as_ref();

        if !kind.is_tree_rewritable() {
            // DESCRIBE / SUMMARIZE have no tree form
            debug!("passthrough {:?}: {}", kind, sql);
            let rows = ctx
                .guard(deadline, async { engine.query(sql).await.map_err(QueryError::from) })
                .await
                .map_err(|e| e.in_phase(QueryPhase::Data))?;
            return Ok(QueryResult { count: rows.len() as i64, rows });
        }

        let ast = ctx.guard(deadline, Ast::parse(engine, sql)).await?;
        let count_sql = ctx
            .guard(deadline, ast.to_count_query(engine))
            .await
            .map_err(|e| e.in_phase(QueryPhase::Count))?;
        let data_sql = if impose_limits {
            let limit = self.clamp_limit(limit);
            let mut bounded = ast.clone();
            bounded.rewrite_limit(limit, offset.max(0))?;
            ctx.guard(deadline, bounded.format(engine))
                .await
                .map_err(|e| e.in_phase(QueryPhase::Data))?
        } else {
            sql.trim().to_string()
        };
        debug!("data query: {}", data_sql);

        let count_task: JoinHandle<Result<i64, QueryError>> = tokio::spawn({
            let engine = Arc::clone(&self.engine);
            let ctx = ctx.clone();
            async move {
                ctx.guard(deadline, fetch_count(engine.as_ref(), &count_sql))
                    .await
                    .map_err(|e| e.in_phase(QueryPhase::Count))
            }
        });
        let data_task: JoinHandle<Result<Vec<Row>, QueryError>> = tokio::spawn({
            let engine = Arc::clone(&self.engine);
            let ctx = ctx.clone();
            async move {
                ctx.guard(deadline, async { engine.query(&data_sql).await.map_err(QueryError::from) })
                    .await
                    .map_err(|e| e.in_phase(QueryPhase::Data))
            }
        });
        let aborts = [count_task.abort_handle(), data_task.abort_handle()];

        match tokio::try_join!(joined(count_task), joined(data_task)) {
            Ok((count, rows)) => Ok(QueryResult { count, rows }),
            Err(e) => {
                for handle in &aborts {
                    handle.abort();
                }
                Err(e)
            }
        }
    }
}

async fn joined<T>(handle: JoinHandle<Result<T, QueryError>>) -> Result<T, QueryError> {
    match handle.await {
        Ok(res) => res,
        Err(e) if e.is_cancelled() => Err(QueryError::Cancelled),
        Err(e) => Err(QueryError::Engine(EngineError::new(format!("query task panicked: {}", e)))),
    }
}

async fn fetch_count(engine: &dyn QueryEngine, sql: &str) -> Result<i64, QueryError> {
    let rows = engine.query(sql).await?;
    let value = rows
        .first()
        .and_then(Row::first_value)
        .ok_or(QueryError::EmptyCount)?;
    count_from_value(value)
}

/// Aggregate count in any of the numeric shapes the engine may return.
pub fn count_from_value(value: &SqlValue) -> Result<i64, QueryError> {
    match value {
        SqlValue::BigInt(n) => Ok(*n),
        SqlValue::Int(n) => Ok(i64::from(*n)),
        SqlValue::Double(f) if f.fract() == 0.0 && *f >= i64::MIN as f64 && *f < i64::MAX as f64 => Ok(*f as i64),
        SqlValue::Double(f) => Err(QueryError::CountValueType(format!("DOUBLE {} is not a row count", f))),
        SqlValue::Decimal(d) if d.fract().is_zero() => d
            .to_i64()
            .ok_or_else(|| QueryError::CountValueType(format!("DECIMAL {} out of range", d))),
        SqlValue::Decimal(d) => Err(QueryError::CountValueType(format!("DECIMAL {} is not a row count", d))),
        other => Err(QueryError::CountValueType(other.type_name().to_string())),
    }
}

/// `SafeQueryExecutor::execute` with the default guard settings.
pub async fn execute_safe_query(
    engine: Arc<dyn QueryEngine>,
    sql: &str,
    limit: i64,
    offset: i64,
    impose_limits: bool,
) -> Result<QueryResult, QueryError> {
    SafeQueryExecutor::new(engine, GuardConfig::default())
        .execute(sql, limit, offset, impose_limits)
        .await
}
