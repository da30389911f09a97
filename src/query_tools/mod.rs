//! Pre-flight checks applied to raw SQL text before it reaches the engine.

pub mod classifier;

pub use classifier::{has_multiple_statements, is_read_only_query, lexes_as_multiple_statements, parse};

use crate::models::enums::StatementKind;
use crate::query_ast::errors::QueryError;

/// Reject anything that is not a single allow-listed statement.
///
/// Runs without touching the engine; the first failing check wins.
pub fn validate_read_only_single(sql: &str) -> Result<StatementKind, QueryError> {
    if sql.trim().trim_end_matches(';').trim().is_empty() {
        return Err(QueryError::InvalidQuery("empty query".into()));
    }
    if has_multiple_statements(sql)? {
        return Err(QueryError::MultipleStatements);
    }
    if !is_read_only_query(sql) {
        return Err(QueryError::NotReadOnly);
    }
    Ok(StatementKind::detect(sql))
}
