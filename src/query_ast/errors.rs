use std::fmt;
use std::time::Duration;

use crate::models::enums::QueryPhase;

/// Engine rejection carrying an optional character offset into the original query text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PositionError {
    pub message: String,
    pub position: Option<usize>,
}

impl PositionError {
    pub fn new(message: impl Into<String>, position: Option<usize>) -> Self {
        Self { message: message.into(), position }
    }
}

impl fmt::Display for PositionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.position {
            Some(pos) => write!(f, "{} (at position {})", self.message, pos),
            None => write!(f, "{}", self.message),
        }
    }
}

impl std::error::Error for PositionError {}

/// Failure reported by a `QueryEngine` implementation.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct EngineError {
    pub message: String,
}

impl EngineError {
    pub fn new(message: impl Into<String>) -> Self {
        Self { message: message.into() }
    }

    /// True when the engine complained about a missing relation.
    pub fn is_missing_table(&self) -> bool {
        let lower = self.message.to_ascii_lowercase();
        lower.contains("does not exist") && (lower.contains("table with name") || lower.contains("relation"))
    }
}

#[cfg(feature = "duckdb")]
impl From<duckdb::Error> for EngineError {
    fn from(e: duckdb::Error) -> Self { EngineError::new(e.to_string()) }
}

#[derive(thiserror::Error, Debug)]
pub enum QueryError {
    #[error("invalid query: {0}")] InvalidQuery(String),
    #[error("multiple statements are not allowed")] MultipleStatements,
    #[error("only SELECT, WITH, DESCRIBE and SUMMARIZE statements are allowed")] NotReadOnly,
    #[error("engine rejected query: {0}")] EngineParse(#[from] PositionError),
    #[error("unexpected count value type: {0}")] CountValueType(String),
    #[error("count query returned no rows")] EmptyCount,
    #[error("table not found: {0}")] TableNotFound(String),
    #[error("{phase} query failed: {source}")]
    Phase { phase: QueryPhase, #[source] source: Box<QueryError> },
    #[error("engine error: {0}")] Engine(EngineError),
    #[error("failed to attach external database: {0}")] FederationAttach(String),
    #[error("failed to create table {table}: {reason}")] FederationCreate { table: String, reason: String },
    #[error("failed to detach {alias}: {reason}")] FederationDetach { alias: String, reason: String },
    #[error("query cancelled")] Cancelled,
    #[error("query timed out after {0:?}")] Timeout(Duration),
}

impl From<EngineError> for QueryError {
    fn from(e: EngineError) -> Self {
        if e.is_missing_table() { QueryError::TableNotFound(e.message) } else { QueryError::Engine(e) }
    }
}

impl QueryError {
    pub fn in_phase(self, phase: QueryPhase) -> Self {
        match self {
            // already tagged, or not a failure of the phase itself
            e @ (QueryError::Phase { .. } | QueryError::Cancelled | QueryError::Timeout(_)) => e,
            e => QueryError::Phase { phase, source: Box::new(e) },
        }
    }

    /// HTTP status the calling layer should answer with.
    pub fn status_code(&self) -> u16 {
        match self {
            QueryError::InvalidQuery(_)
            | QueryError::MultipleStatements
            | QueryError::EngineParse(_) => 400,
            QueryError::NotReadOnly => 403,
            QueryError::TableNotFound(_) => 404,
            QueryError::Cancelled => 499,
            QueryError::Timeout(_) => 504,
            QueryError::Phase { source, .. } => source.status_code(),
            QueryError::CountValueType(_)
            | QueryError::EmptyCount
            | QueryError::Engine(_)
            | QueryError::FederationAttach(_)
            | QueryError::FederationCreate { .. }
            | QueryError::FederationDetach { .. } => 500,
        }
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum RewriteError {
    #[error("rewrite error: {0}")] Generic(String),
    #[error("no root node; parse a statement first")] MissingRoot,
    #[error("malformed tree: {0}")] Malformed(String),
    #[error("cannot bound a {0} query; use an absolute LIMIT")] UnsupportedLimit(String),
}

impl From<RewriteError> for QueryError { fn from(e: RewriteError) -> Self { QueryError::InvalidQuery(e.to_string()) } }

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_position_error_display() {
        let e = PositionError::new("syntax error at or near \"FORM\"", Some(9));
        assert_eq!(e.to_string(), "syntax error at or near \"FORM\" (at position 9)");
        assert_eq!(PositionError::new("boom", None).to_string(), "boom");
    }

    #[test]
    fn test_missing_table_maps_to_not_found() {
        let err: QueryError = EngineError::new("Catalog Error: Table with name nope does not exist!").into();
        assert!(matches!(err, QueryError::TableNotFound(_)));
        assert_eq!(err.status_code(), 404);
    }

    #[test]
    fn test_phase_delegates_status() {
        let err = QueryError::NotReadOnly.in_phase(QueryPhase::Data);
        assert_eq!(err.status_code(), 403);
        assert!(err.to_string().starts_with("data query failed"));
        // tagging twice keeps the first phase
        let again = err.in_phase(QueryPhase::Count);
        assert!(matches!(again, QueryError::Phase { phase: QueryPhase::Data, .. }));
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(QueryError::MultipleStatements.status_code(), 400);
        assert_eq!(QueryError::EngineParse(PositionError::new("x", None)).status_code(), 400);
        assert_eq!(QueryError::Engine(EngineError::new("io")).status_code(), 500);
        assert_eq!(QueryError::Timeout(Duration::from_secs(1)).status_code(), 504);
        assert_eq!(QueryError::from(RewriteError::MissingRoot).status_code(), 400);
    }
}
