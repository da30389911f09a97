pub mod config;

pub mod directory;

pub mod federation;

pub mod models;

pub mod query_ast;

pub mod query_tools;

pub use config::GuardConfig;
pub use federation::{attachment_alias, detach_attachment, federate_query};
pub use models::enums::{Dialect, QueryPhase, StatementKind};
pub use models::structs::{FederationOutcome, FederationRequest, QueryResult, Row, SqlStatement, SqlValue};
pub use query_ast::errors::{EngineError, PositionError, QueryError, RewriteError};
pub use query_ast::executor::{EngineSession, QueryContext, QueryEngine, SafeQueryExecutor, execute_safe_query};

#[cfg(feature = "duckdb")]
pub use query_ast::executors::DuckDbEngine;

/// Install the `env_logger` backend. Safe to call more than once.
pub fn init_logging() {
    dotenv::dotenv().ok();
    let _ = env_logger::Builder::from_default_env()
        // debug for our crate so emitted SQL is visible
        .filter_module("sqlgate", log::LevelFilter::Debug)
        .is_test(false)
        .try_init();
    log::info!("sqlgate data directory: {}", directory::app_data_dir().display());
}
