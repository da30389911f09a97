#[cfg(feature = "duckdb")]
pub mod duckdb_engine;

#[cfg(feature = "duckdb")]
pub use duckdb_engine::{DuckDbEngine, DuckDbSession};
