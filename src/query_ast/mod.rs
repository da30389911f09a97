//! Engine-native query tree and the rewrites applied to it.
//!
//! Grammar parsing is delegated to the engine (`json_serialize_sql`); the
//! tree is mutated as a JSON document and formatted back by the engine.
//! Federation qualification uses `sqlparser` in the source dialect instead.

pub mod ast;
pub mod count;
pub mod errors;
pub mod executor;
pub mod executors;
pub mod node;
pub mod qualifier;
pub mod rewrite;

pub use ast::{Ast, RootKind};
pub use count::wrap_count_query;
pub use errors::*;
pub use executor::{
    EngineSession, QueryContext, QueryEngine, SafeQueryExecutor, execute_safe_query, quote_ident, quote_literal,
};
pub use qualifier::{TableQualifier, get_qualifier};

/// Count query and bounded data query for one statement, from a single parse.
pub async fn compile_guarded_select(
    engine: &dyn QueryEngine,
    sql: &str,
    limit: i64,
    offset: i64,
) -> Result<(String, String), QueryError> {
    let ast = Ast::parse(engine, sql).await?;
    let count_sql = ast.to_count_query(engine).await?;
    let mut bounded = ast;
    bounded.rewrite_limit(limit, offset)?;
    let data_sql = bounded.format(engine).await?;
    Ok((count_sql, data_sql))
}
