//! Materialize a query against an external Postgres/MySQL database into a
//! local table.
//!
//! The external database is attached under a throwaway alias, the query's
//! unqualified tables are pointed at that alias, and the result is created
//! with `CREATE TABLE .. AS` inside one transaction on a dedicated session.

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;
use log::{debug, error, info, warn};

use crate::config::GuardConfig;
use crate::models::structs::{FederationOutcome, FederationRequest};
use crate::query_ast::errors::QueryError;
use crate::query_ast::executor::{EngineSession, QueryEngine, quote_ident, quote_literal};
use crate::query_ast::qualifier::get_qualifier;
use crate::query_tools::validate_read_only_single;

static ATTACH_SEQ: AtomicU64 = AtomicU64::new(0);

/// Unique attachment alias: `fed_` and 12 hex digits.
pub fn attachment_alias(target_table: &str) -> String {
    let seq = ATTACH_SEQ.fetch_add(1, Ordering::Relaxed);
    let now = Utc::now();
    let seed = format!(
        "{}:{}:{}:{}",
        target_table,
        now.timestamp(),
        now.timestamp_subsec_nanos(),
        seq
    );
    let digest = format!("{:x}", md5::compute(seed.as_bytes()));
    format!("fed_{}", &digest[..12])
}

/// Quote each dot-separated part of a table name.
fn quote_table_name(name: &str) -> Result<String, QueryError> {
    let parts: Vec<&str> = name.split('.').map(str::trim).collect();
    if parts.iter().any(|p| p.is_empty()) {
        return Err(QueryError::InvalidQuery(format!("invalid target table name: {:?}", name)));
    }
    Ok(parts.into_iter().map(quote_ident).collect::<Vec<_>>().join("."))
}

pub async fn federate_query(
    engine: &dyn QueryEngine,
    request: &FederationRequest,
    config: &GuardConfig,
) -> Result<FederationOutcome, QueryError> {
    let target = request.target_table.trim();
    if target.is_empty() {
        return Err(QueryError::InvalidQuery("target table is required".into()));
    }
    if request.connection_string.trim().is_empty() {
        return Err(QueryError::InvalidQuery("connection string is required".into()));
    }
    let target_sql = quote_table_name(target)?;
    let kind = validate_read_only_single(&request.sql)?;
    if !kind.is_tree_rewritable() {
        return Err(QueryError::InvalidQuery(format!("{:?} statements cannot be federated", kind)));
    }

    let alias = attachment_alias(target);
    let qualified = get_qualifier(&request.dialect).rewrite(&request.sql, &alias)?;
    debug!("federated query for {}: {}", target, qualified);

    let mut session = engine
        .session()
        .await
        .map_err(|e| QueryError::FederationAttach(e.to_string()))?;

    if config.load_extensions {
        session
            .execute(&format!("LOAD {}", request.dialect.extension()))
            .await
            .map_err(|e| QueryError::FederationAttach(e.to_string()))?;
    }
    session
        .execute("BEGIN TRANSACTION")
        .await
        .map_err(|e| QueryError::FederationAttach(e.to_string()))?;

    let created = create_in_transaction(session.as_mut(), request, &alias, &target_sql, &qualified).await;
    let renamed_columns = match created {
        Ok(renamed) => renamed,
        Err(e) => {
            if let Err(rollback) = session.execute("ROLLBACK").await {
                error!("rollback after failed federation into {} failed: {}", target, rollback);
            }
            if let Err(detach) = detach_on(session.as_mut(), &alias).await {
                warn!("could not detach {} after failed federation: {}", alias, detach);
            }
            return Err(e);
        }
    };
    info!("created {} from {} attachment {}", target, request.dialect, alias);

    let detach_warning = match detach_on(session.as_mut(), &alias).await {
        Ok(()) => None,
        Err(e) => {
            // table exists already; a dangling attachment is not fatal
            warn!("{}", e);
            Some(e.to_string())
        }
    };

    Ok(FederationOutcome {
        table: target.to_string(),
        alias,
        renamed_columns,
        detach_warning,
        completed_at: Utc::now(),
    })
}

/// ATTACH, CREATE, renames and COMMIT. Returns the number of renamed columns.
async fn create_in_transaction(
    session: &mut dyn EngineSession,
    request: &FederationRequest,
    alias: &str,
    target_sql: &str,
    qualified: &str,
) -> Result<usize, QueryError> {
    let attach = format!(
        "ATTACH {} AS {} (TYPE {}, READ_ONLY)",
        quote_literal(&request.connection_string),
        alias,
        request.dialect.attach_type()
    );
    session
        .execute(&attach)
        .await
        .map_err(|e| QueryError::FederationAttach(e.to_string()))?;
    info!("attached {} database as {}", request.dialect, alias);

    let create_err = |reason: String| QueryError::FederationCreate { table: request.target_table.clone(), reason };
    session
        .execute(&format!("CREATE TABLE {} AS {}", target_sql, qualified))
        .await
        .map_err(|e| create_err(e.to_string()))?;

    for (from, to) in &request.column_renames {
        session
            .execute(&format!(
                "ALTER TABLE {} RENAME COLUMN {} TO {}",
                target_sql,
                quote_ident(from),
                quote_ident(to)
            ))
            .await
            .map_err(|e| create_err(format!("renaming column {} to {}: {}", from, to, e)))?;
    }

    session
        .execute("COMMIT")
        .await
        .map_err(|e| create_err(format!("commit failed: {}", e)))?;
    Ok(request.column_renames.len())
}

async fn detach_on(session: &mut dyn EngineSession, alias: &str) -> Result<(), QueryError> {
    session
        .execute(&format!("DETACH DATABASE IF EXISTS {}", alias))
        .await
        .map_err(|e| QueryError::FederationDetach { alias: alias.to_string(), reason: e.to_string() })
}

/// Detach a leftover attachment on a fresh session.
pub async fn detach_attachment(engine: &dyn QueryEngine, alias: &str) -> Result<(), QueryError> {
    let mut session = engine
        .session()
        .await
        .map_err(|e| QueryError::FederationDetach { alias: alias.to_string(), reason: e.to_string() })?;
    detach_on(session.as_mut(), alias).await
}
