//! Rewrites unqualified base-table references to point at a federation alias.
//!
//! One capability, one implementation per source dialect. Both walk the
//! `sqlparser` tree with a `VisitorMut`; they differ in how CTE names are
//! scoped and compared.

pub mod mysql;
pub mod postgres;

use sqlparser::ast::Statement;
use sqlparser::dialect::Dialect as ParserDialect;
use sqlparser::parser::Parser;

use crate::models::enums::Dialect;
use crate::query_ast::errors::QueryError;

pub use mysql::MySqlQualifier;
pub use postgres::PostgresQualifier;

pub trait TableQualifier: Send + Sync {
    fn dialect(&self) -> Dialect;

    fn parser_dialect(&self) -> Box<dyn ParserDialect>;

    /// Prefix every unqualified base-table reference in `statement` with
    /// `alias`. Returns how many references were rewritten.
    fn qualify(&self, statement: &mut Statement, alias: &str) -> Result<usize, QueryError>;

    /// Exactly one read-only query statement in this dialect.
    fn parse(&self, sql: &str) -> Result<Statement, QueryError> {
        let dialect = self.parser_dialect();
        let mut statements = Parser::parse_sql(dialect.as_ref(), sql)
            .map_err(|e| QueryError::InvalidQuery(format!("{} parser: {}", self.dialect(), e)))?;
        if statements.len() > 1 {
            return Err(QueryError::MultipleStatements);
        }
        let statement = statements
            .pop()
            .ok_or_else(|| QueryError::InvalidQuery("no statement to execute".into()))?;
        match statement {
            Statement::Query(_) => Ok(statement),
            _ => Err(QueryError::NotReadOnly),
        }
    }

    /// Parse, qualify and print `sql` back.
    fn rewrite(&self, sql: &str, alias: &str) -> Result<String, QueryError> {
        validate_alias(alias)?;
        let mut statement = self.parse(sql)?;
        let count = self.qualify(&mut statement, alias)?;
        log::debug!("{} qualifier rewrote {} table reference(s) to {}", self.dialect(), count, alias);
        Ok(statement.to_string())
    }
}

pub fn get_qualifier(dialect: &Dialect) -> Box<dyn TableQualifier> {
    match dialect {
        Dialect::Postgres => Box::new(PostgresQualifier),
        Dialect::MySql => Box::new(MySqlQualifier),
    }
}

/// Aliases are spliced in unquoted, so only plain identifiers are allowed.
pub(crate) fn validate_alias(alias: &str) -> Result<(), QueryError> {
    let mut chars = alias.chars();
    let valid = matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_');
    if valid {
        Ok(())
    } else {
        Err(QueryError::InvalidQuery(format!("invalid attachment alias: {:?}", alias)))
    }
}
