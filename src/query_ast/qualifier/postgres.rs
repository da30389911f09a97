use std::ops::ControlFlow;

use sqlparser::ast::{Ident, Query, Statement, TableFactor, VisitMut, VisitorMut};
use sqlparser::dialect::{Dialect as ParserDialect, PostgreSqlDialect};

use super::TableQualifier;
use crate::models::enums::Dialect;
use crate::query_ast::errors::QueryError;

/// Postgres folds unquoted identifiers to lower case; quoted ones are exact.
fn fold(ident: &Ident) -> String {
    match ident.quote_style {
        None => ident.value.to_lowercase(),
        Some(_) => ident.value.clone(),
    }
}

pub struct PostgresQualifier;

impl TableQualifier for PostgresQualifier {
    fn dialect(&self) -> Dialect { Dialect::Postgres }

    fn parser_dialect(&self) -> Box<dyn ParserDialect> { Box::new(PostgreSqlDialect {}) }

    fn qualify(&self, statement: &mut Statement, alias: &str) -> Result<usize, QueryError> {
        let mut walker = ScopedQualifier { alias, scopes: Vec::new(), qualified: 0 };
        let _ = VisitMut::visit(statement, &mut walker);
        Ok(walker.qualified)
    }
}

/// Tracks the CTE names visible at each query level.
struct ScopedQualifier<'a> {
    alias: &'a str,
    scopes: Vec<Vec<String>>,
    qualified: usize,
}

impl ScopedQualifier<'_> {
    fn is_cte(&self, name: &str) -> bool {
        self.scopes.iter().rev().any(|scope| scope.iter().any(|n| n == name))
    }
}

impl VisitorMut for ScopedQualifier<'_> {
    type Break = ();

    fn pre_visit_query(&mut self, query: &mut Query) -> ControlFlow<Self::Break> {
        // all names of one WITH list are visible to each other's bodies
        let names = query
            .with
            .as_ref()
            .map(|with| with.cte_tables.iter().map(|cte| fold(&cte.alias.name)).collect())
            .unwrap_or_default();
        self.scopes.push(names);
        ControlFlow::Continue(())
    }

    fn post_visit_query(&mut self, _query: &mut Query) -> ControlFlow<Self::Break> {
        self.scopes.pop();
        ControlFlow::Continue(())
    }

    fn pre_visit_table_factor(&mut self, table_factor: &mut TableFactor) -> ControlFlow<Self::Break> {
        if let TableFactor::Table { name, args: None, .. } = table_factor
            && name.0.len() == 1
            && !self.is_cte(&fold(&name.0[0]))
        {
            name.0.insert(0, Ident::new(self.alias));
            self.qualified += 1;
        }
        ControlFlow::Continue(())
    }
}
