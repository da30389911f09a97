use std::collections::HashSet;
use std::ops::ControlFlow;

use sqlparser::ast::{Ident, Query, Statement, TableFactor, Visit, VisitMut, Visitor, VisitorMut};
use sqlparser::dialect::{Dialect as ParserDialect, MySqlDialect};

use super::TableQualifier;
use crate::models::enums::Dialect;
use crate::query_ast::errors::QueryError;

pub struct MySqlQualifier;

impl TableQualifier for MySqlQualifier {
    fn dialect(&self) -> Dialect { Dialect::MySql }

    fn parser_dialect(&self) -> Box<dyn ParserDialect> { Box::new(MySqlDialect {}) }

    fn qualify(&self, statement: &mut Statement, alias: &str) -> Result<usize, QueryError> {
        let mut collector = CteCollector::default();
        let _ = Visit::visit(&*statement, &mut collector);

        let mut rewriter = Rewriter { alias, ctes: collector.names, qualified: 0 };
        let _ = VisitMut::visit(statement, &mut rewriter);
        Ok(rewriter.qualified)
    }
}

/// Every CTE name defined anywhere in the statement, lower-cased.
#[derive(Default)]
struct CteCollector {
    names: HashSet<String>,
}

impl Visitor for CteCollector {
    type Break = ();

    fn pre_visit_query(&mut self, query: &Query) -> ControlFlow<Self::Break> {
        if let Some(with) = &query.with {
            self.names.extend(with.cte_tables.iter().map(|cte| cte.alias.name.value.to_lowercase()));
        }
        ControlFlow::Continue(())
    }
}

struct Rewriter<'a> {
    alias: &'a str,
    ctes: HashSet<String>,
    qualified: usize,
}

impl VisitorMut for Rewriter<'_> {
    type Break = ();

    fn pre_visit_table_factor(&mut self, table_factor: &mut TableFactor) -> ControlFlow<Self::Break> {
        if let TableFactor::Table { name, args: None, .. } = table_factor
            && name.0.len() == 1
            && !self.ctes.contains(&name.0[0].value.to_lowercase())
        {
            name.0.insert(0, Ident::new(self.alias));
            self.qualified += 1;
        }
        ControlFlow::Continue(())
    }
}
