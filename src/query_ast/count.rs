use log::debug;
use serde_json::Value;

use super::ast::{Ast, format_document};
use super::errors::{QueryError, RewriteError};
use super::executor::QueryEngine;
use super::node::{self, ORDER_MODIFIER};

/// Textual wrapper applied to the cleaned statement.
pub fn wrap_count_query(sql: &str) -> String {
    format!("SELECT count(*) FROM ({})", sql)
}

impl Ast {
    /// Copy of the document with ORDER BY dropped from the root.
    /// LIMIT/OFFSET stay, so the count matches the same bound as the page.
    pub fn count_document(&self) -> Result<Value, RewriteError> {
        let pointer = self.root_pointer()?;
        let mut document = self.document().clone();
        let root = document
            .pointer_mut(pointer)
            .and_then(Value::as_object_mut)
            .ok_or(RewriteError::MissingRoot)?;

        let kept: Vec<Value> = match root.get("modifiers") {
            Some(Value::Array(modifiers)) => modifiers
                .iter()
                .filter(|m| node::node_type(m) != Some(ORDER_MODIFIER))
                .cloned()
                .collect(),
            Some(Value::Null) | None => Vec::new(),
            Some(_) => return Err(RewriteError::Malformed("modifiers is not a list".into())),
        };
        if kept.is_empty() {
            root.remove("modifiers");
        } else {
            root.insert("modifiers".into(), Value::Array(kept));
        }
        Ok(document)
    }

    pub async fn to_count_query(&self, engine: &dyn QueryEngine) -> Result<String, QueryError> {
        let document = self.count_document()?;
        let sql = wrap_count_query(&format_document(engine, &document).await?);
        debug!("count query: {}", sql);
        Ok(sql)
    }
}
