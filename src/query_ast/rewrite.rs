use log::debug;
use serde_json::Value;

use super::ast::Ast;
use super::errors::RewriteError;
use super::node::{self, LIMIT_MODIFIER, LIMIT_PERCENT_MODIFIER};

impl Ast {
    /// Bound the root node to `limit` rows starting at `offset`.
    ///
    /// Tighten-only: an existing constant LIMIT is only ever lowered, and an
    /// existing OFFSET is never touched. A percentage LIMIT has no row count to
    /// compare against and is refused.
    pub fn rewrite_limit(&mut self, limit: i64, offset: i64) -> Result<(), RewriteError> {
        if limit <= 0 {
            return Err(RewriteError::Generic(format!("limit must be positive, got {}", limit)));
        }
        let root = self.root_object_mut()?;
        let modifiers = root
            .entry("modifiers")
            .or_insert_with(|| Value::Array(Vec::new()));
        if modifiers.is_null() {
            *modifiers = Value::Array(Vec::new());
        }
        let modifiers = modifiers
            .as_array_mut()
            .ok_or_else(|| RewriteError::Malformed("modifiers is not a list".into()))?;

        if modifiers.iter().any(|m| node::node_type(m) == Some(LIMIT_PERCENT_MODIFIER)) {
            return Err(RewriteError::UnsupportedLimit("LIMIT ... %".into()));
        }

        let existing = modifiers.iter_mut().find(|m| node::node_type(m) == Some(LIMIT_MODIFIER));
        let Some(modifier) = existing else {
            let offset = (offset > 0).then_some(offset);
            debug!("adding LIMIT {} OFFSET {:?}", limit, offset);
            modifiers.push(node::limit_modifier(limit, offset));
            return Ok(());
        };
        let modifier = modifier
            .as_object_mut()
            .ok_or_else(|| RewriteError::Malformed("limit modifier is not an object".into()))?;

        let current = modifier.get("limit");
        let replace = if node::is_unset(current) {
            true
        } else {
            match current.and_then(node::constant_int_value) {
                Some(existing) => existing <= 0 || i128::from(limit) < existing,
                // not a plain constant, cannot compare
                None => true,
            }
        };
        if replace {
            debug!("tightening LIMIT to {}", limit);
            modifier.insert("limit".into(), node::constant_integer(limit));
        }
        if offset > 0 && node::is_unset(modifier.get("offset")) {
            modifier.insert("offset".into(), node::constant_integer(offset));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::super::ast::fixtures::*;
    use super::*;
    use crate::query_ast::errors::QueryError;

    fn parsed(modifiers: Vec<Value>) -> Ast {
        Ast::from_json(&document(vec![select_node("tbl", None, modifiers)])).unwrap()
    }

    fn limit_of(ast: &Ast) -> (Option<i128>, Option<i128>) {
        let modifiers = ast.root().unwrap()["modifiers"].as_array().unwrap();
        let m = modifiers.iter().find(|m| node::node_type(m) == Some(LIMIT_MODIFIER)).unwrap();
        (node::constant_int_value(&m["limit"]), node::constant_int_value(&m["offset"]))
    }

    #[test]
    fn test_adds_limit_without_offset() {
        let mut ast = parsed(vec![]);
        ast.rewrite_limit(100, 0).unwrap();
        assert_eq!(limit_of(&ast), (Some(100), None));
        assert!(ast.root().unwrap()["modifiers"][0]["offset"].is_null());
    }

    #[test]
    fn test_adds_offset_when_positive() {
        let mut ast = parsed(vec![order_by("name")]);
        ast.rewrite_limit(20, 40).unwrap();
        assert_eq!(limit_of(&ast), (Some(20), Some(40)));
        // ORDER BY stays ahead of the appended limit
        assert_eq!(node::node_type(&ast.root().unwrap()["modifiers"][0]), Some("ORDER_MODIFIER"));
    }

    #[test]
    fn test_tightens_larger_limit() {
        let mut ast = parsed(vec![limit(Some(1000), None)]);
        ast.rewrite_limit(200, 0).unwrap();
        assert_eq!(limit_of(&ast), (Some(200), None));
    }

    #[test]
    fn test_keeps_smaller_limit_adds_offset() {
        let mut ast = parsed(vec![limit(Some(75), None)]);
        ast.rewrite_limit(100, 10).unwrap();
        assert_eq!(limit_of(&ast), (Some(75), Some(10)));
    }

    #[test]
    fn test_existing_offset_untouched() {
        let mut ast = parsed(vec![limit(Some(50), Some(5))]);
        ast.rewrite_limit(10, 99).unwrap();
        assert_eq!(limit_of(&ast), (Some(10), Some(5)));
    }

    #[test]
    fn test_offset_only_modifier_gets_limit() {
        let mut ast = parsed(vec![limit(None, Some(30))]);
        ast.rewrite_limit(25, 0).unwrap();
        assert_eq!(limit_of(&ast), (Some(25), Some(30)));
    }

    #[test]
    fn test_repeated_rewrites_take_minimum() {
        let mut ast = parsed(vec![]);
        ast.rewrite_limit(500, 0).unwrap();
        ast.rewrite_limit(800, 0).unwrap();
        assert_eq!(limit_of(&ast).0, Some(500));
        ast.rewrite_limit(300, 0).unwrap();
        assert_eq!(limit_of(&ast).0, Some(300));
    }

    #[test]
    fn test_non_constant_limit_replaced() {
        let mut m = limit(None, None);
        m["limit"] = column("n");
        let mut ast = parsed(vec![m]);
        ast.rewrite_limit(10, 0).unwrap();
        assert_eq!(limit_of(&ast).0, Some(10));
    }

    #[test]
    fn test_rejects_non_positive_limit() {
        let mut ast = parsed(vec![]);
        assert!(matches!(ast.rewrite_limit(0, 0), Err(RewriteError::Generic(_))));
        assert!(ast.rewrite_limit(-5, 0).is_err());
    }

    #[test]
    fn test_set_operation_root_is_bounded() {
        let union = union_node(select_node("a", None, vec![]), select_node("b", None, vec![]), vec![]);
        let mut ast = Ast::from_json(&document(vec![union])).unwrap();
        ast.rewrite_limit(5, 0).unwrap();
        assert_eq!(limit_of(&ast).0, Some(5));
        assert!(ast.root().unwrap()["left"].get("modifiers").unwrap().as_array().unwrap().is_empty());
    }

    #[test]
    fn test_percent_limit_is_refused() {
        let percent = serde_json::json!({ "type": LIMIT_PERCENT_MODIFIER, "limit": node::constant_integer(50), "offset": null });
        let mut ast = parsed(vec![percent]);
        let err = ast.rewrite_limit(3, 0).unwrap_err();
        assert!(matches!(err, RewriteError::UnsupportedLimit(_)));
        assert_eq!(QueryError::from(err).status_code(), 400);
        // nothing was appended
        assert_eq!(ast.root().unwrap()["modifiers"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn test_text_limit_is_not_compared() {
        let mut m = limit(None, None);
        m["limit"] = serde_json::json!({
            "class": "CONSTANT", "type": "VALUE_CONSTANT", "alias": "",
            "value": { "type": { "id": "VARCHAR", "type_info": null }, "is_null": false, "value": "5" }
        });
        let mut ast = parsed(vec![m]);
        ast.rewrite_limit(10, 0).unwrap();
        assert_eq!(limit_of(&ast).0, Some(10));
    }

    #[test]
    fn test_big_limit_is_bigint() {
        let mut ast = parsed(vec![]);
        ast.rewrite_limit(3_000_000_000, 0).unwrap();
        let m = &ast.root().unwrap()["modifiers"][0];
        assert_eq!(m.pointer("/limit/value/type/id").and_then(Value::as_str), Some("BIGINT"));
    }
}
