use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// External database flavour that can be federated into the engine.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Debug)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    Postgres,
    MySql,
}

impl Dialect {
    /// `TYPE` value for the engine's ATTACH statement.
    pub fn attach_type(&self) -> &'static str {
        match self {
            Dialect::Postgres => "POSTGRES",
            Dialect::MySql => "MYSQL",
        }
    }

    /// Engine extension that provides the scanner for this dialect.
    pub fn extension(&self) -> &'static str {
        match self {
            Dialect::Postgres => "postgres",
            Dialect::MySql => "mysql",
        }
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

impl FromStr for Dialect {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "postgres" | "postgresql" | "pg" => Ok(Dialect::Postgres),
            "mysql" | "mariadb" => Ok(Dialect::MySql),
            other => Err(format!("unsupported dialect: {}", other)),
        }
    }
}

/// Leading statement kind as seen by the classifier.
#[derive(Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Debug)]
pub enum StatementKind {
    Select,
    With,
    Describe,
    Summarize,
    Other,
}

impl StatementKind {
    /// Kind of the first keyword of `sql`, matched at a token boundary.
    pub fn detect(sql: &str) -> Self {
        let trimmed = sql.trim_start();
        let word: String = trimmed
            .chars()
            .take_while(|c| c.is_ascii_alphabetic())
            .collect::<String>()
            .to_ascii_uppercase();
        match word.as_str() {
            "SELECT" => StatementKind::Select,
            "WITH" => StatementKind::With,
            "DESCRIBE" => StatementKind::Describe,
            "SUMMARIZE" => StatementKind::Summarize,
            _ => StatementKind::Other,
        }
    }

    /// Statements the engine can serialize to a tree.
    pub fn is_tree_rewritable(&self) -> bool {
        matches!(self, StatementKind::Select | StatementKind::With)
    }
}

/// Which half of the fork-join execution produced a result or failure.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum QueryPhase {
    Count,
    Data,
}

impl fmt::Display for QueryPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueryPhase::Count => f.write_str("count"),
            QueryPhase::Data => f.write_str("data"),
        }
    }
}
