//! Textual statement classification.
//!
//! Cheap checks that run before any engine call: read-only allow-list,
//! single-statement enforcement, and a SELECT-shaped breakdown used as a
//! fallback when no tree rewriting is needed. Anything beyond this small
//! grammar is the engine's job.

use once_cell::sync::Lazy;
use regex::{Match, Regex};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::tokenizer::{Token, Tokenizer, TokenizerError};

use crate::models::enums::StatementKind;
use crate::models::structs::SqlStatement;
use crate::query_ast::errors::QueryError;

/// Statement prefixes allowed to execute. SHOW, EXPLAIN and PRAGMA are left out on
/// purpose: they expose engine settings and catalog internals.
const READ_ONLY_PREFIXES: &[(&str, bool)] = &[
    // (keyword, may be followed directly by '(')
    ("SELECT", true),
    ("WITH", false),
    ("DESCRIBE", false),
    ("SUMMARIZE", true),
];

static SELECT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\bSELECT\b(?:\s+(?:DISTINCT|ALL)\b)?").expect("select regex"));
static FROM_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\bFROM\b").expect("from regex"));
static CLAUSE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(WHERE|GROUP\s+BY|HAVING|QUALIFY|WINDOW|ORDER\s+BY|LIMIT|OFFSET|USING\s+SAMPLE|UNION|INTERSECT|EXCEPT)\b",
    )
    .expect("clause regex")
});
static TABLE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"^\s*((?:"(?:[^"]|"")*"|'(?:[^']|'')*'|[A-Za-z0-9_$]+)(?:\.(?:"(?:[^"]|"")*"|[A-Za-z0-9_$]+))*)"#)
        .expect("table regex")
});
static NUMBER_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\s*(\d+)\b").expect("number regex"));
static PERCENT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^\s*(\d+(?:\.\d+)?)\s*(?:%|PERCENT\b)").expect("percent regex"));

/// True when `text` starts with an allow-listed keyword at a token boundary.
pub fn is_read_only_query(text: &str) -> bool {
    let trimmed = text.trim();
    READ_ONLY_PREFIXES.iter().any(|(keyword, paren_ok)| {
        let Some(head) = trimmed.get(..keyword.len()) else { return false };
        if !head.eq_ignore_ascii_case(keyword) {
            return false;
        }
        match trimmed[keyword.len()..].chars().next() {
            None => true,
            Some(' ' | '\t' | '\n' | '\r') => true,
            Some('(') => *paren_ok,
            Some(_) => false,
        }
    })
}

/// True when a `;` outside comments, string literals and quoted identifiers is
/// followed by more statement text. A lone trailing `;` is fine.
///
/// The byte mask and a full SQL lexer both have to agree that there is only one
/// statement.
pub fn has_multiple_statements(text: &str) -> Result<bool, QueryError> {
    let masked = mask_sql(text)?;
    for (idx, _) in masked.match_indices(';') {
        let rest = &masked[idx + 1..];
        if rest.chars().any(|c| !c.is_whitespace() && c != ';') {
            return Ok(true);
        }
    }
    lexes_as_multiple_statements(text).map_err(|e| QueryError::InvalidQuery(e.to_string()))
}

/// Statement separation as the Postgres-family lexer sees it, including
/// dollar-quoted and `E'..'` escape strings.
pub fn lexes_as_multiple_statements(text: &str) -> Result<bool, TokenizerError> {
    let tokens = Tokenizer::new(&PostgreSqlDialect {}, text).tokenize()?;
    let mut separated = false;
    for token in tokens {
        match token {
            Token::SemiColon => separated = true,
            Token::Whitespace(_) | Token::EOF => {}
            _ if separated => return Ok(true),
            _ => {}
        }
    }
    Ok(false)
}

/// Break a SELECT-shaped statement into its clauses.
pub fn parse(text: &str) -> Result<SqlStatement, QueryError> {
    let raw = text.trim().trim_end_matches(';').trim_end();
    let masked = mask_sql(raw)?;
    let depths = paren_depths(&masked);

    let select = first_top_level(&SELECT_RE, &masked, &depths, 0)
        .ok_or_else(|| QueryError::InvalidQuery("no SELECT clause found".into()))?;
    let list_start = select.end();

    let from = first_top_level(&FROM_RE, &masked, &depths, list_start);
    let clause_from = from.map(|m| m.end()).unwrap_or(list_start);
    let clauses: Vec<Match<'_>> = CLAUSE_RE
        .find_iter(&masked)
        .filter(|m| m.start() >= clause_from && depths[m.start()] == 0)
        .collect();

    let list_end = from
        .map(|m| m.start())
        .or_else(|| clauses.first().map(|m| m.start()))
        .unwrap_or(raw.len());
    let columns = split_top_level(&raw[list_start..list_end], &masked[list_start..list_end], &depths[list_start..list_end]);

    let table = from.and_then(|m| {
        let source_end = clauses.first().map(|c| c.start()).unwrap_or(raw.len());
        TABLE_RE
            .captures(&raw[m.end()..source_end])
            .and_then(|c| c.get(1))
            .map(|t| t.as_str().to_string())
    });

    let mut stmt = SqlStatement {
        kind: StatementKind::detect(raw),
        columns,
        table,
        where_clause: None,
        group_by: None,
        order_by: None,
        limit: None,
        offset: None,
        sample: None,
        raw: text.to_string(),
    };

    for (i, clause) in clauses.iter().enumerate() {
        let end = clauses.get(i + 1).map(|c| c.start()).unwrap_or(raw.len());
        let body = raw[clause.end()..end].trim();
        let keyword = clause.as_str().split_whitespace().next().unwrap_or_default().to_ascii_uppercase();
        match keyword.as_str() {
            "WHERE" => stmt.where_clause = Some(body.to_string()),
            "GROUP" => stmt.group_by = Some(body.to_string()),
            "ORDER" => stmt.order_by = Some(body.to_string()),
            "LIMIT" => stmt.limit = leading_number(body),
            "OFFSET" => stmt.offset = leading_number(body),
            "USING" => stmt.sample = sample_fraction(body),
            // the rest of a set operation belongs to the other branch
            "UNION" | "INTERSECT" | "EXCEPT" => break,
            _ => {}
        }
    }
    Ok(stmt)
}

/// Copy of `sql` with comment bodies blanked and quoted contents replaced by `_`.
/// Byte offsets line up with the input, so matches on the mask index the original.
///
/// Recognizes `'..'`, `E'..'` (backslash escapes), `".."` and `$tag$..$tag$`.
/// A `$` that is neither a dollar quote nor a parameter is rejected.
pub(crate) fn mask_sql(sql: &str) -> Result<String, QueryError> {
    let bytes = sql.as_bytes();
    let len = bytes.len();
    let mut out = Vec::with_capacity(len);
    let mut i = 0;
    while i < len {
        let b = bytes[i];
        let next = bytes.get(i + 1).copied();
        let after_ident = i > 0 && is_ident_byte(bytes[i - 1]);
        match b {
            b'-' if next == Some(b'-') => {
                while i < len && bytes[i] != b'\n' {
                    out.push(b' ');
                    i += 1;
                }
            }
            b'/' if next == Some(b'*') => {
                let close = sql[i + 2..]
                    .find("*/")
                    .ok_or_else(|| QueryError::InvalidQuery("unterminated block comment".into()))?;
                let end = i + 2 + close + 2;
                out.extend(std::iter::repeat_n(b' ', end - i));
                i = end;
            }
            b'E' | b'e' if next == Some(b'\'') && !after_ident => {
                out.extend_from_slice(&bytes[i..i + 2]);
                i = mask_quoted(bytes, i + 2, b'\'', true, &mut out)?;
            }
            b'\'' | b'"' => {
                out.push(b);
                i = mask_quoted(bytes, i + 1, b, false, &mut out)?;
            }
            b'$' if !after_ident => match dollar_tag(&bytes[i..]) {
                Some(tag_len) => {
                    let tag = &sql[i..i + tag_len];
                    let body = i + tag_len;
                    let close = sql[body..]
                        .find(tag)
                        .ok_or_else(|| QueryError::InvalidQuery("unterminated dollar-quoted string".into()))?;
                    out.extend_from_slice(tag.as_bytes());
                    out.extend(std::iter::repeat_n(b'_', close));
                    out.extend_from_slice(tag.as_bytes());
                    i = body + close + tag_len;
                }
                // $1 or $name parameter
                None if next.is_some_and(|n| n.is_ascii_alphanumeric() || n == b'_') => {
                    out.push(b);
                    i += 1;
                }
                None => return Err(QueryError::InvalidQuery(format!("unexpected '$' at position {}", i))),
            },
            _ => {
                out.push(b);
                i += 1;
            }
        }
    }
    // masked regions are ASCII and start/end on ASCII delimiters, so this stays valid UTF-8
    String::from_utf8(out).map_err(|e| QueryError::InvalidQuery(e.to_string()))
}

/// Mask a quoted body starting at `start` up to and including the closing `quote`.
/// Returns the index just past it.
fn mask_quoted(bytes: &[u8], start: usize, quote: u8, backslash: bool, out: &mut Vec<u8>) -> Result<usize, QueryError> {
    let len = bytes.len();
    let mut i = start;
    loop {
        if i >= len {
            let what = if quote == b'\'' { "string literal" } else { "quoted identifier" };
            return Err(QueryError::InvalidQuery(format!("unterminated {}", what)));
        }
        match bytes[i] {
            b'\\' if backslash => {
                if i + 1 >= len {
                    return Err(QueryError::InvalidQuery("unterminated escape string".into()));
                }
                out.extend_from_slice(b"__");
                i += 2;
            }
            c if c == quote && bytes.get(i + 1) == Some(&quote) => {
                out.extend_from_slice(b"__");
                i += 2;
            }
            c if c == quote => {
                out.push(quote);
                return Ok(i + 1);
            }
            _ => {
                out.push(b'_');
                i += 1;
            }
        }
    }
}

/// Length of a `$$` or `$tag$` opener at the start of `bytes`.
fn dollar_tag(bytes: &[u8]) -> Option<usize> {
    let mut j = 1;
    if bytes.get(j).is_some_and(|b| b.is_ascii_alphabetic() || *b == b'_') {
        while bytes.get(j).is_some_and(|b| b.is_ascii_alphanumeric() || *b == b'_') {
            j += 1;
        }
    }
    (bytes.get(j) == Some(&b'$')).then_some(j + 1)
}

fn is_ident_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_' || b == b'$' || b >= 0x80
}

/// Parenthesis nesting level at every byte of `masked`.
fn paren_depths(masked: &str) -> Vec<usize> {
    let mut depth: usize = 0;
    let mut out = Vec::with_capacity(masked.len());
    for b in masked.bytes() {
        if b == b')' {
            depth = depth.saturating_sub(1);
        }
        out.push(depth);
        if b == b'(' {
            depth += 1;
        }
    }
    out
}

fn first_top_level<'a>(re: &Regex, masked: &'a str, depths: &[usize], from: usize) -> Option<Match<'a>> {
    re.find_iter(masked).find(|m| m.start() >= from && depths[m.start()] == 0)
}

fn split_top_level(raw: &str, masked: &str, depths: &[usize]) -> Vec<String> {
    let mut parts = Vec::new();
    let mut start = 0;
    for (idx, b) in masked.bytes().enumerate() {
        if b == b',' && depths[idx] == 0 {
            parts.push(raw[start..idx].trim().to_string());
            start = idx + 1;
        }
    }
    parts.push(raw[start..].trim().to_string());
    parts.retain(|p| !p.is_empty());
    parts
}

fn leading_number(body: &str) -> Option<u64> {
    NUMBER_RE.captures(body).and_then(|c| c[1].parse().ok())
}

fn sample_fraction(body: &str) -> Option<f64> {
    let caps = PERCENT_RE.captures(body)?;
    let pct: f64 = caps[1].parse().ok()?;
    Some(pct / 100.0)
}
