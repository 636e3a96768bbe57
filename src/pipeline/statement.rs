//! Leading-verb classification of SQL statements.
//!
//! Only the first keyword is inspected; this is not a SQL parser.

use lazy_static::lazy_static;
use regex::Regex;
use serde::Serialize;

/// Statements that need explicit confirmation before they run
pub const DESTRUCTIVE_OPERATIONS: [&str; 7] = [
    "INSERT", "UPDATE", "DELETE", "DROP", "CREATE", "ALTER", "TRUNCATE",
];

/// Statements after which the schema graph is reloaded
pub const SCHEMA_MODIFYING_OPERATIONS: [&str; 5] = ["CREATE", "ALTER", "DROP", "RENAME", "TRUNCATE"];

lazy_static! {
    static ref SCHEMA_OBJECT: Regex = Regex::new(
        r"(?i)^(?:CREATE|ALTER|DROP|RENAME|TRUNCATE)\s+(?:OR\s+REPLACE\s+)?(?:TEMPORARY\s+)?(UNIQUE\s+INDEX|MATERIALIZED\s+VIEW|TABLE|INDEX|VIEW|DATABASE|DICTIONARY|COLUMN)\b"
    )
    .expect("schema object pattern is valid");
    static ref WHITESPACE: Regex = Regex::new(r"\s+").expect("whitespace pattern is valid");
}

/// A statement that changes the schema, as far as its leading words tell
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SchemaChange {
    /// Leading keyword, e.g. `DROP`
    pub operation: String,
    /// Object kind when recognised, e.g. `TABLE` or `UNIQUE INDEX`
    pub object: Option<String>,
}

/// Drop leading whitespace and SQL comments
fn strip_leading_noise(sql: &str) -> &str {
    let mut rest = sql;
    loop {
        rest = rest.trim_start();
        if let Some(after) = rest.strip_prefix("--") {
            rest = after.find('\n').map(|i| &after[i + 1..]).unwrap_or("");
        } else if let Some(after) = rest.strip_prefix("/*") {
            rest = after.find("*/").map(|i| &after[i + 2..]).unwrap_or("");
        } else {
            return rest;
        }
    }
}

/// Upper-cased first keyword, ignoring comments and a trailing `;`
pub fn leading_keyword(sql: &str) -> Option<String> {
    let body = strip_leading_noise(sql).trim_end().trim_end_matches(';');
    let keyword: String = body
        .chars()
        .take_while(|c| c.is_ascii_alphabetic())
        .collect();
    (!keyword.is_empty()).then(|| keyword.to_ascii_uppercase())
}

/// Operation type when the statement must be confirmed first
pub fn destructive_operation(sql: &str) -> Option<String> {
    leading_keyword(sql).filter(|k| DESTRUCTIVE_OPERATIONS.contains(&k.as_str()))
}

/// Schema modification carried by the statement.
///
/// Any statement led by a schema keyword counts, even when the object kind is
/// not recognised.
pub fn schema_change(sql: &str) -> Option<SchemaChange> {
    let operation = leading_keyword(sql)?;
    if !SCHEMA_MODIFYING_OPERATIONS.contains(&operation.as_str()) {
        return None;
    }
    let object = SCHEMA_OBJECT
        .captures(strip_leading_noise(sql))
        .and_then(|caps| caps.get(1))
        .map(|m| WHITESPACE.replace_all(m.as_str(), " ").to_ascii_uppercase());
    Some(SchemaChange { operation, object })
}
