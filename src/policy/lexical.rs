//! Lexical Guard
//!
//! Cheap first pass that refuses SQL mentioning a write/DDL keyword as a
//! whole word. The AST validator re-derives read-only safety on its own, so
//! this is never the only line of defense.

use crate::error::{PolicyError, Result};
use lazy_static::lazy_static;
use regex::Regex;

pub const FORBIDDEN_KEYWORDS: &[&str] = &[
    "insert", "update", "delete", "drop", "alter", "create", "grant", "revoke", "copy", "vacuum",
    "truncate",
];

lazy_static! {
    static ref FORBIDDEN: Regex = Regex::new(&format!(r"(?i)\b({})\b", FORBIDDEN_KEYWORDS.join("|"))).unwrap();
}

pub fn scan(sql: &str) -> Result<()> {
    match FORBIDDEN.find(sql) {
        Some(found) => Err(PolicyError::ForbiddenKeyword(found.as_str().to_lowercase())),
        None => Ok(()),
    }
}
