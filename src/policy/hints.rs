//! Policy Hint Parser
//!
//! A proposed query may start with one `/*policy:key=value;...*/` comment
//! carrying directives for the rewriter. The comment is removed before the
//! lexical guard and the parser see the SQL. Unknown keys and values are
//! ignored.

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};

lazy_static! {
    static ref POLICY_HINT: Regex = Regex::new(r"(?is)^\s*/\*policy:(.*?)\*/\s*").unwrap();
}

/// Canonical spelling of the all-time directive
pub const ALL_TIME_HINT: &str = "/*policy:time_window=all_time*/";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimeWindowHint {
    #[serde(rename = "all_time")]
    AllTime,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyHints {
    pub time_window: Option<TimeWindowHint>,
}

impl PolicyHints {
    pub fn all_time() -> Self {
        Self {
            time_window: Some(TimeWindowHint::AllTime),
        }
    }

    pub fn is_all_time(&self) -> bool {
        self.time_window == Some(TimeWindowHint::AllTime)
    }
}

/// Split off a leading hint comment. Without one the input comes back
/// unchanged with empty hints.
pub fn strip(sql: &str) -> (String, PolicyHints) {
    let Some(captures) = POLICY_HINT.captures(sql) else {
        return (sql.to_string(), PolicyHints::default());
    };
    let hints = parse_hints(captures.get(1).map(|m| m.as_str()).unwrap_or(""));
    let consumed = captures.get(0).map(|m| m.end()).unwrap_or(0);
    (sql[consumed..].to_string(), hints)
}

fn parse_hints(segment: &str) -> PolicyHints {
    let mut hints = PolicyHints::default();
    for entry in segment.split(';').map(str::trim).filter(|e| !e.is_empty()) {
        let mut parts = entry.split('=');
        let (Some(key), Some(value)) = (parts.next(), parts.next()) else {
            continue;
        };
        let key = key.trim().to_lowercase();
        let value = value.trim().to_lowercase();
        if key == "time_window" && value == "all_time" {
            hints.time_window = Some(TimeWindowHint::AllTime);
        }
    }
    hints
}
