//! Error diagnostics
//!
//! Turns the text of a rejection or a database error into something a
//! planner (or a person) can act on.

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};

lazy_static! {
    static ref MISSING_FROM: Regex =
        Regex::new(r#"(?i)missing from-clause entry for table "([^"]+)""#).unwrap();
    static ref MISSING_COLUMN: Regex = Regex::new(r#"(?i)column "([^"]+)" does not exist"#).unwrap();
    static ref MISSING_RELATION: Regex =
        Regex::new(r#"(?i)relation "([^"]+)" does not exist"#).unwrap();
    static ref AMBIGUOUS_COLUMN: Regex =
        Regex::new(r#"(?i)column reference "([^"]+)" is ambiguous"#).unwrap();
    static ref SYNTAX_ERROR: Regex = Regex::new(r#"(?i)syntax error at or near "([^"]+)""#).unwrap();
    static ref WINDOW: Regex = Regex::new(r"(?i)(\d+)[-\s]*(day|week|month|year)s?\b").unwrap();
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnosis {
    pub diagnosis: String,
    pub suggestion: String,
}

impl Diagnosis {
    fn new(diagnosis: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self {
            diagnosis: diagnosis.into(),
            suggestion: suggestion.into(),
        }
    }
}

pub fn interpret_sql_error(error: &str) -> Diagnosis {
    let lowered = error.to_lowercase();

    if let Some(table) = capture(&MISSING_FROM, error) {
        return Diagnosis::new(
            format!("The query references \"{}\" but never joins it in FROM.", table),
            format!(
                "Add a JOIN to {} with the correct key (for gym data this is often the date), \
                 or include it in the FROM clause with the proper alias.",
                table
            ),
        );
    }
    if lowered.contains("unsupported syntax") || lowered.contains("unsupported expression") {
        return Diagnosis::new(
            error,
            "Rewrite the query using the supported subset (plain SELECT, no QUALIFY or vendor-specific clauses).",
        );
    }
    if lowered.contains("unexpected word token") {
        return Diagnosis::new(
            error,
            "Rewrite the query without window frame clauses or unsupported keywords.",
        );
    }
    if let Some(column) = capture(&MISSING_COLUMN, error) {
        return Diagnosis::new(
            format!("The query references a column that does not exist: \"{}\".", column),
            "Check the schema and update the column name or qualify it with the correct table alias.",
        );
    }
    if let Some(relation) = capture(&MISSING_RELATION, error) {
        return Diagnosis::new(
            format!("The query references a table that does not exist: \"{}\".", relation),
            "Check the schema and update the table name or schema qualifier.",
        );
    }
    if let Some(column) = capture(&AMBIGUOUS_COLUMN, error) {
        return Diagnosis::new(
            format!(
                "The column \"{}\" is ambiguous because multiple tables expose it.",
                column
            ),
            "Qualify the column with its table alias (e.g., t.column_name).",
        );
    }
    if let Some(token) = capture(&SYNTAX_ERROR, error) {
        return Diagnosis::new(
            format!("The SQL has a syntax error near \"{}\".", token),
            "Check the SELECT syntax, commas, and parentheses around that token.",
        );
    }
    if lowered.contains("timeout") {
        return Diagnosis::new(
            "The query exceeded the statement timeout.",
            "Add a tighter filter or reduce the time window to narrow the dataset.",
        );
    }
    if lowered.contains("must be parameterized") {
        return Diagnosis::new(
            error,
            "Move the value into the params array and reference it as $1, $2, ...",
        );
    }
    if lowered.contains("is not allowlisted") || lowered.contains("select * is not allowed") {
        return Diagnosis::new(
            error,
            "Only use the allowed tables and columns from the catalog, and list columns explicitly.",
        );
    }
    Diagnosis::new(
        "The query failed to execute due to a SQL error.",
        "Review the SQL and ensure all referenced tables and columns are valid.",
    )
}

/// Length of a window such as `"90 days"` or `"12-week"` in days.
/// Months count as 30 days and years as 365.
pub fn window_to_days(window: &str) -> Option<u32> {
    if window.is_empty() || window == "all_time" {
        return None;
    }
    let captures = WINDOW.captures(window)?;
    let value: u32 = captures.get(1)?.as_str().parse().ok()?;
    if value == 0 {
        return None;
    }
    let per_unit = match captures.get(2)?.as_str().to_lowercase().as_str() {
        "day" => 1,
        "week" => 7,
        "month" => 30,
        "year" => 365,
        _ => return None,
    };
    value.checked_mul(per_unit)
}

fn capture<'a>(pattern: &Regex, text: &'a str) -> Option<&'a str> {
    pattern.captures(text)?.get(1).map(|m| m.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_from_entry() {
        let d = interpret_sql_error(r#"missing FROM-clause entry for table "m""#);
        assert_eq!(d.diagnosis, "The query references \"m\" but never joins it in FROM.");
        assert!(d.suggestion.starts_with("Add a JOIN to m"));
    }

    #[test]
    fn test_missing_column_and_relation() {
        let d = interpret_sql_error(r#"column "weigth" does not exist"#);
        assert!(d.diagnosis.contains("\"weigth\""));
        let d = interpret_sql_error(r#"relation "gym_sets" does not exist"#);
        assert!(d.diagnosis.contains("table that does not exist: \"gym_sets\""));
    }

    #[test]
    fn test_ambiguous_and_syntax() {
        let d = interpret_sql_error(r#"column reference "date" is ambiguous"#);
        assert!(d.suggestion.contains("table alias"));
        let d = interpret_sql_error(r#"syntax error at or near "FROM""#);
        assert_eq!(d.diagnosis, "The SQL has a syntax error near \"FROM\".");
    }

    #[test]
    fn test_timeout_and_fallback() {
        assert_eq!(
            interpret_sql_error("canceling statement due to statement timeout").diagnosis,
            "The query exceeded the statement timeout."
        );
        assert_eq!(
            interpret_sql_error("something odd").diagnosis,
            "The query failed to execute due to a SQL error."
        );
    }

    #[test]
    fn test_policy_rejections() {
        let d = interpret_sql_error("String literal must be parameterized: Squat");
        assert!(d.suggestion.contains("params"));
        let d = interpret_sql_error("Table is not allowlisted: users");
        assert_eq!(d.diagnosis, "Table is not allowlisted: users");
    }

    #[test]
    fn test_window_to_days() {
        assert_eq!(window_to_days("90 days"), Some(90));
        assert_eq!(window_to_days("12 weeks"), Some(84));
        assert_eq!(window_to_days("12 months"), Some(360));
        assert_eq!(window_to_days("1 year"), Some(365));
        assert_eq!(window_to_days("6-month"), Some(180));
        assert_eq!(window_to_days("all_time"), None);
        assert_eq!(window_to_days("0 days"), None);
        assert_eq!(window_to_days("forever"), None);
        assert_eq!(window_to_days(""), None);
    }
}
