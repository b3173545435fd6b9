//! Parameter/Placeholder Checker
//!
//! The `$n` placeholders in the SQL must line up exactly with the parameter
//! array: every index from 1 to `params.len()` used, nothing beyond it.

use crate::error::{PolicyError, Result};
use lazy_static::lazy_static;
use regex::Regex;
use std::collections::BTreeSet;

lazy_static! {
    static ref PLACEHOLDER: Regex = Regex::new(r"\$([1-9]\d*)").unwrap();
}

/// Distinct placeholder indices used in `sql`
pub fn placeholders(sql: &str) -> Result<BTreeSet<usize>> {
    PLACEHOLDER
        .captures_iter(sql)
        .filter_map(|c| c.get(1))
        .map(|m| {
            m.as_str().parse::<usize>().map_err(|_| {
                PolicyError::Parameter(format!("Placeholder index is out of range: ${}", m.as_str()))
            })
        })
        .collect()
}

pub fn check_params<T>(sql: &str, params: &[T]) -> Result<()> {
    let used = placeholders(sql)?;
    if used.is_empty() && !params.is_empty() {
        return Err(PolicyError::Parameter(
            "Parameters provided but SQL has no placeholders.".to_string(),
        ));
    }
    let max_index = used.iter().next_back().copied().unwrap_or(0);
    if max_index != params.len() {
        return Err(PolicyError::Parameter(format!(
            "Placeholder count does not match params length: SQL uses up to ${} but {} params were given.",
            max_index,
            params.len()
        )));
    }
    if let Some(missing) = (1..=max_index).find(|i| !used.contains(i)) {
        return Err(PolicyError::Parameter(format!(
            "SQL placeholders must be sequential: ${} is never used.",
            missing
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    #[test]
    fn test_no_placeholders_no_params() {
        let params: Vec<Value> = vec![];
        assert!(check_params("SELECT exercise FROM gym_lifts", &params).is_ok());
    }

    #[test]
    fn test_matching_params() {
        assert!(check_params("SELECT 1 WHERE a > $1 AND b = $2 OR c = $1", &[json!(1), json!("x")]).is_ok());
    }

    #[test]
    fn test_params_without_placeholders() {
        let err = check_params("SELECT exercise FROM gym_lifts WHERE weight > 100", &[json!(100)]).unwrap_err();
        assert!(matches!(err, PolicyError::Parameter(_)));
    }

    #[test]
    fn test_placeholders_without_params() {
        let params: Vec<Value> = vec![];
        assert!(check_params("SELECT 1 WHERE a > $1", &params).is_err());
    }

    #[test]
    fn test_count_mismatch() {
        assert!(check_params("SELECT 1 WHERE a > $1", &[json!(1), json!(2)]).is_err());
        assert!(check_params("SELECT 1 WHERE a > $1 AND b > $3", &[json!(1), json!(2)]).is_err());
    }

    #[test]
    fn test_gap_is_rejected() {
        let err = check_params("SELECT 1 WHERE a > $1 AND b > $3", &[json!(1), json!(2), json!(3)]).unwrap_err();
        assert_eq!(
            err.to_string(),
            "SQL placeholders must be sequential: $2 is never used."
        );
    }

    #[test]
    fn test_zero_index_is_not_a_placeholder() {
        assert_eq!(placeholders("SELECT $0, $10, $2").unwrap(), BTreeSet::from([2, 10]));
    }

    #[test]
    fn test_overflowing_index_is_rejected() {
        let params: Vec<Value> = vec![];
        let err = check_params("SELECT 1 WHERE a > $99999999999999999999999", &params).unwrap_err();
        assert_eq!(
            err,
            PolicyError::Parameter("Placeholder index is out of range: $99999999999999999999999".to_string())
        );
    }
}
