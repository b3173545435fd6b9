//! Lexical normalization
//!
//! The only textual rewrites applied to proposed SQL. They run before hint
//! stripping and parsing, and turn interval parameters into explicit casts
//! so the parser sees an expression it understands:
//!
//! - `INTERVAL $n`        -> `($n)::interval`
//! - `CURRENT_DATE - $n`  -> `current_date - ($n)::interval`
//!
//! Nothing else is rewritten here; every other change happens on the AST.

use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref INTERVAL_PARAM: Regex = Regex::new(r"(?i)\binterval\s+\$(\d+)").unwrap();
    static ref CURRENT_DATE_MINUS_PARAM: Regex =
        Regex::new(r"(?i)\bcurrent_date\s*-\s*\$(\d+)").unwrap();
}

pub fn normalize(sql: &str) -> String {
    let sql = INTERVAL_PARAM.replace_all(sql, "($$${1})::interval");
    CURRENT_DATE_MINUS_PARAM
        .replace_all(&sql, "current_date - ($$${1})::interval")
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interval_param() {
        assert_eq!(
            normalize("WHERE date >= now() - INTERVAL $2"),
            "WHERE date >= now() - ($2)::interval"
        );
    }

    #[test]
    fn test_current_date_minus_param() {
        assert_eq!(
            normalize("WHERE date >= CURRENT_DATE-$1 AND reps > $2"),
            "WHERE date >= current_date - ($1)::interval AND reps > $2"
        );
    }

    #[test]
    fn test_already_cast_is_untouched() {
        let sql = "WHERE date >= CURRENT_DATE - ($1)::interval";
        assert_eq!(normalize(sql), sql);
    }

    #[test]
    fn test_interval_literal_is_untouched() {
        let sql = "WHERE date >= CURRENT_DATE - INTERVAL '30 days'";
        assert_eq!(normalize(sql), sql);
    }
}
