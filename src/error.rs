use thiserror::Error;

/// Every way a proposed query can be refused.
///
/// The message of each variant is the reason surfaced to the caller, so it
/// is kept human-readable and free of internal detail.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PolicyError {
    #[error("SQL is empty.")]
    Empty,

    #[error("Unsafe keyword detected: {0}")]
    ForbiddenKeyword(String),

    #[error("SQL parse error: {0}")]
    Parse(String),

    // Multiple statements, non-SELECT statements, UNION/VALUES/recursive CTEs
    #[error("{0}")]
    Structural(String),

    // Disallowed tables, columns, schemas, functions and SELECT *
    #[error("{0}")]
    SchemaAccess(String),

    // Un-parameterized string literals and non-constant LIMIT
    #[error("{0}")]
    Literal(String),

    // Placeholder / parameter mismatches
    #[error("{0}")]
    Parameter(String),

    #[error("Rewrite error: {0}")]
    Rewrite(String),

    #[error("Catalog error: {0}")]
    Catalog(String),
}

impl PolicyError {
    /// Coarse category used for logging and caller-side branching.
    pub fn category(&self) -> &'static str {
        match self {
            PolicyError::Empty | PolicyError::Parse(_) => "input",
            PolicyError::ForbiddenKeyword(_) | PolicyError::Structural(_) => "structural",
            PolicyError::SchemaAccess(_) => "schema_access",
            PolicyError::Literal(_) | PolicyError::Parameter(_) => "literal_parameter",
            PolicyError::Rewrite(_) => "rewrite",
            PolicyError::Catalog(_) => "catalog",
        }
    }
}

impl From<sqlparser::parser::ParserError> for PolicyError {
    fn from(err: sqlparser::parser::ParserError) -> Self {
        PolicyError::Parse(err.to_string())
    }
}

impl From<sqlx::Error> for PolicyError {
    fn from(err: sqlx::Error) -> Self {
        PolicyError::Catalog(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, PolicyError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_is_the_reason() {
        let err = PolicyError::SchemaAccess("Table is not allowlisted: users".to_string());
        assert_eq!(err.to_string(), "Table is not allowlisted: users");
        assert_eq!(PolicyError::Empty.to_string(), "SQL is empty.");
    }

    #[test]
    fn test_categories() {
        assert_eq!(PolicyError::Structural("x".into()).category(), "structural");
        assert_eq!(PolicyError::ForbiddenKeyword("drop".into()).category(), "structural");
        assert_eq!(PolicyError::Parameter("x".into()).category(), "literal_parameter");
        assert_eq!(PolicyError::Catalog("x".into()).category(), "catalog");
    }
}
