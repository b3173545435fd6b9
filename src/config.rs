//! Configuration
//!
//! Knobs for the policy engine and the catalog cache. Both structs have
//! sensible defaults and can be overridden from the environment (a `.env`
//! file is honoured by the binary through `dotenv`).

use std::collections::HashSet;
use std::str::FromStr;
use std::time::Duration;
use tracing::warn;

pub const DEFAULT_LIMIT: u64 = 200;
pub const HARD_LIMIT: u64 = 1000;

/// Settings for validation and rewriting
#[derive(Debug, Clone)]
pub struct PolicyConfig {
    /// LIMIT applied when the query has none
    pub default_limit: u64,
    /// Upper bound any requested LIMIT is clamped to
    pub hard_limit: u64,
    /// The only schema a table reference may be qualified with
    pub schema: String,
    /// Column compared as a `date` and used for the injected time window
    pub date_column: String,
    /// Column compared as a `timestamptz`
    pub timestamp_column: String,
    /// Synthetic columns that never exist in the catalog (e.g. unnest output)
    pub virtual_columns: HashSet<String>,
    /// String literals that may appear inline (date parts, fixed LIKE patterns)
    pub structural_literals: HashSet<String>,
    /// Functions that are never callable
    pub denied_functions: HashSet<String>,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            default_limit: DEFAULT_LIMIT,
            hard_limit: HARD_LIMIT,
            schema: "public".to_string(),
            date_column: "date".to_string(),
            timestamp_column: "timestamp".to_string(),
            virtual_columns: to_set(&["body_part"]),
            structural_literals: to_set(&[
                "day", "week", "month", "year", "push%", "pull%", "leg%",
            ]),
            denied_functions: to_set(&[
                "pg_read_file",
                "pg_read_binary_file",
                "pg_ls_dir",
                "pg_sleep",
                "pg_stat_file",
                "pg_database_size",
                "lo_import",
                "lo_export",
                "dblink",
                "dblink_exec",
                "set_config",
                "current_setting",
                "nextval",
                "setval",
            ]),
        }
    }
}

impl PolicyConfig {
    /// Defaults overridden by `SQL_POLICY_*` environment variables
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.default_limit = env_parse("SQL_POLICY_DEFAULT_LIMIT", config.default_limit);
        config.hard_limit = env_parse("SQL_POLICY_HARD_LIMIT", config.hard_limit);
        if let Some(schema) = env_string("SQL_POLICY_SCHEMA") {
            config.schema = schema.to_lowercase();
        }
        if let Some(column) = env_string("SQL_POLICY_DATE_COLUMN") {
            config.date_column = column.to_lowercase();
        }
        if let Some(column) = env_string("SQL_POLICY_TIMESTAMP_COLUMN") {
            config.timestamp_column = column.to_lowercase();
        }
        if config.hard_limit == 0 {
            warn!("SQL_POLICY_HARD_LIMIT must be positive; using {}", HARD_LIMIT);
            config.hard_limit = HARD_LIMIT;
        }
        config
    }

    /// True for either of the recognized date/timestamp columns
    pub fn is_date_column(&self, name: &str) -> bool {
        name == self.date_column || name == self.timestamp_column
    }
}

/// Settings for schema reflection and the allowlist cache
#[derive(Debug, Clone)]
pub struct CatalogConfig {
    /// Only tables whose name starts with this prefix are queryable
    pub table_prefix: String,
    /// Non-system schema that is reflected
    pub schema: String,
    /// How long a successful reflection is trusted
    pub success_ttl: Duration,
    /// How long to wait before retrying after a failed reflection
    pub failure_ttl: Duration,
    /// Connection string for reflection; `None` serves the fallback schema
    pub database_url: Option<String>,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            table_prefix: "gym_".to_string(),
            schema: "public".to_string(),
            success_ttl: Duration::from_secs(5 * 60),
            failure_ttl: Duration::from_secs(60),
            database_url: None,
        }
    }
}

impl CatalogConfig {
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(prefix) = env_string("SQL_POLICY_TABLE_PREFIX") {
            config.table_prefix = prefix;
        }
        if let Some(schema) = env_string("SQL_POLICY_SCHEMA") {
            config.schema = schema;
        }
        config.database_url = ["SQL_POLICY_SCHEMA_URL", "DATABASE_URL_READONLY", "DATABASE_URL"]
            .iter()
            .find_map(|key| env_string(key));
        config
    }
}

fn to_set(values: &[&str]) -> HashSet<String> {
    values.iter().map(|v| v.to_string()).collect()
}

fn env_string(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn env_parse<T: FromStr + Copy>(key: &str, default: T) -> T {
    match env_string(key) {
        Some(raw) => raw.parse().unwrap_or_else(|_| {
            warn!("Ignoring invalid value for {}: {}", key, raw);
            default
        }),
        None => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_policy_defaults() {
        let config = PolicyConfig::default();
        assert_eq!(config.default_limit, 200);
        assert_eq!(config.hard_limit, 1000);
        assert_eq!(config.schema, "public");
        assert!(config.is_date_column("date"));
        assert!(config.is_date_column("timestamp"));
        assert!(!config.is_date_column("updated_at"));
        assert!(config.structural_literals.contains("push%"));
        assert!(config.denied_functions.contains("pg_sleep"));
    }

    #[test]
    fn test_catalog_defaults() {
        let config = CatalogConfig::default();
        assert_eq!(config.table_prefix, "gym_");
        assert_eq!(config.success_ttl, Duration::from_secs(300));
        assert_eq!(config.failure_ttl, Duration::from_secs(60));
        assert!(config.database_url.is_none());
    }
}
