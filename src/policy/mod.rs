//! SQL Safety Policy
//!
//! Turns untrusted, LLM-proposed SQL into a statement that is safe to run
//! against the analytics database, or refuses it with a reason.
//!
//! Pipeline: normalize -> strip hints -> lexical guard -> parse -> validate
//! -> parameter check -> rewrite -> serialize. Every stage is pure; the only
//! shared input is the allowlist snapshot passed in by the caller.

pub mod hints;
pub mod lexical;
pub mod normalize;
pub mod params;
pub mod rewriter;
pub mod validator;

use crate::catalog::{CatalogAllowlist, CatalogCache};
use crate::config::PolicyConfig;
use crate::error::{PolicyError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use tracing::{debug, warn};

pub use hints::{PolicyHints, TimeWindowHint, ALL_TIME_HINT};
pub use validator::{TableRef, ValidationSummary};

/// Time window the rewriter settled on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AppliedTimeWindow {
    #[serde(rename = "90 days")]
    NinetyDays,
    #[serde(rename = "12 months")]
    TwelveMonths,
    #[serde(rename = "all_time")]
    AllTime,
}

impl AppliedTimeWindow {
    pub fn as_str(&self) -> &'static str {
        match self {
            AppliedTimeWindow::NinetyDays => "90 days",
            AppliedTimeWindow::TwelveMonths => "12 months",
            AppliedTimeWindow::AllTime => "all_time",
        }
    }
}

impl std::fmt::Display for AppliedTimeWindow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An accepted query, ready for execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SqlPolicyResult {
    pub sql: String,
    pub params: Vec<Value>,
    pub applied_limit: u64,
    pub applied_time_window: Option<AppliedTimeWindow>,
}

/// One query from a multi-query plan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProposedQuery {
    pub id: String,
    #[serde(default)]
    pub purpose: Option<String>,
    pub sql: String,
    #[serde(default)]
    pub params: Vec<Value>,
}

/// Per-query outcome of [`SqlPolicy::validate_batch`]
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PolicyOutcome {
    pub id: String,
    pub purpose: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<SqlPolicyResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<&'static str>,
}

impl PolicyOutcome {
    pub fn is_accepted(&self) -> bool {
        self.result.is_some()
    }
}

#[derive(Debug, Clone, Default)]
pub struct SqlPolicy {
    config: PolicyConfig,
}

impl SqlPolicy {
    pub fn new(config: PolicyConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &PolicyConfig {
        &self.config
    }

    /// Validate `raw_sql` against `allowlist` and return the rewritten,
    /// executable form. Params are passed through untouched.
    pub fn validate_and_rewrite(
        &self,
        raw_sql: &str,
        params: Vec<Value>,
        allowlist: &CatalogAllowlist,
    ) -> Result<SqlPolicyResult> {
        let result = self.run(raw_sql, params, allowlist);
        if let Err(err) = &result {
            warn!("Rejected proposed SQL ({}): {}", err.category(), err);
        }
        result
    }

    /// Same as [`validate_and_rewrite`](Self::validate_and_rewrite) against
    /// the snapshot currently served by `catalog`.
    pub fn check(&self, raw_sql: &str, params: Vec<Value>, catalog: &CatalogCache) -> Result<SqlPolicyResult> {
        let allowlist = catalog.current_allowlist();
        self.validate_and_rewrite(raw_sql, params, &allowlist)
    }

    /// Validate each query independently; one rejection does not affect the
    /// others. Outcomes keep the input order.
    pub fn validate_batch(&self, queries: &[ProposedQuery], allowlist: &CatalogAllowlist) -> Vec<PolicyOutcome> {
        queries
            .iter()
            .map(|query| {
                match self.validate_and_rewrite(&query.sql, query.params.clone(), allowlist) {
                    Ok(result) => PolicyOutcome {
                        id: query.id.clone(),
                        purpose: query.purpose.clone(),
                        result: Some(result),
                        error: None,
                        category: None,
                    },
                    Err(err) => PolicyOutcome {
                        id: query.id.clone(),
                        purpose: query.purpose.clone(),
                        result: None,
                        error: Some(err.to_string()),
                        category: Some(err.category()),
                    },
                }
            })
            .collect()
    }

    fn run(&self, raw_sql: &str, params: Vec<Value>, allowlist: &CatalogAllowlist) -> Result<SqlPolicyResult> {
        if raw_sql.trim().is_empty() {
            return Err(PolicyError::Empty);
        }

        let normalized = normalize::normalize(raw_sql);
        let (sql, hints) = hints::strip(&normalized);
        if sql.trim().is_empty() {
            return Err(PolicyError::Empty);
        }
        lexical::scan(&sql)?;

        let statements = Parser::parse_sql(&PostgreSqlDialect {}, &sql)?;
        let summary = validator::validate(&statements, allowlist, &self.config)?;
        debug!(
            "Validated query over {:?} (date filter: {}, trend: {})",
            summary.tables.iter().map(|t| t.name.as_str()).collect::<Vec<_>>(),
            summary.has_date_filter,
            summary.is_trend_query
        );
        params::check_params(&sql, &params)?;

        let statement = statements
            .into_iter()
            .next()
            .ok_or_else(|| PolicyError::Structural("Only a single SQL statement is allowed.".to_string()))?;
        let rewritten = rewriter::rewrite(statement, &summary, &hints, &self.config)?;

        let mut sql = rewritten.statement.to_string();
        if rewritten.applied_time_window == Some(AppliedTimeWindow::AllTime) {
            sql = format!("{} {}", ALL_TIME_HINT, sql);
        }
        debug!("Rewritten SQL (limit {}): {}", rewritten.applied_limit, sql);

        Ok(SqlPolicyResult {
            sql,
            params,
            applied_limit: rewritten.applied_limit,
            applied_time_window: rewritten.applied_time_window,
        })
    }
}
