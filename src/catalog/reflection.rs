//! Schema reflection
//!
//! The catalog cache only needs rows of `(table, column, type)`; where they
//! come from is behind [`SchemaSource`] so the cache can be exercised without
//! a database.

use crate::error::Result;
use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;
use tracing::debug;

/// One row of `information_schema.columns`
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct ColumnRow {
    pub table_name: String,
    pub column_name: String,
    pub data_type: String,
    /// Element type for arrays (`_text` for `text[]`)
    pub udt_name: String,
}

/// Anything that can list the columns of the queryable tables
#[async_trait]
pub trait SchemaSource: Send + Sync {
    async fn fetch_columns(&self, schema: &str, table_prefix: &str) -> Result<Vec<ColumnRow>>;
}

const COLUMNS_QUERY: &str = "SELECT table_name::text AS table_name, \
            column_name::text AS column_name, \
            data_type::text AS data_type, \
            udt_name::text AS udt_name \
     FROM information_schema.columns \
     WHERE table_schema = $1 AND table_name LIKE $2 \
     ORDER BY table_name, ordinal_position";

/// Reflects the catalog from PostgreSQL
pub struct PgSchemaSource {
    pool: PgPool,
}

impl PgSchemaSource {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Small pool dedicated to reflection. Connections are opened on first
    /// use so an unreachable database only fails the refresh, not startup.
    pub fn connect_lazy(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(2)
            .acquire_timeout(Duration::from_secs(10))
            .connect_lazy(database_url)?;
        Ok(Self { pool })
    }
}

#[async_trait]
impl SchemaSource for PgSchemaSource {
    async fn fetch_columns(&self, schema: &str, table_prefix: &str) -> Result<Vec<ColumnRow>> {
        let rows = sqlx::query_as::<_, ColumnRow>(COLUMNS_QUERY)
            .bind(schema)
            .bind(format!("{}%", table_prefix))
            .fetch_all(&self.pool)
            .await?;
        debug!("Reflected {} columns from schema {}", rows.len(), schema);
        Ok(rows)
    }
}

/// Source used when no database is configured: always fails, so the cache
/// keeps serving the fallback schema.
pub struct NoSchemaSource;

#[async_trait]
impl SchemaSource for NoSchemaSource {
    async fn fetch_columns(&self, _schema: &str, _table_prefix: &str) -> Result<Vec<ColumnRow>> {
        Err(crate::error::PolicyError::Catalog(
            "no database configured for schema reflection".to_string(),
        ))
    }
}
