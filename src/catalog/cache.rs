//! Catalog Cache
//!
//! Holds the current [`CatalogSnapshot`] behind an `Arc` that is swapped
//! wholesale on refresh, so readers always see a complete generation.
//! Refreshes are single-flight: callers that arrive while a reflection is
//! running wait for it and share its outcome instead of issuing their own.

use crate::catalog::reflection::{NoSchemaSource, PgSchemaSource, SchemaSource};
use crate::catalog::{fallback_tables, group_rows_into_tables, CatalogAllowlist, CatalogSnapshot, CatalogTable};
use crate::config::CatalogConfig;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Instant;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

#[derive(Debug, Default)]
struct RefreshState {
    expires_at: Option<Instant>,
}

impl RefreshState {
    fn is_fresh(&self, now: Instant) -> bool {
        self.expires_at.map(|at| now < at).unwrap_or(false)
    }
}

/// Process-wide allowlist cache with TTL-based, on-demand refresh
pub struct CatalogCache {
    source: Arc<dyn SchemaSource>,
    config: CatalogConfig,
    snapshot: RwLock<Arc<CatalogSnapshot>>,
    // Guards the refresh itself; the snapshot is never touched under it
    // except for the final pointer swap.
    refresh: Mutex<RefreshState>,
    // Bumped after every completed refresh attempt
    generation: AtomicU64,
}

impl CatalogCache {
    /// Start from the fallback schema; the first `load` reflects the real one
    pub fn new(source: Arc<dyn SchemaSource>, config: CatalogConfig) -> Self {
        Self {
            source,
            config,
            snapshot: RwLock::new(Arc::new(CatalogSnapshot::new(fallback_tables()))),
            refresh: Mutex::new(RefreshState::default()),
            generation: AtomicU64::new(0),
        }
    }

    /// Reflect from PostgreSQL when a URL is configured, else serve the fallback
    pub fn from_config(config: CatalogConfig) -> crate::error::Result<Self> {
        let source: Arc<dyn SchemaSource> = match config.database_url.as_deref() {
            Some(url) => Arc::new(PgSchemaSource::connect_lazy(url)?),
            None => {
                warn!("No schema database configured; using fallback catalog");
                Arc::new(NoSchemaSource)
            }
        };
        Ok(Self::new(source, config))
    }

    /// Last known-good snapshot. Never waits on a refresh.
    pub fn snapshot(&self) -> Arc<CatalogSnapshot> {
        match self.snapshot.read() {
            Ok(guard) => Arc::clone(&guard),
            Err(poisoned) => Arc::clone(&poisoned.into_inner()),
        }
    }

    pub fn current_allowlist(&self) -> Arc<CatalogAllowlist> {
        Arc::clone(&self.snapshot().allowlist)
    }

    /// Number of completed refresh attempts (successful or not)
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Refresh the catalog if it is stale (or `force` is set) and return the
    /// tables now being served.
    ///
    /// A failed or empty reflection keeps the previous snapshot and retries
    /// after the short failure TTL.
    pub async fn load(&self, force: bool) -> Vec<CatalogTable> {
        let observed = self.generation();
        let mut state = self.refresh.lock().await;

        if self.generation() != observed {
            debug!("Catalog refreshed by a concurrent caller; reusing result");
            return self.snapshot().tables.clone();
        }
        if !force && state.is_fresh(Instant::now()) {
            return self.snapshot().tables.clone();
        }

        let ttl = match self
            .source
            .fetch_columns(&self.config.schema, &self.config.table_prefix)
            .await
        {
            Ok(rows) => {
                let tables = group_rows_into_tables(&rows, &self.config.table_prefix);
                if tables.is_empty() {
                    warn!(
                        "Schema reflection returned no {}* tables; keeping previous catalog",
                        self.config.table_prefix
                    );
                    self.config.failure_ttl
                } else {
                    info!("Catalog refreshed: {} tables", tables.len());
                    self.install(CatalogSnapshot::new(tables));
                    self.config.success_ttl
                }
            }
            Err(err) => {
                warn!("Failed to load catalog schema, keeping previous catalog: {}", err);
                self.config.failure_ttl
            }
        };

        state.expires_at = Some(Instant::now() + ttl);
        self.generation.fetch_add(1, Ordering::AcqRel);
        self.snapshot().tables.clone()
    }

    fn install(&self, snapshot: CatalogSnapshot) {
        let snapshot = Arc::new(snapshot);
        match self.snapshot.write() {
            Ok(mut guard) => *guard = snapshot,
            Err(poisoned) => *poisoned.into_inner() = snapshot,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::ColumnRow;
    use crate::error::{PolicyError, Result};
    use async_trait::async_trait;
    use std::time::Duration;

    struct StaticSource(Vec<ColumnRow>);

    #[async_trait]
    impl SchemaSource for StaticSource {
        async fn fetch_columns(&self, _schema: &str, _prefix: &str) -> Result<Vec<ColumnRow>> {
            if self.0.is_empty() {
                return Err(PolicyError::Catalog("offline".to_string()));
            }
            Ok(self.0.clone())
        }
    }

    fn column(table: &str, name: &str) -> ColumnRow {
        ColumnRow {
            table_name: table.to_string(),
            column_name: name.to_string(),
            data_type: "text".to_string(),
            udt_name: "text".to_string(),
        }
    }

    #[test]
    fn test_cold_start_serves_fallback() {
        let cache = CatalogCache::new(Arc::new(NoSchemaSource), CatalogConfig::default());
        assert!(cache.current_allowlist().has_table("gym_lifts"));
        assert_eq!(cache.generation(), 0);
    }

    #[tokio::test]
    async fn test_failed_refresh_keeps_fallback() {
        let cache = CatalogCache::new(Arc::new(StaticSource(Vec::new())), CatalogConfig::default());
        let tables = cache.load(false).await;
        assert_eq!(tables, fallback_tables());
        assert_eq!(cache.generation(), 1);
    }

    #[tokio::test]
    async fn test_successful_refresh_swaps_snapshot() {
        let source = StaticSource(vec![column("gym_sleep", "hours"), column("other", "x")]);
        let config = CatalogConfig {
            success_ttl: Duration::from_secs(60),
            ..CatalogConfig::default()
        };
        let cache = CatalogCache::new(Arc::new(source), config);
        let before = cache.current_allowlist();

        let tables = cache.load(false).await;
        assert_eq!(tables.len(), 1);
        assert_eq!(tables[0].name, "gym_sleep");

        let after = cache.current_allowlist();
        assert!(after.has_table("gym_sleep"));
        assert!(!after.has_table("gym_lifts"));
        // readers holding the old generation are unaffected
        assert!(before.has_table("gym_lifts"));
    }
}
