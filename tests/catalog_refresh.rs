//! Catalog cache refresh behaviour: single-flight, TTLs and degraded mode

use async_trait::async_trait;
use sql_policy::catalog::{fallback_tables, CatalogCache, ColumnRow, SchemaSource};
use sql_policy::config::CatalogConfig;
use sql_policy::{PolicyError, Result, SqlPolicy};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// In-memory schema source that counts calls and can be delayed or failed
struct CountingSource {
    calls: AtomicUsize,
    failing: AtomicBool,
    delay: Duration,
    rows: Vec<ColumnRow>,
}

impl CountingSource {
    fn new(rows: Vec<ColumnRow>, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            failing: AtomicBool::new(false),
            delay,
            rows,
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SchemaSource for CountingSource {
    async fn fetch_columns(&self, _schema: &str, _table_prefix: &str) -> Result<Vec<ColumnRow>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        if self.failing.load(Ordering::SeqCst) {
            return Err(PolicyError::Catalog("connection refused".to_string()));
        }
        Ok(self.rows.clone())
    }
}

fn row(table: &str, column: &str, data_type: &str) -> ColumnRow {
    ColumnRow {
        table_name: table.to_string(),
        column_name: column.to_string(),
        data_type: data_type.to_string(),
        udt_name: data_type.to_string(),
    }
}

fn sleep_rows() -> Vec<ColumnRow> {
    vec![
        row("gym_sleep", "date", "date"),
        row("gym_sleep", "hours", "numeric"),
        row("gym_lifts", "date", "date"),
        row("gym_lifts", "exercise", "text"),
        row("audit_log", "actor", "text"),
    ]
}

fn config() -> CatalogConfig {
    CatalogConfig {
        success_ttl: Duration::from_secs(300),
        failure_ttl: Duration::from_millis(50),
        ..CatalogConfig::default()
    }
}

#[tokio::test]
async fn test_concurrent_loads_share_one_reflection() {
    let source = CountingSource::new(sleep_rows(), Duration::from_millis(100));
    let cache = Arc::new(CatalogCache::new(source.clone(), config()));

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let cache = Arc::clone(&cache);
            tokio::spawn(async move { cache.load(false).await })
        })
        .collect();

    for handle in handles {
        let tables = handle.await.unwrap();
        let names: Vec<&str> = tables.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["gym_lifts", "gym_sleep"]);
    }
    assert_eq!(source.calls(), 1);
    assert_eq!(cache.generation(), 1);
}

#[tokio::test]
async fn test_fresh_catalog_is_not_reflected_again() {
    let source = CountingSource::new(sleep_rows(), Duration::ZERO);
    let cache = CatalogCache::new(source.clone(), config());

    cache.load(false).await;
    cache.load(false).await;
    assert_eq!(source.calls(), 1);

    cache.load(true).await;
    assert_eq!(source.calls(), 2);
}

#[tokio::test]
async fn test_failure_keeps_previous_snapshot_and_retries_after_short_ttl() {
    let source = CountingSource::new(sleep_rows(), Duration::ZERO);
    let cache = CatalogCache::new(
        source.clone(),
        CatalogConfig {
            success_ttl: Duration::ZERO,
            ..config()
        },
    );

    cache.load(false).await;
    assert!(cache.current_allowlist().has_table("gym_sleep"));

    source.failing.store(true, Ordering::SeqCst);
    let tables = cache.load(false).await;
    assert!(tables.iter().any(|t| t.name == "gym_sleep"));
    assert_eq!(source.calls(), 2);

    // inside the failure TTL nothing is retried
    cache.load(false).await;
    assert_eq!(source.calls(), 2);

    tokio::time::sleep(Duration::from_millis(80)).await;
    source.failing.store(false, Ordering::SeqCst);
    cache.load(false).await;
    assert_eq!(source.calls(), 3);
}

#[tokio::test]
async fn test_cold_start_failure_serves_fallback() {
    let source = CountingSource::new(Vec::new(), Duration::ZERO);
    source.failing.store(true, Ordering::SeqCst);
    let cache = CatalogCache::new(source.clone(), config());

    assert_eq!(cache.load(false).await, fallback_tables());
    let allowlist = cache.current_allowlist();
    assert!(allowlist.has_table("gym_lifts"));
    assert!(allowlist.has_table("gym_day_meta"));
}

#[tokio::test]
async fn test_empty_reflection_counts_as_failure() {
    let source = CountingSource::new(vec![row("audit_log", "actor", "text")], Duration::ZERO);
    let cache = CatalogCache::new(source.clone(), config());

    assert_eq!(cache.load(false).await, fallback_tables());
    assert_eq!(cache.generation(), 1);
}

#[tokio::test]
async fn test_policy_sees_refreshed_allowlist() {
    let source = CountingSource::new(sleep_rows(), Duration::ZERO);
    let cache = CatalogCache::new(source, config());
    let policy = SqlPolicy::default();

    let sql = "SELECT AVG(hours) AS avg_hours FROM gym_sleep";
    assert!(policy.check(sql, vec![], &cache).is_err());

    cache.load(false).await;
    let result = policy.check(sql, vec![], &cache).unwrap();
    assert!(result.sql.contains("gym_sleep.date"), "{}", result.sql);
    assert!(policy
        .check("SELECT actor FROM audit_log", vec![], &cache)
        .is_err());
}

#[tokio::test]
async fn test_snapshot_context_lists_tables() {
    let source = CountingSource::new(sleep_rows(), Duration::ZERO);
    let cache = CatalogCache::new(source, config());
    cache.load(false).await;

    let context = cache.snapshot().context();
    assert!(context.starts_with("Allowed tables and columns:"));
    assert!(context.contains("- gym_sleep: date (date), hours (numeric)"));
    assert!(!context.contains("audit_log"));
}
