//! Unit tests for the package cache and its refresh workflow

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use octofhir_ig_registry::error::{IgrError, Result, StorageError};
use octofhir_ig_registry::{
    NormalizedPackage, PackageCache, PackageStore, RegistryAggregator, SqliteStore, UpsertReport,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use crate::common::fixtures::{feed_entry, feed_entry_with_versions};
use crate::common::{MockFeed, MockRegistry, create_test_config, setup_test_env, should_skip_net};

/// Store double whose writes always fail.
#[derive(Default)]
struct FailingStore {
    writes: AtomicUsize,
}

#[async_trait]
impl PackageStore for FailingStore {
    async fn find_by_name_version(&self, _: &str, _: &str) -> Result<Option<NormalizedPackage>> {
        Ok(None)
    }

    async fn find_by_name(&self, _: &str) -> Result<Vec<NormalizedPackage>> {
        Ok(Vec::new())
    }

    async fn upsert(&self, _: &[NormalizedPackage]) -> Result<UpsertReport> {
        self.fail()
    }

    async fn delete_all(&self) -> Result<usize> {
        self.fail()
    }

    async fn query_all(&self) -> Result<Vec<NormalizedPackage>> {
        Ok(Vec::new())
    }

    async fn replace_all(&self, _: &[NormalizedPackage], _: DateTime<Utc>) -> Result<UpsertReport> {
        self.fail()
    }

    async fn last_fetch(&self) -> Result<Option<DateTime<Utc>>> {
        Ok(None)
    }

    async fn set_last_fetch(&self, _: DateTime<Utc>) -> Result<()> {
        self.fail()
    }
}

impl FailingStore {
    fn fail<T>(&self) -> Result<T> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        Err(StorageError::TransactionFailed {
            message: "disk full".to_string(),
        }
        .into())
    }
}

/// Store double that panics when the refresh path writes to it.
struct PanickingStore;

#[async_trait]
impl PackageStore for PanickingStore {
    async fn find_by_name_version(&self, _: &str, _: &str) -> Result<Option<NormalizedPackage>> {
        Ok(None)
    }

    async fn find_by_name(&self, _: &str) -> Result<Vec<NormalizedPackage>> {
        Ok(Vec::new())
    }

    async fn upsert(&self, _: &[NormalizedPackage]) -> Result<UpsertReport> {
        panic!("store crashed during upsert")
    }

    async fn delete_all(&self) -> Result<usize> {
        Ok(0)
    }

    async fn query_all(&self) -> Result<Vec<NormalizedPackage>> {
        Ok(Vec::new())
    }

    async fn replace_all(&self, _: &[NormalizedPackage], _: DateTime<Utc>) -> Result<UpsertReport> {
        panic!("store crashed during replace")
    }

    async fn last_fetch(&self) -> Result<Option<DateTime<Utc>>> {
        Ok(None)
    }

    async fn set_last_fetch(&self, _: DateTime<Utc>) -> Result<()> {
        Ok(())
    }
}

async fn standard_registry() -> MockRegistry {
    let mut registry = MockRegistry::new().await;
    registry.add_feed(MockFeed::new(
        "primary",
        vec![
            feed_entry("hl7.fhir.us.core", "6.1.0", "HL7 International"),
            feed_entry("hl7.fhir.us.core", "7.0.0-ballot", "HL7 International"),
            feed_entry("acme.profiles", "1.0.0", "Acme"),
        ],
    ));
    registry.add_feed(MockFeed::failing("secondary", 500));
    registry.add_feed(MockFeed::new(
        "history",
        vec![feed_entry_with_versions(
            "acme.profiles",
            &[("1.0.0", "2023-01-01"), ("0.9.0", "2022-06-01")],
        )],
    ));
    registry.setup_mocks().await;
    registry
}

async fn sqlite_store(root: &std::path::Path, registry: &MockRegistry) -> Arc<SqliteStore> {
    let config = create_test_config(root, registry);
    Arc::new(SqliteStore::new(&config.get_expanded_storage_config()).await.unwrap())
}

fn aggregator(root: &std::path::Path, registry: &MockRegistry) -> RegistryAggregator {
    RegistryAggregator::new(&create_test_config(root, registry).registry).unwrap()
}

/// Refresh normalizes, persists and swaps the snapshot
#[tokio::test]
async fn test_refresh_persists_and_swaps() {
    if should_skip_net() {
        eprintln!("skipping net-bound test");
        return;
    }
    let registry = standard_registry().await;
    let temp_dir = setup_test_env();
    let store = sqlite_store(temp_dir.path(), &registry).await;
    let cache = PackageCache::new(aggregator(temp_dir.path(), &registry), store.clone(), 50);

    let report = cache.refresh().await.unwrap();
    assert!(!report.fetch_failed);
    assert_eq!(report.raw_entries, 4);
    assert_eq!(report.packages, 2);

    let snapshot = cache.snapshot().await;
    let names: Vec<_> = snapshot.packages.iter().map(|p| p.name.as_str()).collect();
    assert_eq!(names, vec!["acme.profiles", "hl7.fhir.us.core"]);

    let us_core = cache.find("HL7.FHIR.US.CORE").await.unwrap();
    assert_eq!(us_core.latest_absolute_version, "7.0.0-ballot");
    assert_eq!(us_core.latest_official_version.as_deref(), Some("7.0.0-ballot"));

    let acme = cache.find("acme.profiles").await.unwrap();
    let versions: Vec<_> = acme.all_versions.iter().map(|v| v.version.as_str()).collect();
    assert_eq!(versions, vec!["1.0.0", "0.9.0"]);

    assert_eq!(store.query_all().await.unwrap().len(), 2);
    assert!(store.last_fetch().await.unwrap().is_some());
}

/// When every feed fails the store keeps its rows and the snapshot flags the failure
#[tokio::test]
async fn test_all_feeds_failing_leaves_store_untouched() {
    if should_skip_net() {
        eprintln!("skipping net-bound test");
        return;
    }
    let good = standard_registry().await;
    let temp_dir = setup_test_env();
    let store = sqlite_store(temp_dir.path(), &good).await;
    PackageCache::new(aggregator(temp_dir.path(), &good), store.clone(), 50)
        .refresh()
        .await
        .unwrap();

    let mut dead = MockRegistry::new().await;
    dead.add_feed(MockFeed::failing("one", 500));
    dead.add_feed(MockFeed::failing("two", 404));
    dead.setup_mocks().await;

    let cache = PackageCache::new(aggregator(temp_dir.path(), &dead), store.clone(), 50);
    let report = cache.refresh().await.unwrap();
    assert!(report.fetch_failed);

    let snapshot = cache.snapshot().await;
    assert!(snapshot.fetch_failed);
    assert!(snapshot.packages.is_empty());
    assert_eq!(store.query_all().await.unwrap().len(), 2);
}

/// A persistence failure propagates and keeps the previous snapshot
#[tokio::test]
async fn test_store_failure_keeps_previous_snapshot() {
    if should_skip_net() {
        eprintln!("skipping net-bound test");
        return;
    }
    let registry = standard_registry().await;
    let temp_dir = setup_test_env();
    let store = Arc::new(FailingStore::default());
    let cache = PackageCache::new(aggregator(temp_dir.path(), &registry), store.clone(), 50);

    let err = cache.refresh().await.unwrap_err();
    assert!(matches!(err, IgrError::Storage(StorageError::TransactionFailed { .. })));
    assert_eq!(store.writes.load(Ordering::SeqCst), 1);

    let snapshot = cache.snapshot().await;
    assert!(snapshot.packages.is_empty());
    assert!(snapshot.fetched_at.is_none());
}

/// Background refresh requests made while one is running are dropped
#[tokio::test]
async fn test_spawn_refresh_deduplicates() {
    if should_skip_net() {
        eprintln!("skipping net-bound test");
        return;
    }
    let mut registry = MockRegistry::new().await;
    registry.add_feed(MockFeed::new("slow", vec![feed_entry("acme.a", "1.0.0", "Acme")]));
    registry.with_feed_delay(Duration::from_millis(300));
    registry.setup_mocks().await;

    let temp_dir = setup_test_env();
    let store = sqlite_store(temp_dir.path(), &registry).await;
    let cache = Arc::new(PackageCache::new(aggregator(temp_dir.path(), &registry), store, 50));

    let handle = cache.spawn_refresh().expect("first refresh starts");
    assert!(cache.is_refreshing());
    assert!(cache.spawn_refresh().is_none());

    let report = handle.await.unwrap().unwrap();
    assert_eq!(report.packages, 1);
    assert!(!cache.is_refreshing());
    assert!(cache.spawn_refresh().is_some());
}

/// A panicking background refresh does not block later refreshes
#[tokio::test]
async fn test_spawn_refresh_recovers_after_panic() {
    if should_skip_net() {
        eprintln!("skipping net-bound test");
        return;
    }
    let registry = standard_registry().await;
    let temp_dir = setup_test_env();
    let cache = Arc::new(PackageCache::new(
        aggregator(temp_dir.path(), &registry),
        Arc::new(PanickingStore),
        50,
    ));

    let handle = cache.spawn_refresh().expect("first refresh starts");
    let join_error = handle.await.unwrap_err();
    assert!(join_error.is_panic());

    assert!(!cache.is_refreshing());
    let retry = cache.spawn_refresh().expect("refresh can start again");
    assert!(retry.await.unwrap_err().is_panic());
    assert!(cache.snapshot().await.packages.is_empty());
}

/// Cold start reads the store before touching the network
#[tokio::test]
async fn test_load_prefers_store() {
    if should_skip_net() {
        eprintln!("skipping net-bound test");
        return;
    }
    let registry = standard_registry().await;
    let temp_dir = setup_test_env();
    let store = sqlite_store(temp_dir.path(), &registry).await;
    PackageCache::new(aggregator(temp_dir.path(), &registry), store.clone(), 50)
        .refresh()
        .await
        .unwrap();
    let requests_after_refresh = registry.request_paths().await.len();

    let cache = PackageCache::new(aggregator(temp_dir.path(), &registry), store, 50);
    let snapshot = cache.load_or_refresh().await.unwrap();
    assert_eq!(snapshot.packages.len(), 2);
    assert!(snapshot.fetched_at.is_some());
    assert_eq!(registry.request_paths().await.len(), requests_after_refresh);
}

/// Search matches name or author and paginates
#[tokio::test]
async fn test_search_and_pagination() {
    if should_skip_net() {
        eprintln!("skipping net-bound test");
        return;
    }
    let mut registry = MockRegistry::new().await;
    let entries = (0..5)
        .map(|i| feed_entry(&format!("acme.pkg{i}"), "1.0.0", "Acme Corp"))
        .chain(std::iter::once(feed_entry("hl7.fhir.r4.core", "4.0.1", "HL7")))
        .collect();
    registry.add_feed(MockFeed::new("feed", entries));
    registry.setup_mocks().await;

    let temp_dir = setup_test_env();
    let store = sqlite_store(temp_dir.path(), &registry).await;
    let cache = PackageCache::new(aggregator(temp_dir.path(), &registry), store, 2);
    cache.refresh().await.unwrap();

    let page = cache.search("acme corp", 1).await;
    assert_eq!(page.total, 5);
    assert_eq!(page.items.len(), 2);
    assert_eq!(page.pages(), 3);
    assert!(page.has_next());

    let last = cache.search("ACME", 3).await;
    assert_eq!(last.items.len(), 1);
    assert_eq!(last.items[0].name, "acme.pkg4");
    assert!(!last.has_next());

    let beyond = cache.search("acme", usize::MAX).await;
    assert!(beyond.items.is_empty());
    assert_eq!(beyond.total, 5);
    assert!(!beyond.has_next());

    let everything = cache.search("", 1).await;
    assert_eq!(everything.total, 6);
    assert!(cache.search("r4.core", 1).await.items[0].name == "hl7.fhir.r4.core");
}
