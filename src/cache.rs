//! Package cache: persistence synchronization and the in-memory snapshot
//!
//! The read path always sees a complete [`CacheSnapshot`]. A refresh builds a
//! new snapshot off to the side (fetch, normalize, persist) and swaps the
//! shared reference only once everything succeeded. Refreshes are serialized;
//! [`PackageCache::spawn_refresh`] additionally drops requests made while one
//! is already running.

use crate::error::Result;
use crate::feed::RegistryAggregator;
use crate::normalizer::{NormalizedPackage, normalize};
use crate::traits::{PackageStore, UpsertReport};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// Writes normalized packages into the persistent store, all-or-nothing.
#[derive(Clone)]
pub struct CacheSynchronizer {
    store: Arc<dyn PackageStore>,
}

impl CacheSynchronizer {
    pub fn new(store: Arc<dyn PackageStore>) -> Self {
        Self { store }
    }

    /// Inserts or overwrites every package keyed by `(name, version)` in one
    /// transaction. On failure nothing is written and the error is returned.
    #[tracing::instrument(name = "cache.upsert", skip(self, packages), fields(count = packages.len()))]
    pub async fn upsert(&self, packages: &[NormalizedPackage]) -> Result<UpsertReport> {
        self.store.upsert(packages).await.inspect_err(|e| {
            error!("Error caching packages: {}", e);
        })
    }

    /// Rewrites the store with `packages` and records the fetch time, in one
    /// transaction.
    pub async fn replace(
        &self,
        packages: &[NormalizedPackage],
        fetched_at: DateTime<Utc>,
    ) -> Result<UpsertReport> {
        self.store
            .replace_all(packages, fetched_at)
            .await
            .inspect_err(|e| {
                error!("Error replacing cached packages: {}", e);
            })
    }

    pub fn store(&self) -> &Arc<dyn PackageStore> {
        &self.store
    }
}

/// Immutable view of the cached package list.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CacheSnapshot {
    pub packages: Vec<NormalizedPackage>,
    pub fetched_at: Option<DateTime<Utc>>,
    /// Set when the last refresh could not reach any feed.
    pub fetch_failed: bool,
}

impl CacheSnapshot {
    fn is_loaded(&self) -> bool {
        self.fetched_at.is_some() || !self.packages.is_empty()
    }
}

/// Summary of one refresh run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshReport {
    pub raw_entries: usize,
    pub packages: usize,
    pub fetch_failed: bool,
    pub fetched_at: DateTime<Utc>,
}

/// One page of search results.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PackagePage {
    pub items: Vec<NormalizedPackage>,
    pub page: usize,
    pub per_page: usize,
    pub total: usize,
}

impl PackagePage {
    pub fn pages(&self) -> usize {
        self.total.div_ceil(self.per_page.max(1))
    }

    pub fn has_prev(&self) -> bool {
        self.page > 1
    }

    pub fn has_next(&self) -> bool {
        self.page < self.pages()
    }
}

/// Clears the background-refresh flag when dropped, including on panic.
struct RefreshFlag<'a>(&'a AtomicBool);

impl Drop for RefreshFlag<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Index of the first item on a 1-based `page`.
fn page_offset(page: usize, per_page: usize) -> usize {
    page.saturating_sub(1).saturating_mul(per_page)
}

pub struct PackageCache {
    aggregator: RegistryAggregator,
    synchronizer: CacheSynchronizer,
    snapshot: RwLock<Arc<CacheSnapshot>>,
    refresh_lock: Mutex<()>,
    refreshing: AtomicBool,
    per_page: usize,
}

impl PackageCache {
    pub fn new(aggregator: RegistryAggregator, store: Arc<dyn PackageStore>, per_page: usize) -> Self {
        Self {
            aggregator,
            synchronizer: CacheSynchronizer::new(store),
            snapshot: RwLock::new(Arc::new(CacheSnapshot::default())),
            refresh_lock: Mutex::new(()),
            refreshing: AtomicBool::new(false),
            per_page: per_page.max(1),
        }
    }

    /// Current snapshot. Cheap: clones the shared reference.
    pub async fn snapshot(&self) -> Arc<CacheSnapshot> {
        self.snapshot.read().await.clone()
    }

    async fn swap(&self, next: CacheSnapshot) {
        *self.snapshot.write().await = Arc::new(next);
    }

    pub fn aggregator(&self) -> &RegistryAggregator {
        &self.aggregator
    }

    pub fn synchronizer(&self) -> &CacheSynchronizer {
        &self.synchronizer
    }

    /// Runs a full refresh: fetch every feed, normalize, persist, swap.
    ///
    /// When no feed yields any entry the snapshot becomes empty with
    /// `fetch_failed` set and the store is left untouched. When persisting
    /// fails the previous snapshot stays in place and the error is returned.
    #[tracing::instrument(name = "cache.refresh", skip(self))]
    pub async fn refresh(&self) -> Result<RefreshReport> {
        let _guard = self.refresh_lock.lock().await;
        info!("Refreshing package cache from registry feeds");

        let raw = self.aggregator.fetch_all("").await;
        let fetched_at = Utc::now();

        if raw.is_empty() {
            warn!("No packages fetched from any registry feed");
            self.swap(CacheSnapshot {
                packages: Vec::new(),
                fetched_at: Some(fetched_at),
                fetch_failed: true,
            })
            .await;
            return Ok(RefreshReport {
                raw_entries: 0,
                packages: 0,
                fetch_failed: true,
                fetched_at,
            });
        }

        let packages = normalize(&raw);
        let report = self.synchronizer.replace(&packages, fetched_at).await?;
        info!(
            "Cached {} packages from {} raw entries ({} inserted)",
            packages.len(),
            raw.len(),
            report.inserted
        );

        let count = packages.len();
        self.swap(CacheSnapshot {
            packages,
            fetched_at: Some(fetched_at),
            fetch_failed: false,
        })
        .await;

        Ok(RefreshReport {
            raw_entries: raw.len(),
            packages: count,
            fetch_failed: false,
            fetched_at,
        })
    }

    /// Starts a refresh on a background task. Returns `None` when a
    /// background refresh is already running.
    pub fn spawn_refresh(self: &Arc<Self>) -> Option<JoinHandle<Result<RefreshReport>>> {
        if self.refreshing.swap(true, Ordering::AcqRel) {
            info!("Refresh already in progress, skipping");
            return None;
        }
        let cache = Arc::clone(self);
        Some(tokio::spawn(async move {
            let _flag = RefreshFlag(&cache.refreshing);
            let result = cache.refresh().await;
            if let Err(e) = &result {
                error!("Background refresh failed: {}", e);
            }
            result
        }))
    }

    pub fn is_refreshing(&self) -> bool {
        self.refreshing.load(Ordering::Acquire)
    }

    /// Returns the loaded snapshot, filling it from the store first and from
    /// the feeds when the store is empty.
    pub async fn load_or_refresh(&self) -> Result<Arc<CacheSnapshot>> {
        let current = self.snapshot().await;
        if current.is_loaded() {
            return Ok(current);
        }

        let stored = self.synchronizer.store().query_all().await?;
        if !stored.is_empty() {
            let fetched_at = self.synchronizer.store().last_fetch().await?;
            info!("Loaded {} packages from the store", stored.len());
            self.swap(CacheSnapshot {
                packages: stored,
                fetched_at,
                fetch_failed: false,
            })
            .await;
            return Ok(self.snapshot().await);
        }

        info!("Store is empty, fetching from registry feeds");
        self.refresh().await?;
        Ok(self.snapshot().await)
    }

    /// Case-insensitive substring search on name or author, 1-based pages.
    pub async fn search(&self, term: &str, page: usize) -> PackagePage {
        let snapshot = self.snapshot().await;
        let needle = term.trim().to_lowercase();
        let matches: Vec<&NormalizedPackage> = snapshot
            .packages
            .iter()
            .filter(|p| {
                needle.is_empty()
                    || p.name.to_lowercase().contains(&needle)
                    || p.author.to_lowercase().contains(&needle)
            })
            .collect();

        let page = page.max(1);
        let items = matches
            .iter()
            .skip(page_offset(page, self.per_page))
            .take(self.per_page)
            .map(|p| (*p).clone())
            .collect();

        PackagePage {
            items,
            page,
            per_page: self.per_page,
            total: matches.len(),
        }
    }

    /// Case-insensitive exact-name lookup in the snapshot.
    pub async fn find(&self, name: &str) -> Option<NormalizedPackage> {
        self.snapshot()
            .await
            .packages
            .iter()
            .find(|p| p.name.eq_ignore_ascii_case(name))
            .cloned()
    }
}
