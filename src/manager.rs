//! Registry manager: one entry point wiring every component from a config

use crate::cache::{CacheSnapshot, PackageCache, PackagePage, RefreshReport};
use crate::config::{IgrConfig, PackageRequest};
use crate::error::{IgrError, Result, Validate};
use crate::feed::{RegistryAggregator, VersionEntry};
use crate::introspector::PackageIntrospector;
use crate::normalizer::{NormalizedPackage, normalize};
use crate::resolver::{DependencyResolver, ImportResult, PackageKey};
use crate::sqlite_storage::SqliteStore;
use crate::traits::PackageStore;
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info};

/// Where a package detail record was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DetailSource {
    Snapshot,
    Store,
    Registry,
}

/// Everything the detail view of one package needs.
#[derive(Debug, Clone, Serialize)]
pub struct PackageDetails {
    pub package: NormalizedPackage,
    /// Description read from the local archive of the latest version, or a
    /// message explaining why none is available.
    pub description: String,
    /// Version history, highest version first.
    pub versions: Vec<VersionEntry>,
    pub source: DetailSource,
}

/// High-level interface over the package cache, the resolver and the local
/// archive store.
///
/// ```rust,no_run
/// use octofhir_ig_registry::{IgrConfig, RegistryManager};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let manager = RegistryManager::new(IgrConfig::load().await?).await?;
/// manager.refresh().await?;
/// let page = manager.search("us.core", 1).await;
/// println!("{} matches", page.total);
/// # Ok(())
/// # }
/// ```
pub struct RegistryManager {
    config: IgrConfig,
    cache: Arc<PackageCache>,
    resolver: DependencyResolver,
    introspector: PackageIntrospector,
}

impl RegistryManager {
    /// Builds every component from `config`, opening the SQLite store.
    pub async fn new(config: IgrConfig) -> Result<Self> {
        config.validate()?;
        let storage = config.get_expanded_storage_config();
        let store: Arc<dyn PackageStore> = Arc::new(SqliteStore::new(&storage).await?);
        Self::with_store(config, store)
    }

    /// Builds the manager on top of an existing store.
    pub fn with_store(config: IgrConfig, store: Arc<dyn PackageStore>) -> Result<Self> {
        let storage = config.get_expanded_storage_config();
        let aggregator = RegistryAggregator::new(&config.registry)?;
        let cache = Arc::new(PackageCache::new(aggregator, store, config.cache.per_page));
        let resolver = DependencyResolver::new(&config.registry, storage.packages_dir.clone())?;
        let introspector = PackageIntrospector::new(storage.packages_dir);

        info!("Registry manager initialized");
        Ok(Self {
            config,
            cache,
            resolver,
            introspector,
        })
    }

    pub fn config(&self) -> &IgrConfig {
        &self.config
    }

    pub fn cache(&self) -> &Arc<PackageCache> {
        &self.cache
    }

    pub fn resolver(&self) -> &DependencyResolver {
        &self.resolver
    }

    pub fn introspector(&self) -> &PackageIntrospector {
        &self.introspector
    }

    pub async fn refresh(&self) -> Result<RefreshReport> {
        self.cache.refresh().await
    }

    pub async fn load(&self) -> Result<Arc<CacheSnapshot>> {
        self.cache.load_or_refresh().await
    }

    pub async fn search(&self, term: &str, page: usize) -> PackagePage {
        self.cache.search(term, page).await
    }

    /// Detail record for `name`: snapshot first, then the store, then a live
    /// feed lookup. `None` when no source knows the package.
    #[tracing::instrument(name = "manager.package_details", skip(self))]
    pub async fn package_details(&self, name: &str) -> Result<Option<PackageDetails>> {
        let (package, source) = match self.cache.find(name).await {
            Some(package) => (Some(package), DetailSource::Snapshot),
            None => match self.stored_package(name).await {
                Some(package) => (Some(package), DetailSource::Store),
                None => (self.live_package(name).await, DetailSource::Registry),
            },
        };

        let Some(package) = package else {
            info!("Package {} not found", name);
            return Ok(None);
        };

        let description = self
            .introspector
            .describe(&package.name, &package.latest_absolute_version)
            .await;
        let versions = package.versions_sorted();
        Ok(Some(PackageDetails {
            package,
            description,
            versions,
            source,
        }))
    }

    async fn stored_package(&self, name: &str) -> Option<NormalizedPackage> {
        match self.cache.synchronizer().store().find_by_name(name).await {
            Ok(mut rows) if !rows.is_empty() => Some(rows.swap_remove(0)),
            Ok(_) => None,
            Err(e) => {
                error!("Database error querying package '{}': {}", name, e);
                None
            }
        }
    }

    async fn live_package(&self, name: &str) -> Option<NormalizedPackage> {
        let raw = self.cache.aggregator().fetch_all(name).await;
        normalize(&raw)
            .into_iter()
            .find(|p| p.name.eq_ignore_ascii_case(name))
    }

    /// Validates the request and resolves it. Resolution problems end up in
    /// [`ImportResult::errors`]; only an invalid request is an `Err`.
    #[tracing::instrument(name = "manager.import", skip(self), fields(package = %request.name, version = %request.version))]
    pub async fn import(&self, request: &PackageRequest) -> Result<ImportResult> {
        request.validate().map_err(IgrError::from)?;
        let result = self
            .resolver
            .resolve(&request.name, &request.version, request.mode)
            .await;
        info!("{}", result.message());
        Ok(result)
    }

    pub async fn describe(&self, name: &str, version: &str) -> String {
        self.introspector.describe(name, version).await
    }

    pub async fn list_local(&self) -> Result<Vec<PackageKey>> {
        self.introspector.list_local().await
    }
}
