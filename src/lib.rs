//! # FHIR IG Registry
//!
//! Aggregates FHIR Implementation Guide registry feeds into one normalized,
//! searchable package list and resolves package dependency graphs into a
//! local archive store.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use octofhir_ig_registry::{DependencyMode, IgrConfig, PackageRequest, RegistryManager};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = IgrConfig::load().await?;
//!     let manager = RegistryManager::new(config).await?;
//!
//!     // Rebuild the package cache from every registry feed
//!     manager.refresh().await?;
//!
//!     // Download a package together with its dependencies
//!     let request = PackageRequest::new("hl7.fhir.au.core", "1.1.0-preview")
//!         .with_mode(DependencyMode::Recursive);
//!     let result = manager.import(&request).await?;
//!     println!("{}", result.message());
//!
//!     Ok(())
//! }
//! ```
//!
//! The building blocks are usable on their own: [`version::OrderedVersion`]
//! orders registry version strings, [`filename`] maps packages to archive
//! names, [`feed::RegistryAggregator`] fetches feeds, [`normalizer::normalize`]
//! reconciles raw entries, [`cache::PackageCache`] holds the snapshot and
//! [`resolver::DependencyResolver`] downloads archives.

pub mod archive;
pub mod cache;
pub mod config;
pub mod dependency;
pub mod error;
pub mod feed;
pub mod filename;
pub mod introspector;
pub mod manager;
pub mod normalizer;
pub mod resolver;
pub mod sqlite_storage;
pub mod traits;
pub mod version;

#[cfg(feature = "cli")]
pub mod cli;

#[cfg(feature = "cli")]
pub mod cli_error;

#[cfg(feature = "cli")]
pub mod output;

pub use cache::{CacheSnapshot, CacheSynchronizer, PackageCache, PackagePage, RefreshReport};
pub use config::{CacheConfig, IgrConfig, PackageRequest, RegistryConfig, StorageConfig};
pub use dependency::{DependencySpec, PackageDependency};
pub use error::{IgrError, Result};
pub use feed::{RawPackageEntry, RegistryAggregator, RegistryFeed, VersionEntry};
pub use introspector::PackageIntrospector;
pub use manager::{DetailSource, PackageDetails, RegistryManager};
pub use normalizer::{NormalizedPackage, normalize};
pub use resolver::{DependencyMode, DependencyResolver, ImportOutcome, ImportResult, PackageKey};
pub use sqlite_storage::SqliteStore;
pub use traits::{PackageStore, UpsertReport};
pub use version::OrderedVersion;
