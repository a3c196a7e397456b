//! Dependency resolution and archive download
//!
//! [`DependencyResolver::resolve`] makes sure the archive of a requested
//! package exists in the local package directory, reads its manifest and, in
//! [`DependencyMode::Recursive`], walks the declared dependency graph. Every
//! node-level failure is collected into [`ImportResult::errors`]; no single
//! failure aborts the run.
//!
//! The walk is iterative with a visited set, so cycles terminate and stack
//! depth stays bounded.

use crate::archive::read_manifest;
use crate::config::RegistryConfig;
use crate::dependency::PackageDependency;
use crate::error::{ConfigError, IgrError, PackageError, RegistryError};
use crate::filename::encode_filename;
use dashmap::DashMap;
use futures_util::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use url::Url;

/// How aggressively transitive dependencies are pulled.
///
/// Only `Recursive` descends into dependencies. `PatchCanonical` and
/// `TreeShaking` are accepted and perform a flat import: the requested
/// archive is downloaded and its declared dependencies are reported in
/// [`ImportResult::dependencies`] without being fetched.
///
/// ```rust
/// use octofhir_ig_registry::resolver::DependencyMode;
///
/// let mode: DependencyMode = "tree-shaking".parse().unwrap();
/// assert!(!mode.descends());
/// assert!(DependencyMode::default().descends());
/// assert_eq!(mode.to_string(), "tree-shaking");
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DependencyMode {
    #[default]
    Recursive,
    PatchCanonical,
    TreeShaking,
}

impl DependencyMode {
    pub const ALL: [DependencyMode; 3] = [
        DependencyMode::Recursive,
        DependencyMode::PatchCanonical,
        DependencyMode::TreeShaking,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DependencyMode::Recursive => "recursive",
            DependencyMode::PatchCanonical => "patch-canonical",
            DependencyMode::TreeShaking => "tree-shaking",
        }
    }

    /// Whether declared dependencies are fetched as well.
    pub fn descends(&self) -> bool {
        matches!(self, DependencyMode::Recursive)
    }
}

impl fmt::Display for DependencyMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DependencyMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|mode| mode.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| ConfigError::InvalidValue {
                key: "dependency_mode".to_string(),
                value: s.to_string(),
            })
    }
}

/// `(name, version)` identity of one package archive.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PackageKey {
    pub name: String,
    pub version: String,
}

impl PackageKey {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
        }
    }
}

impl From<&PackageDependency> for PackageKey {
    fn from(dep: &PackageDependency) -> Self {
        Self::new(dep.name.clone(), dep.version.clone())
    }
}

impl fmt::Display for PackageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.name, self.version)
    }
}

/// How a resolution run ended, from the caller's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportOutcome {
    Success,
    /// Something was downloaded but at least one node failed.
    PartialSuccess,
    /// Nothing was downloaded and at least one node failed.
    Failure,
}

/// Result of one resolution run rooted at `requested`.
#[derive(Debug, Clone)]
pub struct ImportResult {
    pub requested: PackageKey,
    pub downloaded: BTreeMap<PackageKey, PathBuf>,
    /// Every dependency pair declared in the traversed graph, in post-order.
    /// Duplicates are kept.
    pub dependencies: Vec<PackageDependency>,
    pub errors: Vec<String>,
}

impl ImportResult {
    fn new(requested: PackageKey) -> Self {
        Self {
            requested,
            downloaded: BTreeMap::new(),
            dependencies: Vec::new(),
            errors: Vec::new(),
        }
    }

    pub fn outcome(&self) -> ImportOutcome {
        match (self.downloaded.is_empty(), self.errors.is_empty()) {
            (_, true) => ImportOutcome::Success,
            (true, false) => ImportOutcome::Failure,
            (false, false) => ImportOutcome::PartialSuccess,
        }
    }

    /// Short, user-facing explanation of the first error.
    pub fn failure_summary(&self) -> Option<String> {
        self.errors.first().map(|error| summarize_error(error))
    }

    /// One-line report of the run.
    pub fn message(&self) -> String {
        let key = &self.requested;
        match self.outcome() {
            ImportOutcome::Success => format!("Successfully imported {key}!"),
            ImportOutcome::PartialSuccess => {
                format!("Partially imported {key} with errors.")
            }
            ImportOutcome::Failure => format!(
                "Failed to import {key}: {}",
                self.failure_summary().unwrap_or_default()
            ),
        }
    }
}

fn summarize_error(error: &str) -> String {
    if error.contains("HTTP error") && error.contains("404") {
        "Package not found (404).".to_string()
    } else if error.contains("HTTP error") {
        let detail = error.split_once(": ").map_or(error, |(_, rest)| rest);
        format!("Registry error: {detail}")
    } else if error.contains("Connection error") {
        "Could not connect to registry.".to_string()
    } else {
        error.to_string()
    }
}

struct Frame {
    pending: std::vec::IntoIter<PackageDependency>,
    /// Pair appended to the trace once this node's subtree is done.
    via: Option<PackageDependency>,
}

/// Downloads package archives into a local directory and walks their
/// declared dependencies.
pub struct DependencyResolver {
    client: Client,
    base_url: String,
    packages_dir: PathBuf,
    download_timeout: Duration,
    in_flight: DashMap<PackageKey, Arc<Mutex<()>>>,
}

impl DependencyResolver {
    pub fn new(config: &RegistryConfig, packages_dir: PathBuf) -> crate::error::Result<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10).min(config.download_timeout()))
            .user_agent(&config.user_agent)
            .build()?;
        Ok(Self {
            client,
            base_url: config.package_base_url.clone(),
            packages_dir,
            download_timeout: config.download_timeout(),
            in_flight: DashMap::new(),
        })
    }

    pub fn packages_dir(&self) -> &Path {
        &self.packages_dir
    }

    /// Resolves `name#version` and, depending on `mode`, its dependencies.
    #[tracing::instrument(name = "resolver.resolve", skip(self))]
    pub async fn resolve(&self, name: &str, version: &str, mode: DependencyMode) -> ImportResult {
        let root = PackageKey::new(name, version);
        let mut result = ImportResult::new(root.clone());
        let mut visited: HashSet<PackageKey> = HashSet::new();

        if !mode.descends() {
            info!(
                "Dependency mode '{}' does not descend, importing {} without its dependencies",
                mode, root
            );
        }

        visited.insert(root.clone());
        let Some(root_deps) = self.visit(&root, &mut result).await else {
            return result;
        };

        let mut stack = vec![Frame {
            pending: root_deps.into_iter(),
            via: None,
        }];

        while let Some(frame) = stack.last_mut() {
            let Some(dep) = frame.pending.next() else {
                if let Some(done) = stack.pop()
                    && let Some(via) = done.via
                {
                    result.dependencies.push(via);
                }
                continue;
            };

            let key = PackageKey::from(&dep);
            if !mode.descends() || !visited.insert(key.clone()) {
                result.dependencies.push(dep);
                continue;
            }

            let child_deps = self.visit(&key, &mut result).await.unwrap_or_default();
            stack.push(Frame {
                pending: child_deps.into_iter(),
                via: Some(dep),
            });
        }

        info!(
            "Resolved {}: {} downloaded, {} dependencies, {} errors",
            root,
            result.downloaded.len(),
            result.dependencies.len(),
            result.errors.len()
        );
        result
    }

    /// Makes one archive available and returns its declared dependencies.
    /// Failures are recorded in `result` and yield `None`.
    async fn visit(
        &self,
        key: &PackageKey,
        result: &mut ImportResult,
    ) -> Option<Vec<PackageDependency>> {
        let Some(filename) = encode_filename(&key.name, &key.version) else {
            result.errors.push(
                PackageError::InvalidFilename {
                    name: key.name.clone(),
                    version: key.version.clone(),
                }
                .to_string(),
            );
            return None;
        };
        let path = self.packages_dir.join(filename);

        if let Err(error) = self.ensure_archive(key, &path).await {
            warn!("Failed to fetch {}: {}", key, error);
            result.errors.push(error);
            return None;
        }
        result.downloaded.insert(key.clone(), path.clone());

        match read_manifest(&path).await {
            Ok(manifest) => Some(manifest.dependencies),
            Err(IgrError::Package(PackageError::MissingManifest)) => {
                debug!("{} has no package/package.json", key);
                Some(Vec::new())
            }
            Err(e) => {
                warn!("Failed to read manifest of {}: {}", key, e);
                result.errors.push(format!("Error importing {key}: {e}"));
                None
            }
        }
    }

    /// Downloads the archive unless it already exists. Concurrent calls for
    /// the same key wait for each other instead of downloading twice.
    async fn ensure_archive(&self, key: &PackageKey, path: &Path) -> Result<(), String> {
        let lock = self
            .in_flight
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let outcome = {
            let _guard = lock.lock().await;
            if fs::try_exists(path).await.unwrap_or(false) {
                info!("Package {} already exists at {}", key, path.display());
                Ok(())
            } else {
                self.download(key, path).await
            }
        };
        drop(lock);
        self.in_flight
            .remove_if(key, |_, lock| Arc::strong_count(lock) == 1);
        outcome
    }

    async fn download(&self, key: &PackageKey, path: &Path) -> Result<(), String> {
        let url = self
            .download_url(key)
            .map_err(|e| format!("Error importing {key}: {e}"))?;
        fs::create_dir_all(&self.packages_dir)
            .await
            .map_err(|e| format!("Error importing {key}: {e}"))?;

        debug!("Downloading {} from {}", key, url);
        let response = self
            .client
            .get(url.clone())
            .timeout(self.download_timeout)
            .send()
            .await
            .map_err(|e| format!("Connection error downloading {key}: {e}"))?;

        let status = response.status();
        if !status.is_success() {
            let error = RegistryError::HttpStatus {
                status: status.as_u16(),
                url: url.to_string(),
            };
            return Err(format!("HTTP error downloading {key}: {error}"));
        }

        let part_path = part_path(path);
        if let Err(error) = write_body(response, &part_path, key).await {
            let _ = fs::remove_file(&part_path).await;
            return Err(error);
        }
        fs::rename(&part_path, path)
            .await
            .map_err(|e| format!("Error importing {key}: {e}"))?;

        info!("Downloaded {} to {}", key, path.display());
        Ok(())
    }

    fn download_url(&self, key: &PackageKey) -> Result<Url, ConfigError> {
        let invalid = || ConfigError::InvalidUrl {
            key: "package_base_url".to_string(),
            url: self.base_url.clone(),
        };
        let mut url = Url::parse(&self.base_url).map_err(|_| invalid())?;
        url.path_segments_mut()
            .map_err(|_| invalid())?
            .pop_if_empty()
            .push(&key.name)
            .push(&key.version);
        Ok(url)
    }
}

fn part_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".part");
    path.with_file_name(name)
}

async fn write_body(
    response: reqwest::Response,
    part_path: &Path,
    key: &PackageKey,
) -> Result<(), String> {
    let mut file = fs::File::create(part_path)
        .await
        .map_err(|e| format!("Error importing {key}: {e}"))?;
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| format!("Connection error downloading {key}: {e}"))?;
        file.write_all(&chunk)
            .await
            .map_err(|e| format!("Error importing {key}: {e}"))?;
    }
    file.flush()
        .await
        .map_err(|e| format!("Error importing {key}: {e}"))
}
