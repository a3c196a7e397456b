//! Metadata queries against locally stored archives

use crate::archive::{PackageManifest, read_manifest};
use crate::error::{IgrError, PackageError, Result};
use crate::filename::{ARCHIVE_EXTENSION, decode_filename, encode_filename};
use crate::resolver::PackageKey;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, warn};

pub const DESCRIPTION_NOT_FOUND: &str = "No description found.";

/// Reads manifests from the archive directory without touching the network.
#[derive(Debug, Clone)]
pub struct PackageIntrospector {
    packages_dir: PathBuf,
}

impl PackageIntrospector {
    pub fn new(packages_dir: PathBuf) -> Self {
        Self { packages_dir }
    }

    pub fn packages_dir(&self) -> &Path {
        &self.packages_dir
    }

    /// Local path the archive of `name#version` would live at.
    pub fn archive_path(&self, name: &str, version: &str) -> Option<PathBuf> {
        encode_filename(name, version).map(|filename| self.packages_dir.join(filename))
    }

    /// Description from the package manifest. Never fails: problems are
    /// reported as a descriptive string.
    #[tracing::instrument(name = "introspector.describe", skip(self))]
    pub async fn describe(&self, name: &str, version: &str) -> String {
        let Some(path) = self.archive_path(name, version) else {
            return "Error: Could not construct filename.".to_string();
        };
        if !fs::try_exists(&path).await.unwrap_or(false) {
            return "Error: Package file not found.".to_string();
        }

        match read_manifest(&path).await {
            Ok(manifest) => manifest
                .description
                .unwrap_or_else(|| DESCRIPTION_NOT_FOUND.to_string()),
            Err(IgrError::Package(PackageError::MissingManifest)) => {
                "Error: package.json not found.".to_string()
            }
            Err(e) => {
                warn!("Error reading package details for {}#{}: {}", name, version, e);
                format!("Error reading package details: {e}")
            }
        }
    }

    /// Parsed manifest of a stored archive, or `None` when the archive is
    /// absent or unreadable.
    pub async fn manifest(&self, name: &str, version: &str) -> Option<PackageManifest> {
        let path = self.archive_path(name, version)?;
        match read_manifest(&path).await {
            Ok(manifest) => Some(manifest),
            Err(e) => {
                debug!("No manifest for {}#{}: {}", name, version, e);
                None
            }
        }
    }

    /// Every archive in the package directory, decoded from its filename.
    /// A missing directory yields an empty list.
    pub async fn list_local(&self) -> Result<Vec<PackageKey>> {
        if !fs::try_exists(&self.packages_dir).await.unwrap_or(false) {
            return Ok(Vec::new());
        }

        let mut entries = fs::read_dir(&self.packages_dir).await?;
        let mut packages = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let filename = entry.file_name().to_string_lossy().into_owned();
            if !filename.ends_with(ARCHIVE_EXTENSION) || !entry.file_type().await?.is_file() {
                continue;
            }
            let (name, version) = decode_filename(&filename);
            packages.push(PackageKey::new(name, version));
        }
        packages.sort();
        Ok(packages)
    }
}
