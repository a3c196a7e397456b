//! Manifest access inside package archives

use crate::dependency::{DependencySpec, PackageDependency};
use crate::error::{PackageError, Result};
use flate2::read::GzDecoder;
use serde_json::Value;
use std::io::Read;
use std::path::{Path, PathBuf};
use tar::Archive;
use tracing::debug;

/// Archive member holding the package manifest.
pub const MANIFEST_ENTRY: &str = "package/package.json";

/// The parts of `package/package.json` this crate cares about.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PackageManifest {
    pub name: Option<String>,
    pub version: Option<String>,
    pub description: Option<String>,
    pub dependencies: Vec<PackageDependency>,
}

impl PackageManifest {
    /// Builds a manifest from parsed JSON. Unexpected field shapes are
    /// treated as absent.
    pub fn from_json(value: Value) -> std::result::Result<Self, PackageError> {
        let Value::Object(mut obj) = value else {
            return Err(PackageError::InvalidManifest {
                message: "manifest is not a JSON object".to_string(),
            });
        };

        let text = |v: Option<Value>| match v {
            Some(Value::String(s)) => Some(s),
            _ => None,
        };

        Ok(Self {
            name: text(obj.remove("name")),
            version: text(obj.remove("version")),
            description: text(obj.remove("description")),
            dependencies: obj
                .remove("dependencies")
                .map(DependencySpec::from_value)
                .unwrap_or_default()
                .into_dependencies(),
        })
    }
}

/// Reads and parses the manifest of a `.tgz` archive.
///
/// The archive is scanned on the blocking pool; only the manifest entry is
/// decoded.
pub async fn read_manifest(path: &Path) -> Result<PackageManifest> {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || read_manifest_blocking(&path))
        .await
        .map_err(|e| PackageError::ArchiveUnreadable {
            message: format!("Task join error: {e}"),
        })?
}

fn read_manifest_blocking(path: &PathBuf) -> Result<PackageManifest> {
    let file = std::fs::File::open(path)?;
    let reader = std::io::BufReader::new(file);
    let mut archive = Archive::new(GzDecoder::new(reader));

    let entries = archive
        .entries()
        .map_err(|e| PackageError::ArchiveUnreadable {
            message: format!("Failed to read archive entries: {e}"),
        })?;

    for entry in entries {
        let mut entry = entry.map_err(|e| PackageError::ArchiveUnreadable {
            message: format!("Invalid entry: {e}"),
        })?;
        let is_manifest = entry
            .path()
            .map(|p| p.to_string_lossy() == MANIFEST_ENTRY)
            .unwrap_or(false);
        if !is_manifest {
            continue;
        }

        let mut content = String::new();
        entry
            .read_to_string(&mut content)
            .map_err(|e| PackageError::ArchiveUnreadable {
                message: format!("Failed to read manifest: {e}"),
            })?;
        let value: Value =
            serde_json::from_str(&content).map_err(|e| PackageError::InvalidManifest {
                message: e.to_string(),
            })?;
        debug!("Read manifest from {}", path.display());
        return Ok(PackageManifest::from_json(value)?);
    }

    Err(PackageError::MissingManifest.into())
}
