//! Configuration management for the IG registry aggregator

use crate::error::{ConfigError, Result, Validate};
use crate::resolver::DependencyMode;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::time::Duration;

/// Main configuration structure.
///
/// Loaded from `igr.toml` in the working directory when present, then patched
/// with `IGR_*` environment variables.
///
/// # Example
///
/// ```rust,no_run
/// use octofhir_ig_registry::config::IgrConfig;
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let config = IgrConfig::load().await?;
/// println!("Feed index: {}", config.registry.feed_index_url);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct IgrConfig {
    #[serde(default)]
    pub registry: RegistryConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub cache: CacheConfig,
}

/// Upstream endpoints and per-request timeouts (seconds).
///
/// # Example
///
/// ```rust
/// use octofhir_ig_registry::config::RegistryConfig;
///
/// let config = RegistryConfig {
///     package_base_url: "https://packages.fhir.org".to_string(),
///     ..RegistryConfig::default()
/// };
/// assert_eq!(config.download_timeout, 30);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
    #[serde(default = "default_feed_index_url")]
    pub feed_index_url: String,
    #[serde(default = "default_package_base_url")]
    pub package_base_url: String,
    #[serde(default = "default_feed_index_timeout")]
    pub feed_index_timeout: u64,
    #[serde(default = "default_feed_timeout")]
    pub feed_timeout: u64,
    #[serde(default = "default_download_timeout")]
    pub download_timeout: u64,
    #[serde(default = "default_max_concurrent_feeds")]
    pub max_concurrent_feeds: usize,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

/// Local archive store and metadata database locations.
///
/// Paths may start with `~`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub packages_dir: PathBuf,
    pub database_path: PathBuf,
    #[serde(default = "default_connection_pool_size")]
    pub connection_pool_size: usize,
}

/// Read-path settings for the in-memory snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Page size used by snapshot searches.
    #[serde(default = "default_per_page")]
    pub per_page: usize,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            feed_index_url: default_feed_index_url(),
            package_base_url: default_package_base_url(),
            feed_index_timeout: default_feed_index_timeout(),
            feed_timeout: default_feed_timeout(),
            download_timeout: default_download_timeout(),
            max_concurrent_feeds: default_max_concurrent_feeds(),
            user_agent: default_user_agent(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        let home_dir = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
        let igr_dir = home_dir.join(".igr");

        Self {
            packages_dir: igr_dir.join("fhir_packages"),
            database_path: igr_dir.join("registry.db"),
            connection_pool_size: default_connection_pool_size(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            per_page: default_per_page(),
        }
    }
}

impl RegistryConfig {
    pub fn feed_index_timeout(&self) -> Duration {
        Duration::from_secs(self.feed_index_timeout)
    }

    pub fn feed_timeout(&self) -> Duration {
        Duration::from_secs(self.feed_timeout)
    }

    pub fn download_timeout(&self) -> Duration {
        Duration::from_secs(self.download_timeout)
    }
}

impl IgrConfig {
    /// Loads configuration from `igr.toml` in the current directory, falling
    /// back to defaults. Environment overrides are applied in both cases.
    pub async fn load() -> Result<Self> {
        let config_path = Self::default_config_path();
        let mut config = if config_path.exists() {
            Self::from_file(&config_path).await?
        } else {
            Self::default()
        };
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Loads and validates configuration from a specific TOML file.
    pub async fn from_file(path: &Path) -> Result<Self> {
        let path_clone = path.to_path_buf();
        let content = tokio::task::spawn_blocking(move || {
            std::fs::read_to_string(&path_clone)
                .map_err(|_| ConfigError::InvalidFile { path: path_clone })
        })
        .await
        .map_err(std::io::Error::other)??;

        let config: Self = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn default_config_path() -> PathBuf {
        std::env::current_dir()
            .unwrap_or_else(|_| PathBuf::from("."))
            .join("igr.toml")
    }

    /// Validates the whole configuration.
    pub fn validate(&self) -> Result<()> {
        <Self as Validate>::validate(self).map_err(|e| e.into())
    }

    /// Applies environment variable overrides:
    /// - `IGR_FEED_INDEX_URL`
    /// - `IGR_PACKAGE_BASE_URL`
    /// - `IGR_PACKAGES_DIR`
    /// - `IGR_DATABASE_PATH`
    pub fn apply_env_overrides(&mut self) {
        if let Ok(url) = std::env::var("IGR_FEED_INDEX_URL") {
            self.registry.feed_index_url = url;
        }

        if let Ok(url) = std::env::var("IGR_PACKAGE_BASE_URL") {
            self.registry.package_base_url = url;
        }

        if let Ok(dir) = std::env::var("IGR_PACKAGES_DIR") {
            self.storage.packages_dir = PathBuf::from(dir);
        }

        if let Ok(path) = std::env::var("IGR_DATABASE_PATH") {
            self.storage.database_path = PathBuf::from(path);
        }
    }

    /// Writes the default configuration to `path`, refusing to overwrite.
    pub async fn create_default_config(path: &Path) -> Result<()> {
        if path.exists() {
            return Err(ConfigError::ValidationFailed {
                message: format!("Configuration file already exists: {}", path.display()),
            }
            .into());
        }

        let toml_content = toml::to_string_pretty(&Self::default())?;
        tokio::fs::write(path, toml_content).await?;
        Ok(())
    }

    fn expand_path(path: &Path) -> PathBuf {
        if path.starts_with("~")
            && let Some(home_dir) = dirs::home_dir()
        {
            let path_str = path.to_string_lossy();
            let expanded = path_str.replacen('~', home_dir.to_string_lossy().as_ref(), 1);
            return PathBuf::from(expanded);
        }
        path.to_path_buf()
    }

    /// Returns storage configuration with `~` expanded.
    pub fn get_expanded_storage_config(&self) -> StorageConfig {
        StorageConfig {
            packages_dir: Self::expand_path(&self.storage.packages_dir),
            database_path: Self::expand_path(&self.storage.database_path),
            connection_pool_size: self.storage.connection_pool_size,
        }
    }

    /// Configuration rooted in a scratch directory, pointing at local endpoints.
    pub fn for_directory(root: &Path, feed_index_url: &str, package_base_url: &str) -> Self {
        Self {
            registry: RegistryConfig {
                feed_index_url: feed_index_url.to_string(),
                package_base_url: package_base_url.to_string(),
                feed_index_timeout: 5,
                feed_timeout: 5,
                download_timeout: 5,
                ..RegistryConfig::default()
            },
            storage: StorageConfig {
                packages_dir: root.join("fhir_packages"),
                database_path: root.join("registry.db"),
                connection_pool_size: 2,
            },
            cache: CacheConfig::default(),
        }
    }
}

fn default_feed_index_url() -> String {
    "https://raw.githubusercontent.com/FHIR/ig-registry/master/package-feeds.json".to_string()
}
fn default_package_base_url() -> String {
    "https://packages.fhir.org".to_string()
}
fn default_feed_index_timeout() -> u64 {
    15
}
fn default_feed_timeout() -> u64 {
    30
}
fn default_download_timeout() -> u64 {
    30
}
fn default_max_concurrent_feeds() -> usize {
    4
}
fn default_user_agent() -> String {
    format!("octofhir-ig-registry/{}", env!("CARGO_PKG_VERSION"))
}
fn default_connection_pool_size() -> usize {
    4
}
fn default_per_page() -> usize {
    50
}

fn validate_http_url(key: &str, value: &str) -> std::result::Result<(), ConfigError> {
    let invalid = || ConfigError::InvalidUrl {
        key: key.to_string(),
        url: value.to_string(),
    };
    let parsed = url::Url::parse(value).map_err(|_| invalid())?;
    if parsed.scheme() != "http" && parsed.scheme() != "https" {
        return Err(invalid());
    }
    Ok(())
}

fn validate_timeout(key: &str, value: u64) -> std::result::Result<(), ConfigError> {
    if value == 0 || value > 300 {
        return Err(ConfigError::InvalidValue {
            key: key.to_string(),
            value: format!("{value} (expected 1..=300 seconds)"),
        });
    }
    Ok(())
}

impl Validate for IgrConfig {
    type Error = ConfigError;

    fn validate(&self) -> std::result::Result<(), Self::Error> {
        self.registry.validate()?;
        self.storage.validate()?;
        self.cache.validate()?;
        Ok(())
    }
}

impl Validate for RegistryConfig {
    type Error = ConfigError;

    fn validate(&self) -> std::result::Result<(), Self::Error> {
        validate_http_url("registry.feed_index_url", &self.feed_index_url)?;
        validate_http_url("registry.package_base_url", &self.package_base_url)?;
        validate_timeout("registry.feed_index_timeout", self.feed_index_timeout)?;
        validate_timeout("registry.feed_timeout", self.feed_timeout)?;
        validate_timeout("registry.download_timeout", self.download_timeout)?;

        if self.max_concurrent_feeds == 0 {
            return Err(ConfigError::ValidationFailed {
                message: "max_concurrent_feeds must be greater than 0".to_string(),
            });
        }

        Ok(())
    }
}

impl Validate for StorageConfig {
    type Error = ConfigError;

    fn validate(&self) -> std::result::Result<(), Self::Error> {
        if self.packages_dir.as_os_str().is_empty() {
            return Err(ConfigError::ValidationFailed {
                message: "Packages directory cannot be empty".to_string(),
            });
        }

        if self.database_path.as_os_str().is_empty() {
            return Err(ConfigError::ValidationFailed {
                message: "Database path cannot be empty".to_string(),
            });
        }

        if self.connection_pool_size == 0 {
            return Err(ConfigError::ValidationFailed {
                message: "Connection pool size must be greater than 0".to_string(),
            });
        }

        Ok(())
    }
}

impl Validate for CacheConfig {
    type Error = ConfigError;

    fn validate(&self) -> std::result::Result<(), Self::Error> {
        if self.per_page == 0 {
            return Err(ConfigError::ValidationFailed {
                message: "per_page must be greater than 0".to_string(),
            });
        }
        Ok(())
    }
}

static PACKAGE_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-zA-Z0-9][a-zA-Z0-9\-\.]*[a-zA-Z0-9]$").expect("valid package name regex")
});

static PACKAGE_VERSION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-zA-Z0-9\.\-]+$").expect("valid package version regex"));

/// A user-submitted import request.
///
/// # Example
///
/// ```rust
/// use octofhir_ig_registry::config::PackageRequest;
/// use octofhir_ig_registry::error::Validate;
///
/// let request = PackageRequest::new("hl7.fhir.us.core", "6.1.0");
/// assert!(request.validate().is_ok());
/// assert!(PackageRequest::new("-bad", "1.0.0").validate().is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageRequest {
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub mode: DependencyMode,
}

impl PackageRequest {
    pub fn new(name: &str, version: &str) -> Self {
        Self {
            name: name.to_string(),
            version: version.to_string(),
            mode: DependencyMode::default(),
        }
    }

    pub fn with_mode(mut self, mode: DependencyMode) -> Self {
        self.mode = mode;
        self
    }
}

impl Validate for PackageRequest {
    type Error = ConfigError;

    fn validate(&self) -> std::result::Result<(), Self::Error> {
        if !PACKAGE_NAME.is_match(&self.name) {
            return Err(ConfigError::InvalidPackageRequest {
                message: format!(
                    "Invalid package name format '{}': use letters, digits, '.' and '-', starting and ending with a letter or digit",
                    self.name
                ),
            });
        }

        if !PACKAGE_VERSION.is_match(&self.version) {
            return Err(ConfigError::InvalidPackageRequest {
                message: format!(
                    "Invalid version format '{}': use letters, digits, '.' and '-'",
                    self.version
                ),
            });
        }

        Ok(())
    }
}
