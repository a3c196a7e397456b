//! Error types for the IG registry aggregator

use deadpool_sqlite::rusqlite;
use thiserror::Error;

/// Main result type used throughout the library.
///
/// Tolerant paths (feed aggregation, normalization, dependency resolution and
/// package introspection) never return this type's error variant for upstream
/// or parse failures; they degrade to empty values, collected error strings or
/// descriptive messages instead. Configuration loading, store construction and
/// cache synchronization do propagate errors.
///
/// # Example
///
/// ```rust,no_run
/// use octofhir_ig_registry::error::Result;
///
/// fn example_operation() -> Result<String> {
///     Ok("Success".to_string())
/// }
/// ```
pub type Result<T> = std::result::Result<T, IgrError>;

/// Main error type for the IG registry aggregator.
///
/// # Example
///
/// ```rust
/// use octofhir_ig_registry::error::{ConfigError, IgrError};
///
/// let config_error = ConfigError::ValidationFailed {
///     message: "Invalid URL".to_string(),
/// };
/// let err: IgrError = config_error.into();
/// assert!(err.to_string().contains("Invalid URL"));
/// ```
#[derive(Error, Debug)]
pub enum IgrError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("Package error: {0}")]
    Package(#[from] PackageError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML deserialize error: {0}")]
    TomlDe(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSer(#[from] toml::ser::Error),
}

/// Errors related to configuration loading, parsing, and validation.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid configuration file: {path}")]
    InvalidFile { path: std::path::PathBuf },

    #[error("Invalid URL for {key}: {url}")]
    InvalidUrl { key: String, url: String },

    #[error("Invalid package request: {message}")]
    InvalidPackageRequest { message: String },

    #[error("Configuration validation failed: {message}")]
    ValidationFailed { message: String },

    #[error("Invalid configuration value for {key}: {value}")]
    InvalidValue { key: String, value: String },
}

/// Transport and payload failures when talking to registry endpoints.
///
/// Feed aggregation logs these and moves on; the resolver renders them into
/// `ImportResult::errors`.
#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("Feed index unavailable: {url}")]
    FeedIndexUnavailable { url: String },

    #[error("Feed {name} unavailable: {url}")]
    FeedUnavailable { name: String, url: String },

    #[error("HTTP {status} for {url}")]
    HttpStatus { status: u16, url: String },

    #[error("Invalid payload from {url}: {message}")]
    InvalidPayload { url: String, message: String },
}

/// Errors related to archive naming, reading and manifest parsing.
#[derive(Error, Debug)]
pub enum PackageError {
    #[error("Invalid filename for {name}#{version}")]
    InvalidFilename { name: String, version: String },

    #[error("Archive unreadable: {message}")]
    ArchiveUnreadable { message: String },

    #[error("Missing package manifest")]
    MissingManifest,

    #[error("Invalid package manifest: {message}")]
    InvalidManifest { message: String },
}

/// Errors raised by the persistent package store.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Storage initialization failed: {message}")]
    InitializationFailed { message: String },

    #[error("Database error: {message}")]
    DatabaseError { message: String },

    #[error("Unsupported schema version {current}, expected {required}")]
    UnsupportedSchemaVersion { current: i32, required: i32 },

    #[error("Transaction rolled back: {message}")]
    TransactionFailed { message: String },
}

/// Trait for validating configuration and request structures.
///
/// # Example
///
/// ```rust
/// use octofhir_ig_registry::error::{ConfigError, Validate};
///
/// struct Endpoint {
///     url: String,
/// }
///
/// impl Validate for Endpoint {
///     type Error = ConfigError;
///
///     fn validate(&self) -> Result<(), Self::Error> {
///         if self.url.is_empty() {
///             Err(ConfigError::ValidationFailed {
///                 message: "URL cannot be empty".to_string(),
///             })
///         } else {
///             Ok(())
///         }
///     }
/// }
/// ```
pub trait Validate {
    type Error;
    fn validate(&self) -> std::result::Result<(), Self::Error>;
}
