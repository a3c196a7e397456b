//! CLI error reporting with recovery suggestions

use crate::error::*;
use colored::Colorize;
use std::error::Error;

/// User-friendly rendering of an error plus an optional hint.
pub trait CliError {
    fn user_message(&self) -> String;
    fn recovery_suggestion(&self) -> Option<String>;
}

impl CliError for IgrError {
    fn user_message(&self) -> String {
        match self {
            IgrError::Config(e) => format!("{} Configuration Error: {}", "⚙️".red(), e),
            IgrError::Registry(e) => format!("{} Registry Error: {}", "🌐".red(), e),
            IgrError::Package(e) => format!("{} Package Error: {}", "📦".red(), e),
            IgrError::Storage(e) => format!("{} Storage Error: {}", "💾".red(), e),
            IgrError::Io(e) => format!("{} File System Error: {}", "📁".red(), e),
            IgrError::Network(e) => format!("{} Network Error: {}", "🌐".red(), e),
            IgrError::Database(e) => format!("{} Database Error: {}", "💾".red(), e),
            IgrError::Json(e) => format!("{} JSON Error: {}", "📝".red(), e),
            IgrError::TomlDe(e) => format!("{} TOML Parse Error: {}", "📝".red(), e),
            IgrError::TomlSer(e) => format!("{} TOML Write Error: {}", "📝".red(), e),
        }
    }

    fn recovery_suggestion(&self) -> Option<String> {
        match self {
            IgrError::Config(e) => e.recovery_suggestion(),
            IgrError::Registry(e) => e.recovery_suggestion(),
            IgrError::Package(e) => e.recovery_suggestion(),
            IgrError::Storage(e) => e.recovery_suggestion(),
            IgrError::Network(e) if e.is_timeout() => Some(format!(
                "{} Request timed out\n{} Increase the timeouts in the [registry] section of igr.toml",
                "💡".yellow(),
                "💡".yellow()
            )),
            IgrError::Network(_) => Some(format!(
                "{} Check your internet connection and the registry URLs in igr.toml",
                "💡".yellow()
            )),
            IgrError::Database(_) => Some(format!(
                "{} The registry database may be locked or corrupted\n{} Delete it and run 'igr refresh' to rebuild",
                "💡".yellow(),
                "💡".yellow()
            )),
            IgrError::Io(e) if e.kind() == std::io::ErrorKind::PermissionDenied => Some(format!(
                "{} Check file permissions or run with appropriate privileges",
                "💡".yellow()
            )),
            _ => None,
        }
    }
}

impl CliError for ConfigError {
    fn user_message(&self) -> String {
        self.to_string()
    }

    fn recovery_suggestion(&self) -> Option<String> {
        match self {
            ConfigError::InvalidFile { path } => Some(format!(
                "{} Check that {} exists and is a valid TOML file\n{} Run 'igr config init' to create a new configuration",
                "💡".yellow(),
                path.display().to_string().bright_white(),
                "💡".yellow()
            )),
            ConfigError::InvalidUrl { url, .. } => Some(format!(
                "{} Check the URL: {}\n{} The URL should start with http:// or https://",
                "💡".yellow(),
                url.bright_white(),
                "💡".yellow()
            )),
            ConfigError::InvalidPackageRequest { .. } => Some(format!(
                "{} Package names use letters, digits, '.' and '-'\n{} Example: igr import hl7.fhir.us.core 6.1.0",
                "💡".yellow(),
                "💡".yellow()
            )),
            ConfigError::InvalidValue { key, .. } if key == "dependency_mode" => Some(format!(
                "{} Valid modes: recursive, patch-canonical, tree-shaking",
                "💡".yellow()
            )),
            _ => None,
        }
    }
}

impl CliError for RegistryError {
    fn user_message(&self) -> String {
        self.to_string()
    }

    fn recovery_suggestion(&self) -> Option<String> {
        match self {
            RegistryError::FeedIndexUnavailable { url } => Some(format!(
                "{} Check if {} is accessible\n{} Set IGR_FEED_INDEX_URL to use a mirror",
                "💡".yellow(),
                url.bright_white(),
                "💡".yellow()
            )),
            RegistryError::HttpStatus { status: 404, .. } => Some(format!(
                "{} Check the package name and version\n{} Run 'igr search <term>' to list known packages",
                "💡".yellow(),
                "💡".yellow()
            )),
            _ => None,
        }
    }
}

impl CliError for PackageError {
    fn user_message(&self) -> String {
        self.to_string()
    }

    fn recovery_suggestion(&self) -> Option<String> {
        match self {
            PackageError::ArchiveUnreadable { .. } | PackageError::InvalidManifest { .. } => {
                Some(format!(
                    "{} The archive appears to be corrupted\n{} Delete it from the packages directory and import it again",
                    "💡".yellow(),
                    "💡".yellow()
                ))
            }
            _ => None,
        }
    }
}

impl CliError for StorageError {
    fn user_message(&self) -> String {
        self.to_string()
    }

    fn recovery_suggestion(&self) -> Option<String> {
        match self {
            StorageError::UnsupportedSchemaVersion { .. } => Some(format!(
                "{} The database was created by another version\n{} Delete it and run 'igr refresh'",
                "💡".yellow(),
                "💡".yellow()
            )),
            _ => None,
        }
    }
}

/// Process exit code for an error.
pub fn get_exit_code(error: &IgrError) -> i32 {
    match error {
        IgrError::Config(_) | IgrError::TomlDe(_) => 5,
        IgrError::Registry(RegistryError::HttpStatus { status: 404, .. }) => 4,
        IgrError::Network(_) | IgrError::Registry(_) => 3,
        _ => 1,
    }
}

pub fn print_error_with_suggestions(error: &IgrError) {
    tracing::error!(error_message = %error, "igr command failed");

    eprintln!("{}", error.user_message());
    if let Some(suggestion) = error.recovery_suggestion() {
        eprintln!("\n{suggestion}");
    }

    if let IgrError::Config(_) = error {
        eprintln!("\n{} Configuration help:", "📖".blue());
        eprintln!("  • Use 'igr config show' to view the effective configuration");
        eprintln!("  • Use 'igr config init' to create igr.toml");
    }

    eprintln!("\n{} Run 'igr --help' for more information", "ℹ️".blue());

    if std::env::var("RUST_LOG")
        .map(|s| s.contains("debug"))
        .unwrap_or(false)
    {
        eprintln!("\n{} Debug information:", "🔧".dimmed());
        print_error_chain(error);
    }
}

fn print_error_chain(error: &IgrError) {
    eprintln!("• {error}");
    let mut source = error.source();
    let mut depth = 1;
    while let Some(err) = source {
        eprintln!("{}↳ {err}", "  ".repeat(depth));
        source = err.source();
        depth += 1;
        if depth > 10 {
            eprintln!("{}↳ ...", "  ".repeat(depth));
            break;
        }
    }
}
