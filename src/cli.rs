//! Command-line interface for the IG registry

use crate::config::{IgrConfig, PackageRequest};
use crate::manager::{DetailSource, RegistryManager};
use crate::normalizer::NormalizedPackage;
use crate::output::{Output, Progress, format_package, format_url};
use crate::resolver::{DependencyMode, ImportOutcome};
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::PathBuf;

/// FHIR Implementation Guide registry CLI
#[derive(Parser, Debug)]
#[command(name = "igr")]
#[command(about = "Browse FHIR IG registries and import packages with their dependencies")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    #[arg(short, long)]
    pub config: Option<PathBuf>,

    #[arg(short, long)]
    pub verbose: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Fetch every registry feed and rebuild the package cache
    Refresh,
    /// Search cached packages by name or author
    Search(SearchCommand),
    /// Show details of one package
    Show { name: String },
    /// Download a package and its dependencies
    Import(ImportCommand),
    /// Print the description of a downloaded package
    Describe { name: String, version: String },
    /// List downloaded package archives
    Local,
    /// Manage configuration
    Config(ConfigCommand),
}

#[derive(Parser, Debug)]
pub struct SearchCommand {
    /// Substring of the package name or author
    pub term: Option<String>,

    /// 1-based result page
    #[arg(long, default_value = "1")]
    pub page: usize,

    /// Output format (text, json)
    #[arg(long, default_value = "text")]
    pub format: String,
}

#[derive(Parser, Debug)]
pub struct ImportCommand {
    pub name: String,
    pub version: String,

    /// recursive, patch-canonical or tree-shaking
    #[arg(long, default_value = "recursive")]
    pub mode: DependencyMode,
}

#[derive(Parser, Debug)]
pub struct ConfigCommand {
    #[command(subcommand)]
    pub action: ConfigAction,
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show the effective configuration
    Show,
    /// Write a default igr.toml
    Init,
}

/// Run the CLI
pub async fn run() -> crate::Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.verbose { "debug" } else { "info" };
    let env_filter = format!("octofhir_ig_registry={log_level},igr={log_level}");

    tracing_subscriber::fmt()
        .with_env_filter(&env_filter)
        .with_target(cli.verbose)
        .with_writer(std::io::stderr)
        .init();

    tracing::debug!("CLI arguments: {:?}", cli);

    let result = match cli.command {
        Commands::Refresh => handle_refresh(&cli).await,
        Commands::Search(ref cmd) => handle_search(&cli, cmd).await,
        Commands::Show { ref name } => handle_show(&cli, name).await,
        Commands::Import(ref cmd) => handle_import(&cli, cmd).await,
        Commands::Describe {
            ref name,
            ref version,
        } => handle_describe(&cli, name, version).await,
        Commands::Local => handle_local(&cli).await,
        Commands::Config(ref cmd) => handle_config(&cli, cmd).await,
    };

    if let Err(e) = &result {
        crate::cli_error::print_error_with_suggestions(e);
        std::process::exit(crate::cli_error::get_exit_code(e));
    }

    result
}

async fn handle_refresh(cli: &Cli) -> crate::Result<()> {
    let manager = open_manager(cli).await?;

    Progress::start("Fetching registry feeds");
    let report = manager.refresh().await?;

    if report.fetch_failed {
        Output::warning("No packages could be fetched from any registry feed");
    } else {
        Output::success(&format!(
            "Cached {} packages from {} feed entries",
            report.packages.to_string().bright_green(),
            report.raw_entries
        ));
    }
    Ok(())
}

async fn handle_search(cli: &Cli, cmd: &SearchCommand) -> crate::Result<()> {
    let manager = open_manager(cli).await?;
    let snapshot = manager.load().await?;
    if snapshot.fetch_failed {
        Output::warning("Last refresh could not reach any registry feed");
    }

    let term = cmd.term.as_deref().unwrap_or_default();
    let page = manager.search(term, cmd.page).await;

    if cmd.format == "json" {
        Output::result(&serde_json::to_string_pretty(&page)?);
        return Ok(());
    }

    if page.items.is_empty() {
        Output::info("No packages found");
        return Ok(());
    }

    Output::section(&format!(
        "Packages (page {} of {}, {} total):",
        page.page,
        page.pages(),
        page.total
    ));
    for package in &page.items {
        Output::list_item(&format!(
            "{} {} {}",
            format_package(&package.name, package.display_version()),
            format!("FHIR {}", package.fhir_version).dimmed(),
            package.author.dimmed()
        ));
    }
    if page.has_next() {
        Output::info(&format!("More results: --page {}", page.page + 1));
    }
    Ok(())
}

async fn handle_show(cli: &Cli, name: &str) -> crate::Result<()> {
    let manager = open_manager(cli).await?;
    let Some(details) = manager.package_details(name).await? else {
        Output::error(&format!("Package {name} not found."));
        std::process::exit(4);
    };

    let source = match details.source {
        DetailSource::Snapshot => "cache",
        DetailSource::Store => "database",
        DetailSource::Registry => "registry feeds",
    };
    print_package(&details.package);
    Output::field("Description", &details.description);
    Output::field("Source", source);

    if !details.package.dependencies.is_empty() {
        Output::section("Dependencies:");
        for dep in &details.package.dependencies {
            Output::list_item(&format_package(&dep.name, &dep.version));
        }
    }

    Output::section(&format!("Versions ({}):", details.versions.len()));
    for entry in &details.versions {
        Output::list_item(&format!("{} {}", entry.version, entry.pub_date.dimmed()));
    }
    Ok(())
}

fn print_package(package: &NormalizedPackage) {
    Output::section(&package.name);
    Output::field("Latest version", &package.latest_absolute_version);
    Output::field(
        "Latest official version",
        package.latest_official_version.as_deref().unwrap_or("-"),
    );
    Output::field("Author", &package.author);
    Output::field("FHIR version", &package.fhir_version);
    Output::field("URL", &format_url(&package.url));
    Output::field("Canonical", &format_url(&package.canonical));
    Output::field("Registry", &package.registry);
}

async fn handle_import(cli: &Cli, cmd: &ImportCommand) -> crate::Result<()> {
    let manager = open_manager(cli).await?;
    let request = PackageRequest::new(&cmd.name, &cmd.version).with_mode(cmd.mode);

    Progress::start(&format!(
        "Importing {} ({} mode)",
        format_package(&request.name, &request.version),
        request.mode
    ));
    let result = manager.import(&request).await?;

    for (key, path) in &result.downloaded {
        Progress::step(&format!("{} -> {}", key, path.display()));
    }
    for error in &result.errors {
        Output::list_item(&error.red().to_string());
    }

    match result.outcome() {
        ImportOutcome::Success => Output::success(&result.message()),
        ImportOutcome::PartialSuccess => Output::warning(&result.message()),
        ImportOutcome::Failure => {
            Output::error(&result.message());
            std::process::exit(1);
        }
    }
    Ok(())
}

async fn handle_describe(cli: &Cli, name: &str, version: &str) -> crate::Result<()> {
    let manager = open_manager(cli).await?;
    Output::result(&manager.describe(name, version).await);
    Ok(())
}

async fn handle_local(cli: &Cli) -> crate::Result<()> {
    let manager = open_manager(cli).await?;
    let packages = manager.list_local().await?;

    Output::section("Downloaded packages:");
    if packages.is_empty() {
        Output::info("No packages downloaded");
        return Ok(());
    }
    for key in packages {
        Output::list_item(&format_package(&key.name, &key.version));
    }
    Ok(())
}

async fn handle_config(cli: &Cli, cmd: &ConfigCommand) -> crate::Result<()> {
    match cmd.action {
        ConfigAction::Show => {
            Output::section("Current configuration:");
            let config = load_config(cli).await?;
            Output::result(&toml::to_string_pretty(&config)?.bright_white().to_string());
        }
        ConfigAction::Init => {
            let path = cli
                .config
                .clone()
                .unwrap_or_else(IgrConfig::default_config_path);
            if path.exists() {
                Output::warning(&format!(
                    "Configuration file already exists: {}",
                    path.display()
                ));
                return Ok(());
            }
            IgrConfig::create_default_config(&path).await?;
            Output::success(&format!(
                "Created configuration file: {}",
                path.display().to_string().cyan()
            ));
        }
    }
    Ok(())
}

async fn load_config(cli: &Cli) -> crate::Result<IgrConfig> {
    match &cli.config {
        Some(path) => {
            let mut config = IgrConfig::from_file(path).await?;
            config.apply_env_overrides();
            config.validate()?;
            Ok(config)
        }
        None => IgrConfig::load().await,
    }
}

async fn open_manager(cli: &Cli) -> crate::Result<RegistryManager> {
    RegistryManager::new(load_config(cli).await?).await
}
