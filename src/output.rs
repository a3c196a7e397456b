//! Terminal output helpers for the `igr` command

use colored::Colorize;

/// User-facing messages on stdout, each with a colored icon.
///
/// ```rust
/// use octofhir_ig_registry::output::Output;
///
/// Output::success("Successfully imported hl7.fhir.us.core#6.1.0!");
/// Output::warning("Partially imported hl7.fhir.us.core#6.1.0 with errors.");
/// ```
pub struct Output;

impl Output {
    pub fn success(msg: &str) {
        println!("{} {}", "✅".green(), msg);
    }

    pub fn error(msg: &str) {
        println!("{} {}", "❌".red(), msg);
    }

    pub fn warning(msg: &str) {
        println!("{} {}", "⚠️".yellow(), msg);
    }

    pub fn info(msg: &str) {
        println!("{} {}", "ℹ️".blue(), msg);
    }

    /// Plain data without prefix, easy to pipe into other tools.
    pub fn result(msg: &str) {
        println!("{msg}");
    }

    pub fn section(title: &str) {
        println!("\n{}", title.bold().cyan());
    }

    pub fn list_item(msg: &str) {
        println!("  • {msg}");
    }

    /// `label: value` line with a dimmed label.
    pub fn field(label: &str, value: &str) {
        println!("  {} {}", format!("{label}:").dimmed(), value);
    }
}

/// Progress reporting on stderr, kept apart from result data on stdout.
pub struct Progress;

impl Progress {
    pub fn start(operation: &str) {
        eprintln!("{} {}...", "🔄".cyan(), operation);
    }

    pub fn step(msg: &str) {
        eprintln!("  {}", msg.dimmed());
    }

    pub fn complete(msg: &str) {
        eprintln!("{} {}", "✅".green(), msg);
    }
}

/// `name#version` with the name in green.
pub fn format_package(name: &str, version: &str) -> String {
    format!("{}#{}", name.green(), version.bright_white())
}

pub fn format_url(url: &str) -> String {
    url.bright_blue().to_string()
}
