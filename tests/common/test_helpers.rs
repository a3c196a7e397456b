//! Test helper functions and utilities

use crate::common::MockRegistry;
use octofhir_ig_registry::IgrConfig;
use std::path::Path;
use tempfile::TempDir;

/// Configuration rooted at `root`, pointing at the mock registry.
pub fn create_test_config(root: &Path, registry: &MockRegistry) -> IgrConfig {
    IgrConfig::for_directory(root, &registry.feed_index_url(), &registry.package_base_url())
}

/// Temporary directory with an empty package store.
pub fn setup_test_env() -> TempDir {
    let temp_dir = TempDir::new().expect("Failed to create temp directory");
    std::fs::create_dir_all(temp_dir.path().join("fhir_packages")).unwrap();
    temp_dir
}

/// Returns true if tests that bind a local mock server should be skipped.
///
/// - Run when `IGR_RUN_NET_TESTS` is truthy.
/// - Skip when `IGR_SKIP_NET_TESTS` is truthy.
/// - Otherwise skip only when binding a localhost socket fails.
pub fn should_skip_net() -> bool {
    let is_truthy = |v: String| -> bool {
        matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on")
    };

    if std::env::var("IGR_RUN_NET_TESTS")
        .map(is_truthy)
        .unwrap_or(false)
    {
        return false;
    }

    if std::env::var("IGR_SKIP_NET_TESTS")
        .map(is_truthy)
        .unwrap_or(false)
    {
        return true;
    }

    std::net::TcpListener::bind("127.0.0.1:0").is_err()
}

pub fn assert_path_exists(path: &Path) {
    assert!(path.exists(), "Path should exist: {}", path.display());
}
