//! Unit tests for local archive introspection

use octofhir_ig_registry::{DependencyMode, DependencyResolver, PackageIntrospector, PackageKey};
use std::path::Path;

use crate::common::{
    MockPackageData, MockRegistry, create_test_config, setup_test_env, should_skip_net,
};

fn components(root: &Path, registry: &MockRegistry) -> (DependencyResolver, PackageIntrospector) {
    let config = create_test_config(root, registry);
    let storage = config.get_expanded_storage_config();
    let resolver = DependencyResolver::new(&config.registry, storage.packages_dir.clone()).unwrap();
    (resolver, PackageIntrospector::new(storage.packages_dir))
}

/// Descriptions come from the manifest of the imported archive
#[tokio::test]
async fn test_describe_after_import() {
    if should_skip_net() {
        eprintln!("skipping net-bound test");
        return;
    }
    let mut registry = MockRegistry::new().await;
    registry.add_package(
        MockPackageData::new("hl7.fhir.us.core", "6.1.0")
            .with_description(Some("US Core Implementation Guide")),
    );
    registry.add_package(MockPackageData::new("bare.pkg", "1.0.0").with_description(None));
    registry.add_package(MockPackageData::new("no.manifest", "1.0.0").without_manifest());
    registry.setup_mocks().await;

    let temp_dir = setup_test_env();
    let (resolver, introspector) = components(temp_dir.path(), &registry);

    assert_eq!(
        introspector.describe("hl7.fhir.us.core", "6.1.0").await,
        "Error: Package file not found."
    );

    for (name, version) in [
        ("hl7.fhir.us.core", "6.1.0"),
        ("bare.pkg", "1.0.0"),
        ("no.manifest", "1.0.0"),
    ] {
        resolver.resolve(name, version, DependencyMode::Recursive).await;
    }

    assert_eq!(
        introspector.describe("hl7.fhir.us.core", "6.1.0").await,
        "US Core Implementation Guide"
    );
    assert_eq!(introspector.describe("bare.pkg", "1.0.0").await, "No description found.");
    assert_eq!(
        introspector.describe("no.manifest", "1.0.0").await,
        "Error: package.json not found."
    );

    let manifest = introspector.manifest("hl7.fhir.us.core", "6.1.0").await.unwrap();
    assert_eq!(manifest.name.as_deref(), Some("hl7.fhir.us.core"));
    assert!(introspector.manifest("no.manifest", "1.0.0").await.is_none());
}

/// Corrupt archives produce a read error message instead of failing
#[tokio::test]
async fn test_describe_corrupt_archive() {
    let temp_dir = setup_test_env();
    let introspector = PackageIntrospector::new(temp_dir.path().join("fhir_packages"));
    let path = introspector.archive_path("broken.pkg", "1.0.0").unwrap();
    std::fs::write(&path, b"not an archive").unwrap();

    let description = introspector.describe("broken.pkg", "1.0.0").await;
    assert!(
        description.starts_with("Error reading package details:"),
        "{description}"
    );
}

/// Imported archives are listed by decoded name and version
#[tokio::test]
async fn test_list_local_after_import() {
    if should_skip_net() {
        eprintln!("skipping net-bound test");
        return;
    }
    let mut registry = MockRegistry::new().await;
    registry.add_package(MockPackageData::new("root.ig", "1.0.0").with_dependency("dep.ig", "2.1.0"));
    registry.add_package(MockPackageData::new("dep.ig", "2.1.0"));
    registry.setup_mocks().await;

    let temp_dir = setup_test_env();
    let (resolver, introspector) = components(temp_dir.path(), &registry);
    assert!(introspector.list_local().await.unwrap().is_empty());

    resolver.resolve("root.ig", "1.0.0", DependencyMode::Recursive).await;
    std::fs::write(introspector.packages_dir().join("notes.txt"), "ignored").unwrap();

    assert_eq!(
        introspector.list_local().await.unwrap(),
        vec![PackageKey::new("dep.ig", "2.1.0"), PackageKey::new("root.ig", "1.0.0")]
    );
}

#[tokio::test]
async fn test_list_local_missing_directory() {
    let temp_dir = setup_test_env();
    let introspector = PackageIntrospector::new(temp_dir.path().join("does-not-exist"));
    assert!(introspector.list_local().await.unwrap().is_empty());
}
