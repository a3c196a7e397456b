//! Unit tests for feed aggregation

use octofhir_ig_registry::RegistryAggregator;
use wiremock::ResponseTemplate;

use crate::common::fixtures::feed_entry;
use crate::common::{MockFeed, MockRegistry, create_test_config, setup_test_env, should_skip_net};

/// One failing feed out of three leaves the other two intact
#[tokio::test]
async fn test_failing_feed_is_isolated() {
    if should_skip_net() {
        eprintln!("skipping net-bound test");
        return;
    }
    let mut registry = MockRegistry::new().await;
    registry.add_feed(MockFeed::new(
        "first",
        vec![feed_entry("acme.a", "1.0.0", "Acme"), feed_entry("acme.b", "1.0.0", "Acme")],
    ));
    registry.add_feed(MockFeed::failing("broken", 500));
    registry.add_feed(MockFeed::new("third", vec![feed_entry("other.c", "2.0.0", "Other")]));
    registry.setup_mocks().await;

    let temp_dir = setup_test_env();
    let config = create_test_config(temp_dir.path(), &registry);
    let aggregator = RegistryAggregator::new(&config.registry).unwrap();

    let entries = aggregator.fetch_all("").await;
    let names: Vec<_> = entries.iter().filter_map(|e| e.name.as_deref()).collect();
    assert_eq!(names, vec!["acme.a", "acme.b", "other.c"]);
    assert_eq!(entries[0].registry.as_deref(), Some("first"));
    assert_eq!(entries[2].registry.as_deref(), Some("third"));
}

/// Feeds serving something other than JSON are skipped
#[tokio::test]
async fn test_non_json_feed_is_skipped() {
    if should_skip_net() {
        eprintln!("skipping net-bound test");
        return;
    }
    let mut registry = MockRegistry::new().await;
    registry.add_feed(MockFeed::non_json("html"));
    registry.add_feed(MockFeed::new("ok", vec![feed_entry("acme.a", "1.0.0", "Acme")]));
    registry.setup_mocks().await;

    let temp_dir = setup_test_env();
    let config = create_test_config(temp_dir.path(), &registry);
    let aggregator = RegistryAggregator::new(&config.registry).unwrap();

    let entries = aggregator.fetch_all("").await;
    assert_eq!(entries.len(), 1);
}

/// Search term filters names case-insensitively
#[tokio::test]
async fn test_search_term_filters_entries() {
    if should_skip_net() {
        eprintln!("skipping net-bound test");
        return;
    }
    let mut registry = MockRegistry::new().await;
    registry.add_feed(MockFeed::new(
        "feed",
        vec![
            feed_entry("hl7.fhir.us.core", "6.1.0", "HL7"),
            feed_entry("hl7.fhir.au.core", "1.0.0", "HL7 AU"),
        ],
    ));
    registry.setup_mocks().await;

    let temp_dir = setup_test_env();
    let config = create_test_config(temp_dir.path(), &registry);
    let aggregator = RegistryAggregator::new(&config.registry).unwrap();

    let entries = aggregator.fetch_all("US.CORE").await;
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].name.as_deref(), Some("hl7.fhir.us.core"));
}

/// Index entries missing a name or url are ignored; a broken index means no feeds
#[tokio::test]
async fn test_feed_index_handling() {
    if should_skip_net() {
        eprintln!("skipping net-bound test");
        return;
    }
    let registry = MockRegistry::new().await;
    registry
        .mount_index_response(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "feeds": [
                {"name": "no-url"},
                {"url": "http://example.org/no-name.json"},
                {"name": "complete", "url": "http://example.org/feed.json"}
            ]
        })))
        .await;

    let temp_dir = setup_test_env();
    let config = create_test_config(temp_dir.path(), &registry);
    let aggregator = RegistryAggregator::new(&config.registry).unwrap();

    let feeds = aggregator.discover_feeds().await;
    assert_eq!(feeds.len(), 1);
    assert_eq!(feeds[0].name, "complete");

    let broken = MockRegistry::new().await;
    broken.mount_index_response(ResponseTemplate::new(503)).await;
    let config = create_test_config(temp_dir.path(), &broken);
    let aggregator = RegistryAggregator::new(&config.registry).unwrap();
    assert!(aggregator.discover_feeds().await.is_empty());
    assert!(aggregator.fetch_all("").await.is_empty());
}
