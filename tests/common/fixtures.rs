//! Sample feed entries

use serde_json::{Value, json};

/// A flat feed entry.
pub fn feed_entry(name: &str, version: &str, author: &str) -> Value {
    json!({
        "name": name,
        "version": version,
        "author": author,
        "fhirVersion": "4.0.1",
        "url": format!("http://example.org/fhir/{name}"),
        "canonical": format!("http://example.org/fhir/{name}"),
        "pubDate": "2024-01-01"
    })
}

/// A feed entry carrying a version history sub-list.
pub fn feed_entry_with_versions(name: &str, versions: &[(&str, &str)]) -> Value {
    let history: Vec<Value> = versions
        .iter()
        .map(|(version, date)| json!({"version": version, "pubDate": date}))
        .collect();
    json!({
        "name": name,
        "author": "HL7",
        "versions": history
    })
}
