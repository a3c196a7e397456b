//! Registry feed discovery and aggregation
//!
//! A feed index document lists independent registry feeds. Each feed is
//! fetched on its own; a feed that times out, answers with a non-2xx status or
//! serves something other than JSON is logged and skipped without affecting
//! its siblings.

use crate::config::RegistryConfig;
use crate::dependency::DependencySpec;
use crate::error::{RegistryError, Result};
use futures_util::stream::{self, StreamExt};
use reqwest::Client;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, info, warn};

/// One registry feed endpoint, as listed in the feed index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryFeed {
    pub name: String,
    pub url: String,
}

/// One `{version, pubDate}` pair from a feed entry's version history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionEntry {
    pub version: String,
    #[serde(rename = "pubDate", default)]
    pub pub_date: String,
}

/// One registry's view of one package version.
///
/// Every scalar field is decoded leniently: strings are kept, numbers and
/// booleans are stringified, anything else counts as missing.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct RawPackageEntry {
    #[serde(default, deserialize_with = "lenient_string")]
    pub name: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub title: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub version: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub author: Option<String>,
    #[serde(rename = "fhirVersion", default, deserialize_with = "lenient_string")]
    pub fhir_version: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub url: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub canonical: Option<String>,
    #[serde(default)]
    pub dependencies: DependencySpec,
    #[serde(rename = "pubDate", default, deserialize_with = "lenient_string")]
    pub pub_date: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub registry: Option<String>,
    #[serde(default, deserialize_with = "lenient_versions")]
    pub versions: Vec<VersionEntry>,
}

impl RawPackageEntry {
    /// `name`, falling back to `title`, ignoring empty values.
    pub fn raw_name(&self) -> Option<&str> {
        self.name
            .as_deref()
            .filter(|s| !s.is_empty())
            .or_else(|| self.title.as_deref().filter(|s| !s.is_empty()))
    }

    fn matches(&self, search_term: &str) -> bool {
        search_term.is_empty()
            || self
                .raw_name()
                .is_some_and(|name| name.to_lowercase().contains(&search_term.to_lowercase()))
    }
}

fn lenient_string<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::String(s) => Some(s),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    })
}

fn lenient_versions<'de, D>(deserializer: D) -> std::result::Result<Vec<VersionEntry>, D::Error>
where
    D: Deserializer<'de>,
{
    let Value::Array(items) = Value::deserialize(deserializer)? else {
        return Ok(Vec::new());
    };
    Ok(items
        .into_iter()
        .filter_map(|item| {
            let Value::Object(obj) = item else {
                return None;
            };
            let version = match obj.get("version")? {
                Value::String(s) => s.clone(),
                Value::Number(n) => n.to_string(),
                _ => return None,
            };
            let pub_date = match obj.get("pubDate") {
                Some(Value::String(s)) => s.clone(),
                _ => String::new(),
            };
            Some(VersionEntry { version, pub_date })
        })
        .collect())
}

#[derive(Debug, Deserialize)]
struct FeedIndexDocument {
    #[serde(default)]
    feeds: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct FeedDocument {
    #[serde(default)]
    packages: Vec<Value>,
}

/// Fetches the feed index and every listed feed.
///
/// # Example
///
/// ```rust,no_run
/// use octofhir_ig_registry::config::RegistryConfig;
/// use octofhir_ig_registry::feed::RegistryAggregator;
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let aggregator = RegistryAggregator::new(&RegistryConfig::default())?;
/// let entries = aggregator.fetch_all("us.core").await;
/// println!("{} raw entries", entries.len());
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct RegistryAggregator {
    client: Client,
    config: RegistryConfig,
}

impl RegistryAggregator {
    pub fn new(config: &RegistryConfig) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10).min(config.feed_timeout()))
            .user_agent(&config.user_agent)
            .build()?;
        Ok(Self {
            client,
            config: config.clone(),
        })
    }

    /// Fetches the feed index. Entries without both `name` and `url` are
    /// skipped. Any failure is logged and yields an empty list.
    #[tracing::instrument(name = "feed.discover_feeds", skip(self))]
    pub async fn discover_feeds(&self) -> Vec<RegistryFeed> {
        match self.fetch_feed_index().await {
            Ok(feeds) => {
                debug!("Discovered {} registry feeds", feeds.len());
                feeds
            }
            Err(e) => {
                warn!("Error fetching registry feed index: {}", e);
                Vec::new()
            }
        }
    }

    async fn fetch_feed_index(&self) -> Result<Vec<RegistryFeed>> {
        let url = &self.config.feed_index_url;
        let response = self
            .client
            .get(url)
            .timeout(self.config.feed_index_timeout())
            .send()
            .await
            .map_err(|e| RegistryError::FeedIndexUnavailable {
                url: format!("{url}: {e}"),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(RegistryError::HttpStatus {
                status: status.as_u16(),
                url: url.clone(),
            }
            .into());
        }

        let body = response.text().await?;
        let document: FeedIndexDocument =
            serde_json::from_str(&body).map_err(|e| RegistryError::InvalidPayload {
                url: url.clone(),
                message: e.to_string(),
            })?;

        Ok(document
            .feeds
            .into_iter()
            .filter_map(|feed| match (feed.get("name"), feed.get("url")) {
                (Some(Value::String(name)), Some(Value::String(url))) => Some(RegistryFeed {
                    name: name.clone(),
                    url: url.clone(),
                }),
                _ => {
                    debug!("Skipping feed index entry without name/url: {}", feed);
                    None
                }
            })
            .collect())
    }

    /// Fetches one feed and returns its package entries, unfiltered.
    #[tracing::instrument(name = "feed.fetch_feed", skip(self, feed), fields(feed = %feed.name))]
    pub async fn fetch_feed(&self, feed: &RegistryFeed) -> Result<Vec<RawPackageEntry>> {
        let response = self
            .client
            .get(&feed.url)
            .timeout(self.config.feed_timeout())
            .send()
            .await
            .map_err(|e| RegistryError::FeedUnavailable {
                name: feed.name.clone(),
                url: format!("{}: {e}", feed.url),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(RegistryError::HttpStatus {
                status: status.as_u16(),
                url: feed.url.clone(),
            }
            .into());
        }

        let body = response.text().await?;
        let document: FeedDocument =
            serde_json::from_str(&body).map_err(|e| RegistryError::InvalidPayload {
                url: feed.url.clone(),
                message: format!("non-JSON feed {}: {e}", feed.name),
            })?;

        let entries = document
            .packages
            .into_iter()
            .filter_map(|value| {
                if !value.is_object() {
                    debug!("Skipping non-object entry in feed {}", feed.name);
                    return None;
                }
                match serde_json::from_value::<RawPackageEntry>(value) {
                    Ok(mut entry) if entry.raw_name().is_some() => {
                        if entry.registry.as_deref().is_none_or(str::is_empty) {
                            entry.registry = Some(feed.name.clone());
                        }
                        Some(entry)
                    }
                    Ok(_) => {
                        debug!("Skipping entry without name in feed {}", feed.name);
                        None
                    }
                    Err(e) => {
                        debug!("Skipping malformed entry in feed {}: {}", feed.name, e);
                        None
                    }
                }
            })
            .collect();

        Ok(entries)
    }

    /// Fetches every discovered feed and concatenates their entries in feed
    /// order, keeping only entries whose name contains `search_term`
    /// (case-insensitive) when it is non-empty. Failing feeds are skipped.
    #[tracing::instrument(name = "feed.fetch_all", skip(self))]
    pub async fn fetch_all(&self, search_term: &str) -> Vec<RawPackageEntry> {
        let feeds = self.discover_feeds().await;
        if feeds.is_empty() {
            warn!("No registries available");
            return Vec::new();
        }

        // Owned values only: this future must stay `Send` for spawned refreshes.
        let per_feed: Vec<Vec<RawPackageEntry>> = stream::iter(feeds.clone())
            .map(|feed| {
                let aggregator = self.clone();
                async move {
                    match aggregator.fetch_feed(&feed).await {
                        Ok(entries) => {
                            debug!("Feed {} returned {} entries", feed.name, entries.len());
                            entries
                        }
                        Err(e) => {
                            warn!("Error fetching feed {}: {}", feed.name, e);
                            Vec::new()
                        }
                    }
                }
            })
            .buffered(self.config.max_concurrent_feeds.max(1))
            .collect()
            .await;

        let entries: Vec<RawPackageEntry> = per_feed
            .into_iter()
            .flatten()
            .filter(|entry| entry.matches(search_term))
            .collect();

        info!(
            "Aggregated {} package entries from {} feeds",
            entries.len(),
            feeds.len()
        );
        entries
    }
}
