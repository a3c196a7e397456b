//! Reconciliation of raw feed entries into one record per package
//!
//! Entries are grouped by the part of their name before `#`, lower-cased and
//! trimmed. Each group yields a [`NormalizedPackage`] whose scalar fields come
//! from the entry holding the highest version, alongside the highest "official"
//! (`MAJOR.MINOR.PATCH[-suffix]`) version and a deduplicated version history.

use crate::dependency::PackageDependency;
use crate::feed::{RawPackageEntry, VersionEntry};
use crate::version::{OrderedVersion, is_official};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use tracing::debug;

/// The canonical record for one package name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizedPackage {
    pub name: String,
    /// Persistence key together with `name`; mirrors `latest_absolute_version`.
    pub version: String,
    pub latest_absolute_version: String,
    pub latest_official_version: Option<String>,
    pub author: String,
    pub fhir_version: String,
    pub url: String,
    pub canonical: String,
    pub dependencies: Vec<PackageDependency>,
    pub all_versions: Vec<VersionEntry>,
    pub version_count: usize,
    pub registry: String,
}

impl NormalizedPackage {
    /// The official version when known, else the absolute one.
    pub fn display_version(&self) -> &str {
        self.latest_official_version
            .as_deref()
            .unwrap_or(&self.latest_absolute_version)
    }

    /// Version history ordered from highest to lowest version.
    pub fn versions_sorted(&self) -> Vec<VersionEntry> {
        let mut versions = self.all_versions.clone();
        versions.sort_by_cached_key(|v| std::cmp::Reverse(OrderedVersion::parse(&v.version)));
        versions
    }
}

/// Part of a raw name before the first `#`, trimmed.
fn name_part(raw_name: &str) -> &str {
    raw_name.split('#').next().unwrap_or_default().trim()
}

/// Explicit version, or the segment after `#` in the raw name.
fn entry_version(entry: &RawPackageEntry) -> Option<String> {
    entry
        .version
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .or_else(|| {
            entry
                .raw_name()?
                .split('#')
                .nth(1)
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(str::to_string)
        })
}

struct Candidate<'a> {
    version: String,
    parsed: OrderedVersion,
    entry: &'a RawPackageEntry,
}

/// Normalizes raw entries. Never fails: malformed fields degrade to defaults
/// and groups without any resolvable version are dropped.
pub fn normalize(raw_entries: &[RawPackageEntry]) -> Vec<NormalizedPackage> {
    let mut order: Vec<String> = Vec::new();
    let mut groups: HashMap<String, Vec<&RawPackageEntry>> = HashMap::new();

    for entry in raw_entries {
        let Some(raw_name) = entry.raw_name() else {
            continue;
        };
        let key = name_part(raw_name).to_lowercase();
        if key.is_empty() {
            continue;
        }
        groups
            .entry(key.clone())
            .or_insert_with(|| {
                order.push(key);
                Vec::new()
            })
            .push(entry);
    }

    let mut normalized: Vec<NormalizedPackage> = order
        .into_iter()
        .filter_map(|key| {
            let entries = groups.remove(&key)?;
            let package = normalize_group(&key, &entries);
            if package.is_none() {
                debug!("Dropping package group '{}' without any version", key);
            }
            package
        })
        .collect();

    normalized.sort_by_cached_key(|p| p.name.to_lowercase());
    normalized
}

fn normalize_group(key: &str, entries: &[&RawPackageEntry]) -> Option<NormalizedPackage> {
    let versioned: Vec<(&RawPackageEntry, String)> = entries
        .iter()
        .filter_map(|entry| entry_version(entry).map(|v| (*entry, v)))
        .collect();
    if versioned.is_empty() {
        return None;
    }

    // Version history: every listed sub-version first, then each entry's own.
    let mut seen: HashSet<String> = HashSet::new();
    let mut all_versions: Vec<VersionEntry> = Vec::new();
    for entry in entries {
        for listed in &entry.versions {
            if !listed.version.is_empty() && seen.insert(listed.version.clone()) {
                all_versions.push(listed.clone());
            }
        }
    }
    for (entry, version) in &versioned {
        if seen.insert(version.clone()) {
            all_versions.push(VersionEntry {
                version: version.clone(),
                pub_date: entry.pub_date.clone().unwrap_or_default(),
            });
        }
    }
    all_versions.sort_by(|a, b| b.pub_date.cmp(&a.pub_date));

    let mut display_name = key.to_string();
    let mut candidates: Vec<Candidate<'_>> = Vec::new();
    for (entry, version) in &versioned {
        let current = entry.raw_name().map(name_part).unwrap_or_default();
        if !current.is_empty() && current != key {
            display_name = current.to_string();
        }
        candidates.push(Candidate {
            version: version.clone(),
            parsed: OrderedVersion::parse(version),
            entry: *entry,
        });
    }
    for entry in entries {
        for listed in entry.versions.iter().filter(|v| !v.version.is_empty()) {
            candidates.push(Candidate {
                version: listed.version.clone(),
                parsed: OrderedVersion::parse(&listed.version),
                entry: *entry,
            });
        }
    }

    let latest_absolute = highest(candidates.iter())?;
    let latest_official = highest(candidates.iter().filter(|c| is_official(&c.version)));

    let winner = latest_absolute.entry;
    let trimmed = |value: &Option<String>| value.as_deref().unwrap_or_default().trim().to_string();
    let url = trimmed(&winner.url);
    let canonical = match trimmed(&winner.canonical) {
        c if c.is_empty() => url.clone(),
        c => c,
    };
    let fhir_version = match trimmed(&winner.fhir_version) {
        f if f.is_empty() => "unknown".to_string(),
        f => f,
    };

    Some(NormalizedPackage {
        name: display_name,
        version: latest_absolute.version.clone(),
        latest_absolute_version: latest_absolute.version.clone(),
        latest_official_version: latest_official.map(|c| c.version.clone()),
        author: trimmed(&winner.author),
        fhir_version,
        url,
        canonical,
        dependencies: winner.dependencies.clone().into_dependencies(),
        version_count: all_versions.len(),
        all_versions,
        registry: winner.registry.clone().unwrap_or_default(),
    })
}

/// Highest candidate; the first one seen wins ties.
fn highest<'c, 'a: 'c>(
    candidates: impl Iterator<Item = &'c Candidate<'a>>,
) -> Option<&'c Candidate<'a>> {
    candidates.fold(None, |best, candidate| match best {
        Some(b) if candidate.parsed <= b.parsed => Some(b),
        _ => Some(candidate),
    })
}
