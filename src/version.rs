//! Total ordering over registry version strings
//!
//! Registry feeds publish a mix of strict semantic versions, dotted numeric
//! versions of arbitrary length, and FHIR-specific pre-release suffixes
//! (`-ballot`, `-snapshot`, `-rc2`, ...). [`OrderedVersion::parse`] maps every
//! string onto one totally ordered key so that picking "the latest" never
//! fails. Input that cannot be interpreted degrades to a sentinel that sorts
//! below every real version.

use regex::Regex;
use semver::{BuildMetadata, Prerelease};
use std::cmp::Ordering;
use std::fmt;
use std::sync::LazyLock;
use tracing::warn;

static NUMERIC_BASE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d+(\.\d+)*$").expect("valid numeric base regex"));

static OFFICIAL_VERSION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\d+\.\d+\.\d+(-[\w.]+)?$").expect("valid official version regex")
});

/// Returns true when `version` has the strict `MAJOR.MINOR.PATCH[-suffix]` shape
/// used to select the latest official release of a package.
pub fn is_official(version: &str) -> bool {
    OFFICIAL_VERSION.is_match(version)
}

/// A comparable version key.
///
/// Variant order matters: `Sentinel` is declared first so that it compares
/// below every parsed version.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum OrderedVersion {
    /// Empty or unparseable input.
    Sentinel,
    Parsed(ParsedVersion),
}

/// Release components with trailing zeros trimmed, so `1.2` and `1.2.0` compare
/// equal, plus an optional pre-release stage.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ParsedVersion {
    release: Vec<u64>,
    pre: Option<Prerelease>,
    build: BuildMetadata,
}

impl Ord for ParsedVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        self.release
            .cmp(&other.release)
            .then_with(|| match (&self.pre, &other.pre) {
                (None, None) => Ordering::Equal,
                (None, Some(_)) => Ordering::Greater,
                (Some(_), None) => Ordering::Less,
                (Some(a), Some(b)) => a.cmp(b),
            })
            .then_with(|| self.build.cmp(&other.build))
    }
}

impl PartialOrd for ParsedVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl ParsedVersion {
    fn new(mut release: Vec<u64>, pre: Option<Prerelease>, build: BuildMetadata) -> Self {
        while release.last() == Some(&0) {
            release.pop();
        }
        Self {
            release,
            pre,
            build,
        }
    }
}

impl From<semver::Version> for ParsedVersion {
    fn from(v: semver::Version) -> Self {
        let pre = (!v.pre.is_empty()).then_some(v.pre);
        Self::new(vec![v.major, v.minor, v.patch], pre, v.build)
    }
}

impl OrderedVersion {
    /// Parses any string into a comparable key. Never fails.
    pub fn parse(input: &str) -> Self {
        if input.is_empty() {
            return Self::Sentinel;
        }

        if let Ok(v) = semver::Version::parse(input) {
            return Self::Parsed(v.into());
        }

        let lowered = input.to_lowercase();
        let (base, suffix) = match lowered.split_once('-') {
            Some((base, suffix)) => (base, Some(suffix)),
            None => (lowered.as_str(), None),
        };

        if !NUMERIC_BASE.is_match(base) {
            warn!("Unparseable version '{}', treating as lowest", input);
            return Self::Sentinel;
        }

        let release = match base
            .split('.')
            .map(str::parse::<u64>)
            .collect::<Result<Vec<_>, _>>()
        {
            Ok(release) => release,
            Err(e) => {
                warn!("Invalid version base '{}' ({}), treating as lowest", base, e);
                return Self::Sentinel;
            }
        };

        let stage = match suffix {
            Some("dev" | "snapshot" | "ci-build") => Some("alpha.0".to_string()),
            Some("draft" | "ballot" | "preview") => Some("beta.0".to_string()),
            Some(s) if s.starts_with("rc") => {
                let digits: String = s.chars().filter(char::is_ascii_digit).collect();
                let number = if digits.is_empty() { "0" } else { digits.as_str() };
                // Leading zeros are not allowed in numeric identifiers.
                let number = number.trim_start_matches('0');
                Some(format!("rc.{}", if number.is_empty() { "0" } else { number }))
            }
            _ => None,
        };

        let pre = match stage.map(|s| Prerelease::new(&s)).transpose() {
            Ok(pre) => pre,
            Err(e) => {
                warn!("Invalid pre-release stage for '{}' ({}), treating as lowest", input, e);
                return Self::Sentinel;
            }
        };

        Self::Parsed(ParsedVersion::new(release, pre, BuildMetadata::EMPTY))
    }

    pub fn is_sentinel(&self) -> bool {
        matches!(self, Self::Sentinel)
    }
}

impl fmt::Display for OrderedVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sentinel => write!(f, "0.0.0-alpha.0"),
            Self::Parsed(v) => {
                let release = if v.release.is_empty() {
                    "0".to_string()
                } else {
                    v.release
                        .iter()
                        .map(u64::to_string)
                        .collect::<Vec<_>>()
                        .join(".")
                };
                write!(f, "{release}")?;
                if let Some(pre) = &v.pre {
                    write!(f, "-{pre}")?;
                }
                if !v.build.is_empty() {
                    write!(f, "+{}", v.build)?;
                }
                Ok(())
            }
        }
    }
}

/// Compares two raw version strings under [`OrderedVersion`].
pub fn compare(a: &str, b: &str) -> Ordering {
    OrderedVersion::parse(a).cmp(&OrderedVersion::parse(b))
}
