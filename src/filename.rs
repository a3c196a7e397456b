//! Mapping between `(name, version)` pairs and archive filenames
//!
//! Both directions are lossy: sanitization replaces unsafe characters and the
//! decoder relies on a heuristic scan for a trailing version. Encoding the
//! decoded pair a second time is stable.

use regex::Regex;
use std::sync::LazyLock;
use tracing::error;

/// Suffix of every archive in the local package store.
pub const ARCHIVE_EXTENSION: &str = ".tgz";

/// Placeholder used when a sanitized part ends up empty.
pub const INVALID_NAME: &str = "invalid_name";

static REPEATED_UNDERSCORES: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"_+").expect("valid underscore regex"));

static TRAILING_VERSION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(\d+\.\d+\.\d+)(?:-(?:preview|ballot|draft|snapshot|alpha|beta|RC\d*|buildnumbersuffix\d*|alpha\d+\.\d+\.\d+|snapshot-\d+|ballot-\d+|alpha\.\d+))?$",
    )
    .expect("valid trailing version regex")
});

/// Replaces every character that is not alphanumeric, `.` or `-` with `_`,
/// collapses runs of `_` and strips leading/trailing `_`, `-` and `.`.
pub fn sanitize_filename_part(text: &str) -> String {
    let replaced: String = text
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || c == '.' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect();
    let collapsed = REPEATED_UNDERSCORES.replace_all(&replaced, "_");
    let trimmed = collapsed.trim_matches(|c| matches!(c, '_' | '-' | '.'));
    if trimmed.is_empty() {
        INVALID_NAME.to_string()
    } else {
        trimmed.to_string()
    }
}

/// Builds `{name}-{version}.tgz`, or `None` when either part is empty.
pub fn encode_filename(name: &str, version: &str) -> Option<String> {
    if name.is_empty() || version.is_empty() {
        error!("Missing name ('{}') or version ('{}')", name, version);
        return None;
    }
    Some(format!(
        "{}-{}{}",
        sanitize_filename_part(name),
        sanitize_filename_part(version),
        ARCHIVE_EXTENSION
    ))
}

/// Recovers `(name, version)` from an archive filename.
///
/// Non-`.tgz` input yields two empty strings. When no version can be located
/// the whole base name is returned as the name with an empty version.
pub fn decode_filename(filename: &str) -> (String, String) {
    let Some(base) = filename.strip_suffix(ARCHIVE_EXTENSION) else {
        return (String::new(), String::new());
    };

    let fallback = || (base.replace('_', "."), String::new());

    // Longest prefix first; the first prefix ending in a version wins.
    let version_start = base
        .char_indices()
        .map(|(i, c)| i + c.len_utf8())
        .rev()
        .find_map(|end| {
            TRAILING_VERSION
                .captures(&base[..end])
                .and_then(|caps| caps.get(1))
                .map(|m| m.start())
        });

    let Some(start) = version_start else {
        return fallback();
    };

    let name = base[..start].trim_end_matches('-').replace('_', ".");
    let version = &base[start..];
    if name.is_empty() || version.is_empty() {
        return fallback();
    }
    (name, version.to_string())
}
