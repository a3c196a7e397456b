//! Dependency declarations
//!
//! Feeds and package manifests declare dependencies either as a
//! `name -> version` mapping or as a list of `"name@version"` strings or
//! `{name, version}` objects. [`DependencySpec`] captures that variety at the
//! ingestion boundary and [`DependencySpec::into_dependencies`] turns it into
//! the canonical ordered sequence used everywhere else.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One declared dependency.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PackageDependency {
    pub name: String,
    pub version: String,
}

impl PackageDependency {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
        }
    }
}

/// Raw dependency declaration as found in feed entries and manifests.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum DependencySpec {
    #[default]
    Absent,
    Map(Map<String, Value>),
    List(Vec<Value>),
    Other(Value),
}

impl DependencySpec {
    /// Normalizes the declaration. Shapes that are neither a mapping nor a list
    /// produce no dependencies.
    pub fn into_dependencies(self) -> Vec<PackageDependency> {
        match self {
            Self::Map(map) => map
                .into_iter()
                .map(|(name, version)| PackageDependency::new(name, value_to_string(version)))
                .collect(),
            Self::List(items) => items.into_iter().filter_map(list_item).collect(),
            Self::Absent | Self::Other(_) => Vec::new(),
        }
    }

    /// Builds a spec from an arbitrary JSON value.
    pub fn from_value(value: Value) -> Self {
        match value {
            Value::Null => Self::Absent,
            Value::Object(map) => Self::Map(map),
            Value::Array(items) => Self::List(items),
            other => Self::Other(other),
        }
    }
}

fn list_item(item: Value) -> Option<PackageDependency> {
    match item {
        Value::String(s) => {
            let (name, version) = s.split_once('@')?;
            Some(PackageDependency::new(name, version))
        }
        Value::Object(mut obj) => {
            let name = match obj.remove("name") {
                Some(Value::String(name)) => name,
                _ => return None,
            };
            let version = obj.remove("version").map(value_to_string).unwrap_or_default();
            Some(PackageDependency::new(name, version))
        }
        _ => None,
    }
}

fn value_to_string(value: Value) -> String {
    match value {
        Value::String(s) => s,
        Value::Null => String::new(),
        other => other.to_string(),
    }
}
