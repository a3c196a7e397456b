use crate::error::Result;
use crate::normalizer::NormalizedPackage;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// Persistence contract consumed by the refresh path and the read path

/// Outcome of a batch upsert.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpsertReport {
    pub inserted: usize,
    pub updated: usize,
}

/// Persistent store of normalized package rows keyed by `(name, version)`.
///
/// `upsert` and `replace_all` are all-or-nothing: on failure nothing from the
/// batch is visible and the error is returned.
#[async_trait::async_trait]
pub trait PackageStore: Send + Sync {
    async fn find_by_name_version(
        &self,
        name: &str,
        version: &str,
    ) -> Result<Option<NormalizedPackage>>;

    /// Rows whose name matches case-insensitively.
    async fn find_by_name(&self, name: &str) -> Result<Vec<NormalizedPackage>>;

    async fn upsert(&self, packages: &[NormalizedPackage]) -> Result<UpsertReport>;

    async fn delete_all(&self) -> Result<usize>;

    async fn query_all(&self) -> Result<Vec<NormalizedPackage>>;

    /// Deletes every row, inserts `packages` and records `fetched_at`, in one
    /// transaction.
    async fn replace_all(
        &self,
        packages: &[NormalizedPackage],
        fetched_at: DateTime<Utc>,
    ) -> Result<UpsertReport>;

    async fn last_fetch(&self) -> Result<Option<DateTime<Utc>>>;

    async fn set_last_fetch(&self, fetched_at: DateTime<Utc>) -> Result<()>;
}
