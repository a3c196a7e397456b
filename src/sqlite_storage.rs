//! SQLite-backed package store
//!
//! Uses a deadpool-backed SQLite connection pool so that database work never
//! blocks the Tokio runtime. Rows are keyed by `(package_name, version)`;
//! version history and dependencies are stored as JSON text.

use crate::config::StorageConfig;
use crate::dependency::PackageDependency;
use crate::error::{IgrError, Result, StorageError};
use crate::feed::VersionEntry;
use crate::normalizer::NormalizedPackage;
use crate::traits::{PackageStore, UpsertReport};
use chrono::{DateTime, Utc};
use deadpool_sqlite::rusqlite::{self, OptionalExtension, types::Type};
use deadpool_sqlite::{Config as DeadpoolConfig, Pool, Runtime};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

const SCHEMA_VERSION: i32 = 1;

const SELECT_COLUMNS: &str = "package_name, version, author, fhir_version, version_count, url, \
     all_versions, dependencies, latest_absolute_version, latest_official_version, canonical, registry";

pub struct SqliteStore {
    pool: Pool,
    db_path: PathBuf,
}

/// A package flattened into column values, JSON columns pre-serialized.
struct PackageRow {
    name: String,
    version: String,
    author: String,
    fhir_version: String,
    version_count: i64,
    url: String,
    all_versions: String,
    dependencies: String,
    latest_absolute_version: String,
    latest_official_version: Option<String>,
    canonical: String,
    registry: String,
}

impl TryFrom<&NormalizedPackage> for PackageRow {
    type Error = IgrError;

    fn try_from(p: &NormalizedPackage) -> Result<Self> {
        Ok(Self {
            name: p.name.clone(),
            version: p.version.clone(),
            author: p.author.clone(),
            fhir_version: p.fhir_version.clone(),
            version_count: p.version_count as i64,
            url: p.url.clone(),
            all_versions: serde_json::to_string(&p.all_versions)?,
            dependencies: serde_json::to_string(&p.dependencies)?,
            latest_absolute_version: p.latest_absolute_version.clone(),
            latest_official_version: p.latest_official_version.clone(),
            canonical: p.canonical.clone(),
            registry: p.registry.clone(),
        })
    }
}

impl SqliteStore {
    fn configure_connection(conn: &mut rusqlite::Connection) -> rusqlite::Result<()> {
        conn.execute_batch(
            r#"
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA temp_store = MEMORY;
            PRAGMA busy_timeout = 5000;
            "#,
        )?;
        Ok(())
    }

    /// Runs `f` on a pooled connection. SQLite failures surface as
    /// [`IgrError::Database`].
    async fn with_connection<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&mut rusqlite::Connection) -> rusqlite::Result<R> + Send + 'static,
        R: Send + 'static,
    {
        Ok(self.interact(f).await??)
    }

    /// Runs `f` inside one transaction. Any SQLite failure rolls the whole
    /// batch back and surfaces as [`StorageError::TransactionFailed`].
    async fn with_transaction<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&rusqlite::Transaction<'_>) -> rusqlite::Result<R> + Send + 'static,
        R: Send + 'static,
    {
        self.interact(move |conn| {
            let tx = conn.unchecked_transaction()?;
            let value = f(&tx)?;
            tx.commit()?;
            Ok(value)
        })
        .await?
        .map_err(|e| {
            StorageError::TransactionFailed {
                message: e.to_string(),
            }
            .into()
        })
    }

    async fn interact<F, R>(&self, f: F) -> Result<rusqlite::Result<R>>
    where
        F: FnOnce(&mut rusqlite::Connection) -> rusqlite::Result<R> + Send + 'static,
        R: Send + 'static,
    {
        let conn = self.pool.get().await.map_err(|e| {
            IgrError::Storage(StorageError::DatabaseError {
                message: format!("Failed to acquire SQLite connection: {e}"),
            })
        })?;

        conn.interact(move |conn| {
            Self::configure_connection(conn)?;
            f(conn)
        })
        .await
        .map_err(|e| {
            IgrError::Storage(StorageError::DatabaseError {
                message: format!("SQLite connection worker failed: {e}"),
            })
        })
    }

    /// Opens (creating if needed) the database at `config.database_path`.
    pub async fn new(config: &StorageConfig) -> Result<Self> {
        if let Some(parent) = config.database_path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await?;
        }
        let db_path = config.database_path.clone();

        let pool = DeadpoolConfig::new(db_path.clone())
            .builder(Runtime::Tokio1)
            .map_err(|e| {
                IgrError::Storage(StorageError::InitializationFailed {
                    message: format!("Failed to create SQLite pool builder: {e}"),
                })
            })?
            .max_size(config.connection_pool_size.max(1))
            .wait_timeout(Some(Duration::from_secs(30)))
            .create_timeout(Some(Duration::from_secs(30)))
            .recycle_timeout(Some(Duration::from_secs(30)))
            .build()
            .map_err(|e| {
                IgrError::Storage(StorageError::InitializationFailed {
                    message: format!("Failed to create SQLite pool: {e}"),
                })
            })?;

        let store = Self {
            pool,
            db_path: db_path.clone(),
        };

        store.init_schema().await?;
        info!("SQLite package store initialized at {:?}", db_path);
        Ok(store)
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    async fn init_schema(&self) -> Result<()> {
        let current_version = self
            .with_connection(move |conn| {
                conn.execute_batch(
                    r#"
                    CREATE TABLE IF NOT EXISTS metadata (
                        key TEXT PRIMARY KEY,
                        value TEXT NOT NULL
                    );
                    "#,
                )?;

                conn.query_row(
                    "SELECT value FROM metadata WHERE key = 'schema_version'",
                    [],
                    |row| row.get::<_, String>(0),
                )
                .optional()
            })
            .await?
            .and_then(|v| v.parse().ok())
            .unwrap_or(0);

        if current_version == 0 {
            self.create_schema().await?;
        } else if current_version != SCHEMA_VERSION {
            return Err(StorageError::UnsupportedSchemaVersion {
                current: current_version,
                required: SCHEMA_VERSION,
            }
            .into());
        }

        self.with_connection(move |conn| {
            conn.execute(
                "INSERT OR REPLACE INTO metadata (key, value) VALUES (?1, ?2)",
                rusqlite::params!["schema_version", SCHEMA_VERSION.to_string()],
            )?;
            Ok(())
        })
        .await?;

        debug!("SQLite schema initialized (version {})", SCHEMA_VERSION);
        Ok(())
    }

    async fn create_schema(&self) -> Result<()> {
        self.with_connection(move |conn| {
            conn.execute_batch(
                r#"
                CREATE TABLE IF NOT EXISTS cached_packages (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    package_name TEXT NOT NULL,
                    version TEXT NOT NULL,
                    author TEXT NOT NULL DEFAULT '',
                    fhir_version TEXT NOT NULL DEFAULT '',
                    version_count INTEGER NOT NULL DEFAULT 0,
                    url TEXT NOT NULL DEFAULT '',
                    all_versions TEXT NOT NULL DEFAULT '[]',
                    dependencies TEXT NOT NULL DEFAULT '[]',
                    latest_absolute_version TEXT NOT NULL,
                    latest_official_version TEXT,
                    canonical TEXT NOT NULL DEFAULT '',
                    registry TEXT NOT NULL DEFAULT '',
                    UNIQUE(package_name, version)
                );

                CREATE INDEX IF NOT EXISTS idx_cached_packages_name
                    ON cached_packages(package_name COLLATE NOCASE);

                -- Single row holding the last successful feed fetch
                CREATE TABLE IF NOT EXISTS registry_cache_info (
                    id INTEGER PRIMARY KEY CHECK (id = 1),
                    last_fetch_timestamp TEXT
                );
                "#,
            )?;
            Ok(())
        })
        .await?;

        debug!("Created database schema version {}", SCHEMA_VERSION);
        Ok(())
    }

    fn upsert_rows(tx: &rusqlite::Transaction<'_>, rows: &[PackageRow]) -> rusqlite::Result<UpsertReport> {
        let mut report = UpsertReport::default();
        for row in rows {
            let existing: Option<i64> = tx
                .query_row(
                    "SELECT id FROM cached_packages WHERE package_name = ?1 AND version = ?2",
                    rusqlite::params![row.name, row.version],
                    |r| r.get(0),
                )
                .optional()?;

            match existing {
                Some(id) => {
                    tx.execute(
                        r#"
                        UPDATE cached_packages SET
                            author = ?1, fhir_version = ?2, version_count = ?3, url = ?4,
                            all_versions = ?5, dependencies = ?6, latest_absolute_version = ?7,
                            latest_official_version = ?8, canonical = ?9, registry = ?10
                        WHERE id = ?11
                        "#,
                        rusqlite::params![
                            row.author,
                            row.fhir_version,
                            row.version_count,
                            row.url,
                            row.all_versions,
                            row.dependencies,
                            row.latest_absolute_version,
                            row.latest_official_version,
                            row.canonical,
                            row.registry,
                            id
                        ],
                    )?;
                    report.updated += 1;
                }
                None => {
                    tx.execute(
                        r#"
                        INSERT INTO cached_packages (
                            package_name, version, author, fhir_version, version_count, url,
                            all_versions, dependencies, latest_absolute_version,
                            latest_official_version, canonical, registry
                        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
                        "#,
                        rusqlite::params![
                            row.name,
                            row.version,
                            row.author,
                            row.fhir_version,
                            row.version_count,
                            row.url,
                            row.all_versions,
                            row.dependencies,
                            row.latest_absolute_version,
                            row.latest_official_version,
                            row.canonical,
                            row.registry
                        ],
                    )?;
                    report.inserted += 1;
                }
            }
        }
        Ok(report)
    }

    fn write_last_fetch(tx: &rusqlite::Transaction<'_>, fetched_at: &str) -> rusqlite::Result<()> {
        tx.execute(
            "INSERT OR REPLACE INTO registry_cache_info (id, last_fetch_timestamp) VALUES (1, ?1)",
            rusqlite::params![fetched_at],
        )?;
        Ok(())
    }

    fn to_rows(packages: &[NormalizedPackage]) -> Result<Vec<PackageRow>> {
        packages.iter().map(PackageRow::try_from).collect()
    }
}

#[async_trait::async_trait]
impl PackageStore for SqliteStore {
    async fn find_by_name_version(
        &self,
        name: &str,
        version: &str,
    ) -> Result<Option<NormalizedPackage>> {
        let name = name.to_string();
        let version = version.to_string();
        self.with_connection(move |conn| {
            conn.query_row(
                &format!(
                    "SELECT {SELECT_COLUMNS} FROM cached_packages WHERE package_name = ?1 AND version = ?2"
                ),
                rusqlite::params![name, version],
                extract_package,
            )
            .optional()
        })
        .await
    }

    async fn find_by_name(&self, name: &str) -> Result<Vec<NormalizedPackage>> {
        let name = name.to_string();
        self.with_connection(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {SELECT_COLUMNS} FROM cached_packages WHERE package_name = ?1 COLLATE NOCASE ORDER BY id"
            ))?;
            let packages = stmt
                .query_map(rusqlite::params![name], extract_package)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(packages)
        })
        .await
    }

    #[tracing::instrument(name = "store.upsert", skip(self, packages), fields(count = packages.len()))]
    async fn upsert(&self, packages: &[NormalizedPackage]) -> Result<UpsertReport> {
        let rows = Self::to_rows(packages)?;
        let report = self
            .with_transaction(move |tx| Self::upsert_rows(tx, &rows))
            .await?;
        debug!(
            "Upserted packages: {} inserted, {} updated",
            report.inserted, report.updated
        );
        Ok(report)
    }

    async fn delete_all(&self) -> Result<usize> {
        self.with_connection(move |conn| conn.execute("DELETE FROM cached_packages", []))
            .await
    }

    async fn query_all(&self) -> Result<Vec<NormalizedPackage>> {
        self.with_connection(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {SELECT_COLUMNS} FROM cached_packages ORDER BY package_name COLLATE NOCASE, id"
            ))?;
            let packages = stmt
                .query_map([], extract_package)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(packages)
        })
        .await
    }

    #[tracing::instrument(name = "store.replace_all", skip(self, packages), fields(count = packages.len()))]
    async fn replace_all(
        &self,
        packages: &[NormalizedPackage],
        fetched_at: DateTime<Utc>,
    ) -> Result<UpsertReport> {
        let rows = Self::to_rows(packages)?;
        let fetched_at = fetched_at.to_rfc3339();
        self.with_transaction(move |tx| {
            tx.execute("DELETE FROM cached_packages", [])?;
            let report = Self::upsert_rows(tx, &rows)?;
            Self::write_last_fetch(tx, &fetched_at)?;
            Ok(report)
        })
        .await
    }

    async fn last_fetch(&self) -> Result<Option<DateTime<Utc>>> {
        let raw: Option<Option<String>> = self
            .with_connection(move |conn| {
                conn.query_row(
                    "SELECT last_fetch_timestamp FROM registry_cache_info WHERE id = 1",
                    [],
                    |row| row.get(0),
                )
                .optional()
            })
            .await?;

        Ok(raw
            .flatten()
            .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
            .map(|dt| dt.with_timezone(&Utc)))
    }

    async fn set_last_fetch(&self, fetched_at: DateTime<Utc>) -> Result<()> {
        let fetched_at = fetched_at.to_rfc3339();
        self.with_transaction(move |tx| Self::write_last_fetch(tx, &fetched_at))
            .await
    }
}

fn json_column<T: serde::de::DeserializeOwned>(
    row: &rusqlite::Row<'_>,
    idx: usize,
) -> rusqlite::Result<T> {
    let raw: String = row.get(idx)?;
    serde_json::from_str(&raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn extract_package(row: &rusqlite::Row<'_>) -> rusqlite::Result<NormalizedPackage> {
    let all_versions: Vec<VersionEntry> = json_column(row, 6)?;
    let dependencies: Vec<PackageDependency> = json_column(row, 7)?;

    Ok(NormalizedPackage {
        name: row.get(0)?,
        version: row.get(1)?,
        author: row.get(2)?,
        fhir_version: row.get(3)?,
        version_count: row.get::<_, i64>(4)?.max(0) as usize,
        url: row.get(5)?,
        all_versions,
        dependencies,
        latest_absolute_version: row.get(8)?,
        latest_official_version: row.get(9)?,
        canonical: row.get(10)?,
        registry: row.get(11)?,
    })
}
