//! Durable metadata catalog backed by SQLite.
//!
//! The catalog is the single source of truth for which features exist,
//! where their data files live, and what they look like. Schema changes go
//! through the versioned migration list, tracked via `PRAGMA user_version`.

use crate::error::FeatureError;
use crate::table::ColumnType;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Catalog row for one stored feature.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureMetadata {
    pub name: String,
    pub group: String,
    pub data_type: BTreeMap<String, ColumnType>,
    pub description: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub version: String,
    pub file_path: PathBuf,
    pub size_bytes: u64,
    pub record_count: u64,
}

/// Catalog row for one feature group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureGroupMetadata {
    pub name: String,
    pub description: String,
    pub features: Vec<String>,
    pub created_at: DateTime<Utc>,
}

/// Aggregate counts across the whole catalog.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CatalogStats {
    pub feature_count: u64,
    pub group_count: u64,
    pub total_size_bytes: u64,
    pub total_records: u64,
}

/// Ordered schema migrations; `PRAGMA user_version` records how many have run.
const MIGRATIONS: &[&str] = &["
    CREATE TABLE feature_metadata (
        feature_name TEXT PRIMARY KEY,
        feature_group TEXT NOT NULL,
        data_type TEXT NOT NULL,
        description TEXT NOT NULL DEFAULT '',
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL,
        version TEXT NOT NULL,
        file_path TEXT NOT NULL,
        size_bytes INTEGER NOT NULL,
        record_count INTEGER NOT NULL
    );
    CREATE TABLE feature_groups (
        group_name TEXT PRIMARY KEY,
        description TEXT NOT NULL DEFAULT '',
        created_at TEXT NOT NULL,
        features TEXT NOT NULL
    );
    CREATE INDEX idx_feature_metadata_group ON feature_metadata(feature_group);
"];

/// SQLite-backed metadata catalog.
///
/// Writers are serialized through an internal mutex so concurrent saves
/// from parallel pipeline chunks never interleave partial row updates.
pub struct MetadataCatalog {
    conn: Mutex<Connection>,
}

impl MetadataCatalog {
    /// Open (or create) the catalog database and run pending migrations.
    ///
    /// An unreadable or malformed database is a fatal initialization error.
    pub fn open(path: &Path) -> Result<Self, FeatureError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        Self::migrate(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// In-memory catalog, used by tests.
    pub fn open_in_memory() -> Result<Self, FeatureError> {
        let conn = Connection::open_in_memory()?;
        Self::migrate(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn migrate(conn: &Connection) -> Result<(), FeatureError> {
        let applied: i64 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;
        for (i, sql) in MIGRATIONS.iter().enumerate().skip(applied as usize) {
            conn.execute_batch(&format!("BEGIN; {sql} COMMIT;"))?;
            conn.pragma_update(None, "user_version", i as i64 + 1)?;
            tracing::debug!(migration = i + 1, "Applied catalog migration");
        }
        Ok(())
    }

    /// Insert or replace a feature row.
    ///
    /// On update the row keeps its `created_at` and gets a bumped minor
    /// version; a first insert starts at version "1.0". Feature names are
    /// unique across groups: re-registering a name under a different group
    /// is a `SchemaConflict`, never a silent overwrite.
    ///
    /// Returns the metadata as stored (timestamps and version filled in).
    pub fn upsert_feature(&self, meta: &FeatureMetadata) -> Result<FeatureMetadata, FeatureError> {
        let mut conn = self.lock();
        let tx = conn.transaction()?;

        let existing = tx
            .query_row(
                "SELECT feature_group, created_at, version FROM feature_metadata
                 WHERE feature_name = ?1",
                [&meta.name],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                    ))
                },
            )
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(other),
            })?;

        let now = Utc::now();
        let (created_at, version) = match existing {
            Some((group, created, version)) => {
                if group != meta.group {
                    return Err(FeatureError::schema_conflict(format!(
                        "feature '{}' already registered in group '{}', cannot register in '{}'",
                        meta.name, group, meta.group
                    )));
                }
                (parse_ts(&created)?, bump_version(&version))
            }
            None => (now, "1.0".to_string()),
        };

        let stored = FeatureMetadata {
            created_at,
            updated_at: now,
            version,
            ..meta.clone()
        };

        tx.execute(
            "INSERT OR REPLACE INTO feature_metadata
             (feature_name, feature_group, data_type, description, created_at,
              updated_at, version, file_path, size_bytes, record_count)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            rusqlite::params![
                stored.name,
                stored.group,
                serde_json::to_string(&stored.data_type)?,
                stored.description,
                fmt_ts(&stored.created_at),
                fmt_ts(&stored.updated_at),
                stored.version,
                stored.file_path.to_string_lossy(),
                stored.size_bytes,
                stored.record_count,
            ],
        )?;
        tx.commit()?;
        Ok(stored)
    }

    /// Insert or replace a group row, preserving `created_at` on update.
    pub fn upsert_group(
        &self,
        name: &str,
        description: &str,
        features: &[String],
    ) -> Result<(), FeatureError> {
        let mut conn = self.lock();
        let tx = conn.transaction()?;

        let created_at = tx
            .query_row(
                "SELECT created_at FROM feature_groups WHERE group_name = ?1",
                [name],
                |row| row.get::<_, String>(0),
            )
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(fmt_ts(&Utc::now())),
                other => Err(other),
            })?;

        tx.execute(
            "INSERT OR REPLACE INTO feature_groups
             (group_name, description, created_at, features)
             VALUES (?1, ?2, ?3, ?4)",
            rusqlite::params![name, description, created_at, serde_json::to_string(features)?],
        )?;
        tx.commit()?;
        Ok(())
    }

    /// Look up a feature by name. Absent names return `None`, never an error.
    pub fn get_feature(&self, name: &str) -> Result<Option<FeatureMetadata>, FeatureError> {
        let conn = self.lock();
        let result = conn
            .query_row(
                "SELECT feature_name, feature_group, data_type, description, created_at,
                        updated_at, version, file_path, size_bytes, record_count
                 FROM feature_metadata WHERE feature_name = ?1",
                [name],
                row_to_feature,
            )
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(other),
            })?;
        Ok(result)
    }

    /// Look up a group by name.
    pub fn get_group(&self, name: &str) -> Result<Option<FeatureGroupMetadata>, FeatureError> {
        let conn = self.lock();
        let row = conn
            .query_row(
                "SELECT group_name, description, created_at, features
                 FROM feature_groups WHERE group_name = ?1",
                [name],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                    ))
                },
            )
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(other),
            })?;

        match row {
            Some((name, description, created, features)) => Ok(Some(FeatureGroupMetadata {
                name,
                description,
                features: serde_json::from_str(&features)?,
                created_at: parse_ts(&created)?,
            })),
            None => Ok(None),
        }
    }

    /// Feature names, most recently updated first, optionally scoped to a group.
    pub fn list_features(&self, group: Option<&str>) -> Result<Vec<String>, FeatureError> {
        let conn = self.lock();
        let mut names = Vec::new();
        match group {
            Some(g) => {
                let mut stmt = conn.prepare(
                    "SELECT feature_name FROM feature_metadata
                     WHERE feature_group = ?1 ORDER BY updated_at DESC",
                )?;
                let rows = stmt.query_map([g], |row| row.get::<_, String>(0))?;
                for name in rows {
                    names.push(name?);
                }
            }
            None => {
                let mut stmt = conn.prepare(
                    "SELECT feature_name FROM feature_metadata ORDER BY updated_at DESC",
                )?;
                let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
                for name in rows {
                    names.push(name?);
                }
            }
        }
        Ok(names)
    }

    /// All registered group names.
    pub fn list_groups(&self) -> Result<Vec<String>, FeatureError> {
        let conn = self.lock();
        let mut stmt = conn.prepare("SELECT group_name FROM feature_groups ORDER BY group_name")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        let mut names = Vec::new();
        for name in rows {
            names.push(name?);
        }
        Ok(names)
    }

    /// Substring search over feature names and descriptions.
    pub fn search_features(&self, query: &str) -> Result<Vec<String>, FeatureError> {
        let conn = self.lock();
        let pattern = format!("%{query}%");
        let mut stmt = conn.prepare(
            "SELECT feature_name FROM feature_metadata
             WHERE feature_name LIKE ?1 OR description LIKE ?1
             ORDER BY updated_at DESC",
        )?;
        let rows = stmt.query_map([&pattern], |row| row.get::<_, String>(0))?;
        let mut names = Vec::new();
        for name in rows {
            names.push(name?);
        }
        Ok(names)
    }

    /// Remove a feature row. The backing file is the caller's responsibility.
    /// Returns whether a row was removed.
    pub fn delete_feature(&self, name: &str) -> Result<bool, FeatureError> {
        let conn = self.lock();
        let affected = conn.execute(
            "DELETE FROM feature_metadata WHERE feature_name = ?1",
            [name],
        )?;
        Ok(affected > 0)
    }

    /// Aggregate catalog-wide counts.
    pub fn aggregate_stats(&self) -> Result<CatalogStats, FeatureError> {
        let conn = self.lock();
        let (feature_count, total_size_bytes, total_records) = conn.query_row(
            "SELECT COUNT(*), COALESCE(SUM(size_bytes), 0), COALESCE(SUM(record_count), 0)
             FROM feature_metadata",
            [],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )?;
        let group_count =
            conn.query_row("SELECT COUNT(*) FROM feature_groups", [], |row| row.get(0))?;
        Ok(CatalogStats {
            feature_count,
            group_count,
            total_size_bytes,
            total_records,
        })
    }

    /// Every feature's name and file path, for the orphan sweep.
    pub fn list_file_paths(&self) -> Result<Vec<(String, PathBuf)>, FeatureError> {
        let conn = self.lock();
        let mut stmt = conn.prepare("SELECT feature_name, file_path FROM feature_metadata")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;
        let mut paths = Vec::new();
        for row in rows {
            let (name, path) = row?;
            paths.push((name, PathBuf::from(path)));
        }
        Ok(paths)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|p| p.into_inner())
    }
}

fn row_to_feature(row: &rusqlite::Row<'_>) -> rusqlite::Result<FeatureMetadata> {
    let data_type: String = row.get(2)?;
    let created: String = row.get(4)?;
    let updated: String = row.get(5)?;
    let file_path: String = row.get(7)?;
    Ok(FeatureMetadata {
        name: row.get(0)?,
        group: row.get(1)?,
        data_type: serde_json::from_str(&data_type)
            .map_err(|e| conversion_err(2, Box::new(e)))?,
        description: row.get(3)?,
        created_at: parse_ts(&created).map_err(|_| bad_ts(4))?,
        updated_at: parse_ts(&updated).map_err(|_| bad_ts(5))?,
        version: row.get(6)?,
        file_path: PathBuf::from(file_path),
        size_bytes: row.get(8)?,
        record_count: row.get(9)?,
    })
}

fn conversion_err(col: usize, e: Box<dyn std::error::Error + Send + Sync>) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(col, rusqlite::types::Type::Text, e)
}

fn bad_ts(col: usize) -> rusqlite::Error {
    conversion_err(col, "malformed timestamp".into())
}

fn fmt_ts(ts: &DateTime<Utc>) -> String {
    // Fixed-width micros so lexicographic ORDER BY matches time order.
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_ts(s: &str) -> Result<DateTime<Utc>, FeatureError> {
    DateTime::parse_from_rfc3339(s)
        .map(|d| d.with_timezone(&Utc))
        .map_err(|e| FeatureError::storage(format!("malformed catalog timestamp '{s}': {e}")))
}

/// Bump the minor component of a "major.minor" version string.
fn bump_version(version: &str) -> String {
    let mut parts = version.splitn(2, '.');
    let major: u64 = parts.next().and_then(|p| p.parse().ok()).unwrap_or(1);
    let minor: u64 = parts.next().and_then(|p| p.parse().ok()).unwrap_or(0);
    format!("{major}.{}", minor + 1)
}
