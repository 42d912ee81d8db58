//! Feature store façade composing cache, catalog, and storage backend.

use crate::cache::{CacheStats, FeatureCache};
use crate::catalog::{CatalogStats, FeatureMetadata, MetadataCatalog};
use crate::error::FeatureError;
use crate::storage::{COLUMNAR_EXT, StorageBackend};
use crate::table::FeatureTable;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Feature store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureStoreConfig {
    pub base_path: PathBuf,
    pub cache_enabled: bool,
    pub cache_max_size: usize,
    pub cache_ttl_seconds: u64,
}

impl Default for FeatureStoreConfig {
    fn default() -> Self {
        Self {
            base_path: PathBuf::from("data/feature_store"),
            cache_enabled: true,
            cache_max_size: 100,
            cache_ttl_seconds: 3600,
        }
    }
}

/// Merged store-wide statistics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreStats {
    pub catalog: CatalogStats,
    pub cache: Option<CacheStats>,
    pub storage_path: PathBuf,
}

/// Result of an orphan sweep.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OrphanReport {
    /// Catalog rows removed because their backing file was missing or empty.
    pub removed_entries: Vec<String>,
    /// Data files with no catalog row.
    pub orphan_files: Vec<PathBuf>,
    /// How many of `orphan_files` were deleted.
    pub removed_files: usize,
}

/// The central feature store: persists named feature tables, serves them
/// back through an in-memory cache, and tracks their metadata.
///
/// Ready to serve as soon as `open` returns; a failure of any sub-component
/// during `open` is fatal. Handles are passed explicitly to collaborators
/// (no global instance), and the store is safe to share across threads.
pub struct FeatureStore {
    config: FeatureStoreConfig,
    catalog: MetadataCatalog,
    backend: StorageBackend,
    cache: Option<FeatureCache>,
}

impl FeatureStore {
    /// Open the store at `config.base_path`, creating the on-disk layout
    /// (`features/`, `metadata/`, `cache/`) and the catalog if needed.
    pub fn open(config: FeatureStoreConfig) -> Result<Self, FeatureError> {
        std::fs::create_dir_all(config.base_path.join("features"))?;
        // Scratch space; not authoritative, safe to delete.
        std::fs::create_dir_all(config.base_path.join("cache"))?;

        let catalog = MetadataCatalog::open(&config.base_path.join("metadata/catalog.db"))?;
        let cache = config
            .cache_enabled
            .then(|| FeatureCache::new(config.cache_max_size, config.cache_ttl_seconds));

        tracing::info!(path = %config.base_path.display(), "Feature store opened");
        Ok(Self {
            config,
            catalog,
            backend: StorageBackend::local(),
            cache,
        })
    }

    pub fn catalog(&self) -> &MetadataCatalog {
        &self.catalog
    }

    /// Persist a named set of feature tables under a group.
    ///
    /// Each table is written to a fresh timestamped file, registered in the
    /// catalog (version bumped on re-save), and placed in the cache. A
    /// feature that fails to write is logged and skipped; the group row
    /// lists only the features that were stored. Returns name -> file path
    /// for the stored features.
    pub fn save_features(
        &self,
        group: &str,
        tables: &BTreeMap<String, FeatureTable>,
    ) -> Result<BTreeMap<String, PathBuf>, FeatureError> {
        tracing::info!(group, count = tables.len(), "Saving features");
        let timestamp = Utc::now().format("%Y%m%d_%H%M%S%3f");
        let group_dir = self.config.base_path.join("features").join(group);

        let mut saved = BTreeMap::new();
        for (name, table) in tables {
            let file_path = group_dir.join(format!("{name}_{timestamp}.{COLUMNAR_EXT}"));
            match self.save_one(group, name, table, &file_path) {
                Ok(()) => {
                    saved.insert(name.clone(), file_path);
                }
                Err(e) => {
                    tracing::warn!(group, name, error = %e, "Skipping feature that failed to save");
                }
            }
        }

        if saved.is_empty() {
            tracing::warn!(group, "No features saved; group metadata left untouched");
        } else {
            let names: Vec<String> = saved.keys().cloned().collect();
            self.catalog
                .upsert_group(group, &format!("Feature group: {group}"), &names)?;
        }
        Ok(saved)
    }

    fn save_one(
        &self,
        group: &str,
        name: &str,
        table: &FeatureTable,
        file_path: &Path,
    ) -> Result<(), FeatureError> {
        let size_bytes = self.backend.write_table(file_path, table)?;
        let meta = FeatureMetadata {
            name: name.to_string(),
            group: group.to_string(),
            data_type: table.dtype_map(),
            description: format!("Auto-generated metadata for {name}"),
            created_at: Utc::now(),
            updated_at: Utc::now(),
            version: String::new(),
            file_path: file_path.to_path_buf(),
            size_bytes,
            record_count: table.num_rows() as u64,
        };
        if let Err(e) = self.catalog.upsert_feature(&meta) {
            // All-or-nothing per feature: do not leave a file the catalog
            // never learned about.
            let _ = self.backend.delete(file_path);
            return Err(e);
        }
        if let Some(cache) = &self.cache {
            cache.put(&FeatureCache::key(group, name), table.clone());
        }
        tracing::debug!(group, name, path = %file_path.display(), "Feature saved");
        Ok(())
    }

    /// Fetch feature tables by name, cache first, then catalog + storage.
    ///
    /// Names not found anywhere are omitted from the result; the caller
    /// compares result size to request size to detect partial misses.
    pub fn get_features(
        &self,
        names: &[String],
        group: Option<&str>,
    ) -> BTreeMap<String, FeatureTable> {
        let mut result = BTreeMap::new();
        for name in names {
            match self.load_feature(name, group) {
                Some(table) => {
                    result.insert(name.clone(), table);
                }
                None => tracing::warn!(name, ?group, "Feature not found"),
            }
        }
        tracing::debug!(
            requested = names.len(),
            found = result.len(),
            "Feature lookup complete"
        );
        result
    }

    fn load_feature(&self, name: &str, group: Option<&str>) -> Option<FeatureTable> {
        if let (Some(cache), Some(group)) = (&self.cache, group) {
            if let Some(table) = cache.get(&FeatureCache::key(group, name)) {
                return Some(table);
            }
        }

        let meta = match self.catalog.get_feature(name) {
            Ok(Some(meta)) => meta,
            Ok(None) => return None,
            Err(e) => {
                tracing::warn!(name, error = %e, "Catalog lookup failed");
                return None;
            }
        };
        if group.is_some_and(|g| g != meta.group) {
            return None;
        }

        match self.backend.read_table(&meta.file_path) {
            Ok(table) => {
                if let Some(cache) = &self.cache {
                    cache.put(&FeatureCache::key(&meta.group, name), table.clone());
                }
                Some(table)
            }
            Err(e) => {
                tracing::warn!(name, path = %meta.file_path.display(), error = %e,
                    "Failed to load feature file");
                None
            }
        }
    }

    /// All features of a group, most recently updated first.
    pub fn get_latest_features(&self, group: &str) -> BTreeMap<String, FeatureTable> {
        let names = match self.catalog.list_features(Some(group)) {
            Ok(names) => names,
            Err(e) => {
                tracing::warn!(group, error = %e, "Failed to list group features");
                return BTreeMap::new();
            }
        };
        self.get_features(&names, Some(group))
    }

    /// Feature names, optionally scoped to a group.
    pub fn list_features(&self, group: Option<&str>) -> Result<Vec<String>, FeatureError> {
        self.catalog.list_features(group)
    }

    /// All registered group names.
    pub fn list_groups(&self) -> Result<Vec<String>, FeatureError> {
        self.catalog.list_groups()
    }

    /// Catalog metadata for one feature.
    pub fn get_feature_info(&self, name: &str) -> Result<Option<FeatureMetadata>, FeatureError> {
        self.catalog.get_feature(name)
    }

    /// Remove a feature's file, catalog row, and cache entry.
    ///
    /// Returns whether the feature existed. Never fails for "not found".
    pub fn delete_feature(&self, name: &str, group: Option<&str>) -> bool {
        let meta = match self.catalog.get_feature(name) {
            Ok(Some(meta)) => meta,
            Ok(None) => return false,
            Err(e) => {
                tracing::warn!(name, error = %e, "Catalog lookup failed during delete");
                return false;
            }
        };
        if group.is_some_and(|g| g != meta.group) {
            return false;
        }

        if let Err(e) = self.backend.delete(&meta.file_path) {
            tracing::warn!(name, path = %meta.file_path.display(), error = %e,
                "Failed to remove feature file");
        }
        let removed = match self.catalog.delete_feature(name) {
            Ok(removed) => removed,
            Err(e) => {
                tracing::warn!(name, error = %e, "Failed to remove catalog row");
                false
            }
        };
        if let Some(cache) = &self.cache {
            cache.remove(&FeatureCache::key(&meta.group, name));
        }
        if removed {
            tracing::info!(name, group = meta.group, "Feature deleted");
        }
        removed
    }

    /// Catalog aggregates merged with cache statistics.
    pub fn get_store_stats(&self) -> Result<StoreStats, FeatureError> {
        Ok(StoreStats {
            catalog: self.catalog.aggregate_stats()?,
            cache: self.cache.as_ref().map(|c| c.stats()),
            storage_path: self.config.base_path.clone(),
        })
    }

    /// Recursively copy the storage root (data + catalog) to a destination.
    ///
    /// Disaster recovery, not point-in-time versioning. Defaults to a
    /// timestamped `backup_feature_store_*` directory next to the root.
    pub fn backup_store(&self, dest: Option<PathBuf>) -> Result<PathBuf, FeatureError> {
        let dest = dest.unwrap_or_else(|| {
            let timestamp = Utc::now().format("%Y%m%d_%H%M%S");
            self.config
                .base_path
                .parent()
                .unwrap_or_else(|| Path::new("."))
                .join(format!("backup_feature_store_{timestamp}"))
        });

        for entry in WalkDir::new(&self.config.base_path) {
            let entry = entry.map_err(|e| FeatureError::storage(e.to_string()))?;
            let rel = entry
                .path()
                .strip_prefix(&self.config.base_path)
                .map_err(|e| FeatureError::storage(e.to_string()))?;
            let target = dest.join(rel);
            if entry.file_type().is_dir() {
                std::fs::create_dir_all(&target)?;
            } else {
                if let Some(parent) = target.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                std::fs::copy(entry.path(), &target)?;
            }
        }
        tracing::info!(dest = %dest.display(), "Feature store backed up");
        Ok(dest)
    }

    /// Reconcile catalog and storage.
    ///
    /// Catalog rows whose backing file is missing or empty are removed.
    /// Data files with no catalog row are reported, and deleted only when
    /// `remove_files` is set (re-saves leave prior-version files behind;
    /// there is no retention policy attached to them).
    pub fn cleanup_orphans(&self, remove_files: bool) -> Result<OrphanReport, FeatureError> {
        let mut report = OrphanReport::default();
        let mut referenced = std::collections::HashSet::new();

        for (name, path) in self.catalog.list_file_paths()? {
            let file_ok = self.backend.exists(&path)
                && std::fs::metadata(&path).map(|m| m.len() > 0).unwrap_or(false);
            if file_ok {
                referenced.insert(path);
            } else {
                tracing::warn!(name, path = %path.display(), "Removing orphaned catalog entry");
                self.catalog.delete_feature(&name)?;
                report.removed_entries.push(name);
            }
        }

        let features_dir = self.config.base_path.join("features");
        for entry in WalkDir::new(&features_dir).into_iter().filter_map(Result::ok) {
            let path = entry.path();
            if !entry.file_type().is_file()
                || path.extension().and_then(|e| e.to_str()) != Some(COLUMNAR_EXT)
                || referenced.contains(path)
            {
                continue;
            }
            report.orphan_files.push(path.to_path_buf());
            if remove_files {
                self.backend.delete(path)?;
                report.removed_files += 1;
            }
        }

        tracing::info!(
            removed_entries = report.removed_entries.len(),
            orphan_files = report.orphan_files.len(),
            removed_files = report.removed_files,
            "Orphan sweep complete"
        );
        Ok(report)
    }

    /// Drop all cached tables. Cached data is always rebuildable.
    pub fn clear_cache(&self) {
        if let Some(cache) = &self.cache {
            cache.clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn table(rows: usize) -> FeatureTable {
        FeatureTable {
            columns: vec!["v".into()],
            rows: (0..rows).map(|i| vec![serde_json::json!(i as i64)]).collect(),
        }
    }

    fn open_store(dir: &Path) -> FeatureStore {
        FeatureStore::open(FeatureStoreConfig {
            base_path: dir.join("store"),
            ..Default::default()
        })
        .unwrap()
    }

    #[test]
    fn test_save_get_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(dir.path());
        let mut tables = BTreeMap::new();
        tables.insert("score".to_string(), table(5));

        let saved = store.save_features("users", &tables).unwrap();
        assert!(saved["score"].exists());

        // Served from cache.
        let got = store.get_features(&["score".into()], Some("users"));
        assert_eq!(got["score"], table(5));

        // Served cold, through catalog + storage.
        store.clear_cache();
        let got = store.get_features(&["score".into()], Some("users"));
        assert_eq!(got["score"], table(5));
    }

    #[test]
    fn test_get_without_group_resolves_via_catalog() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(dir.path());
        let mut tables = BTreeMap::new();
        tables.insert("score".to_string(), table(3));
        store.save_features("users", &tables).unwrap();

        let got = store.get_features(&["score".into()], None);
        assert_eq!(got["score"].num_rows(), 3);

        // Wrong group filter hides the feature instead of failing.
        assert!(store.get_features(&["score".into()], Some("movies")).is_empty());
    }

    #[test]
    fn test_resave_updates_version_and_orphans_old_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(dir.path());
        let mut tables = BTreeMap::new();
        tables.insert("score".to_string(), table(2));
        let first = store.save_features("users", &tables).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(5));
        let second = store.save_features("users", &tables).unwrap();
        assert_ne!(first["score"], second["score"]);

        let info = store.get_feature_info("score").unwrap().unwrap();
        assert_eq!(info.version, "1.1");
        assert_eq!(info.file_path, second["score"]);

        // Prior file remains on disk but is no longer referenced.
        let report = store.cleanup_orphans(false).unwrap();
        assert!(report.removed_entries.is_empty());
        assert_eq!(report.orphan_files, vec![first["score"].clone()]);
        assert_eq!(report.removed_files, 0);

        let report = store.cleanup_orphans(true).unwrap();
        assert_eq!(report.removed_files, 1);
        assert!(!first["score"].exists());
    }

    #[test]
    fn test_cross_group_save_skips_conflicting_feature() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(dir.path());
        let mut tables = BTreeMap::new();
        tables.insert("score".to_string(), table(2));
        store.save_features("users", &tables).unwrap();

        // Same name in another group is rejected and skipped; no file left.
        let saved = store.save_features("movies", &tables).unwrap();
        assert!(saved.is_empty());
        let report = store.cleanup_orphans(false).unwrap();
        assert!(report.orphan_files.is_empty());
        assert!(store.catalog().get_group("movies").unwrap().is_none());
    }

    #[test]
    fn test_delete_feature() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(dir.path());
        let mut tables = BTreeMap::new();
        tables.insert("score".to_string(), table(2));
        let saved = store.save_features("users", &tables).unwrap();

        assert!(store.delete_feature("score", Some("users")));
        assert!(!saved["score"].exists());
        assert!(store.get_features(&["score".into()], None).is_empty());
        // Second delete is a clean false, not an error.
        assert!(!store.delete_feature("score", Some("users")));
    }

    #[test]
    fn test_store_stats_merge() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(dir.path());
        let mut tables = BTreeMap::new();
        tables.insert("a".to_string(), table(4));
        tables.insert("b".to_string(), table(6));
        store.save_features("g", &tables).unwrap();

        let stats = store.get_store_stats().unwrap();
        assert_eq!(stats.catalog.feature_count, 2);
        assert_eq!(stats.catalog.total_records, 10);
        assert_eq!(stats.cache.as_ref().unwrap().size, 2);
    }

    #[test]
    fn test_backup_store_copies_data_and_catalog() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(dir.path());
        let mut tables = BTreeMap::new();
        tables.insert("score".to_string(), table(2));
        store.save_features("users", &tables).unwrap();

        let dest = store.backup_store(Some(dir.path().join("bk"))).unwrap();
        assert!(dest.join("metadata/catalog.db").exists());
        let copied = WalkDir::new(dest.join("features"))
            .into_iter()
            .filter_map(Result::ok)
            .filter(|e| e.file_type().is_file())
            .count();
        assert_eq!(copied, 1);
    }

    #[test]
    fn test_cleanup_removes_entries_for_missing_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(dir.path());
        let mut tables = BTreeMap::new();
        tables.insert("score".to_string(), table(2));
        let saved = store.save_features("users", &tables).unwrap();
        std::fs::remove_file(&saved["score"]).unwrap();

        let report = store.cleanup_orphans(false).unwrap();
        assert_eq!(report.removed_entries, vec!["score"]);
        assert!(store.get_feature_info("score").unwrap().is_none());
    }
}
