//! Storage stage: writes the pipeline's accumulated tables into the store.

use crate::error::FeatureError;
use crate::pipeline::stage::{PipelineData, PipelineStage};
use crate::store::FeatureStore;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageParams {
    pub feature_group: String,
}

impl Default for StorageParams {
    fn default() -> Self {
        Self {
            feature_group: "features".to_string(),
        }
    }
}

/// Final stage: persists every categorized table as a feature of the
/// configured group and records the stored paths on the result.
pub struct FeatureStorageStage {
    name: String,
    params: StorageParams,
    store: Arc<FeatureStore>,
}

impl FeatureStorageStage {
    pub fn new(name: impl Into<String>, params: StorageParams, store: Arc<FeatureStore>) -> Self {
        Self {
            name: name.into(),
            params,
            store,
        }
    }
}

impl PipelineStage for FeatureStorageStage {
    fn name(&self) -> &str {
        &self.name
    }

    fn process(&self, data: PipelineData) -> Result<PipelineData, FeatureError> {
        let mut set = data.expect_tables(&self.name)?;
        let saved = self
            .store
            .save_features(&self.params.feature_group, &set.tables)?;
        tracing::info!(
            stage = self.name,
            group = self.params.feature_group,
            saved = saved.len(),
            "Features stored"
        );
        set.saved_paths.extend(saved);
        Ok(PipelineData::Tables(set))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::stage::TableSet;
    use crate::store::FeatureStoreConfig;
    use crate::table::FeatureTable;
    use std::collections::BTreeMap;

    #[test]
    fn test_storage_stage_persists_tables() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(
            FeatureStore::open(FeatureStoreConfig {
                base_path: dir.path().join("store"),
                ..Default::default()
            })
            .unwrap(),
        );
        let stage = FeatureStorageStage::new(
            "storage",
            StorageParams {
                feature_group: "movies".into(),
            },
            store.clone(),
        );

        let mut tables = BTreeMap::new();
        tables.insert(
            "popularity".to_string(),
            FeatureTable {
                columns: vec!["v".into()],
                rows: vec![vec![serde_json::json!(1.0)]],
            },
        );
        let out = stage
            .process(PipelineData::Tables(TableSet::from_tables(tables)))
            .unwrap();

        match out {
            PipelineData::Tables(set) => {
                assert!(set.saved_paths.contains_key("popularity"));
            }
            _ => unreachable!(),
        }
        assert_eq!(store.list_features(Some("movies")).unwrap(), vec!["popularity"]);
    }
}
