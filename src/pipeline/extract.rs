//! Feature extraction stage: turns raw records into categorized tables.

use crate::error::FeatureError;
use crate::pipeline::stage::{PipelineData, PipelineStage, TableSet};
use crate::table::{FeatureTable, Record};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// Pluggable extractor: derives one or more named feature tables from a
/// record batch.
pub trait FeatureExtractor: Send + Sync {
    fn extract(&self, records: &[Record]) -> Result<BTreeMap<String, FeatureTable>, FeatureError>;
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FieldMapParams {
    /// Category name -> record fields making up that category's table.
    /// Empty means one "all" table over the union of observed fields.
    pub categories: BTreeMap<String, Vec<String>>,
}

/// Default extractor: projects configured record fields into per-category
/// tables. Fields absent from a record become null cells.
#[derive(Debug, Clone, Default)]
pub struct FieldMapExtractor {
    params: FieldMapParams,
}

impl FieldMapExtractor {
    pub fn new(params: FieldMapParams) -> Self {
        Self { params }
    }
}

impl FeatureExtractor for FieldMapExtractor {
    fn extract(&self, records: &[Record]) -> Result<BTreeMap<String, FeatureTable>, FeatureError> {
        let mut tables = BTreeMap::new();
        if self.params.categories.is_empty() {
            let fields: BTreeSet<String> = records
                .iter()
                .flat_map(|rec| rec.keys().cloned())
                .collect();
            let fields: Vec<String> = fields.into_iter().collect();
            tables.insert("all".to_string(), FeatureTable::from_records(&fields, records));
        } else {
            for (category, fields) in &self.params.categories {
                tables.insert(category.clone(), FeatureTable::from_records(fields, records));
            }
        }
        Ok(tables)
    }
}

/// Runs the configured extractor over the validated record batch.
pub struct FeatureExtractionStage {
    name: String,
    extractor: Arc<dyn FeatureExtractor>,
}

impl FeatureExtractionStage {
    pub fn new(name: impl Into<String>, extractor: Arc<dyn FeatureExtractor>) -> Self {
        Self {
            name: name.into(),
            extractor,
        }
    }
}

impl PipelineStage for FeatureExtractionStage {
    fn name(&self) -> &str {
        &self.name
    }

    fn process(&self, data: PipelineData) -> Result<PipelineData, FeatureError> {
        let records = data.expect_records(&self.name)?;
        let tables = self.extractor.extract(&records)?;
        tracing::info!(
            stage = self.name,
            records = records.len(),
            categories = tables.len(),
            "Feature extraction complete"
        );
        Ok(PipelineData::Tables(TableSet::from_tables(tables)))
    }

    fn validate_output(&self, data: &PipelineData) -> bool {
        matches!(data, PipelineData::Tables(set) if !set.tables.is_empty())
    }
}
