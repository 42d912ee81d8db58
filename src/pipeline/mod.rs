//! Feature pipeline: configuration, pluggable stages, and orchestration.
//!
//! A pipeline is an ordered list of stages configured by name; raw records
//! go in one end and validated, transformed, stored feature tables come
//! out the other. See [`orchestrator::PipelineOrchestrator`] for execution
//! semantics.

pub mod extract;
pub mod gate;
pub mod orchestrator;
pub mod stage;
pub mod storage;
pub mod transform;
pub mod validate;

pub use extract::{FeatureExtractionStage, FeatureExtractor, FieldMapExtractor, FieldMapParams};
pub use gate::{GateParams, GateReport, ValidationGateStage};
pub use orchestrator::{PipelineOrchestrator, ProgressCallback};
pub use stage::{PipelineData, PipelineStage, TableSet};
pub use storage::{FeatureStorageStage, StorageParams};
pub use transform::{MissingStrategy, ScalingMethod, TransformParams, TransformStage};
pub use validate::{RecordValidationParams, RecordValidationStage};

use crate::error::FeatureError;
use crate::store::FeatureStore;
use serde::{Deserialize, Serialize};
use serde::de::DeserializeOwned;
use std::path::Path;
use std::sync::Arc;

/// One stage entry in a pipeline configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageConfig {
    /// Display name; defaults to the stage type.
    #[serde(default)]
    pub name: Option<String>,
    #[serde(rename = "type")]
    pub stage_type: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

/// Pipeline configuration, typically loaded from a YAML file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default)]
    pub input_source: Option<String>,
    #[serde(default)]
    pub output_destination: Option<String>,
    pub stages: Vec<StageConfig>,
    #[serde(default)]
    pub parallel_processing: bool,
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_enable_caching")]
    pub enable_caching: bool,
}

fn default_max_workers() -> usize {
    4
}

fn default_chunk_size() -> usize {
    1000
}

fn default_enable_caching() -> bool {
    true
}

impl PipelineConfig {
    /// A configuration with no stages and default execution settings.
    pub fn empty() -> Self {
        Self {
            input_source: None,
            output_destination: None,
            stages: Vec::new(),
            parallel_processing: false,
            max_workers: default_max_workers(),
            chunk_size: default_chunk_size(),
            enable_caching: default_enable_caching(),
        }
    }

    pub fn from_yaml_str(yaml: &str) -> Result<Self, FeatureError> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    pub fn from_yaml_file(path: &Path) -> Result<Self, FeatureError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&content)
    }
}

/// Collaborators injected into config-built stages.
#[derive(Default)]
pub struct StageDeps {
    /// Required when the configuration contains a storage stage.
    pub store: Option<Arc<FeatureStore>>,
    /// Overrides the default field-mapping extractor.
    pub extractor: Option<Arc<dyn FeatureExtractor>>,
}

/// Build the configured stage sequence.
///
/// Unknown stage types and missing collaborators are configuration errors;
/// a silently shortened pipeline is never constructed.
pub fn build_stages(
    config: &PipelineConfig,
    deps: &StageDeps,
) -> Result<Vec<Box<dyn PipelineStage>>, FeatureError> {
    let mut stages: Vec<Box<dyn PipelineStage>> = Vec::with_capacity(config.stages.len());
    for stage_config in &config.stages {
        let name = stage_config
            .name
            .clone()
            .unwrap_or_else(|| stage_config.stage_type.clone());

        match stage_config.stage_type.as_str() {
            "validation" => {
                let params: RecordValidationParams = parse_params(stage_config)?;
                stages.push(Box::new(RecordValidationStage::new(name, params)));
            }
            "extraction" => {
                let params: FieldMapParams = parse_params(stage_config)?;
                let extractor: Arc<dyn FeatureExtractor> =
                    match (&deps.extractor, params.categories.is_empty()) {
                        (Some(extractor), true) => extractor.clone(),
                        _ => Arc::new(FieldMapExtractor::new(params)),
                    };
                stages.push(Box::new(FeatureExtractionStage::new(name, extractor)));
            }
            "transformation" => {
                let params: TransformParams = parse_params(stage_config)?;
                stages.push(Box::new(TransformStage::new(name, params)));
            }
            "validation_gate" => {
                let params: GateParams = parse_params(stage_config)?;
                stages.push(Box::new(ValidationGateStage::new(name, params)));
            }
            "storage" => {
                let params: StorageParams = parse_params(stage_config)?;
                let store = deps.store.clone().ok_or_else(|| {
                    FeatureError::config(
                        "storage stage configured but no feature store was provided",
                    )
                })?;
                stages.push(Box::new(FeatureStorageStage::new(name, params, store)));
            }
            other => {
                return Err(FeatureError::config(format!("unknown stage type '{other}'")));
            }
        }
    }
    Ok(stages)
}

fn parse_params<T: DeserializeOwned + Default>(config: &StageConfig) -> Result<T, FeatureError> {
    if config.params.is_null() {
        return Ok(T::default());
    }
    serde_json::from_value(config.params.clone()).map_err(|e| {
        FeatureError::config(format!(
            "invalid params for stage '{}': {e}",
            config.stage_type
        ))
    })
}
