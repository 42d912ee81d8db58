//! Record validation stage: drops records missing required fields.

use crate::error::FeatureError;
use crate::pipeline::stage::{PipelineData, PipelineStage};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RecordValidationParams {
    pub required_fields: Vec<String>,
}

/// Filters the input batch down to records carrying every required field
/// with a non-null value.
pub struct RecordValidationStage {
    name: String,
    params: RecordValidationParams,
}

impl RecordValidationStage {
    pub fn new(name: impl Into<String>, params: RecordValidationParams) -> Self {
        Self {
            name: name.into(),
            params,
        }
    }
}

impl PipelineStage for RecordValidationStage {
    fn name(&self) -> &str {
        &self.name
    }

    fn process(&self, data: PipelineData) -> Result<PipelineData, FeatureError> {
        let records = data.expect_records(&self.name)?;
        let before = records.len();
        let valid: Vec<_> = records
            .into_iter()
            .filter(|rec| {
                self.params
                    .required_fields
                    .iter()
                    .all(|field| rec.get(field).is_some_and(|v| !v.is_null()))
            })
            .collect();
        tracing::info!(
            stage = self.name,
            before,
            after = valid.len(),
            "Record validation complete"
        );
        Ok(PipelineData::Records(valid))
    }
}
