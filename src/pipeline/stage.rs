//! Pipeline stage contract and the data flowing between stages.

use crate::error::FeatureError;
use crate::pipeline::gate::GateReport;
use crate::table::{FeatureTable, Record};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Categorized feature tables plus annotations accumulated by later stages.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TableSet {
    pub tables: BTreeMap<String, FeatureTable>,
    /// Filled by the validation gate.
    pub reports: Vec<GateReport>,
    /// Filled by the storage stage: feature name -> stored file path.
    pub saved_paths: BTreeMap<String, PathBuf>,
}

impl TableSet {
    pub fn from_tables(tables: BTreeMap<String, FeatureTable>) -> Self {
        Self {
            tables,
            ..Default::default()
        }
    }

    pub fn total_rows(&self) -> usize {
        self.tables.values().map(FeatureTable::num_rows).sum()
    }
}

/// Data handed from one stage to the next.
///
/// Early stages consume raw records; extraction turns them into categorized
/// tables that the remaining stages refine and store. A stage receiving the
/// wrong variant is a validation error, surfaced through `expect_records` /
/// `expect_tables` rather than a silent pass-through.
#[derive(Debug, Clone)]
pub enum PipelineData {
    Records(Vec<Record>),
    Tables(TableSet),
}

impl PipelineData {
    pub fn record_count(&self) -> usize {
        match self {
            Self::Records(records) => records.len(),
            Self::Tables(set) => set.total_rows(),
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Self::Records(records) => records.is_empty(),
            Self::Tables(set) => set.tables.is_empty(),
        }
    }

    pub fn expect_records(self, stage: &str) -> Result<Vec<Record>, FeatureError> {
        match self {
            Self::Records(records) => Ok(records),
            Self::Tables(_) => Err(FeatureError::validation(format!(
                "stage '{stage}' expects raw records, got feature tables"
            ))),
        }
    }

    pub fn expect_tables(self, stage: &str) -> Result<TableSet, FeatureError> {
        match self {
            Self::Tables(set) => Ok(set),
            Self::Records(_) => Err(FeatureError::validation(format!(
                "stage '{stage}' expects feature tables, got raw records"
            ))),
        }
    }
}

/// One unit of the feature pipeline: consumes the prior stage's output and
/// produces the next stage's input.
pub trait PipelineStage: Send + Sync {
    fn name(&self) -> &str;

    fn process(&self, data: PipelineData) -> Result<PipelineData, FeatureError>;

    /// Input gate checked by the orchestrator before `process`. The default
    /// accepts everything, including an empty batch, which flows through to
    /// an empty result; stages with stronger requirements override this.
    fn validate_input(&self, data: &PipelineData) -> bool {
        let _ = data;
        true
    }

    /// Output gate checked by the orchestrator after `process`.
    fn validate_output(&self, data: &PipelineData) -> bool {
        let _ = data;
        true
    }
}
