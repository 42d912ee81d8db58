//! Feature transformation stage: scaling, imputation, and outlier clipping.
//!
//! Columns are classified exactly once per table (numeric / categorical /
//! complex) and the classification drives every transform; categorical and
//! complex columns pass through untouched.

use crate::error::FeatureError;
use crate::pipeline::stage::{PipelineData, PipelineStage};
use crate::table::{ColumnClass, FeatureTable};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScalingMethod {
    Standard,
    #[serde(alias = "minmax")]
    MinMax,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissingStrategy {
    Median,
    Mean,
    Constant,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransformParams {
    pub enable_scaling: bool,
    pub scaling_method: ScalingMethod,
    pub handle_missing: bool,
    pub missing_strategy: MissingStrategy,
    /// Fill value for `MissingStrategy::Constant`.
    pub fill_value: f64,
    pub handle_outliers: bool,
}

impl Default for TransformParams {
    fn default() -> Self {
        Self {
            enable_scaling: true,
            scaling_method: ScalingMethod::Standard,
            handle_missing: true,
            missing_strategy: MissingStrategy::Median,
            fill_value: 0.0,
            handle_outliers: true,
        }
    }
}

/// Applies the configured numeric transforms to every table's numeric
/// columns, in the fixed order scale, impute, clip.
pub struct TransformStage {
    name: String,
    params: TransformParams,
}

impl TransformStage {
    pub fn new(name: impl Into<String>, params: TransformParams) -> Self {
        Self {
            name: name.into(),
            params,
        }
    }

    fn transform_table(&self, table: &mut FeatureTable) {
        let classes = table.classify_columns();
        let numeric: Vec<usize> = classes
            .iter()
            .enumerate()
            .filter(|(_, c)| **c == ColumnClass::Numeric)
            .map(|(i, _)| i)
            .collect();
        let excluded = classes
            .iter()
            .filter(|c| **c == ColumnClass::Complex)
            .count();
        if excluded > 0 {
            tracing::debug!(
                stage = self.name,
                excluded,
                "Complex columns excluded from numeric transforms"
            );
        }

        for &idx in &numeric {
            if self.params.enable_scaling {
                scale_column(table, idx, self.params.scaling_method);
            }
            if self.params.handle_missing {
                impute_column(
                    table,
                    idx,
                    self.params.missing_strategy,
                    self.params.fill_value,
                );
            }
            if self.params.handle_outliers {
                clip_outliers(table, idx);
            }
        }
    }
}

impl PipelineStage for TransformStage {
    fn name(&self) -> &str {
        &self.name
    }

    fn process(&self, data: PipelineData) -> Result<PipelineData, FeatureError> {
        let mut set = data.expect_tables(&self.name)?;
        for (category, table) in &mut set.tables {
            self.transform_table(table);
            tracing::debug!(stage = self.name, category, "Table transformed");
        }
        tracing::info!(stage = self.name, tables = set.tables.len(), "Transformation complete");
        Ok(PipelineData::Tables(set))
    }
}

fn numeric_values(table: &FeatureTable, idx: usize) -> Vec<f64> {
    table
        .column_values(idx)
        .filter_map(|v| v.as_f64())
        .collect()
}

fn set_cell(table: &mut FeatureTable, row: usize, idx: usize, value: f64) {
    if let Some(n) = serde_json::Number::from_f64(value) {
        table.rows[row][idx] = serde_json::Value::Number(n);
    }
}

fn scale_column(table: &mut FeatureTable, idx: usize, method: ScalingMethod) {
    let xs = numeric_values(table, idx);
    if xs.is_empty() {
        return;
    }
    match method {
        ScalingMethod::Standard => {
            let mean = xs.iter().sum::<f64>() / xs.len() as f64;
            let var = xs.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / xs.len() as f64;
            let std = var.sqrt().max(f64::MIN_POSITIVE);
            apply(table, idx, |x| (x - mean) / std);
        }
        ScalingMethod::MinMax => {
            let min = xs.iter().cloned().fold(f64::INFINITY, f64::min);
            let max = xs.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
            let range = max - min;
            if range > 0.0 {
                apply(table, idx, |x| (x - min) / range);
            } else {
                apply(table, idx, |_| 0.0);
            }
        }
    }
}

fn impute_column(table: &mut FeatureTable, idx: usize, strategy: MissingStrategy, constant: f64) {
    let xs = numeric_values(table, idx);
    let fill = match strategy {
        MissingStrategy::Median => {
            if xs.is_empty() {
                constant
            } else {
                quantile(&xs, 0.5)
            }
        }
        MissingStrategy::Mean => {
            if xs.is_empty() {
                constant
            } else {
                xs.iter().sum::<f64>() / xs.len() as f64
            }
        }
        MissingStrategy::Constant => constant,
    };
    for row in 0..table.num_rows() {
        if table.rows[row][idx].is_null() {
            set_cell(table, row, idx, fill);
        }
    }
}

fn clip_outliers(table: &mut FeatureTable, idx: usize) {
    let xs = numeric_values(table, idx);
    if xs.len() < 2 {
        return;
    }
    let q1 = quantile(&xs, 0.25);
    let q3 = quantile(&xs, 0.75);
    let iqr = q3 - q1;
    let lower = q1 - 1.5 * iqr;
    let upper = q3 + 1.5 * iqr;
    apply(table, idx, |x| x.clamp(lower, upper));
}

fn apply(table: &mut FeatureTable, idx: usize, f: impl Fn(f64) -> f64) {
    for row in 0..table.num_rows() {
        if let Some(x) = table.rows[row][idx].as_f64() {
            set_cell(table, row, idx, f(x));
        }
    }
}

/// Linear-interpolation quantile over sorted values.
fn quantile(xs: &[f64], q: f64) -> f64 {
    let mut sorted = xs.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let pos = q * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    if lo == hi {
        sorted[lo]
    } else {
        sorted[lo] + (pos - lo as f64) * (sorted[hi] - sorted[lo])
    }
}
