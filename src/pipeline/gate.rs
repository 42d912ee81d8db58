//! Validation gate stage: quality checks over extracted feature tables.

use crate::error::FeatureError;
use crate::pipeline::stage::{PipelineData, PipelineStage};
use crate::table::{ColumnClass, FeatureTable};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GateParams {
    pub min_records: usize,
    pub max_missing_ratio: f64,
    /// When set, a failing gate halts the pipeline instead of annotating.
    pub strict_validation: bool,
}

impl Default for GateParams {
    fn default() -> Self {
        Self {
            min_records: 10,
            max_missing_ratio: 0.5,
            strict_validation: false,
        }
    }
}

/// Quality report for one category's table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GateReport {
    pub category: String,
    pub record_count: usize,
    pub column_count: usize,
    pub missing_values: usize,
    pub duplicate_rows: usize,
    pub passed: bool,
    pub issues: Vec<String>,
}

/// Computes per-category record/column/missing/duplicate counts and flags
/// tables below the configured floor. In strict mode a failing table is a
/// `Validation` error; otherwise failures are logged and carried forward in
/// the reports.
pub struct ValidationGateStage {
    name: String,
    params: GateParams,
}

impl ValidationGateStage {
    pub fn new(name: impl Into<String>, params: GateParams) -> Self {
        Self {
            name: name.into(),
            params,
        }
    }

    fn check_table(&self, category: &str, table: &FeatureTable) -> GateReport {
        let record_count = table.num_rows();
        let column_count = table.num_columns();
        let missing_values = table.missing_values();
        let duplicate_rows = count_duplicates(table);

        let mut issues = Vec::new();
        if record_count < self.params.min_records {
            issues.push(format!(
                "record count below floor: {record_count} < {}",
                self.params.min_records
            ));
        }
        let total_cells = record_count * column_count;
        if total_cells > 0 {
            let missing_ratio = missing_values as f64 / total_cells as f64;
            if missing_ratio > self.params.max_missing_ratio {
                issues.push(format!(
                    "missing ratio too high: {missing_ratio:.2} > {}",
                    self.params.max_missing_ratio
                ));
            }
        }

        GateReport {
            category: category.to_string(),
            record_count,
            column_count,
            missing_values,
            duplicate_rows,
            passed: issues.is_empty(),
            issues,
        }
    }
}

impl PipelineStage for ValidationGateStage {
    fn name(&self) -> &str {
        &self.name
    }

    fn process(&self, data: PipelineData) -> Result<PipelineData, FeatureError> {
        let mut set = data.expect_tables(&self.name)?;
        let reports: Vec<GateReport> = set
            .tables
            .iter()
            .map(|(category, table)| self.check_table(category, table))
            .collect();

        let failed: Vec<&str> = reports
            .iter()
            .filter(|r| !r.passed)
            .map(|r| r.category.as_str())
            .collect();
        if !failed.is_empty() {
            if self.params.strict_validation {
                return Err(FeatureError::validation(format!(
                    "validation gate failed for: {}",
                    failed.join(", ")
                )));
            }
            tracing::warn!(stage = self.name, ?failed, "Validation gate failures (non-strict)");
        }
        tracing::info!(stage = self.name, categories = reports.len(), "Validation gate complete");

        set.reports.extend(reports);
        Ok(PipelineData::Tables(set))
    }
}

/// Count exact duplicate rows, considering only columns with scalar,
/// hashable values (array/object columns are skipped).
fn count_duplicates(table: &FeatureTable) -> usize {
    let scalar: Vec<usize> = table
        .classify_columns()
        .iter()
        .enumerate()
        .filter(|(_, c)| **c != ColumnClass::Complex)
        .map(|(i, _)| i)
        .collect();
    if scalar.is_empty() {
        return 0;
    }

    let mut seen = HashSet::new();
    let mut duplicates = 0;
    for row in &table.rows {
        let key: Vec<String> = scalar
            .iter()
            .map(|&i| row.get(i).map(|v| v.to_string()).unwrap_or_default())
            .collect();
        if !seen.insert(key) {
            duplicates += 1;
        }
    }
    duplicates
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::stage::TableSet;
    use std::collections::BTreeMap;

    fn set_with(table: FeatureTable) -> PipelineData {
        let mut tables = BTreeMap::new();
        tables.insert("basic".to_string(), table);
        PipelineData::Tables(TableSet::from_tables(tables))
    }

    fn rows_table(n: usize) -> FeatureTable {
        FeatureTable {
            columns: vec!["id".into()],
            rows: (0..n).map(|i| vec![serde_json::json!(i as i64)]).collect(),
        }
    }

    #[test]
    fn test_gate_passes_clean_table() {
        let stage = ValidationGateStage::new("gate", GateParams::default());
        let out = stage.process(set_with(rows_table(20))).unwrap();
        match out {
            PipelineData::Tables(set) => {
                assert_eq!(set.reports.len(), 1);
                assert!(set.reports[0].passed);
                assert_eq!(set.reports[0].record_count, 20);
            }
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_strict_gate_raises_below_min_records() {
        let stage = ValidationGateStage::new(
            "gate",
            GateParams {
                min_records: 10,
                strict_validation: true,
                ..Default::default()
            },
        );
        let err = stage.process(set_with(rows_table(5))).unwrap_err();
        assert!(matches!(err, FeatureError::Validation(_)));
    }

    #[test]
    fn test_non_strict_gate_annotates_failure() {
        let stage = ValidationGateStage::new(
            "gate",
            GateParams {
                min_records: 10,
                ..Default::default()
            },
        );
        let out = stage.process(set_with(rows_table(5))).unwrap();
        match out {
            PipelineData::Tables(set) => {
                assert!(!set.reports[0].passed);
                assert_eq!(set.reports[0].issues.len(), 1);
            }
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_missing_ratio_check() {
        let stage = ValidationGateStage::new(
            "gate",
            GateParams {
                min_records: 1,
                max_missing_ratio: 0.3,
                strict_validation: true,
                ..Default::default()
            },
        );
        let table = FeatureTable {
            columns: vec!["x".into()],
            rows: vec![
                vec![serde_json::Value::Null],
                vec![serde_json::json!(1)],
            ],
        };
        assert!(stage.process(set_with(table)).is_err());
    }

    #[test]
    fn test_duplicates_ignore_complex_columns() {
        let table = FeatureTable {
            columns: vec!["id".into(), "tags".into()],
            rows: vec![
                vec![serde_json::json!(1), serde_json::json!(["a"])],
                vec![serde_json::json!(1), serde_json::json!(["b"])],
                vec![serde_json::json!(2), serde_json::json!(["c"])],
            ],
        };
        // Scalar projection makes rows 1 and 2 identical.
        assert_eq!(count_duplicates(&table), 1);
    }
}
