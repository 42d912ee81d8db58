//! Tabular feature values, schema inference, and column classification.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A raw input record: field name to scalar/nested JSON value.
pub type Record = serde_json::Map<String, serde_json::Value>;

/// Column data type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnType {
    Integer,
    Float,
    String,
    Boolean,
    Null,
    /// Array- or object-valued cells. Excluded from numeric transforms.
    Complex,
    Unknown,
}

/// Schema for a single column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnSchema {
    pub name: String,
    pub dtype: ColumnType,
    pub nullable: bool,
}

/// Schema definition for a feature table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaDefinition {
    pub columns: Vec<ColumnSchema>,
}

/// How a column participates in numeric transforms.
///
/// Computed once per table before any transform runs, then carried forward,
/// so individual transforms never re-detect value shapes per operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnClass {
    Numeric,
    Categorical,
    Complex,
}

/// A named 2-D tabular feature value: ordered columns, row-major cells.
///
/// Immutable once written to storage; a re-save creates a new version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureTable {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<serde_json::Value>>,
}

impl FeatureTable {
    pub fn new(columns: Vec<String>) -> Self {
        Self {
            columns,
            rows: Vec::new(),
        }
    }

    /// Build a table from records, taking the given fields as columns.
    ///
    /// Missing fields become null cells.
    pub fn from_records(fields: &[String], records: &[Record]) -> Self {
        let rows = records
            .iter()
            .map(|rec| {
                fields
                    .iter()
                    .map(|f| rec.get(f).cloned().unwrap_or(serde_json::Value::Null))
                    .collect()
            })
            .collect();
        Self {
            columns: fields.to_vec(),
            rows,
        }
    }

    pub fn num_rows(&self) -> usize {
        self.rows.len()
    }

    pub fn num_columns(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    /// All values of one column, top to bottom.
    pub fn column_values(&self, idx: usize) -> impl Iterator<Item = &serde_json::Value> {
        self.rows
            .iter()
            .map(move |row| row.get(idx).unwrap_or(&serde_json::Value::Null))
    }

    /// Count of null cells across the whole table.
    pub fn missing_values(&self) -> usize {
        self.rows
            .iter()
            .map(|row| row.iter().filter(|v| v.is_null()).count())
            .sum()
    }

    /// Append another table's rows. Column sets must match exactly.
    pub fn concat(&mut self, other: FeatureTable) -> Result<(), crate::error::FeatureError> {
        if self.columns != other.columns {
            return Err(crate::error::FeatureError::validation(format!(
                "cannot concatenate tables with mismatched columns: {:?} vs {:?}",
                self.columns, other.columns
            )));
        }
        self.rows.extend(other.rows);
        Ok(())
    }

    /// Infer the schema from the table's values.
    pub fn schema(&self) -> SchemaDefinition {
        let columns = self
            .columns
            .iter()
            .enumerate()
            .map(|(i, name)| {
                let values: Vec<&serde_json::Value> = self.column_values(i).collect();
                ColumnSchema {
                    name: name.clone(),
                    dtype: infer_column_type(&values),
                    nullable: values.iter().any(|v| v.is_null()),
                }
            })
            .collect();
        SchemaDefinition { columns }
    }

    /// Per-column type map, for catalog metadata.
    pub fn dtype_map(&self) -> BTreeMap<String, ColumnType> {
        self.schema()
            .columns
            .into_iter()
            .map(|c| (c.name, c.dtype))
            .collect()
    }

    /// Classify every column once as numeric, categorical, or complex.
    pub fn classify_columns(&self) -> Vec<ColumnClass> {
        (0..self.columns.len())
            .map(|i| {
                let values: Vec<&serde_json::Value> = self.column_values(i).collect();
                match infer_column_type(&values) {
                    ColumnType::Integer | ColumnType::Float => ColumnClass::Numeric,
                    ColumnType::Complex => ColumnClass::Complex,
                    _ => ColumnClass::Categorical,
                }
            })
            .collect()
    }
}

/// Infer a column type from its values.
///
/// Mixed int/float promotes to Float; any array/object makes the column
/// Complex; any string makes it String.
pub fn infer_column_type(values: &[&serde_json::Value]) -> ColumnType {
    let non_null: Vec<_> = values.iter().filter(|v| !v.is_null()).collect();
    if non_null.is_empty() {
        return ColumnType::Null;
    }

    let mut has_int = false;
    let mut has_float = false;
    let mut has_bool = false;
    let mut has_string = false;

    for v in &non_null {
        match v {
            serde_json::Value::Number(n) => {
                if n.is_f64() {
                    has_float = true;
                } else {
                    has_int = true;
                }
            }
            serde_json::Value::Bool(_) => has_bool = true,
            serde_json::Value::String(_) => has_string = true,
            serde_json::Value::Array(_) | serde_json::Value::Object(_) => {
                return ColumnType::Complex;
            }
            serde_json::Value::Null => {}
        }
    }

    if has_string {
        return ColumnType::String;
    }
    if has_float {
        return ColumnType::Float;
    }
    if has_int {
        return ColumnType::Integer;
    }
    if has_bool {
        return ColumnType::Boolean;
    }
    ColumnType::Unknown
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_table() -> FeatureTable {
        FeatureTable {
            columns: vec!["id".into(), "score".into(), "tags".into()],
            rows: vec![
                vec![
                    serde_json::json!(1),
                    serde_json::json!(0.5),
                    serde_json::json!(["a", "b"]),
                ],
                vec![
                    serde_json::json!(2),
                    serde_json::Value::Null,
                    serde_json::json!(["c"]),
                ],
            ],
        }
    }

    #[test]
    fn test_from_records_missing_fields() {
        let mut rec = Record::new();
        rec.insert("id".into(), serde_json::json!(7));
        let fields = vec!["id".to_string(), "score".to_string()];
        let table = FeatureTable::from_records(&fields, &[rec]);
        assert_eq!(table.num_rows(), 1);
        assert_eq!(table.rows[0][1], serde_json::Value::Null);
    }

    #[test]
    fn test_schema_inference() {
        let schema = sample_table().schema();
        assert_eq!(schema.columns[0].dtype, ColumnType::Integer);
        assert_eq!(schema.columns[1].dtype, ColumnType::Float);
        assert!(schema.columns[1].nullable);
        assert_eq!(schema.columns[2].dtype, ColumnType::Complex);
    }

    #[test]
    fn test_classify_columns() {
        let classes = sample_table().classify_columns();
        assert_eq!(
            classes,
            vec![ColumnClass::Numeric, ColumnClass::Numeric, ColumnClass::Complex]
        );
    }

    #[test]
    fn test_concat_mismatched_columns() {
        let mut a = FeatureTable::new(vec!["x".into()]);
        let b = FeatureTable::new(vec!["y".into()]);
        assert!(a.concat(b).is_err());
    }

    #[test]
    fn test_concat_appends_rows() {
        let mut a = sample_table();
        let b = sample_table();
        a.concat(b).unwrap();
        assert_eq!(a.num_rows(), 4);
    }

    #[test]
    fn test_missing_values() {
        assert_eq!(sample_table().missing_values(), 1);
    }
}
