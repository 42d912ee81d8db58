//! Durable feature table storage: pluggable byte store + columnar codec.
//!
//! Tables are written column-major since consumers read them far more often
//! than they write them, and typically column-wise. The JSON payload keeps
//! the codec dependency-free; see the `columnar` crate feature for the
//! planned arrow/parquet encoding.

use crate::error::FeatureError;
use crate::table::{FeatureTable, SchemaDefinition};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

/// File extension for columnar feature files.
pub const COLUMNAR_EXT: &str = "fcol";

const FORMAT_VERSION: u32 = 1;

/// Byte-level storage contract. Local disk by default; remote backends plug
/// in behind the same path interface.
pub trait ObjectStore: Send + Sync {
    /// Write bytes, replacing any existing object. The replace must be
    /// atomic: a concurrent reader sees either the old or the new content.
    fn write(&self, path: &Path, bytes: &[u8]) -> Result<(), FeatureError>;

    /// Read an object's bytes. Missing objects are `NotFound`.
    fn read(&self, path: &Path) -> Result<Vec<u8>, FeatureError>;

    /// Remove an object; absent objects are not an error.
    fn delete(&self, path: &Path) -> Result<(), FeatureError>;

    fn exists(&self, path: &Path) -> bool;
}

/// Local-filesystem object store using write-then-rename replacement.
#[derive(Debug, Default)]
pub struct LocalObjectStore;

// Temp names must be unique per write: concurrent writers to the same final
// path must not share a temp file, or one writer truncates under the other.
static TMP_SEQ: AtomicU64 = AtomicU64::new(0);

impl ObjectStore for LocalObjectStore {
    fn write(&self, path: &Path, bytes: &[u8]) -> Result<(), FeatureError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let seq = TMP_SEQ.fetch_add(1, Ordering::Relaxed);
        let tmp = path.with_extension(format!("tmp.{}.{seq}", std::process::id()));
        std::fs::write(&tmp, bytes)?;
        if let Err(e) = std::fs::rename(&tmp, path) {
            let _ = std::fs::remove_file(&tmp);
            return Err(e.into());
        }
        Ok(())
    }

    fn read(&self, path: &Path) -> Result<Vec<u8>, FeatureError> {
        match std::fs::read(path) {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(FeatureError::not_found(
                format!("no object at {}", path.display()),
            )),
            Err(e) => Err(e.into()),
        }
    }

    fn delete(&self, path: &Path) -> Result<(), FeatureError> {
        match std::fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }
}

/// On-disk columnar payload.
#[derive(Debug, Serialize, Deserialize)]
struct ColumnarFile {
    format_version: u32,
    schema: SchemaDefinition,
    row_count: usize,
    /// One vector per column, each `row_count` long.
    columns: Vec<Vec<serde_json::Value>>,
}

/// Feature table storage: an object store plus the columnar codec.
pub struct StorageBackend {
    store: Box<dyn ObjectStore>,
}

impl StorageBackend {
    pub fn new(store: Box<dyn ObjectStore>) -> Self {
        Self { store }
    }

    /// Local-disk backend.
    pub fn local() -> Self {
        Self::new(Box::new(LocalObjectStore))
    }

    /// Serialize and write a table. Returns the encoded size in bytes.
    pub fn write_table(&self, path: &Path, table: &FeatureTable) -> Result<u64, FeatureError> {
        let bytes = encode_table(table)?;
        self.store.write(path, &bytes)?;
        Ok(bytes.len() as u64)
    }

    /// Read and deserialize a table. Missing paths are `NotFound`.
    pub fn read_table(&self, path: &Path) -> Result<FeatureTable, FeatureError> {
        let bytes = self.store.read(path)?;
        decode_table(&bytes).map_err(|e| {
            FeatureError::storage(format!("corrupt feature file {}: {e}", path.display()))
        })
    }

    pub fn delete(&self, path: &Path) -> Result<(), FeatureError> {
        self.store.delete(path)
    }

    pub fn exists(&self, path: &Path) -> bool {
        self.store.exists(path)
    }
}

fn encode_table(table: &FeatureTable) -> Result<Vec<u8>, FeatureError> {
    let row_count = table.num_rows();
    let columns = (0..table.columns.len())
        .map(|i| table.column_values(i).cloned().collect())
        .collect();
    let file = ColumnarFile {
        format_version: FORMAT_VERSION,
        schema: table.schema(),
        row_count,
        columns,
    };
    Ok(serde_json::to_vec(&file)?)
}

fn decode_table(bytes: &[u8]) -> Result<FeatureTable, FeatureError> {
    let file: ColumnarFile = serde_json::from_slice(bytes)?;
    if file.format_version != FORMAT_VERSION {
        return Err(FeatureError::storage(format!(
            "unsupported columnar format version {}",
            file.format_version
        )));
    }
    if file.columns.len() != file.schema.columns.len()
        || file.columns.iter().any(|c| c.len() != file.row_count)
    {
        return Err(FeatureError::storage(
            "column count or length does not match header".to_string(),
        ));
    }

    let columns: Vec<String> = file.schema.columns.iter().map(|c| c.name.clone()).collect();
    let mut rows = vec![Vec::with_capacity(columns.len()); file.row_count];
    for column in file.columns {
        for (row, value) in rows.iter_mut().zip(column) {
            row.push(value);
        }
    }
    Ok(FeatureTable { columns, rows })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn sample() -> FeatureTable {
        FeatureTable {
            columns: vec!["id".into(), "rating".into()],
            rows: vec![
                vec![serde_json::json!(1), serde_json::json!(7.1)],
                vec![serde_json::json!(2), serde_json::Value::Null],
                vec![serde_json::json!(3), serde_json::json!(6.4)],
            ],
        }
    }

    #[test]
    fn test_write_read_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let backend = StorageBackend::local();
        let path = dir.path().join("features/movies/rating_1.fcol");

        let written = backend.write_table(&path, &sample()).unwrap();
        assert!(written > 0);
        assert!(backend.exists(&path));
        assert_eq!(backend.read_table(&path).unwrap(), sample());
    }

    #[test]
    fn test_read_missing_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let backend = StorageBackend::local();
        let err = backend.read_table(&dir.path().join("nope.fcol")).unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_delete_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let backend = StorageBackend::local();
        let path = dir.path().join("a.fcol");
        backend.write_table(&path, &sample()).unwrap();
        backend.delete(&path).unwrap();
        assert!(!backend.exists(&path));
        backend.delete(&path).unwrap();
    }

    #[test]
    fn test_overwrite_replaces_content() {
        let dir = tempfile::tempdir().unwrap();
        let backend = StorageBackend::local();
        let path = dir.path().join("a.fcol");
        backend.write_table(&path, &sample()).unwrap();

        let mut smaller = sample();
        smaller.rows.truncate(1);
        backend.write_table(&path, &smaller).unwrap();
        assert_eq!(backend.read_table(&path).unwrap().num_rows(), 1);
    }

    #[test]
    fn test_concurrent_writers_to_one_path_leave_complete_file() {
        let dir = tempfile::tempdir().unwrap();
        let backend = StorageBackend::local();
        let path = dir.path().join("shared.fcol");

        std::thread::scope(|scope| {
            for n in 0..8i64 {
                let backend = &backend;
                let path = &path;
                scope.spawn(move || {
                    let table = FeatureTable {
                        columns: vec!["v".into()],
                        rows: (0..50)
                            .map(|i| vec![serde_json::json!(n * 100 + i)])
                            .collect(),
                    };
                    backend.write_table(path, &table).unwrap();
                });
            }
        });

        // Whichever writer landed last, the file decodes as one full table.
        assert_eq!(backend.read_table(&path).unwrap().num_rows(), 50);
        // No temp files left behind.
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn test_corrupt_file_is_storage_error() {
        let dir = tempfile::tempdir().unwrap();
        let backend = StorageBackend::local();
        let path = dir.path().join("bad.fcol");
        std::fs::write(&path, b"not columnar").unwrap();
        let err = backend.read_table(&path).unwrap_err();
        assert!(matches!(err, FeatureError::Storage(_)));
    }
}
