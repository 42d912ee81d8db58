//! featurelite — a lightweight, single-node feature store paired with a
//! pluggable feature pipeline.
//!
//! The store persists named, versioned feature tables as columnar files,
//! tracks their metadata and lineage in an embedded SQLite catalog, and
//! serves them back through an LRU/TTL in-memory cache. The pipeline turns
//! raw record batches into validated, transformed, stored feature tables
//! via configurable stages, sequentially or across a bounded worker pool.
//!
//! ```no_run
//! use featurelite::pipeline::{PipelineConfig, PipelineOrchestrator, StageDeps, build_stages};
//! use featurelite::store::{FeatureStore, FeatureStoreConfig};
//! use std::sync::Arc;
//!
//! # fn main() -> Result<(), featurelite::FeatureError> {
//! let store = Arc::new(FeatureStore::open(FeatureStoreConfig::default())?);
//! let config = PipelineConfig::from_yaml_file("pipeline.yaml".as_ref())?;
//! let deps = StageDeps { store: Some(store.clone()), ..Default::default() };
//! let orchestrator = PipelineOrchestrator::new(&config, build_stages(&config, &deps)?);
//!
//! let merged = orchestrator.run_parallel(Vec::new())?;
//! let features = store.get_latest_features("movie_features");
//! # let _ = (merged, features);
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod catalog;
pub mod error;
pub mod pipeline;
pub mod storage;
pub mod store;
pub mod table;

pub use cache::{CacheStats, FeatureCache};
pub use catalog::{CatalogStats, FeatureGroupMetadata, FeatureMetadata, MetadataCatalog};
pub use error::FeatureError;
pub use storage::{LocalObjectStore, ObjectStore, StorageBackend};
pub use store::{FeatureStore, FeatureStoreConfig, OrphanReport, StoreStats};
pub use table::{ColumnClass, ColumnSchema, ColumnType, FeatureTable, Record, SchemaDefinition};
