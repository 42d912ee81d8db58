//! Pipeline orchestration: sequential fail-fast runs and parallel chunked
//! runs with bulkhead isolation between chunks.

use crate::error::FeatureError;
use crate::pipeline::stage::{PipelineData, PipelineStage, TableSet};
use crate::pipeline::PipelineConfig;
use crate::table::Record;
use std::collections::VecDeque;
use std::sync::{Mutex, mpsc};

/// Invoked after each completed stage with (percent complete, stage name).
pub type ProgressCallback = Box<dyn Fn(f64, &str) + Send + Sync>;

/// Executes a fixed sequence of pipeline stages.
///
/// The stage order is set at construction and never reordered. `run` is
/// strictly fail-fast; `run_parallel` isolates chunk failures instead,
/// because each chunk is independent data.
pub struct PipelineOrchestrator {
    stages: Vec<Box<dyn PipelineStage>>,
    parallel: bool,
    max_workers: usize,
    chunk_size: usize,
    progress: Option<ProgressCallback>,
}

impl PipelineOrchestrator {
    pub fn new(config: &PipelineConfig, stages: Vec<Box<dyn PipelineStage>>) -> Self {
        Self {
            stages,
            parallel: config.parallel_processing,
            max_workers: config.max_workers.max(1),
            chunk_size: config.chunk_size.max(1),
            progress: None,
        }
    }

    pub fn set_progress_callback(&mut self, callback: ProgressCallback) {
        self.progress = Some(callback);
    }

    /// Run every stage in configured order over the input.
    ///
    /// Any stage error (including a failed input/output hook) aborts the
    /// run and propagates unmodified; no partial output is returned.
    pub fn run(&self, input: PipelineData) -> Result<PipelineData, FeatureError> {
        self.run_with_progress(input, self.progress.as_deref())
    }

    fn run_with_progress(
        &self,
        input: PipelineData,
        progress: Option<&(dyn Fn(f64, &str) + Send + Sync)>,
    ) -> Result<PipelineData, FeatureError> {
        tracing::info!(stages = self.stages.len(), "Pipeline run started");
        let mut data = input;
        let total = self.stages.len();

        for (i, stage) in self.stages.iter().enumerate() {
            if !stage.validate_input(&data) {
                return Err(FeatureError::validation(format!(
                    "stage '{}' rejected its input",
                    stage.name()
                )));
            }
            tracing::info!(stage = stage.name(), position = i + 1, total, "Running stage");
            data = stage.process(data).inspect_err(|e| {
                tracing::error!(stage = stage.name(), error = %e, "Stage failed");
            })?;
            if !stage.validate_output(&data) {
                return Err(FeatureError::validation(format!(
                    "stage '{}' produced invalid output",
                    stage.name()
                )));
            }
            if let Some(callback) = progress {
                callback((i + 1) as f64 / total as f64 * 100.0, stage.name());
            }
        }

        tracing::info!("Pipeline run complete");
        Ok(data)
    }

    /// Split the input into chunks and run the full stage sequence per
    /// chunk on a bounded worker pool, merging same-named tables by row
    /// concatenation.
    ///
    /// A failed chunk is logged and excluded from the merge; sibling
    /// chunks are unaffected. Chunks do not share the progress callback.
    pub fn run_parallel(&self, input: Vec<Record>) -> Result<TableSet, FeatureError> {
        if !self.parallel {
            return self
                .run(PipelineData::Records(input))?
                .expect_tables("pipeline");
        }

        let chunks: Vec<Vec<Record>> = input
            .chunks(self.chunk_size)
            .map(|c| c.to_vec())
            .collect();
        let total = chunks.len();
        if total == 0 {
            return Ok(TableSet::default());
        }
        let workers = self.max_workers.min(total);
        tracing::info!(chunks = total, workers, "Parallel pipeline run started");

        let queue: Mutex<VecDeque<(usize, Vec<Record>)>> =
            Mutex::new(chunks.into_iter().enumerate().collect());
        let (tx, rx) = mpsc::channel();

        let mut results = Vec::with_capacity(total);
        std::thread::scope(|scope| {
            for _ in 0..workers {
                let tx = tx.clone();
                let queue = &queue;
                scope.spawn(move || {
                    loop {
                        let job = queue.lock().unwrap_or_else(|p| p.into_inner()).pop_front();
                        let Some((idx, chunk)) = job else { break };
                        let result = self
                            .run_with_progress(PipelineData::Records(chunk), None)
                            .and_then(|data| data.expect_tables("pipeline"));
                        if tx.send((idx, result)).is_err() {
                            break;
                        }
                    }
                });
            }
            drop(tx);
            for msg in rx {
                results.push(msg);
            }
        });

        let mut merged = TableSet::default();
        let mut succeeded = 0usize;
        for (idx, result) in results {
            match result {
                Ok(set) => {
                    succeeded += 1;
                    merge_into(&mut merged, set);
                }
                Err(e) => {
                    tracing::error!(chunk = idx, error = %e, "Chunk failed; excluded from merge");
                }
            }
        }
        tracing::info!(succeeded, failed = total - succeeded, "Parallel pipeline run complete");
        Ok(merged)
    }
}

fn merge_into(merged: &mut TableSet, chunk: TableSet) {
    for (name, table) in chunk.tables {
        match merged.tables.get_mut(&name) {
            Some(existing) => {
                if let Err(e) = existing.concat(table) {
                    tracing::warn!(table = name, error = %e, "Skipping unmergeable chunk table");
                }
            }
            None => {
                merged.tables.insert(name, table);
            }
        }
    }
    merged.reports.extend(chunk.reports);
    merged.saved_paths.extend(chunk.saved_paths);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::extract::{FeatureExtractionStage, FieldMapExtractor};
    use crate::pipeline::validate::{RecordValidationParams, RecordValidationStage};
    use std::sync::Arc;

    /// Test stage that fails whenever a record carries a "boom" field.
    struct FailOnBoom;

    impl PipelineStage for FailOnBoom {
        fn name(&self) -> &str {
            "fail_on_boom"
        }

        fn process(&self, data: PipelineData) -> Result<PipelineData, FeatureError> {
            let records = data.expect_records("fail_on_boom")?;
            if records.iter().any(|r| r.contains_key("boom")) {
                return Err(FeatureError::validation("boom record encountered"));
            }
            Ok(PipelineData::Records(records))
        }
    }

    fn record(id: i64) -> Record {
        let mut rec = Record::new();
        rec.insert("id".into(), serde_json::json!(id));
        rec
    }

    fn config(parallel: bool, chunk_size: usize) -> PipelineConfig {
        PipelineConfig {
            parallel_processing: parallel,
            max_workers: 2,
            chunk_size,
            ..PipelineConfig::empty()
        }
    }

    fn stages() -> Vec<Box<dyn PipelineStage>> {
        vec![
            Box::new(FailOnBoom),
            Box::new(FeatureExtractionStage::new(
                "extraction",
                Arc::new(FieldMapExtractor::default()),
            )),
        ]
    }

    #[test]
    fn test_run_produces_tables() {
        let orchestrator = PipelineOrchestrator::new(&config(false, 10), stages());
        let out = orchestrator
            .run(PipelineData::Records(vec![record(1), record(2)]))
            .unwrap();
        let set = out.expect_tables("pipeline").unwrap();
        assert_eq!(set.tables["all"].num_rows(), 2);
    }

    #[test]
    fn test_run_fails_fast_on_stage_error() {
        let orchestrator = PipelineOrchestrator::new(&config(false, 10), stages());
        let mut bad = record(1);
        bad.insert("boom".into(), serde_json::json!(true));
        let err = orchestrator
            .run(PipelineData::Records(vec![bad]))
            .unwrap_err();
        assert!(matches!(err, FeatureError::Validation(_)));
    }

    #[test]
    fn test_empty_input_flows_through_to_empty_output() {
        let orchestrator = PipelineOrchestrator::new(&config(false, 10), stages());
        let out = orchestrator
            .run(PipelineData::Records(Vec::new()))
            .unwrap()
            .expect_tables("pipeline")
            .unwrap();
        assert_eq!(out.total_rows(), 0);
    }

    #[test]
    fn test_progress_callback_order() {
        let mut orchestrator = PipelineOrchestrator::new(
            &config(false, 10),
            vec![
                Box::new(RecordValidationStage::new(
                    "validation",
                    RecordValidationParams::default(),
                )),
                Box::new(FeatureExtractionStage::new(
                    "extraction",
                    Arc::new(FieldMapExtractor::default()),
                )),
            ],
        );
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        orchestrator.set_progress_callback(Box::new(move |pct, name| {
            sink.lock().unwrap().push((pct as i64, name.to_string()));
        }));
        orchestrator
            .run(PipelineData::Records(vec![record(1)]))
            .unwrap();
        let seen = seen.lock().unwrap();
        assert_eq!(
            *seen,
            vec![(50, "validation".to_string()), (100, "extraction".to_string())]
        );
    }

    #[test]
    fn test_parallel_bulkhead_excludes_failed_chunk() {
        let orchestrator = PipelineOrchestrator::new(&config(true, 2), stages());
        // 4 chunks of 2; the chunk holding record 5 fails.
        let mut input: Vec<Record> = (0..8).map(record).collect();
        input[5].insert("boom".into(), serde_json::json!(true));

        let merged = orchestrator.run_parallel(input).unwrap();
        assert_eq!(merged.tables["all"].num_rows(), 6);
    }

    #[test]
    fn test_parallel_merge_totals() {
        let orchestrator = PipelineOrchestrator::new(&config(true, 3), stages());
        let merged = orchestrator
            .run_parallel((0..10).map(record).collect())
            .unwrap();
        assert_eq!(merged.total_rows(), 10);
    }

    #[test]
    fn test_parallel_disabled_falls_back_to_sequential() {
        let orchestrator = PipelineOrchestrator::new(&config(false, 2), stages());
        let merged = orchestrator
            .run_parallel((0..4).map(record).collect())
            .unwrap();
        assert_eq!(merged.tables["all"].num_rows(), 4);
    }
}
