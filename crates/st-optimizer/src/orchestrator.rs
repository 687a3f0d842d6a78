//! Parallel run orchestration: spawn workers, collect reports, reduce.
//!
//! Workers are threads of this process. A panicking worker still reports
//! through its guard, but an abort, a stack overflow or running out of memory
//! in one worker takes down the whole run.

use crossbeam_channel::unbounded;
use serde_json::Value;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::thread;
use tracing::{debug, error, info, warn};

use st_types::StResult;

use crate::reduction::reduce;
use crate::scenario::Scenario;
use crate::search::SearchBackend;
use crate::summary::{RunSummary, SUMMARY_FILE};
use crate::worker::{ObjectiveFactory, Worker, WorkerReport};

/// Create `path` (and its parents) if it does not exist yet.
pub fn ensure_output_dir(path: &Path) -> StResult<()> {
    if !path.exists() {
        info!("Creating the directory {} to store the output", path.display());
        fs::create_dir_all(path)?;
    }
    Ok(())
}

/// Runs N independent search workers over one shared output directory.
pub struct Orchestrator {
    backend: Arc<dyn SearchBackend>,
    objectives: ObjectiveFactory,
    parallelism: usize,
}

impl Orchestrator {
    pub fn new(backend: Arc<dyn SearchBackend>, objectives: ObjectiveFactory) -> Self {
        Self {
            backend,
            objectives,
            parallelism: 1,
        }
    }

    pub fn with_parallelism(mut self, n: usize) -> Self {
        self.parallelism = n.max(1);
        self
    }

    pub fn parallelism(&self) -> usize {
        self.parallelism
    }

    /// Run every worker to completion, then reduce their trajectories.
    ///
    /// `spec` must already be valid JSON; its content is validated by each
    /// worker. The summary is also written to `summary.json` in the output
    /// directory.
    pub fn run(&self, spec: Value, scenario: &Scenario) -> StResult<RunSummary> {
        ensure_output_dir(&scenario.output_dir)?;

        let mut summary = RunSummary::new(self.parallelism, &scenario.output_dir);
        summary.mark_running();
        info!(
            "Starting run {} with {} workers using {} search",
            summary.id,
            self.parallelism,
            self.backend.name()
        );

        let spec = Arc::new(spec);
        let (tx, rx) = unbounded();
        let mut handles = Vec::with_capacity(self.parallelism);

        for index in 0..self.parallelism {
            let worker = Worker::new(
                index,
                spec.clone(),
                scenario.clone(),
                self.backend.clone(),
                self.objectives.clone(),
            );
            let worker_tx = tx.clone();
            let spawned = thread::Builder::new()
                .name(format!("search-worker-{index}"))
                .spawn(move || worker.run(worker_tx));
            match spawned {
                Ok(handle) => handles.push(handle),
                Err(e) => {
                    error!("Cannot start worker {}: {}", index, e);
                    let _ = tx.send(WorkerReport::failed(index, e.to_string()));
                }
            }
        }
        drop(tx);

        for handle in handles {
            if handle.join().is_err() {
                warn!("A search worker panicked");
            }
        }

        let mut reports: Vec<WorkerReport> = rx.try_iter().collect();
        reports.sort_by_key(|r| r.index);
        debug!(
            "All incumbents: {:?}",
            reports
                .iter()
                .map(|r| r.incumbent.as_ref().map(|c| c.to_string()))
                .collect::<Vec<_>>()
        );
        summary.workers = reports;

        match reduce(&scenario.output_dir) {
            Ok(result) => summary.mark_completed(result),
            Err(e) => {
                summary.mark_failed(e.to_string());
                summary.write_json(&scenario.output_dir.join(SUMMARY_FILE))?;
                return Err(e);
            }
        }
        summary.write_json(&scenario.output_dir.join(SUMMARY_FILE))?;
        Ok(summary)
    }
}
