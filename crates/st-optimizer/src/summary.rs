//! Run summary persisted next to the worker output.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use uuid::Uuid;

use st_types::StResult;

use crate::reduction::GlobalResult;
use crate::worker::WorkerReport;

/// File name of the run summary inside the output directory.
pub const SUMMARY_FILE: &str = "summary.json";

/// Unique run identifier.
pub type RunId = Uuid;

/// Lifecycle state of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunState {
    Pending,
    Running,
    Completed,
    Failed,
}

/// Aggregate record of one orchestrated run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub id: RunId,
    pub state: RunState,
    pub parallelism: usize,
    pub output_dir: PathBuf,
    /// One report per worker, ordered by worker index.
    pub workers: Vec<WorkerReport>,
    pub result: Option<GlobalResult>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

impl RunSummary {
    pub fn new(parallelism: usize, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            id: Uuid::new_v4(),
            state: RunState::Pending,
            parallelism,
            output_dir: output_dir.into(),
            workers: Vec::new(),
            result: None,
            started_at: None,
            finished_at: None,
            error: None,
        }
    }

    pub fn mark_running(&mut self) {
        self.state = RunState::Running;
        self.started_at = Some(Utc::now());
    }

    pub fn mark_completed(&mut self, result: GlobalResult) {
        self.state = RunState::Completed;
        self.finished_at = Some(Utc::now());
        self.result = Some(result);
    }

    pub fn mark_failed(&mut self, error: String) {
        self.state = RunState::Failed;
        self.finished_at = Some(Utc::now());
        self.error = Some(error);
    }

    /// Workers that ended with an error.
    pub fn failed_workers(&self) -> usize {
        self.workers.iter().filter(|w| w.error.is_some()).count()
    }

    pub fn write_json(&self, path: &Path) -> StResult<()> {
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }
}
