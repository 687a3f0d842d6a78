//! Scenario options shared by every search session of a run.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// What the search minimises.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunObjective {
    #[default]
    Quality,
}

/// Where a session starts its search.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum InitialIncumbent {
    #[default]
    Random,
    Default,
}

/// Budgets and policies handed to the search backend.
///
/// Field names serialize to the backend's option names.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scenario {
    pub run_obj: RunObjective,
    pub deterministic: bool,
    pub shared_model: bool,
    pub initial_incumbent: InitialIncumbent,
    pub abort_on_first_run_crash: bool,
    /// Glob naming the run directories peers publish their trajectories in.
    pub input_psmac_dirs: String,
    pub output_dir: PathBuf,
    /// Wall-clock budget of one session, in seconds.
    pub wallclock_limit: u64,
    /// Per-evaluation cutoff, in seconds.
    pub cutoff_time: u64,
    #[serde(rename = "runcount-limit")]
    pub runcount_limit: usize,
}

impl Scenario {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        let output_dir = output_dir.into();
        Self {
            run_obj: RunObjective::Quality,
            deterministic: true,
            shared_model: true,
            initial_incumbent: InitialIncumbent::Random,
            abort_on_first_run_crash: true,
            input_psmac_dirs: output_dir.join("*").to_string_lossy().into_owned(),
            output_dir,
            wallclock_limit: 24 * 3600,
            cutoff_time: 3600,
            runcount_limit: 100,
        }
    }

    pub fn with_budgets(mut self, wallclock_secs: u64, cutoff_secs: u64, runcount: usize) -> Self {
        self.wallclock_limit = wallclock_secs;
        self.cutoff_time = cutoff_secs;
        self.runcount_limit = runcount;
        self
    }

    pub fn with_initial_incumbent(mut self, initial: InitialIncumbent) -> Self {
        self.initial_incumbent = initial;
        self
    }

    pub fn wallclock(&self) -> Duration {
        Duration::from_secs(self.wallclock_limit)
    }

    pub fn cutoff(&self) -> Duration {
        Duration::from_secs(self.cutoff_time)
    }

    /// Output directory of one session.
    pub fn run_dir(&self, run_id: usize) -> PathBuf {
        self.output_dir.join(format!("run_{run_id}"))
    }

    /// Directory whose subdirectories hold peer trajectories.
    pub fn shared_input_root(&self) -> PathBuf {
        let pattern = Path::new(&self.input_psmac_dirs);
        match pattern.file_name() {
            Some(name) if name == "*" => pattern
                .parent()
                .map(Path::to_path_buf)
                .unwrap_or_else(|| self.output_dir.clone()),
            _ => pattern.to_path_buf(),
        }
    }
}
