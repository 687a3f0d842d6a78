//! Cross-worker reduction over finished trajectories.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use st_types::StResult;

use crate::trajectory::{find_trajectory_files, read_last_record, TrajectoryRecord};

/// Placeholder cost reported when no session produced a trajectory.
pub const WORST_COST: f64 = 2_147_483_647.0;

/// The single best result across every worker of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GlobalResult {
    pub best_cost: f64,
    pub wallclock_time: Option<f64>,
    /// Trajectory file the winning record came from.
    pub source_run: Option<PathBuf>,
    pub incumbent: Option<serde_json::Value>,
}

impl GlobalResult {
    /// The "nothing found" result carrying [`WORST_COST`].
    pub fn none() -> Self {
        Self {
            best_cost: WORST_COST,
            wallclock_time: None,
            source_run: None,
            incumbent: None,
        }
    }

    /// Whether a real trajectory record backs this result.
    pub fn is_found(&self) -> bool {
        self.source_run.is_some()
    }

    /// Keep `record` if it is strictly better than the current best.
    pub fn consider(&mut self, source: &Path, record: TrajectoryRecord) -> bool {
        if record.cost < self.best_cost {
            self.best_cost = record.cost;
            self.wallclock_time = Some(record.wallclock_time);
            self.incumbent = Some(record.incumbent);
            self.source_run = Some(source.to_path_buf());
            true
        } else {
            false
        }
    }
}

impl Default for GlobalResult {
    fn default() -> Self {
        Self::none()
    }
}

impl fmt::Display for GlobalResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Recorded costs keep their decimal point; the sentinel prints as an integer.
        if self.is_found() {
            write!(f, "Best configuration has cost {:?}, found after ", self.best_cost)?;
        } else {
            write!(f, "Best configuration has cost {}, found after ", self.best_cost)?;
        }
        match self.wallclock_time {
            Some(t) => write!(f, "{t:?}")?,
            None => write!(f, "None")?,
        }
        write!(f, ", run file ")?;
        match &self.source_run {
            Some(p) => write!(f, "{}", p.display())?,
            None => write!(f, "None")?,
        }
        write!(f, ", with settings ")?;
        match &self.incumbent {
            Some(i) => write!(f, "{i}"),
            None => write!(f, "None"),
        }
    }
}

/// Select the lowest-cost last record among all run directories of `output_dir`.
///
/// Must only run once every session writing there has finished.
pub fn reduce(output_dir: &Path) -> StResult<GlobalResult> {
    let mut best = GlobalResult::none();

    for file in find_trajectory_files(output_dir)? {
        match read_last_record(&file) {
            Ok(Some(record)) => {
                debug!("Last record of {}: cost {}", file.display(), record.cost);
                best.consider(&file, record);
            }
            Ok(None) => debug!("Trajectory {} is empty", file.display()),
            Err(e) => warn!("Skipping unreadable trajectory {}: {}", file.display(), e),
        }
    }

    Ok(best)
}
