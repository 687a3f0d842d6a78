//! Trajectory files: the improvement-only log each search session keeps.

use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use st_types::StResult;

/// File name of a session trajectory inside its run directory.
pub const TRAJECTORY_FILE: &str = "traj_aclib2.json";

/// Best-so-far state of a session at one point in time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrajectoryRecord {
    pub cost: f64,
    pub incumbent: serde_json::Value,
    /// Seconds since the session started.
    pub wallclock_time: f64,
    #[serde(default)]
    pub evaluations: usize,
}

/// Appends one JSON line per incumbent improvement.
#[derive(Debug)]
pub struct TrajectoryWriter {
    file: File,
}

impl TrajectoryWriter {
    /// Start a fresh trajectory at `path`, truncating any previous one.
    pub fn create(path: &Path) -> StResult<Self> {
        Ok(Self {
            file: File::create(path)?,
        })
    }

    pub fn append(&mut self, record: &TrajectoryRecord) -> StResult<()> {
        let mut line = serde_json::to_string(record)?;
        line.push('\n');
        // One write per line keeps readers from seeing half a record.
        self.file.write_all(line.as_bytes())?;
        self.file.flush()?;
        Ok(())
    }
}

/// The most recent record of a trajectory file, if it has any.
pub fn read_last_record(path: &Path) -> StResult<Option<TrajectoryRecord>> {
    let text = fs::read_to_string(path)?;
    match text.lines().rev().find(|l| !l.trim().is_empty()) {
        Some(line) => Ok(Some(serde_json::from_str(line)?)),
        None => Ok(None),
    }
}

/// Trajectory files found one level below `root`, in path order.
pub fn find_trajectory_files(root: &Path) -> StResult<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in fs::read_dir(root)? {
        let dir = entry?.path();
        if !dir.is_dir() {
            continue;
        }
        let candidate = dir.join(TRAJECTORY_FILE);
        if candidate.is_file() {
            files.push(candidate);
        }
    }
    files.sort();
    Ok(files)
}
