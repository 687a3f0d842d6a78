//! # st-optimizer
//!
//! Parameter search orchestration for Simtune.
//!
//! Provides the configuration space built from a parameter specification, the
//! search backend seam with a built-in local search, per-worker sessions that
//! always report back, and the final reduction over worker trajectories.

mod orchestrator;
mod reduction;
mod scenario;
mod search;
mod space;
mod summary;
mod trajectory;
mod worker;

pub use orchestrator::{ensure_output_dir, Orchestrator};
pub use reduction::{reduce, GlobalResult, WORST_COST};
pub use scenario::{InitialIncumbent, RunObjective, Scenario};
pub use search::{peer_incumbent, LocalSearch, SearchBackend, SearchSession, SCENARIO_FILE};
pub use space::{load_parameter_spec, ConfigurationSpace, ParameterDef, ParameterKind};
pub use summary::{RunId, RunState, RunSummary, SUMMARY_FILE};
pub use trajectory::{
    find_trajectory_files, read_last_record, TrajectoryRecord, TrajectoryWriter, TRAJECTORY_FILE,
};
pub use worker::{ObjectiveFactory, Worker, WorkerReport};
