//! The search backend seam and the built-in local search backend.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::time::Instant;
use tracing::{debug, info, warn};

use st_types::{Configuration, EvaluationOutcome, Objective, SearchError, StResult};

use crate::scenario::{InitialIncumbent, Scenario};
use crate::space::ConfigurationSpace;
use crate::trajectory::{
    find_trajectory_files, read_last_record, TrajectoryRecord, TrajectoryWriter, TRAJECTORY_FILE,
};

/// File name of the scenario snapshot a session writes into its run directory.
pub const SCENARIO_FILE: &str = "scenario.json";

/// Spaces up to this size are enumerated once random proposals stop finding
/// unseen configurations.
const GRID_FALLBACK_LIMIT: u128 = 100_000;

/// Everything one search session needs besides the objective.
#[derive(Debug, Clone)]
pub struct SearchSession {
    pub space: ConfigurationSpace,
    pub scenario: Scenario,
    pub seed: u64,
    pub run_id: usize,
}

/// A minimiser driving an [`Objective`] over a configuration space.
///
/// Implementations write their trajectory under
/// `scenario.run_dir(run_id)` and may read sibling run directories when
/// `shared_model` is set.
pub trait SearchBackend: Send + Sync {
    /// Run one session to completion and return its incumbent, if any
    /// evaluation produced a cost.
    fn optimize(
        &self,
        session: SearchSession,
        objective: &mut dyn Objective,
    ) -> StResult<Option<Configuration>>;

    fn name(&self) -> &str;
}

/// Explore/exploit local search.
///
/// Each step either samples the space uniformly or perturbs the best known
/// configuration, which is this session's incumbent or a better one
/// published by a peer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocalSearch {
    /// Probability of a uniform sample instead of a perturbation.
    pub exploration_weight: f64,
    /// Peer trajectories are re-read every this many evaluations.
    pub share_interval: usize,
    pub max_proposal_attempts: usize,
}

impl Default for LocalSearch {
    fn default() -> Self {
        Self {
            exploration_weight: 0.3,
            share_interval: 5,
            max_proposal_attempts: 64,
        }
    }
}

impl LocalSearch {
    fn propose(
        &self,
        space: &ConfigurationSpace,
        base: Option<&Configuration>,
        rng: &mut ChaCha8Rng,
    ) -> Configuration {
        match base {
            Some(base) if rng.gen::<f64>() >= self.exploration_weight => space.neighbour(base, rng),
            _ => space.sample(rng),
        }
    }

    /// Next candidate; in deterministic mode never one that was already
    /// evaluated. `None` means nothing unseen could be found.
    fn next_candidate(
        &self,
        space: &ConfigurationSpace,
        base: Option<&Configuration>,
        deterministic: bool,
        seen: &HashSet<String>,
        rng: &mut ChaCha8Rng,
    ) -> Option<Configuration> {
        if !deterministic {
            return Some(self.propose(space, base, rng));
        }

        for _ in 0..self.max_proposal_attempts.max(1) {
            let candidate = self.propose(space, base, rng);
            if !seen.contains(&candidate.fingerprint()) {
                return Some(candidate);
            }
        }

        if space.size() <= GRID_FALLBACK_LIMIT {
            space
                .grid()
                .into_iter()
                .find(|c| !seen.contains(&c.fingerprint()))
        } else {
            None
        }
    }
}

/// Best last record published by another session under the shared input
/// directory, if it belongs to `space`.
pub fn peer_incumbent(
    scenario: &Scenario,
    run_id: usize,
    space: &ConfigurationSpace,
) -> Option<(Configuration, f64)> {
    let own_dir = scenario.run_dir(run_id);
    let files = match find_trajectory_files(&scenario.shared_input_root()) {
        Ok(files) => files,
        Err(e) => {
            debug!("Cannot list shared runs: {}", e);
            return None;
        }
    };

    let mut best: Option<(Configuration, f64)> = None;
    for file in files {
        if file.parent() == Some(own_dir.as_path()) {
            continue;
        }
        let record = match read_last_record(&file) {
            Ok(Some(record)) => record,
            _ => continue,
        };
        let Ok(config) = serde_json::from_value::<Configuration>(record.incumbent) else {
            continue;
        };
        if !space.contains(&config) || !record.cost.is_finite() {
            continue;
        }
        if best.as_ref().map_or(true, |(_, c)| record.cost < *c) {
            best = Some((config, record.cost));
        }
    }
    best
}

impl SearchBackend for LocalSearch {
    fn optimize(
        &self,
        session: SearchSession,
        objective: &mut dyn Objective,
    ) -> StResult<Option<Configuration>> {
        let SearchSession {
            space,
            scenario,
            seed,
            run_id,
        } = session;

        let run_dir = scenario.run_dir(run_id);
        fs::create_dir_all(&run_dir)?;
        fs::write(
            run_dir.join(SCENARIO_FILE),
            serde_json::to_string_pretty(&scenario)?,
        )?;
        let mut trajectory = TrajectoryWriter::create(&run_dir.join(TRAJECTORY_FILE))?;

        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let started = Instant::now();
        let size = space.size();
        let mut seen: HashSet<String> = HashSet::new();
        let mut incumbent: Option<(Configuration, f64)> = None;
        let mut peer: Option<(Configuration, f64)> = None;
        let mut evaluations = 0usize;

        while evaluations < scenario.runcount_limit {
            if started.elapsed() >= scenario.wallclock() {
                info!("Run {} reached its wall-clock limit", run_id);
                break;
            }
            if scenario.deterministic && seen.len() as u128 >= size {
                info!("Run {} evaluated the whole space", run_id);
                break;
            }

            let share_now = evaluations > 0 && evaluations % self.share_interval.max(1) == 0;
            if scenario.shared_model && share_now {
                peer = peer_incumbent(&scenario, run_id, &space);
            }

            let candidate = if evaluations == 0 {
                Some(match scenario.initial_incumbent {
                    InitialIncumbent::Default => space.default_configuration(),
                    InitialIncumbent::Random => space.sample(&mut rng),
                })
            } else {
                let base = match (&incumbent, &peer) {
                    (Some((own, own_cost)), Some((theirs, their_cost))) => {
                        Some(if their_cost < own_cost { theirs } else { own })
                    }
                    (Some((own, _)), None) => Some(own),
                    (None, Some((theirs, _))) => Some(theirs),
                    (None, None) => None,
                };
                self.next_candidate(&space, base, scenario.deterministic, &seen, &mut rng)
            };
            let Some(candidate) = candidate else {
                info!("Run {} found no unseen configuration", run_id);
                break;
            };
            seen.insert(candidate.fingerprint());

            let eval_started = Instant::now();
            let outcome = objective.evaluate(&candidate);
            evaluations += 1;
            if eval_started.elapsed() > scenario.cutoff() {
                warn!(
                    "Run {}: evaluation took {:.1}s, beyond the {}s cutoff",
                    run_id,
                    eval_started.elapsed().as_secs_f64(),
                    scenario.cutoff_time
                );
            }

            match outcome {
                EvaluationOutcome::Cost(cost) if cost.is_finite() => {
                    if incumbent.as_ref().map_or(true, |(_, best)| cost < *best) {
                        debug!("Run {}: new incumbent {} with cost {}", run_id, candidate, cost);
                        trajectory.append(&TrajectoryRecord {
                            cost,
                            incumbent: candidate.to_json(),
                            wallclock_time: started.elapsed().as_secs_f64(),
                            evaluations,
                        })?;
                        incumbent = Some((candidate, cost));
                    }
                }
                other => {
                    let reason = match other {
                        EvaluationOutcome::Failed { reason } => reason,
                        EvaluationOutcome::Cost(cost) => format!("non-finite cost {cost}"),
                    };
                    if evaluations == 1 && scenario.abort_on_first_run_crash {
                        return Err(SearchError::FirstRunCrashed { run_id, reason }.into());
                    }
                    warn!("Run {}: evaluation of {} crashed: {}", run_id, candidate, reason);
                }
            }
        }

        info!(
            "Run {} finished after {} evaluations in {:.1}s",
            run_id,
            evaluations,
            started.elapsed().as_secs_f64()
        );
        Ok(incumbent.map(|(config, _)| config))
    }

    fn name(&self) -> &str {
        "local"
    }
}
