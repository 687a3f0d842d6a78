//! One search session per worker, with a guaranteed final report.

use crossbeam_channel::Sender;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::thread;
use tracing::{debug, error, info, warn};

use st_types::{Configuration, Objective, StError, StResult};

use crate::scenario::{InitialIncumbent, Scenario};
use crate::search::{SearchBackend, SearchSession};
use crate::space::ConfigurationSpace;

/// Builds the objective a worker evaluates; called once per worker with its
/// index.
pub type ObjectiveFactory = Arc<dyn Fn(usize) -> StResult<Box<dyn Objective>> + Send + Sync>;

/// The one message every worker sends before it exits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerReport {
    pub index: usize,
    pub incumbent: Option<Configuration>,
    pub error: Option<String>,
}

impl WorkerReport {
    pub fn absent(index: usize) -> Self {
        Self {
            index,
            incumbent: None,
            error: None,
        }
    }

    pub fn failed(index: usize, error: impl Into<String>) -> Self {
        Self {
            index,
            incumbent: None,
            error: Some(error.into()),
        }
    }
}

/// Sends the held report when dropped, including while unwinding.
struct ReportGuard {
    tx: Sender<WorkerReport>,
    report: WorkerReport,
}

impl ReportGuard {
    fn new(index: usize, tx: Sender<WorkerReport>) -> Self {
        Self {
            tx,
            report: WorkerReport::absent(index),
        }
    }
}

impl Drop for ReportGuard {
    fn drop(&mut self) {
        if thread::panicking() && self.report.error.is_none() {
            self.report.error = Some("worker panicked".to_string());
        }
        let index = self.report.index;
        let report = std::mem::replace(&mut self.report, WorkerReport::absent(index));
        if self.tx.send(report).is_err() {
            debug!("Worker {} report dropped: receiver gone", index);
        }
    }
}

/// A single search worker.
pub struct Worker {
    index: usize,
    spec: Arc<Value>,
    scenario: Scenario,
    backend: Arc<dyn SearchBackend>,
    objectives: ObjectiveFactory,
}

impl Worker {
    /// Worker 0 always starts from the declared default configuration so
    /// the default is evaluated at least once per run.
    pub fn new(
        index: usize,
        spec: Arc<Value>,
        scenario: Scenario,
        backend: Arc<dyn SearchBackend>,
        objectives: ObjectiveFactory,
    ) -> Self {
        let scenario = if index == 0 {
            scenario.with_initial_incumbent(InitialIncumbent::Default)
        } else {
            scenario
        };
        Self {
            index,
            spec,
            scenario,
            backend,
            objectives,
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn scenario(&self) -> &Scenario {
        &self.scenario
    }

    /// Run the session and send exactly one report on `tx`.
    pub fn run(self, tx: Sender<WorkerReport>) {
        let mut guard = ReportGuard::new(self.index, tx);
        match self.search() {
            Ok(incumbent) => {
                info!("Proc {}. Search finished, incumbent {:?}", self.index, incumbent);
                guard.report.incumbent = incumbent;
            }
            Err(StError::Config(e)) => {
                warn!("Proc {}. Error: {}. Quitting", self.index, e);
                guard.report.error = Some(e.to_string());
            }
            Err(e) => {
                error!("Proc {}. Search failed: {}", self.index, e);
                guard.report.error = Some(e.to_string());
            }
        }
    }

    fn search(&self) -> StResult<Option<Configuration>> {
        let space = ConfigurationSpace::from_spec(&self.spec)?;
        debug!(
            "Proc {}. Space of {} parameters, {} configurations",
            self.index,
            space.len(),
            space.size()
        );

        let mut objective = (self.objectives)(self.index)?;
        let session = SearchSession {
            space,
            scenario: self.scenario.clone(),
            seed: self.index as u64,
            run_id: self.index,
        };
        info!(
            "Proc {}. Starting {} search in {}",
            self.index,
            self.backend.name(),
            self.scenario.run_dir(self.index).display()
        );
        self.backend.optimize(session, objective.as_mut())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::LocalSearch;
    use crossbeam_channel::unbounded;
    use serde_json::json;
    use st_types::{EvaluationOutcome, ParameterValue};
    use std::sync::Mutex;

    fn spec() -> Value {
        json!({
            "parameters": {
                "x": {"type": "integer", "values": [0, 20], "default": 7}
            }
        })
    }

    fn recording_factory(seen: Arc<Mutex<Vec<Configuration>>>) -> ObjectiveFactory {
        Arc::new(move |_: usize| -> StResult<Box<dyn Objective>> {
            let seen = seen.clone();
            let objective = move |c: &Configuration| {
                seen.lock().unwrap().push(c.clone());
                match c.get("x") {
                    Some(ParameterValue::Int(x)) => EvaluationOutcome::Cost(*x as f64),
                    _ => EvaluationOutcome::Failed {
                        reason: "no x".to_string(),
                    },
                }
            };
            Ok(Box::new(objective))
        })
    }

    struct PanickingBackend;

    impl SearchBackend for PanickingBackend {
        fn optimize(
            &self,
            _session: SearchSession,
            _objective: &mut dyn Objective,
        ) -> StResult<Option<Configuration>> {
            panic!("backend blew up");
        }

        fn name(&self) -> &str {
            "panicking"
        }
    }

    #[test]
    fn first_worker_starts_from_default() {
        let dir = tempfile::tempdir().unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let scenario = Scenario::new(dir.path()).with_budgets(3600, 60, 3);

        let worker = Worker::new(
            0,
            Arc::new(spec()),
            scenario.clone(),
            Arc::new(LocalSearch::default()),
            recording_factory(seen.clone()),
        );
        assert_eq!(worker.scenario().initial_incumbent, InitialIncumbent::Default);

        let (tx, rx) = unbounded();
        worker.run(tx);

        let report = rx.recv().unwrap();
        assert_eq!(report.index, 0);
        assert!(report.error.is_none());
        assert!(report.incumbent.is_some());
        assert!(rx.try_recv().is_err());
        assert_eq!(
            seen.lock().unwrap()[0],
            Configuration::new().with("x", ParameterValue::Int(7))
        );

        let other = Worker::new(
            1,
            Arc::new(spec()),
            scenario,
            Arc::new(LocalSearch::default()),
            recording_factory(seen),
        );
        assert_eq!(other.scenario().initial_incumbent, InitialIncumbent::Random);
    }

    #[test]
    fn configuration_error_reports_no_incumbent() {
        let dir = tempfile::tempdir().unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let bad = json!({"parameters": {"x": {"type": "float", "values": [0.0, 1.0], "default": 0.5}}});

        let worker = Worker::new(
            2,
            Arc::new(bad),
            Scenario::new(dir.path()),
            Arc::new(LocalSearch::default()),
            recording_factory(seen.clone()),
        );
        let (tx, rx) = unbounded();
        worker.run(tx);

        let report = rx.recv().unwrap();
        assert_eq!(report.index, 2);
        assert!(report.incumbent.is_none());
        assert!(report.error.unwrap().contains("float"));
        assert!(seen.lock().unwrap().is_empty());
        assert!(!dir.path().join("run_2").exists());
    }

    #[test]
    fn panicking_backend_still_reports_once() {
        let dir = tempfile::tempdir().unwrap();
        let worker = Worker::new(
            1,
            Arc::new(spec()),
            Scenario::new(dir.path()),
            Arc::new(PanickingBackend),
            recording_factory(Arc::new(Mutex::new(Vec::new()))),
        );
        let (tx, rx) = unbounded();

        let handle = thread::spawn(move || worker.run(tx));
        assert!(handle.join().is_err());

        let report = rx.recv().unwrap();
        assert_eq!(report, WorkerReport::failed(1, "worker panicked"));
        assert!(rx.recv().is_err());
    }

    #[test]
    fn objective_factory_failure_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let factory: ObjectiveFactory = Arc::new(|_: usize| -> StResult<Box<dyn Objective>> {
            Err(st_types::EvaluationError::Transport {
                message: "no evaluator available".to_string(),
            }
            .into())
        });
        let worker = Worker::new(
            3,
            Arc::new(spec()),
            Scenario::new(dir.path()),
            Arc::new(LocalSearch::default()),
            factory,
        );
        let (tx, rx) = unbounded();
        worker.run(tx);

        let report = rx.recv().unwrap();
        assert!(report.incumbent.is_none());
        assert!(report.error.unwrap().contains("no evaluator available"));
    }
}
