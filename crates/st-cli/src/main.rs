use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use tracing_subscriber::filter::EnvFilter;

use st_eval::{required_inputs, EvaluationClient, EvaluatorConfig};
use st_optimizer::{
    load_parameter_spec, ConfigurationSpace, LocalSearch, ObjectiveFactory, Orchestrator, Scenario,
};
use st_types::{Objective, StResult};

#[derive(Parser, Debug)]
#[command(name = "simtune", about = "Parallel parameter optimization of simulation models")]
struct Cli {
    /// Log level.
    #[arg(long, value_enum, global = true, default_value_t = LogLevel::Debug)]
    log_level: LogLevel,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum LogLevel {
    #[value(name = "DEBUG")]
    Debug,
    #[value(name = "INFO")]
    Info,
    #[value(name = "WARNING")]
    Warning,
    #[value(name = "ERROR")]
    Error,
    #[value(name = "CRITICAL")]
    Critical,
}

impl LogLevel {
    fn directive(self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warning => "warn",
            LogLevel::Error | LogLevel::Critical => "error",
        }
    }
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run parallel search sessions against the simulation service.
    Run(RunArgs),
}

#[derive(Args, Debug)]
struct RunArgs {
    /// JSON file containing the parameter specification.
    #[arg(long, default_value = "param_spec.json")]
    param_file: PathBuf,

    /// Directory for the search output. Defaults to `<cwd>/<timestamp>_smac_output`.
    #[arg(long)]
    output_dir: Option<PathBuf>,

    /// Model files to submit. The first one contains the parameters to set.
    #[arg(long = "abs-file", short = 'a')]
    abs_files: Vec<PathBuf>,

    /// Program that parses the output of the simulation.
    #[arg(long, default_value = "abs_output_parser.py")]
    output_log_parser: PathBuf,

    /// How many search sessions run in parallel.
    #[arg(long, default_value_t = 1)]
    parallel_executions: usize,

    /// Wall-clock budget of each search session, in seconds.
    #[arg(long, default_value_t = 24 * 3600)]
    global_timeout: u64,

    /// How long a single simulation may take, in seconds.
    #[arg(long, default_value_t = 3600)]
    simulation_timeout: u64,

    /// Number of simulations each search session may run.
    #[arg(long, default_value_t = 100)]
    global_simulation_limit: usize,

    #[arg(long, default_value = "http://localhost")]
    server_url: String,

    #[arg(long, default_value = "9001")]
    server_port: String,

    /// Custom Host header, if needed.
    #[arg(long, default_value = "")]
    server_host: String,
}

impl RunArgs {
    fn output_dir(&self) -> Result<PathBuf> {
        match &self.output_dir {
            Some(dir) => Ok(dir.clone()),
            None => {
                let stamp = chrono::Local::now().format("%Y%m%d%H%M%S");
                Ok(std::env::current_dir()?.join(format!("{stamp}_smac_output")))
            }
        }
    }

    fn evaluator_config(&self) -> EvaluatorConfig {
        EvaluatorConfig::new(self.abs_files.clone(), &self.output_log_parser)
            .with_server(&self.server_url, &self.server_port)
            .with_host_header(&self.server_host)
            .with_request_timeout(Duration::from_secs(self.simulation_timeout))
    }
}

fn init_logging(level: LogLevel) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.directive()));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn check_inputs<'a>(paths: impl IntoIterator<Item = &'a Path>) -> Result<()> {
    for path in paths {
        if !path.is_file() {
            bail!("Input file {} does not exist", path.display());
        }
    }
    Ok(())
}

fn run(args: RunArgs) -> Result<()> {
    let evaluator = args.evaluator_config();
    check_inputs(std::iter::once(args.param_file.as_path()).chain(required_inputs(&evaluator)))?;

    info!("Parsing JSON file");
    let spec = match load_parameter_spec(&args.param_file) {
        Ok(spec) => spec,
        Err(e) => {
            error!(
                "Json file {} is not a valid JSON. Error: {}",
                args.param_file.display(),
                e
            );
            return Err(e).context("invalid parameter specification");
        }
    };
    // Workers rebuild their own space; an unusable parameter file still fails the process.
    ConfigurationSpace::from_spec(&spec).with_context(|| {
        format!("unusable parameter specification {}", args.param_file.display())
    })?;

    let output_dir = args.output_dir()?;
    let scenario = Scenario::new(&output_dir).with_budgets(
        args.global_timeout,
        args.simulation_timeout,
        args.global_simulation_limit,
    );
    debug!("Scenario: {:?}", scenario);

    let objectives: ObjectiveFactory =
        Arc::new(move |index: usize| -> StResult<Box<dyn Objective>> {
            debug!("Proc {}. Evaluating on {}", index, evaluator.endpoint());
            Ok(Box::new(EvaluationClient::http(evaluator.clone())?))
        });

    let summary = Orchestrator::new(Arc::new(LocalSearch::default()), objectives)
        .with_parallelism(args.parallel_executions)
        .run(spec, &scenario)?;
    if summary.failed_workers() > 0 {
        warn!(
            "{} of {} workers ended with an error",
            summary.failed_workers(),
            summary.parallelism
        );
    }

    println!("{}", summary.result.unwrap_or_default());
    info!("Execution terminated");
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.log_level);

    match cli.command {
        Command::Run(args) => run(args),
    }
}
