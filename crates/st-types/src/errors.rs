use std::path::PathBuf;
use thiserror::Error;

/// Main error type for the Simtune system
#[derive(Error, Debug)]
pub enum StError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Evaluation error: {0}")]
    Evaluation(#[from] EvaluationError),

    #[error("Search error: {0}")]
    Search(#[from] SearchError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors raised while turning a parameter specification into a search space.
///
/// Every variant is fatal for the worker that hit it and is never retried.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("Missing required key '{key}' in {context}")]
    MissingKey { key: String, context: String },

    #[error("Parameter type {kind} for parameter {parameter} not supported")]
    UnsupportedKind { parameter: String, kind: String },

    #[error("Invalid values for parameter {parameter}: {message}")]
    InvalidValues { parameter: String, message: String },

    #[error("Invalid default for parameter {parameter}: {message}")]
    InvalidDefault { parameter: String, message: String },

    #[error("Invalid parameter specification: {0}")]
    InvalidSpec(String),
}

/// Errors raised by a single evaluation attempt.
#[derive(Error, Debug)]
pub enum EvaluationError {
    #[error("Request failed with status {status}, error text: {body}")]
    BadStatus { status: u16, body: String },

    #[error("Response is not a valid cost: {body:?}")]
    MalformedCost { body: String },

    #[error("Connection request error: {message}")]
    Transport { message: String },

    #[error("Cannot use model artifact {}: {source}", path.display())]
    Artifact {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("No cost obtained after {attempts} attempts")]
    Exhausted { attempts: u32 },
}

impl EvaluationError {
    /// Whether another attempt may succeed. Artifact problems are local and
    /// repeat identically, so they propagate at once.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::BadStatus { .. } | Self::MalformedCost { .. } | Self::Transport { .. }
        )
    }

    /// Transport failures may mean the service is down for the whole run.
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Transport { .. })
    }
}

/// Errors raised by a search session.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SearchError {
    #[error("First evaluation of run {run_id} crashed: {reason}")]
    FirstRunCrashed { run_id: usize, reason: String },
}

/// Result type alias for Simtune operations
pub type StResult<T> = Result<T, StError>;
