//! Remote evaluation client: the objective function handed to a search backend.
//!
//! One call rewrites the model artifacts for the candidate configuration,
//! submits them together with the log parser to the evaluation service, and
//! parses the response body as the cost to minimise. Transient failures are
//! retried a bounded number of times with a fixed cool-down in between.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use st_types::{Configuration, EvaluationError, EvaluationOutcome, Objective};
use tracing::{debug, error, warn};

use crate::rewriter::{ArtifactRewriter, RewrittenArtifact};

/// Multipart field carrying each model artifact.
pub const ARTIFACT_FIELD: &str = "abs";
/// Multipart field carrying the result-parsing program.
pub const LOG_PARSER_FIELD: &str = "log_parser";

/// Connection and retry settings for the evaluation service.
///
/// Built once per worker and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluatorConfig {
    pub server_url: String,
    pub server_port: String,
    /// Custom `Host` header; `None` sends the default.
    pub host_header: Option<String>,
    /// Model artifacts in submission order. The first one is the primary model.
    pub artifacts: Vec<PathBuf>,
    pub log_parser: PathBuf,
    pub max_attempts: u32,
    #[serde(with = "duration_secs")]
    pub retry_backoff: Duration,
    #[serde(default, with = "option_duration_secs")]
    pub request_timeout: Option<Duration>,
}

impl Default for EvaluatorConfig {
    fn default() -> Self {
        Self {
            server_url: "http://localhost".to_string(),
            server_port: "9001".to_string(),
            host_header: None,
            artifacts: Vec::new(),
            log_parser: PathBuf::from("abs_output_parser.py"),
            max_attempts: 2,
            retry_backoff: Duration::from_secs(60),
            request_timeout: None,
        }
    }
}

impl EvaluatorConfig {
    pub fn new(artifacts: Vec<PathBuf>, log_parser: impl Into<PathBuf>) -> Self {
        Self {
            artifacts,
            log_parser: log_parser.into(),
            ..Self::default()
        }
    }

    pub fn with_server(mut self, url: impl Into<String>, port: impl Into<String>) -> Self {
        self.server_url = url.into();
        self.server_port = port.into();
        self
    }

    /// An empty host means "no override".
    pub fn with_host_header(mut self, host: impl Into<String>) -> Self {
        let host = host.into();
        self.host_header = if host.is_empty() { None } else { Some(host) };
        self
    }

    pub fn with_retry(mut self, max_attempts: u32, backoff: Duration) -> Self {
        self.max_attempts = max_attempts.max(1);
        self.retry_backoff = backoff;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    pub fn endpoint(&self) -> String {
        format!("{}:{}/process", self.server_url, self.server_port)
    }
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_secs)
    }
}

mod option_duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match d {
            Some(d) => s.serialize_some(&d.as_secs()),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        Option::<u64>::deserialize(d).map(|v| v.map(Duration::from_secs))
    }
}

/// One file part of an evaluation request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PayloadPart {
    pub field: &'static str,
    pub path: PathBuf,
}

/// A fully resolved evaluation request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvaluationRequest {
    pub endpoint: String,
    pub host_header: Option<String>,
    pub parts: Vec<PayloadPart>,
}

/// Raw status and body returned by the evaluation service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchResponse {
    pub status: u16,
    pub body: String,
}

impl DispatchResponse {
    pub fn ok(body: impl Into<String>) -> Self {
        Self {
            status: 200,
            body: body.into(),
        }
    }

    /// Only a plain `200 OK` carries a cost.
    pub fn is_success(&self) -> bool {
        self.status == 200
    }
}

/// Transport seam between the client and the evaluation service.
///
/// Implementations return `EvaluationError::Transport` for connection-level
/// failures and `EvaluationError::Artifact` when a payload file cannot be read.
pub trait Dispatcher: Send + Sync {
    fn dispatch(&self, request: &EvaluationRequest) -> Result<DispatchResponse, EvaluationError>;
}

/// Blocking HTTP dispatcher posting a multipart form.
#[derive(Debug, Clone)]
pub struct HttpDispatcher {
    client: reqwest::blocking::Client,
}

impl HttpDispatcher {
    pub fn new(timeout: Option<Duration>) -> Result<Self, EvaluationError> {
        let mut builder = reqwest::blocking::Client::builder();
        // reqwest's blocking client defaults to 30s; only the configured cutoff applies.
        builder = builder.timeout(timeout);
        let client = builder.build().map_err(|e| EvaluationError::Transport {
            message: format!("cannot build HTTP client: {e}"),
        })?;
        Ok(Self { client })
    }
}

impl Dispatcher for HttpDispatcher {
    fn dispatch(&self, request: &EvaluationRequest) -> Result<DispatchResponse, EvaluationError> {
        let mut form = reqwest::blocking::multipart::Form::new();
        for part in &request.parts {
            form = form
                .file(part.field, &part.path)
                .map_err(|source| EvaluationError::Artifact {
                    path: part.path.clone(),
                    source,
                })?;
        }

        let mut call = self.client.post(&request.endpoint).multipart(form);
        if let Some(host) = &request.host_header {
            call = call.header(reqwest::header::HOST, host);
        }

        let response = call.send().map_err(|e| EvaluationError::Transport {
            message: e.to_string(),
        })?;
        let status = response.status().as_u16();
        let body = response.text().map_err(|e| EvaluationError::Transport {
            message: format!("cannot read response body: {e}"),
        })?;

        Ok(DispatchResponse { status, body })
    }
}

/// Parse a response body as a single finite cost.
pub fn parse_cost(body: &str) -> Result<f64, EvaluationError> {
    body.trim()
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .ok_or_else(|| EvaluationError::MalformedCost {
            body: body.to_string(),
        })
}

type Sleeper = Arc<dyn Fn(Duration) + Send + Sync>;

/// The objective function: rewrite, dispatch, retry, parse, clean up.
pub struct EvaluationClient<D: Dispatcher = HttpDispatcher> {
    config: EvaluatorConfig,
    dispatcher: D,
    rewriter: ArtifactRewriter,
    sleeper: Sleeper,
}

impl<D: Dispatcher> fmt::Debug for EvaluationClient<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EvaluationClient")
            .field("config", &self.config)
            .field("rewriter", &self.rewriter)
            .finish_non_exhaustive()
    }
}

impl EvaluationClient<HttpDispatcher> {
    /// Client talking HTTP to the configured service.
    pub fn http(config: EvaluatorConfig) -> Result<Self, EvaluationError> {
        let dispatcher = HttpDispatcher::new(config.request_timeout)?;
        Ok(Self::with_dispatcher(config, dispatcher))
    }
}

impl<D: Dispatcher> EvaluationClient<D> {
    pub fn with_dispatcher(config: EvaluatorConfig, dispatcher: D) -> Self {
        Self {
            config,
            dispatcher,
            rewriter: ArtifactRewriter::new(),
            sleeper: Arc::new(std::thread::sleep),
        }
    }

    pub fn with_rewriter(mut self, rewriter: ArtifactRewriter) -> Self {
        self.rewriter = rewriter;
        self
    }

    /// Replace the cool-down pause between attempts.
    pub fn with_sleeper(mut self, sleeper: impl Fn(Duration) + Send + Sync + 'static) -> Self {
        self.sleeper = Arc::new(sleeper);
        self
    }

    /// Evaluate one configuration, returning the cost or the last error.
    ///
    /// Every temporary artifact created here is removed before this returns,
    /// whether the evaluation succeeded, exhausted its attempts, or failed.
    pub fn try_evaluate(&self, config: &Configuration) -> Result<f64, EvaluationError> {
        let overrides = config.overrides();
        debug!("Configuration: {}", overrides);

        // Owns the temp files; dropping it on any exit path deletes them.
        let mut rewritten: Vec<RewrittenArtifact> = Vec::new();
        let mut to_send: Vec<PathBuf> = Vec::with_capacity(self.config.artifacts.len());
        for artifact in &self.config.artifacts {
            match self.rewriter.rewrite(artifact, &overrides)? {
                Some(copy) => {
                    to_send.push(copy.path().to_path_buf());
                    rewritten.push(copy);
                }
                None => to_send.push(artifact.clone()),
            }
        }
        debug!("Updated {} files", rewritten.len());

        let request = self.build_request(&to_send);
        let result = self.submit_with_retry(&request);

        drop(rewritten);
        result
    }

    fn build_request(&self, artifacts: &[PathBuf]) -> EvaluationRequest {
        let mut parts: Vec<PayloadPart> = artifacts
            .iter()
            .map(|path| PayloadPart {
                field: ARTIFACT_FIELD,
                path: path.clone(),
            })
            .collect();
        parts.push(PayloadPart {
            field: LOG_PARSER_FIELD,
            path: self.config.log_parser.clone(),
        });

        EvaluationRequest {
            endpoint: self.config.endpoint(),
            host_header: self.config.host_header.clone(),
            parts,
        }
    }

    fn submit_with_retry(&self, request: &EvaluationRequest) -> Result<f64, EvaluationError> {
        let attempts = self.config.max_attempts.max(1);

        for attempt in 1..=attempts {
            debug!("Sending request to server, attempt {}", attempt);
            match self.submit_once(request) {
                Ok(cost) => {
                    debug!("Quality of the solution: {}", cost);
                    return Ok(cost);
                }
                Err(e) if e.is_transport() => error!("Connection request error {}", e),
                Err(e) if e.is_retryable() => warn!("Error {}", e),
                Err(e) => return Err(e),
            }

            if attempt < attempts {
                (self.sleeper)(self.config.retry_backoff);
            }
        }

        Err(EvaluationError::Exhausted { attempts })
    }

    fn submit_once(&self, request: &EvaluationRequest) -> Result<f64, EvaluationError> {
        let response = self.dispatcher.dispatch(request)?;
        debug!("Received answer with code {}", response.status);
        if !response.is_success() {
            return Err(EvaluationError::BadStatus {
                status: response.status,
                body: response.body,
            });
        }
        parse_cost(&response.body)
    }
}

impl<D: Dispatcher> Objective for EvaluationClient<D> {
    fn evaluate(&mut self, config: &Configuration) -> EvaluationOutcome {
        match self.try_evaluate(config) {
            Ok(cost) => EvaluationOutcome::Cost(cost),
            Err(e) => EvaluationOutcome::Failed {
                reason: e.to_string(),
            },
        }
    }
}

/// Paths that must exist before any evaluation is attempted.
pub fn required_inputs(config: &EvaluatorConfig) -> impl Iterator<Item = &Path> {
    config
        .artifacts
        .iter()
        .map(PathBuf::as_path)
        .chain(std::iter::once(config.log_parser.as_path()))
}
