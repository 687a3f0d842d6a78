//! Parameter values, configurations, and the objective-function seam.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// A concrete parameter value produced by a search backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParameterValue {
    Int(i64),
    Float(f64),
    Json(serde_json::Value),
}

impl ParameterValue {
    /// Normalise a JSON value so that integers and floats always land in the
    /// same variant they deserialize into.
    pub fn from_json(value: &serde_json::Value) -> Self {
        if let Some(v) = value.as_i64() {
            Self::Int(v)
        } else if let Some(v) = value.as_f64() {
            Self::Float(v)
        } else {
            Self::Json(value.clone())
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Self::Int(v) => serde_json::Value::from(*v),
            Self::Float(v) => serde_json::Value::from(*v),
            Self::Json(v) => v.clone(),
        }
    }

    /// Truthiness: zero, null, `false`, and empty strings or collections are
    /// "not set" and never override a model declaration.
    pub fn is_set(&self) -> bool {
        match self {
            Self::Int(v) => *v != 0,
            Self::Float(v) => *v != 0.0,
            Self::Json(v) => match v {
                serde_json::Value::Null => false,
                serde_json::Value::Bool(b) => *b,
                serde_json::Value::Number(n) => n.as_f64().map_or(true, |f| f != 0.0),
                serde_json::Value::String(s) => !s.is_empty(),
                serde_json::Value::Array(a) => !a.is_empty(),
                serde_json::Value::Object(o) => !o.is_empty(),
            },
        }
    }
}

impl fmt::Display for ParameterValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
            // Strings are substituted verbatim, without JSON quoting.
            Self::Json(serde_json::Value::String(s)) => write!(f, "{s}"),
            Self::Json(v) => write!(f, "{v}"),
        }
    }
}

/// One concrete assignment of values to search-space parameters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Configuration(BTreeMap<String, ParameterValue>);

impl Configuration {
    pub fn new() -> Self {
        Self(BTreeMap::new())
    }

    pub fn with(mut self, name: impl Into<String>, value: ParameterValue) -> Self {
        self.0.insert(name.into(), value);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, value: ParameterValue) {
        self.0.insert(name.into(), value);
    }

    pub fn get(&self, name: &str) -> Option<&ParameterValue> {
        self.0.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &ParameterValue)> {
        self.0.iter()
    }

    /// The entries that actually override something: falsy values dropped.
    pub fn overrides(&self) -> Configuration {
        Self(
            self.0
                .iter()
                .filter(|(_, v)| v.is_set())
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        )
    }

    /// Stable textual key, used to detect repeated configurations.
    pub fn fingerprint(&self) -> String {
        self.0
            .iter()
            .map(|(k, v)| format!("{k}={}", v.to_json()))
            .collect::<Vec<_>>()
            .join(",")
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::Value::Object(
            self.0
                .iter()
                .map(|(k, v)| (k.clone(), v.to_json()))
                .collect(),
        )
    }
}

impl fmt::Display for Configuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, (k, v)) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{k}: {v}")?;
        }
        write!(f, "}}")
    }
}

impl FromIterator<(String, ParameterValue)> for Configuration {
    fn from_iter<I: IntoIterator<Item = (String, ParameterValue)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Result of evaluating one configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum EvaluationOutcome {
    /// Scalar cost to minimise.
    Cost(f64),
    /// No usable cost was produced.
    Failed { reason: String },
}

impl EvaluationOutcome {
    pub fn cost(&self) -> Option<f64> {
        match self {
            Self::Cost(c) => Some(*c),
            Self::Failed { .. } => None,
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }
}

/// The function a search backend calls once per candidate configuration.
///
/// Calls are strictly sequential within one search session.
pub trait Objective: Send {
    fn evaluate(&mut self, config: &Configuration) -> EvaluationOutcome;
}

impl<F> Objective for F
where
    F: FnMut(&Configuration) -> EvaluationOutcome + Send,
{
    fn evaluate(&mut self, config: &Configuration) -> EvaluationOutcome {
        self(config)
    }
}
