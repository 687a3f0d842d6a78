//! Search space definitions and the parameter specification loader.

use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::Path;
use tracing::{error, warn};

use st_types::{ConfigError, Configuration, ParameterValue, StResult};

/// A single parameter dimension in the search space.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterDef {
    /// Name of the model declaration this parameter drives.
    pub name: String,
    /// The kind of search range.
    pub kind: ParameterKind,
    pub default: ParameterValue,
}

/// Describes how a parameter is sampled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ParameterKind {
    /// Integer range [low, high] inclusive.
    Integer { low: i64, high: i64 },
    /// Ordered discrete values.
    Ordinal { values: Vec<ParameterValue> },
}

impl ParameterKind {
    fn cardinality(&self) -> u128 {
        match self {
            Self::Integer { low, high } => (*high as i128 - *low as i128 + 1) as u128,
            Self::Ordinal { values } => values.len() as u128,
        }
    }

    fn admits(&self, value: &ParameterValue) -> bool {
        match (self, value) {
            (Self::Integer { low, high }, ParameterValue::Int(v)) => low <= v && v <= high,
            (Self::Integer { .. }, _) => false,
            (Self::Ordinal { values }, v) => values.contains(v),
        }
    }

    fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> ParameterValue {
        match self {
            Self::Integer { low, high } => ParameterValue::Int(rng.gen_range(*low..=*high)),
            Self::Ordinal { values } => values[rng.gen_range(0..values.len())].clone(),
        }
    }

    /// A value close to `base`: integers move by up to a tenth of their range,
    /// ordinals by one position.
    fn perturb<R: Rng + ?Sized>(&self, base: &ParameterValue, rng: &mut R) -> ParameterValue {
        match (self, base) {
            (Self::Integer { low, high }, ParameterValue::Int(v)) => {
                let step = (high.saturating_sub(*low) / 10).max(1);
                let delta = rng.gen_range(-step..=step);
                ParameterValue::Int(v.saturating_add(delta).clamp(*low, *high))
            }
            (Self::Ordinal { values }, v) => match values.iter().position(|x| x == v) {
                Some(idx) => {
                    let next = if idx == 0 {
                        1
                    } else if idx + 1 == values.len() || rng.gen_bool(0.5) {
                        idx - 1
                    } else {
                        idx + 1
                    };
                    values[next].clone()
                }
                None => self.sample(rng),
            },
            _ => self.sample(rng),
        }
    }
}

/// The full search space: an ordered list of parameter definitions.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ConfigurationSpace {
    pub parameters: Vec<ParameterDef>,
}

impl ConfigurationSpace {
    pub fn new() -> Self {
        Self {
            parameters: Vec::new(),
        }
    }

    pub fn add_int(mut self, name: impl Into<String>, low: i64, high: i64, default: i64) -> Self {
        self.parameters.push(ParameterDef {
            name: name.into(),
            kind: ParameterKind::Integer { low, high },
            default: ParameterValue::Int(default),
        });
        self
    }

    pub fn add_ordinal(
        mut self,
        name: impl Into<String>,
        values: Vec<ParameterValue>,
        default: ParameterValue,
    ) -> Self {
        self.parameters.push(ParameterDef {
            name: name.into(),
            kind: ParameterKind::Ordinal { values },
            default,
        });
        self
    }

    /// Build a validated space from a parameter specification document.
    ///
    /// The document holds a `parameters` object keyed by parameter name, each
    /// entry carrying `type`, `values`, and `default`. Parameters that can
    /// take only one value are dropped with a warning. Any other problem is a
    /// [`ConfigError`], and an unsupported `type` aborts the whole build.
    pub fn from_spec(spec: &Value) -> Result<Self, ConfigError> {
        let parameters = spec
            .get("parameters")
            .ok_or_else(|| ConfigError::MissingKey {
                key: "parameters".to_string(),
                context: "parameter specification".to_string(),
            })?
            .as_object()
            .ok_or_else(|| ConfigError::InvalidSpec("'parameters' must be an object".to_string()))?;

        let mut space = Self::new();
        for (name, entry) in parameters {
            let kind = required(entry, "type", name)?;
            let kind = kind.as_str().ok_or_else(|| ConfigError::UnsupportedKind {
                parameter: name.clone(),
                kind: kind.to_string(),
            })?;

            let def = match kind {
                "integer" => integer_parameter(name, entry)?,
                "ordinal" => ordinal_parameter(name, entry)?,
                other => {
                    error!("Parameter type {} for parameter {} not supported. Exiting", other, name);
                    return Err(ConfigError::UnsupportedKind {
                        parameter: name.clone(),
                        kind: other.to_string(),
                    });
                }
            };

            match def {
                Some(def) => space.parameters.push(def),
                None => warn!("Parameter {} can take only one value. It will be ignored", name),
            }
        }

        Ok(space)
    }

    pub fn len(&self) -> usize {
        self.parameters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parameters.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&ParameterDef> {
        self.parameters.iter().find(|p| p.name == name)
    }

    /// Number of distinct configurations, saturating at `u128::MAX`.
    pub fn size(&self) -> u128 {
        self.parameters
            .iter()
            .fold(1u128, |acc, p| acc.saturating_mul(p.kind.cardinality()))
    }

    pub fn default_configuration(&self) -> Configuration {
        self.parameters
            .iter()
            .map(|p| (p.name.clone(), p.default.clone()))
            .collect()
    }

    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Configuration {
        self.parameters
            .iter()
            .map(|p| (p.name.clone(), p.kind.sample(rng)))
            .collect()
    }

    /// Perturb every parameter of `base`; parameters missing from it are sampled.
    pub fn neighbour<R: Rng + ?Sized>(&self, base: &Configuration, rng: &mut R) -> Configuration {
        self.parameters
            .iter()
            .map(|p| {
                let value = match base.get(&p.name) {
                    Some(v) => p.kind.perturb(v, rng),
                    None => p.kind.sample(rng),
                };
                (p.name.clone(), value)
            })
            .collect()
    }

    /// Whether `config` assigns an admissible value to exactly this space's
    /// parameters.
    pub fn contains(&self, config: &Configuration) -> bool {
        config.len() == self.parameters.len()
            && self
                .parameters
                .iter()
                .all(|p| config.get(&p.name).is_some_and(|v| p.kind.admits(v)))
    }

    /// Every configuration of the space, in parameter order.
    ///
    /// Only call this on spaces whose [`size`](Self::size) is small.
    pub fn grid(&self) -> Vec<Configuration> {
        let mut result: Vec<Configuration> = vec![Configuration::new()];
        for param in &self.parameters {
            let axis: Vec<ParameterValue> = match &param.kind {
                ParameterKind::Integer { low, high } => {
                    (*low..=*high).map(ParameterValue::Int).collect()
                }
                ParameterKind::Ordinal { values } => values.clone(),
            };

            let mut next = Vec::with_capacity(result.len() * axis.len());
            for existing in &result {
                for value in &axis {
                    next.push(existing.clone().with(param.name.clone(), value.clone()));
                }
            }
            result = next;
        }
        result
    }
}

fn required<'a>(entry: &'a Value, key: &str, parameter: &str) -> Result<&'a Value, ConfigError> {
    entry.get(key).ok_or_else(|| ConfigError::MissingKey {
        key: key.to_string(),
        context: format!("parameter {parameter}"),
    })
}

fn value_list<'a>(entry: &'a Value, parameter: &str) -> Result<&'a Vec<Value>, ConfigError> {
    required(entry, "values", parameter)?
        .as_array()
        .ok_or_else(|| ConfigError::InvalidValues {
            parameter: parameter.to_string(),
            message: "'values' must be a list".to_string(),
        })
}

fn integer_parameter(name: &str, entry: &Value) -> Result<Option<ParameterDef>, ConfigError> {
    let bounds = value_list(entry, name)?
        .iter()
        .map(|v| {
            v.as_i64().ok_or_else(|| ConfigError::InvalidValues {
                parameter: name.to_string(),
                message: format!("{v} is not an integer"),
            })
        })
        .collect::<Result<Vec<i64>, _>>()?;

    let (Some(&low), Some(&high)) = (bounds.iter().min(), bounds.iter().max()) else {
        return Err(ConfigError::InvalidValues {
            parameter: name.to_string(),
            message: "no bounds given".to_string(),
        });
    };
    if low == high {
        return Ok(None);
    }

    let default = required(entry, "default", name)?;
    let default = default
        .as_i64()
        .filter(|d| (low..=high).contains(d))
        .ok_or_else(|| ConfigError::InvalidDefault {
            parameter: name.to_string(),
            message: format!("{default} is not an integer in [{low}, {high}]"),
        })?;

    Ok(Some(ParameterDef {
        name: name.to_string(),
        kind: ParameterKind::Integer { low, high },
        default: ParameterValue::Int(default),
    }))
}

fn ordinal_parameter(name: &str, entry: &Value) -> Result<Option<ParameterDef>, ConfigError> {
    let mut values: Vec<ParameterValue> = Vec::new();
    for raw in value_list(entry, name)? {
        let value = ParameterValue::from_json(raw);
        if !values.contains(&value) {
            values.push(value);
        }
    }
    if values.len() < 2 {
        return Ok(None);
    }

    let raw_default = required(entry, "default", name)?;
    let default = ParameterValue::from_json(raw_default);
    if !values.contains(&default) {
        return Err(ConfigError::InvalidDefault {
            parameter: name.to_string(),
            message: format!("{raw_default} is not one of the declared values"),
        });
    }

    Ok(Some(ParameterDef {
        name: name.to_string(),
        kind: ParameterKind::Ordinal { values },
        default,
    }))
}

/// Read a parameter specification file.
///
/// Only JSON syntax is checked here; the content is validated per worker by
/// [`ConfigurationSpace::from_spec`].
pub fn load_parameter_spec(path: &Path) -> StResult<Value> {
    let text = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&text)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;
    use serde_json::json;

    fn sample_spec() -> Value {
        json!({
            "parameters": {
                "workers": {"type": "integer", "values": [1, 8], "default": 2},
                "policy": {"type": "ordinal", "values": ["fifo", "lifo", "random"], "default": "fifo"},
                "fixed": {"type": "integer", "values": [4, 4], "default": 4},
                "lonely": {"type": "ordinal", "values": ["only"], "default": "only"}
            }
        })
    }

    #[test]
    fn builds_valid_parameters_and_drops_degenerate_ones() {
        let space = ConfigurationSpace::from_spec(&sample_spec()).unwrap();
        assert_eq!(space.len(), 2);
        assert!(space.get("fixed").is_none());
        assert!(space.get("lonely").is_none());

        match &space.get("workers").unwrap().kind {
            ParameterKind::Integer { low, high } => assert_eq!((*low, *high), (1, 8)),
            other => panic!("unexpected kind: {other:?}"),
        }
        assert_eq!(space.size(), 8 * 3);
    }

    #[test]
    fn integer_bounds_come_from_min_and_max() {
        let spec = json!({"parameters": {"n": {"type": "integer", "values": [9, 3, 5], "default": 5}}});
        let space = ConfigurationSpace::from_spec(&spec).unwrap();
        assert_eq!(
            space.get("n").unwrap().kind,
            ParameterKind::Integer { low: 3, high: 9 }
        );
    }

    #[test]
    fn equal_integer_bounds_are_omitted_without_default() {
        let spec = json!({"parameters": {"n": {"type": "integer", "values": [3, 3]}}});
        let space = ConfigurationSpace::from_spec(&spec).unwrap();
        assert!(space.is_empty());
    }

    #[test]
    fn single_valued_ordinal_is_omitted() {
        let spec = json!({"parameters": {"p": {"type": "ordinal", "values": [1], "default": 1}}});
        assert!(ConfigurationSpace::from_spec(&spec).unwrap().is_empty());

        let spec = json!({"parameters": {"p": {"type": "ordinal", "values": [2, 2], "default": 2}}});
        assert!(ConfigurationSpace::from_spec(&spec).unwrap().is_empty());
    }

    #[test]
    fn unsupported_kind_is_fatal() {
        let mut spec = sample_spec();
        spec["parameters"]["rate"] = json!({"type": "float", "values": [0.1, 0.9], "default": 0.5});

        let err = ConfigurationSpace::from_spec(&spec).unwrap_err();
        assert_eq!(
            err,
            ConfigError::UnsupportedKind {
                parameter: "rate".to_string(),
                kind: "float".to_string()
            }
        );
    }

    #[test]
    fn missing_keys_are_distinguishable() {
        let spec = json!({"parameters": {"n": {"type": "integer", "default": 1}}});
        assert!(matches!(
            ConfigurationSpace::from_spec(&spec),
            Err(ConfigError::MissingKey { ref key, .. }) if key == "values"
        ));

        let spec = json!({"parameters": {"n": {"values": [1, 2], "default": 1}}});
        assert!(matches!(
            ConfigurationSpace::from_spec(&spec),
            Err(ConfigError::MissingKey { ref key, .. }) if key == "type"
        ));

        let spec = json!({"params": {}});
        assert!(matches!(
            ConfigurationSpace::from_spec(&spec),
            Err(ConfigError::MissingKey { ref key, .. }) if key == "parameters"
        ));
    }

    #[test]
    fn default_must_be_admissible() {
        let spec = json!({"parameters": {"n": {"type": "integer", "values": [1, 4], "default": 9}}});
        assert!(matches!(
            ConfigurationSpace::from_spec(&spec),
            Err(ConfigError::InvalidDefault { .. })
        ));

        let spec = json!({"parameters": {"p": {"type": "ordinal", "values": ["a", "b"], "default": "c"}}});
        assert!(matches!(
            ConfigurationSpace::from_spec(&spec),
            Err(ConfigError::InvalidDefault { .. })
        ));
    }

    #[test]
    fn default_configuration_uses_declared_defaults() {
        let space = ConfigurationSpace::from_spec(&sample_spec()).unwrap();
        let default = space.default_configuration();
        assert_eq!(default.get("workers"), Some(&ParameterValue::Int(2)));
        assert_eq!(default.get("policy"), Some(&ParameterValue::Json(json!("fifo"))));
        assert!(space.contains(&default));
    }

    #[test]
    fn samples_and_neighbours_stay_in_space() {
        let space = ConfigurationSpace::from_spec(&sample_spec()).unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(7);

        for _ in 0..200 {
            let sample = space.sample(&mut rng);
            assert!(space.contains(&sample));
            let near = space.neighbour(&sample, &mut rng);
            assert!(space.contains(&near));
        }
    }

    #[test]
    fn sampling_is_deterministic_per_seed() {
        let space = ConfigurationSpace::from_spec(&sample_spec()).unwrap();
        let draw = |seed| {
            let mut rng = ChaCha8Rng::seed_from_u64(seed);
            (0..10).map(|_| space.sample(&mut rng)).collect::<Vec<_>>()
        };
        assert_eq!(draw(3), draw(3));
    }

    #[test]
    fn contains_rejects_foreign_configurations() {
        let space = ConfigurationSpace::new().add_int("n", 1, 3, 1);
        assert!(!space.contains(&Configuration::new().with("n", ParameterValue::Int(4))));
        assert!(!space.contains(
            &Configuration::new()
                .with("n", ParameterValue::Int(2))
                .with("m", ParameterValue::Int(2))
        ));
        assert!(space.contains(&Configuration::new().with("n", ParameterValue::Int(2))));
    }

    #[test]
    fn grid_enumerates_every_configuration() {
        let space = ConfigurationSpace::new().add_int("a", 1, 3, 1).add_ordinal(
            "b",
            vec![ParameterValue::Int(10), ParameterValue::Int(20)],
            ParameterValue::Int(10),
        );
        let grid = space.grid();
        assert_eq!(grid.len() as u128, space.size());
        assert!(grid.iter().all(|c| space.contains(c)));
    }

    #[test]
    fn load_rejects_invalid_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("param_spec.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert!(matches!(
            load_parameter_spec(&path),
            Err(st_types::StError::Serialization(_))
        ));

        std::fs::write(&path, sample_spec().to_string()).unwrap();
        assert_eq!(load_parameter_spec(&path).unwrap(), sample_spec());
    }
}
