//! Meta descriptors and tuning specifications.
//!
//! Both live inside configuration values as tagged JSON objects:
//!
//! ```json
//! {
//!     "title": "knn k={n_neighbors} w={weights}",
//!     "method": "k_neighbors",
//!     "weights": { "is_meta": true, "values": ["uniform", "distance"] },
//!     "n_neighbors": { "tune": true, "type": "int", "initial": 5,
//!                      "min": 1, "max": 50, "sigma": 3 }
//! }
//! ```
//!
//! Meta descriptors are resolved by the expander before a job runs.
//! Tuning specifications survive expansion and drive mutation in the
//! search loop.

use serde::{Deserialize, Serialize};
use serde_json::{Number, Value};

use super::{ConfigError, Configuration};

/// Tag key marking a meta descriptor.
pub const META_TAG: &str = "is_meta";

/// Tag key marking a tuning specification.
pub const TUNE_TAG: &str = "tune";

/// Check whether a parameter value is a meta descriptor.
pub fn is_meta(value: &Value) -> bool {
    value.as_object().is_some_and(|o| o.contains_key(META_TAG))
}

/// Check whether a parameter value is a tuning specification.
pub fn is_tunable(value: &Value) -> bool {
    value.as_object().is_some_and(|o| o.contains_key(TUNE_TAG))
}

/// Step rule for stepped meta ranges.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StepRule {
    /// `current += value`
    Add { value: Number },
    /// `current *= value`
    Multiply { value: Number },
}

impl StepRule {
    fn number(&self) -> &Number {
        match self {
            StepRule::Add { value } | StepRule::Multiply { value } => value,
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawMeta {
    #[serde(default)]
    values: Option<Vec<Value>>,
    #[serde(default)]
    min: Option<Number>,
    #[serde(default)]
    max: Option<Number>,
    #[serde(default)]
    step: Option<StepRule>,
}

/// A rule for generating several concrete values of one parameter.
#[derive(Debug, Clone, PartialEq)]
pub enum MetaDescriptor {
    /// Explicit list of values.
    Values(Vec<Value>),
    /// `min`, `max` and a step rule; integral when all three are integers.
    Range {
        min: f64,
        max: f64,
        step: StepRule,
        integral: bool,
    },
}

impl MetaDescriptor {
    /// Parse the descriptor stored under `key`.
    pub fn parse(key: &str, value: &Value) -> Result<Self, ConfigError> {
        let malformed = |reason: String| ConfigError::MalformedMeta {
            key: key.to_string(),
            reason,
        };

        let raw: RawMeta =
            serde_json::from_value(value.clone()).map_err(|e| malformed(e.to_string()))?;

        if let Some(values) = raw.values {
            return Ok(Self::Values(values));
        }

        let (Some(min), Some(max), Some(step)) = (raw.min, raw.max, raw.step) else {
            return Err(malformed(
                "expected either \"values\" or \"min\", \"max\" and \"step\"".to_string(),
            ));
        };

        let integral = min.is_i64() && max.is_i64() && step.number().is_i64();
        let as_f64 = |n: &Number, name: &str| {
            n.as_f64()
                .ok_or_else(|| malformed(format!("\"{name}\" is not a finite number")))
        };
        let min_f = as_f64(&min, "min")?;
        let max_f = as_f64(&max, "max")?;
        let delta = as_f64(step.number(), "step.value")?;

        // Reject rules that would never reach max
        match step {
            StepRule::Add { .. } if delta <= 0.0 => {
                return Err(malformed(format!("add step must be positive, got {delta}")));
            }
            StepRule::Multiply { .. } if delta <= 1.0 => {
                return Err(malformed(format!(
                    "multiply step must be greater than 1, got {delta}"
                )));
            }
            StepRule::Multiply { .. } if min_f <= 0.0 && min_f <= max_f => {
                return Err(malformed(format!(
                    "multiply step needs a positive min, got {min_f}"
                )));
            }
            _ => {}
        }

        Ok(Self::Range {
            min: min_f,
            max: max_f,
            step,
            integral,
        })
    }

    /// Generate the concrete values in order.
    pub fn values(&self) -> Vec<Value> {
        match self {
            MetaDescriptor::Values(values) => values.clone(),
            MetaDescriptor::Range {
                min,
                max,
                step,
                integral,
            } => {
                let delta = step.number().as_f64().unwrap_or(1.0);
                let mut out = Vec::new();
                let mut current = *min;
                while current <= *max {
                    out.push(if *integral {
                        Value::from(current as i64)
                    } else {
                        Value::from(current)
                    });
                    current = match step {
                        StepRule::Add { .. } => current + delta,
                        StepRule::Multiply { .. } => current * delta,
                    };
                }
                out
            }
        }
    }
}

/// Numeric search range of a tunable parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NumericRange {
    pub min: f64,
    pub max: f64,
    /// Standard deviation of the local (normal) mutation.
    pub sigma: f64,
    /// Round mutated values to the nearest integer.
    pub integral: bool,
}

/// How a tunable parameter may vary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TuningKind {
    Numeric(NumericRange),
    Categorical(Vec<Value>),
}

/// Tuning specification of one parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TuningSpec {
    /// Value used when seeding the population.
    pub initial: Value,
    pub kind: TuningKind,
}

#[derive(Debug, Deserialize)]
struct RawTuning {
    #[serde(rename = "type")]
    kind: String,
    initial: Value,
    #[serde(default)]
    min: Option<f64>,
    #[serde(default)]
    max: Option<f64>,
    #[serde(default)]
    sigma: Option<f64>,
    #[serde(default)]
    values: Option<Vec<Value>>,
}

impl TuningSpec {
    /// Parse the tuning specification stored under `key`.
    pub fn parse(key: &str, value: &Value) -> Result<Self, ConfigError> {
        let malformed = |reason: String| ConfigError::MalformedTuning {
            key: key.to_string(),
            reason,
        };

        let raw: RawTuning =
            serde_json::from_value(value.clone()).map_err(|e| malformed(e.to_string()))?;

        let kind = match raw.kind.as_str() {
            "categorical" => {
                let values = raw
                    .values
                    .filter(|v| !v.is_empty())
                    .ok_or_else(|| malformed("categorical needs non-empty \"values\"".into()))?;
                TuningKind::Categorical(values)
            }
            "int" | "integer" | "float" => {
                let field = |v: Option<f64>, name: &str| {
                    v.ok_or_else(|| malformed(format!("numeric tuning needs \"{name}\"")))
                };
                let min = field(raw.min, "min")?;
                let max = field(raw.max, "max")?;
                let sigma = field(raw.sigma, "sigma")?;
                if min > max {
                    return Err(malformed(format!("min ({min}) > max ({max})")));
                }
                if !sigma.is_finite() || sigma < 0.0 {
                    return Err(malformed(format!("sigma must be non-negative, got {sigma}")));
                }
                TuningKind::Numeric(NumericRange {
                    min,
                    max,
                    sigma,
                    integral: raw.kind != "float",
                })
            }
            other => return Err(malformed(format!("unknown type \"{other}\""))),
        };

        Ok(Self {
            initial: raw.initial,
            kind,
        })
    }
}

/// A configuration whose tunable parameters drive the search loop.
#[derive(Debug, Clone, PartialEq)]
pub struct TuningTemplate {
    template: Configuration,
    specs: Vec<(String, TuningSpec)>,
}

impl TuningTemplate {
    /// Collect the tuning specifications of a concrete configuration.
    pub fn parse(template: Configuration) -> Result<Self, ConfigError> {
        let mut specs = Vec::new();
        for (key, value) in template.iter() {
            if is_meta(value) {
                return Err(ConfigError::MalformedMeta {
                    key: key.clone(),
                    reason: "meta descriptors must be expanded before tuning".to_string(),
                });
            }
            if is_tunable(value) {
                specs.push((key.clone(), TuningSpec::parse(key, value)?));
            }
        }
        Ok(Self { template, specs })
    }

    /// The original configuration, tuning specifications included.
    pub fn template(&self) -> &Configuration {
        &self.template
    }

    /// Tunable parameters in declared order.
    pub fn specs(&self) -> &[(String, TuningSpec)] {
        &self.specs
    }

    /// Configuration using every parameter's initial value.
    pub fn initial_configuration(&self) -> Configuration {
        self.specs
            .iter()
            .fold(self.template.clone(), |config, (key, spec)| {
                config.with_param(key, spec.initial.clone())
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_meta_values() {
        let meta = MetaDescriptor::parse("lr", &json!({"is_meta": true, "values": [0.1, 0.01]}))
            .unwrap();
        assert_eq!(meta.values(), vec![json!(0.1), json!(0.01)]);
    }

    #[test]
    fn test_meta_integral_range() {
        let meta = MetaDescriptor::parse(
            "k",
            &json!({"is_meta": true, "min": 1, "max": 3, "step": {"type": "add", "value": 1}}),
        )
        .unwrap();
        assert_eq!(meta.values(), vec![json!(1), json!(2), json!(3)]);
    }

    #[test]
    fn test_meta_multiply_range() {
        let meta = MetaDescriptor::parse(
            "c",
            &json!({"is_meta": true, "min": 0.5, "max": 4.0, "step": {"type": "multiply", "value": 2}}),
        )
        .unwrap();
        assert_eq!(meta.values(), vec![json!(0.5), json!(1.0), json!(2.0), json!(4.0)]);
    }

    #[test]
    fn test_meta_rejects_stalled_steps() {
        let zero_add =
            json!({"is_meta": true, "min": 1, "max": 3, "step": {"type": "add", "value": 0}});
        let unit_mul =
            json!({"is_meta": true, "min": 1, "max": 3, "step": {"type": "multiply", "value": 1}});
        let zero_min =
            json!({"is_meta": true, "min": 0, "max": 3, "step": {"type": "multiply", "value": 2}});
        for value in [zero_add, unit_mul, zero_min] {
            assert!(matches!(
                MetaDescriptor::parse("x", &value),
                Err(ConfigError::MalformedMeta { .. })
            ));
        }
    }

    #[test]
    fn test_meta_missing_fields() {
        let result = MetaDescriptor::parse("x", &json!({"is_meta": true, "min": 1}));
        assert!(matches!(result, Err(ConfigError::MalformedMeta { .. })));
    }

    #[test]
    fn test_tuning_numeric() {
        let spec = TuningSpec::parse(
            "n",
            &json!({"tune": true, "type": "int", "initial": 5, "min": 1, "max": 10, "sigma": 2}),
        )
        .unwrap();
        assert_eq!(spec.initial, json!(5));
        match spec.kind {
            TuningKind::Numeric(range) => {
                assert!(range.integral);
                assert_eq!(range.min, 1.0);
                assert_eq!(range.max, 10.0);
                assert_eq!(range.sigma, 2.0);
            }
            other => panic!("unexpected kind {other:?}"),
        }
    }

    #[test]
    fn test_tuning_rejects_bad_specs() {
        let inverted =
            json!({"tune": true, "type": "float", "initial": 1, "min": 5, "max": 1, "sigma": 1});
        let no_sigma = json!({"tune": true, "type": "float", "initial": 1, "min": 0, "max": 1});
        let no_values = json!({"tune": true, "type": "categorical", "initial": "a"});
        let unknown = json!({"tune": true, "type": "complex", "initial": 1});
        for value in [inverted, no_sigma, no_values, unknown] {
            assert!(matches!(
                TuningSpec::parse("p", &value),
                Err(ConfigError::MalformedTuning { .. })
            ));
        }
    }

    #[test]
    fn test_template_initial_configuration() {
        let config = Configuration::from_value(json!({
            "title": "svm C={C} kernel={kernel}",
            "method": "svm",
            "C": {"tune": true, "type": "float", "initial": 1.0, "min": 0.1, "max": 10, "sigma": 1},
            "kernel": {"tune": true, "type": "categorical", "initial": "rbf", "values": ["rbf", "linear"]},
            "max_iter": 100
        }))
        .unwrap();

        let template = TuningTemplate::parse(config).unwrap();
        assert_eq!(template.specs().len(), 2);

        let initial = template.initial_configuration();
        assert_eq!(initial.title(), Some("svm C=1.0 kernel=rbf"));
        assert_eq!(initial.get("C"), Some(&json!(1.0)));
        assert_eq!(initial.get("max_iter"), Some(&json!(100)));
    }

    #[test]
    fn test_template_rejects_unexpanded_meta() {
        let config = Configuration::from_value(json!({
            "k": {"is_meta": true, "values": [1, 2]}
        }))
        .unwrap();
        assert!(TuningTemplate::parse(config).is_err());
    }
}
