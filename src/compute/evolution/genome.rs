//! Mutation of tunable configurations.
//!
//! Provides the numeric and categorical draws and the construction of
//! offspring from a tuning template.

use rand::prelude::*;
use serde_json::Value;

use crate::schema::{
    ConfigError, Configuration, MutationConfig, NumericRange, TuningKind, TuningTemplate,
};

/// Random number generator wrapper for mutation.
pub struct MutationRng {
    rng: StdRng,
}

impl MutationRng {
    /// Create from seed.
    pub fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Draw a new numeric value.
    ///
    /// With probability `uniform_rate` the value is uniform in
    /// `[min, max]`, otherwise normal around `current` with the range's
    /// sigma and clipped into `[min, max]`. Integral ranges round the result.
    pub fn choose_numerical(&mut self, range: &NumericRange, current: f64, uniform_rate: f64) -> f64 {
        let value = if self.rng.r#gen::<f64>() < uniform_rate {
            self.rng.gen_range(range.min..=range.max)
        } else {
            let noise: f64 = self.rng.sample(rand_distr::StandardNormal);
            (current + noise * range.sigma).clamp(range.min, range.max)
        };

        if range.integral { value.round() } else { value }
    }

    /// Pick one of the declared values uniformly.
    pub fn choose_categorical<'a>(&mut self, values: &'a [Value]) -> Option<&'a Value> {
        values.choose(&mut self.rng)
    }

    /// Build a variant of `parent` from its tuning template.
    ///
    /// Non-tunable parameters and the title come from the template; every
    /// tunable parameter keeps the parent's value with probability
    /// `keep_rate` and is redrawn otherwise.
    pub fn create_variation(
        &mut self,
        parent: &Configuration,
        template: &TuningTemplate,
        mutation: &MutationConfig,
    ) -> Result<Configuration, ConfigError> {
        let mut variant = template.template().clone();

        for (key, spec) in template.specs() {
            let current = parent
                .get(key)
                .ok_or_else(|| ConfigError::MissingParameter(key.clone()))?;

            let value = if self.rng.r#gen::<f64>() < mutation.keep_rate {
                current.clone()
            } else {
                match &spec.kind {
                    TuningKind::Categorical(values) => self
                        .choose_categorical(values)
                        .cloned()
                        .ok_or_else(|| ConfigError::MalformedTuning {
                            key: key.clone(),
                            reason: "no values to choose from".to_string(),
                        })?,
                    TuningKind::Numeric(range) => {
                        let current = current.as_f64().ok_or_else(|| {
                            ConfigError::InvalidParameter {
                                name: key.clone(),
                                reason: format!("expected a number, got {current}"),
                            }
                        })?;
                        numeric_value(
                            self.choose_numerical(range, current, mutation.uniform_rate),
                            range.integral,
                        )
                    }
                }
            };

            variant = variant.with_param(key, value);
        }

        Ok(variant)
    }
}

/// JSON form of a drawn number; integral values are stored as integers.
fn numeric_value(value: f64, integral: bool) -> Value {
    if integral {
        Value::from(value as i64)
    } else {
        Value::from(value)
    }
}
