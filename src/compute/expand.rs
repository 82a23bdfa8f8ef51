//! Meta-configuration expansion.
//!
//! A configuration may hold meta descriptors (see [`MetaDescriptor`]). The
//! expander produces the Cartesian product of all their values, one
//! concrete configuration per combination. The first meta key in declared
//! order is expanded at each level and the rest are handled by recursion,
//! so output order is depth-first in declared key order.

use log::{error, info};

use crate::schema::{ConfigError, Configuration, JobConfig, MetaDescriptor, is_meta};

/// Expand every meta descriptor of `config`.
///
/// A configuration without meta descriptors expands to itself. Tuning
/// specifications are left untouched.
pub fn expand(config: &Configuration) -> Result<Vec<Configuration>, ConfigError> {
    let mut out = Vec::new();
    expand_into(config, &mut out)?;
    Ok(out)
}

fn expand_into(config: &Configuration, out: &mut Vec<Configuration>) -> Result<(), ConfigError> {
    let Some((key, value)) = config.iter().find(|(_, v)| is_meta(v)) else {
        out.push(config.clone());
        return Ok(());
    };

    let descriptor = MetaDescriptor::parse(key, value)?;
    for value in descriptor.values() {
        expand_into(&config.with_param(key, value), out)?;
    }
    Ok(())
}

/// A configuration that could not be expanded.
#[derive(Debug, thiserror::Error)]
#[error("Error while expanding {kind} with title {title}: {error}")]
pub struct ExpansionFailure {
    /// `classifier` or `projection`.
    pub kind: &'static str,
    pub title: String,
    #[source]
    pub error: ConfigError,
}

/// A job whose configurations are all concrete.
#[derive(Debug)]
pub struct CompiledJob {
    pub job: JobConfig,
    /// Configurations skipped outside strict mode.
    pub failures: Vec<ExpansionFailure>,
}

/// Expand the classifiers and projections of a job.
///
/// In strict mode the first failure is returned as the error. Otherwise
/// failing configurations are logged, skipped and collected.
pub fn compile_job(
    job: &JobConfig,
    strict: bool,
) -> Result<CompiledJob, ExpansionFailure> {
    let mut failures = Vec::new();

    let projections = expand_all(&job.projections, "projection", strict, &mut failures)?;
    let classifiers = expand_all(&job.classifiers, "classifier", strict, &mut failures)?;

    Ok(CompiledJob {
        job: JobConfig {
            data: job.data.clone(),
            classifiers,
            projections,
        },
        failures,
    })
}

fn expand_all(
    configs: &[Configuration],
    kind: &'static str,
    strict: bool,
    failures: &mut Vec<ExpansionFailure>,
) -> Result<Vec<Configuration>, ExpansionFailure> {
    let mut expanded = Vec::new();
    for config in configs {
        match expand(config) {
            Ok(mut concrete) => expanded.append(&mut concrete),
            Err(error) => {
                let failure = ExpansionFailure {
                    kind,
                    title: config.label(),
                    error,
                };
                error!("{failure}");
                if strict {
                    return Err(failure);
                }
                failures.push(failure);
            }
        }
    }
    info!(
        "Expanded {} meta {kind} configurations, got {}",
        configs.len(),
        expanded.len()
    );
    Ok(expanded)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::DataArgs;
    use serde_json::{Value, json};

    fn config(value: Value) -> Configuration {
        Configuration::from_value(value).unwrap()
    }

    #[test]
    fn test_values_list() {
        let base = config(json!({
            "title": "run-{lr}",
            "lr": {"is_meta": true, "values": [0.1, 0.01]}
        }));
        let out = expand(&base).unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].title(), Some("run-0.1"));
        assert_eq!(out[0].get("lr"), Some(&json!(0.1)));
        assert_eq!(out[1].title(), Some("run-0.01"));
        assert_eq!(out[1].get("lr"), Some(&json!(0.01)));
    }

    #[test]
    fn test_stepped_range() {
        let base = config(json!({
            "title": "k={k}",
            "k": {"is_meta": true, "min": 1, "max": 3, "step": {"type": "add", "value": 1}}
        }));
        let out = expand(&base).unwrap();
        let titles: Vec<_> = out.iter().filter_map(Configuration::title).collect();
        assert_eq!(titles, vec!["k=1", "k=2", "k=3"]);
        assert_eq!(out[2].get("k"), Some(&json!(3)));
    }

    #[test]
    fn test_cartesian_product_depth_first() {
        let base = config(json!({
            "title": "{a}-{b}",
            "a": {"is_meta": true, "values": ["x", "y"]},
            "fixed": 7,
            "b": {"is_meta": true, "values": [1, 2, 3]}
        }));
        let out = expand(&base).unwrap();
        let titles: Vec<_> = out.iter().filter_map(Configuration::title).collect();
        assert_eq!(titles, vec!["x-1", "x-2", "x-3", "y-1", "y-2", "y-3"]);
        assert!(out.iter().all(|c| c.get("fixed") == Some(&json!(7))));
    }

    #[test]
    fn test_no_meta_and_tuning_untouched() {
        let tune = json!({"tune": true, "type": "int", "initial": 1, "min": 1, "max": 5, "sigma": 1});
        let base = config(json!({"title": "plain", "n": tune.clone()}));
        let out = expand(&base).unwrap();
        assert_eq!(out, vec![base]);
        assert_eq!(out[0].get("n"), Some(&tune));
    }

    #[test]
    fn test_empty_values_list() {
        let base = config(json!({"a": {"is_meta": true, "values": []}}));
        assert!(expand(&base).unwrap().is_empty());
    }

    #[test]
    fn test_malformed_meta() {
        let base = config(json!({"a": {"is_meta": true, "min": 1, "max": 5,
            "step": {"type": "add", "value": 0}}}));
        assert!(matches!(expand(&base), Err(ConfigError::MalformedMeta { .. })));
    }

    fn job() -> JobConfig {
        JobConfig {
            data: DataArgs::new("job", "json_file"),
            classifiers: vec![
                config(json!({"title": "bad", "a": {"is_meta": true}})),
                config(json!({"title": "good {a}", "a": {"is_meta": true, "values": [1, 2]}})),
            ],
            projections: vec![config(json!({"title": "proj"}))],
        }
    }

    #[test]
    fn test_compile_job_collects_failures() {
        let compiled = compile_job(&job(), false).unwrap();
        assert_eq!(compiled.job.classifiers.len(), 2);
        assert_eq!(compiled.job.projections.len(), 1);
        assert_eq!(compiled.failures.len(), 1);
        assert_eq!(compiled.failures[0].title, "bad");
        assert_eq!(compiled.failures[0].kind, "classifier");
    }

    #[test]
    fn test_compile_job_strict() {
        let failure = compile_job(&job(), true).unwrap_err();
        assert_eq!(failure.title, "bad");
        assert!(failure.to_string().contains("bad"));
    }
}
