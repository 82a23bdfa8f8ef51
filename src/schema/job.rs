//! Job files: dataset arguments plus classifier and projection configurations.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::{Configuration, MutationConfig, SearchConfig};

/// A batch or tuning job as stored in a `.json` job file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobConfig {
    /// Dataset selection, preprocessing and tuning settings.
    pub data: DataArgs,
    /// Classifier configurations (may contain meta descriptors and tuning specs).
    #[serde(default)]
    pub classifiers: Vec<Configuration>,
    /// Projection configurations (may contain meta descriptors).
    #[serde(default)]
    pub projections: Vec<Configuration>,
}

impl JobConfig {
    /// Load a job from a JSON file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, JobError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| JobError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let job: JobConfig = serde_json::from_str(&text)?;
        job.validate()?;
        Ok(job)
    }

    /// Validate the job.
    pub fn validate(&self) -> Result<(), JobError> {
        self.data.validate()
    }

    /// Search settings derived from the `tuning_*` data arguments.
    pub fn search_config(&self, random_seed: Option<u64>) -> SearchConfig {
        SearchConfig {
            rounds: self.data.tuning_rounds,
            population: self.data.tuning_population,
            offspring: self.data.tuning_offspring,
            mutation: MutationConfig::default(),
            random_seed,
        }
    }
}

/// The `data` section of a job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataArgs {
    /// Job title used in reports.
    pub title: String,
    /// Name of the dataset plugin.
    pub dataset: String,
    /// Seed for the train/test split.
    #[serde(default)]
    pub random_state: u64,
    /// Fraction of samples moved to the test set when the dataset has none.
    #[serde(default)]
    pub test_size: f64,
    /// Standardize features to zero mean and unit variance.
    #[serde(default)]
    pub scale: bool,
    /// Fraction of the training set to keep.
    #[serde(default = "default_subset")]
    pub subset_train: f64,
    /// Fraction of the test set to keep.
    #[serde(default = "default_subset")]
    pub subset_test: f64,
    /// Ignore the dataset's cross-validation folds.
    #[serde(default)]
    pub disable_cross_validation: bool,
    /// Persist a result for every cross-validation fold.
    #[serde(default)]
    pub save_clfs_for_folds: bool,
    /// Number of tuning rounds.
    #[serde(default = "default_tuning_rounds")]
    pub tuning_rounds: usize,
    /// Population kept after each round.
    #[serde(default = "default_tuning_population")]
    pub tuning_population: usize,
    /// Offspring per population member, the member itself included.
    #[serde(default = "default_tuning_offspring")]
    pub tuning_offspring: usize,
    /// Plugin-specific arguments (e.g. `path` for `json_file`).
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn default_subset() -> f64 {
    1.0
}
fn default_tuning_rounds() -> usize {
    10
}
fn default_tuning_population() -> usize {
    10
}
fn default_tuning_offspring() -> usize {
    5
}

impl DataArgs {
    /// Minimal arguments for a dataset plugin.
    pub fn new(title: impl Into<String>, dataset: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            dataset: dataset.into(),
            random_state: 0,
            test_size: 0.0,
            scale: false,
            subset_train: default_subset(),
            subset_test: default_subset(),
            disable_cross_validation: false,
            save_clfs_for_folds: false,
            tuning_rounds: default_tuning_rounds(),
            tuning_population: default_tuning_population(),
            tuning_offspring: default_tuning_offspring(),
            extra: Map::new(),
        }
    }

    /// Plugin argument lookup.
    pub fn extra_str(&self, key: &str) -> Option<&str> {
        self.extra.get(key).and_then(Value::as_str)
    }

    /// Arguments that influence the prepared data, used for the dataset
    /// fingerprint. Title and tuning settings are left out.
    pub fn fingerprint_input(&self) -> Map<String, Value> {
        let mut map = self.extra.clone();
        map.insert("dataset".into(), Value::from(self.dataset.clone()));
        map.insert("random_state".into(), Value::from(self.random_state));
        map.insert("test_size".into(), Value::from(self.test_size));
        map.insert("scale".into(), Value::from(self.scale));
        map.insert("subset_train".into(), Value::from(self.subset_train));
        map.insert("subset_test".into(), Value::from(self.subset_test));
        map.insert(
            "disable_cross_validation".into(),
            Value::from(self.disable_cross_validation),
        );
        map
    }

    /// Validate ranges.
    pub fn validate(&self) -> Result<(), JobError> {
        let check_fraction = |value: f64, name: &str| {
            if (0.0..=1.0).contains(&value) {
                Ok(())
            } else {
                Err(JobError::InvalidArgument(format!(
                    "{name} must be in [0, 1], got {value}"
                )))
            }
        };

        check_fraction(self.test_size, "test_size")?;
        check_fraction(self.subset_train, "subset_train")?;
        check_fraction(self.subset_test, "subset_test")?;

        if self.tuning_population == 0 {
            return Err(JobError::InvalidArgument(
                "tuning_population must be at least 1".to_string(),
            ));
        }
        if self.tuning_offspring == 0 {
            return Err(JobError::InvalidArgument(
                "tuning_offspring must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Job loading errors.
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("Cannot read job file {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("Cannot parse job file: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("Invalid job argument: {0}")]
    InvalidArgument(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn job_json() -> Value {
        json!({
            "data": {
                "title": "Iris tuning",
                "dataset": "json_file",
                "path": "iris.json",
                "tuning_rounds": 3,
                "tuning_population": 4,
                "tuning_offspring": 2
            },
            "classifiers": [
                {"title": "naive", "method": "naive"}
            ]
        })
    }

    #[test]
    fn test_parse_job_with_defaults() {
        let job: JobConfig = serde_json::from_value(job_json()).unwrap();
        assert_eq!(job.data.subset_train, 1.0);
        assert_eq!(job.data.tuning_rounds, 3);
        assert_eq!(job.data.extra_str("path"), Some("iris.json"));
        assert_eq!(job.classifiers.len(), 1);
        assert!(job.projections.is_empty());
        assert!(job.validate().is_ok());
    }

    #[test]
    fn test_search_config_from_job() {
        let job: JobConfig = serde_json::from_value(job_json()).unwrap();
        let search = job.search_config(Some(7));
        assert_eq!(search.rounds, 3);
        assert_eq!(search.population, 4);
        assert_eq!(search.offspring, 2);
        assert_eq!(search.random_seed, Some(7));
    }

    #[test]
    fn test_fingerprint_input_ignores_title_and_tuning() {
        let mut a = DataArgs::new("first", "json_file");
        let mut b = DataArgs::new("second", "json_file");
        b.tuning_rounds = 99;
        assert_eq!(a.fingerprint_input(), b.fingerprint_input());

        a.scale = true;
        assert_ne!(a.fingerprint_input(), b.fingerprint_input());
    }

    #[test]
    fn test_validate_ranges() {
        let mut args = DataArgs::new("t", "d");
        args.test_size = 1.5;
        assert!(matches!(args.validate(), Err(JobError::InvalidArgument(_))));

        let mut args = DataArgs::new("t", "d");
        args.tuning_offspring = 0;
        assert!(args.validate().is_err());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("job.json");
        std::fs::write(&path, job_json().to_string()).unwrap();

        let job = JobConfig::load(&path).unwrap();
        assert_eq!(job.data.title, "Iris tuning");

        assert!(matches!(
            JobConfig::load(dir.path().join("missing.json")),
            Err(JobError::Read { .. })
        ));
    }
}
