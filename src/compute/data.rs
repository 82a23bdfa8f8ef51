//! Dataset loading and preprocessing.
//!
//! A dataset plugin supplies a raw [`DataBundle`]. Preparation then applies,
//! in order:
//!
//! 1. a stratified, seeded train/test split when the plugin supplies no
//!    test set and `test_size` is in `(0, 1)`,
//! 2. standard scaling fitted on the training set (`scale`),
//! 3. truncation to `subset_train` / `subset_test` of each partition,
//! 4. spec enrichment and cross-validation checks.
//!
//! The prepared bundle is cached under the dataset fingerprint.

use std::collections::{BTreeMap, HashMap};
use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;

use log::{debug, info, warn};
use rand::prelude::*;

use super::fingerprint::{FingerprintError, data_fingerprint};
use super::folds::{FoldMode, FoldPlan};
use crate::schema::{ConfigError, DataArgs, DataBundle, JobError, Sample};
use crate::store::{CacheError, ResultCache, args_key};

/// Dataset loading and preparation errors.
#[derive(Debug, thiserror::Error)]
pub enum DataError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    InvalidArgument(#[from] JobError),
    #[error("Dataset plugin {dataset} needs the \"{name}\" argument")]
    MissingArgument { dataset: String, name: &'static str },
    #[error("Cannot read dataset {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Cannot parse dataset {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("{partition} set has {samples} samples but {labels} labels")]
    LabelCountMismatch {
        partition: &'static str,
        samples: usize,
        labels: usize,
    },
    #[error(transparent)]
    Cache(#[from] CacheError),
    #[error(transparent)]
    Fingerprint(#[from] FingerprintError),
}

/// Source of raw datasets.
pub trait DatasetProvider {
    /// Load the raw bundle described by `args`.
    fn load(&self, args: &DataArgs) -> Result<DataBundle, DataError>;
}

/// Reads a [`DataBundle`] serialized as JSON from the `path` argument.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonFileDataset;

impl DatasetProvider for JsonFileDataset {
    fn load(&self, args: &DataArgs) -> Result<DataBundle, DataError> {
        let path = args
            .extra_str("path")
            .map(PathBuf::from)
            .ok_or_else(|| DataError::MissingArgument {
                dataset: args.dataset.clone(),
                name: "path",
            })?;

        let file = File::open(&path).map_err(|source| DataError::Read {
            path: path.clone(),
            source,
        })?;
        serde_json::from_reader(BufReader::new(file)).map_err(|source| DataError::Parse { path, source })
    }
}

/// Dataset plugins by name.
pub struct DatasetRegistry {
    providers: HashMap<String, Box<dyn DatasetProvider>>,
}

impl DatasetRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self {
            providers: HashMap::new(),
        }
    }

    /// Registry with the `json_file` loader.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register("json_file", JsonFileDataset);
        registry
    }

    /// Register a provider, replacing any previous one with the same name.
    pub fn register<P: DatasetProvider + 'static>(&mut self, name: impl Into<String>, provider: P) -> &mut Self {
        self.providers.insert(name.into(), Box::new(provider));
        self
    }

    /// Look up a provider.
    pub fn get(&self, name: &str) -> Result<&dyn DatasetProvider, ConfigError> {
        self.providers
            .get(name)
            .map(|p| p.as_ref())
            .ok_or_else(|| ConfigError::UnknownPlugin {
                kind: "dataset",
                name: name.to_string(),
            })
    }
}

impl Default for DatasetRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

/// A dataset ready for evaluation.
#[derive(Debug, Clone)]
pub struct PreparedData {
    pub bundle: DataBundle,
    /// Dataset fingerprint, `data_` prefixed.
    pub fingerprint: String,
    pub args: DataArgs,
}

impl PreparedData {
    /// Cross-validation applies when the dataset has folds and they were not
    /// disabled.
    pub fn cross_validation(&self) -> bool {
        self.bundle.specs.cv_folds.is_some() && !self.args.disable_cross_validation
    }
}

/// Load and preprocess a dataset.
///
/// With a cache, a previously prepared bundle with the same fingerprint is
/// reused. New bundles and the `_args` sidecar are only written when
/// `write_to_cache` is set.
pub fn prepare(
    args: &DataArgs,
    registry: &DatasetRegistry,
    cache: Option<&ResultCache>,
    write_to_cache: bool,
) -> Result<PreparedData, DataError> {
    args.validate()?;
    let fingerprint = data_fingerprint(args)?;
    info!("Dataset: {} ({fingerprint})", args.dataset);

    if let Some(cache) = cache
        && cache.exists(&fingerprint)
    {
        let bundle: DataBundle = cache.read_object(&fingerprint)?;
        log_stats(&bundle);
        return Ok(PreparedData {
            bundle,
            fingerprint,
            args: args.clone(),
        });
    }

    let raw = registry.get(&args.dataset)?.load(args)?;
    let bundle = preprocess(raw, args)?;

    if let Some(cache) = cache
        && write_to_cache
    {
        cache.write_object(&fingerprint, &bundle)?;
        cache.write_text(&args_key(&fingerprint), args)?;
    }

    Ok(PreparedData {
        bundle,
        fingerprint,
        args: args.clone(),
    })
}

/// Apply split, scaling, sub-sampling and spec enrichment to a raw bundle.
pub fn preprocess(mut bundle: DataBundle, args: &DataArgs) -> Result<DataBundle, DataError> {
    check_lengths("training", &bundle.x_train, &bundle.y_train)?;
    check_lengths("test", &bundle.x_test, &bundle.y_test)?;

    if bundle.x_test.is_empty() {
        if args.test_size <= 0.0 {
            warn!("Empty test set");
        } else if args.test_size >= 1.0 {
            warn!("Putting all data in the test set, training set will be empty");
            bundle.x_test = std::mem::take(&mut bundle.x_train);
            bundle.y_test = std::mem::take(&mut bundle.y_train);
        } else {
            info!("Splitting data with test set ratio {}", args.test_size);
            stratified_split(&mut bundle, args.test_size, args.random_state);
        }
    }

    if args.scale {
        info!("Scaling features to zero mean and unit variance");
        standard_scale(&mut bundle);
    }

    subsample(&mut bundle, args.subset_train, args.subset_test);

    bundle.specs.num_classes = bundle.num_classes();
    bundle.specs.job_title = args.title.clone();
    bundle.specs.dataset_name = args.dataset.clone();
    log_stats(&bundle);

    if bundle.specs.cv_folds.is_some() {
        if args.disable_cross_validation {
            warn!("The dataset supports cross validation but it was disabled in the job");
        } else if let Some(plan) = FoldPlan::from_bundle(&bundle)? {
            log_fold_sizes(&plan);
        }
    }

    Ok(bundle)
}

fn check_lengths(partition: &'static str, x: &[Sample], y: &[usize]) -> Result<(), DataError> {
    if x.len() != y.len() {
        return Err(DataError::LabelCountMismatch {
            partition,
            samples: x.len(),
            labels: y.len(),
        });
    }
    Ok(())
}

/// Move `round(count * test_size)` samples of every class to the test set.
/// Relative order is preserved within both partitions.
fn stratified_split(bundle: &mut DataBundle, test_size: f64, random_state: u64) {
    let mut rng = StdRng::seed_from_u64(random_state);

    let mut by_class: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
    for (i, &label) in bundle.y_train.iter().enumerate() {
        by_class.entry(label).or_default().push(i);
    }

    let mut is_test = vec![false; bundle.y_train.len()];
    for indices in by_class.values_mut() {
        let take = (indices.len() as f64 * test_size).round() as usize;
        indices.shuffle(&mut rng);
        for &i in indices.iter().take(take) {
            is_test[i] = true;
        }
    }

    let x = std::mem::take(&mut bundle.x_train);
    let y = std::mem::take(&mut bundle.y_train);
    for ((sample, label), test) in x.into_iter().zip(y).zip(is_test) {
        if test {
            bundle.x_test.push(sample);
            bundle.y_test.push(label);
        } else {
            bundle.x_train.push(sample);
            bundle.y_train.push(label);
        }
    }
}

/// Per-feature mean and standard deviation; constant features get unit
/// deviation.
fn fit_scaler(x: &[Sample]) -> Vec<(f64, f64)> {
    let dims = x.iter().map(Vec::len).max().unwrap_or(0);
    let n = x.len() as f64;
    (0..dims)
        .map(|d| {
            let values = || x.iter().map(move |s| s.get(d).copied().unwrap_or(0.0) as f64);
            let mean = values().sum::<f64>() / n;
            let var = values().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
            let std = var.sqrt();
            (mean, if std > 0.0 { std } else { 1.0 })
        })
        .collect()
}

fn apply_scaler(x: &mut [Sample], scaler: &[(f64, f64)]) {
    for sample in x {
        for (v, (mean, std)) in sample.iter_mut().zip(scaler) {
            *v = ((*v as f64 - mean) / std) as f32;
        }
    }
}

/// Fit on the training set (or the test set if training is empty) so that
/// no test statistics leak into training.
fn standard_scale(bundle: &mut DataBundle) {
    if !bundle.x_train.is_empty() {
        let scaler = fit_scaler(&bundle.x_train);
        apply_scaler(&mut bundle.x_train, &scaler);
        apply_scaler(&mut bundle.x_test, &scaler);
    } else if !bundle.x_test.is_empty() {
        let scaler = fit_scaler(&bundle.x_test);
        apply_scaler(&mut bundle.x_test, &scaler);
    }
}

/// Keep the leading fraction of each partition.
fn subsample(bundle: &mut DataBundle, subset_train: f64, subset_test: f64) {
    let keep = |len: usize, fraction: f64| (len as f64 * fraction).round() as usize;

    if subset_train < 1.0 {
        let n = keep(bundle.x_train.len(), subset_train);
        info!("Keeping {n} of {} training samples", bundle.x_train.len());
        bundle.x_train.truncate(n);
        bundle.y_train.truncate(n);
    }
    if subset_test < 1.0 {
        let n = keep(bundle.x_test.len(), subset_test);
        info!("Keeping {n} of {} test samples", bundle.x_test.len());
        bundle.x_test.truncate(n);
        bundle.y_test.truncate(n);
    }
}

fn log_stats(bundle: &DataBundle) {
    info!(
        "{} classes, {} training samples, {} test samples",
        bundle.specs.num_classes,
        bundle.x_train.len(),
        bundle.x_test.len()
    );
}

fn log_fold_sizes(plan: &FoldPlan) {
    info!(
        "Using cross validation with {} folds from {} to {}",
        plan.num_folds(),
        plan.folds().start(),
        plan.folds().end()
    );
    for fold in plan.folds() {
        let indices = plan.indices(fold);
        match plan.mode() {
            FoldMode::TrainSet => {
                debug!("  fold {fold:2}: {:7} train {:7} test", indices.train.len(), indices.test.len())
            }
            FoldMode::TestSet => debug!("  fold {fold:2}: {:7} test", indices.test.len()),
        }
    }
}
