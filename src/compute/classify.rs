//! Classification of one concrete configuration on a prepared dataset.
//!
//! Results are memoized in the [`ResultCache`] under
//! `<data_fp>__clf_<config_fp>`. A configuration whose key already exists
//! is never fitted again.

use std::collections::BTreeMap;
use std::time::Instant;

use log::{debug, info, warn};
use serde_json::json;

use super::data::PreparedData;
use super::fingerprint::{FingerprintError, config_fingerprint, fingerprint};
use super::folds::FoldPlan;
use super::model::{ClassifierRegistry, ModelError, class_probabilities};
use super::scoring::{mean_scores, score};
use crate::schema::{
    ClassifierRecord, ConfigError, Configuration, EvaluationResult, PredictionRecord, Sample,
    Scores,
};
use crate::store::{ArtifactRole, CacheError, ResultCache, args_key, artifact_key, proba_key, scores_key};

/// Errors while evaluating one configuration.
///
/// These are fatal for the configuration, never for a whole search.
#[derive(Debug, thiserror::Error)]
pub enum EvaluationError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("Model failed: {0}")]
    Model(#[from] ModelError),
    #[error(transparent)]
    Cache(#[from] CacheError),
    #[error(transparent)]
    Fingerprint(#[from] FingerprintError),
    #[error("Configuration {0} produced no test scores")]
    EmptyTestSet(String),
}

/// Evaluation switches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EvaluationOptions {
    /// Persist results and sidecars.
    pub write_to_cache: bool,
    /// Persist a result for every cross-validation fold.
    pub save_fold_results: bool,
    /// Use the dataset's folds when it has any.
    pub cross_validation: bool,
}

impl Default for EvaluationOptions {
    fn default() -> Self {
        Self {
            write_to_cache: true,
            save_fold_results: false,
            cross_validation: true,
        }
    }
}

/// Outcome of a single fit/predict run.
#[derive(Debug, Default)]
struct RunResult {
    train_scores: Option<Scores>,
    test_scores: Option<Scores>,
    predictions: PredictionRecord,
    clf_time: f64,
    pred_time: f64,
    history: Option<BTreeMap<String, Vec<f64>>>,
}

/// Evaluates configurations against one prepared dataset.
pub struct Evaluator<'a> {
    data: &'a PreparedData,
    registry: &'a ClassifierRegistry,
    cache: Option<&'a ResultCache>,
    options: EvaluationOptions,
}

impl<'a> Evaluator<'a> {
    /// Create an evaluator with options taken from the data arguments.
    pub fn new(
        data: &'a PreparedData,
        registry: &'a ClassifierRegistry,
        cache: Option<&'a ResultCache>,
    ) -> Self {
        let options = EvaluationOptions {
            write_to_cache: true,
            save_fold_results: data.args.save_clfs_for_folds,
            cross_validation: !data.args.disable_cross_validation,
        };
        Self {
            data,
            registry,
            cache,
            options,
        }
    }

    /// Override the evaluation switches.
    pub fn with_options(mut self, options: EvaluationOptions) -> Self {
        self.options = options;
        self
    }

    pub fn options(&self) -> EvaluationOptions {
        self.options
    }

    /// Cache key of a configuration's result.
    pub fn cache_key(&self, config: &Configuration) -> Result<String, EvaluationError> {
        Ok(artifact_key(
            &self.data.fingerprint,
            ArtifactRole::Classifier,
            &config_fingerprint(config)?,
        ))
    }

    /// Check whether a configuration's result is already cached.
    pub fn is_cached(&self, config: &Configuration) -> Result<bool, EvaluationError> {
        let key = self.cache_key(config)?;
        Ok(self.cache.is_some_and(|cache| cache.exists(&key)))
    }

    /// Classify with one configuration, reusing a cached result if present.
    pub fn classify(&self, config: &Configuration) -> Result<ClassifierRecord, EvaluationError> {
        let key = self.cache_key(config)?;
        info!("Classifier {} ({key})", config.label());

        if let Some(cache) = self.cache
            && cache.exists(&key)
        {
            debug!("Classifier already cached");
            return Ok(cache.read_object(&key)?);
        }

        // Fold vectors are only validated when cross-validation is on
        let plan = if self.options.cross_validation {
            FoldPlan::from_bundle(&self.data.bundle)?
        } else {
            None
        };
        let result = match plan {
            Some(plan) => self.classify_cv(config, &plan)?,
            None => {
                let bundle = &self.data.bundle;
                self.classify_simple(
                    config,
                    &bundle.x_train,
                    &bundle.y_train,
                    &bundle.x_test,
                    &bundle.y_test,
                )?
            }
        };

        let record = self.record(config, key, &result);
        if self.options.write_to_cache {
            self.save(&record, &result.predictions)?;
        }
        Ok(record)
    }

    /// Classify and convert into a rankable result.
    pub fn evaluate(&self, config: &Configuration) -> Result<EvaluationResult, EvaluationError> {
        self.classify(config)?
            .to_result()
            .ok_or_else(|| EvaluationError::EmptyTestSet(config.label()))
    }

    fn record(&self, config: &Configuration, key: String, result: &RunResult) -> ClassifierRecord {
        ClassifierRecord {
            args: config.clone(),
            train_scores: result.train_scores.clone(),
            test_scores: result.test_scores.clone(),
            hash: key,
            data_hash: self.data.fingerprint.clone(),
            clf_time: result.clf_time,
            pred_time: result.pred_time,
            history: result.history.clone(),
        }
    }

    fn save(&self, record: &ClassifierRecord, predictions: &PredictionRecord) -> Result<(), EvaluationError> {
        let Some(cache) = self.cache else {
            return Ok(());
        };
        let key = &record.hash;
        cache.write_object(key, record)?;
        cache.write_object(&proba_key(key), predictions)?;
        cache.write_text(&args_key(key), &record.args)?;
        cache.write_text(&scores_key(key), &record.score_summary())?;
        Ok(())
    }

    fn classify_simple(
        &self,
        config: &Configuration,
        x_train: &[Sample],
        y_train: &[usize],
        x_test: &[Sample],
        y_test: &[usize],
    ) -> Result<RunResult, EvaluationError> {
        let specs = &self.data.bundle.specs;
        let mut model = self.registry.create(config, specs)?;

        let start = Instant::now();
        model.fit(x_train, y_train)?;
        let clf_time = start.elapsed().as_secs_f64();
        debug!("Train time: {clf_time:.3} s");

        let mut result = RunResult {
            clf_time,
            history: model.training_history(),
            ..Default::default()
        };

        if x_test.is_empty() {
            warn!("No test set, skipping prediction and evaluation");
            return Ok(result);
        }

        let start = Instant::now();
        let pred_test = model.predict(x_test, y_test)?;
        let pred_train = model.predict(x_train, y_train)?;
        result.pred_time = start.elapsed().as_secs_f64();

        result.predictions.y_pred_proba_test = class_probabilities(model.as_ref(), x_test, y_test)?;
        result.predictions.y_pred_proba_train =
            class_probabilities(model.as_ref(), x_train, y_train)?;

        let num_classes = specs.num_classes;
        let test_scores = score(y_test, &pred_test, num_classes);
        let train_scores = score(y_train, &pred_train, num_classes);
        info!(
            "Train accuracy: {:.2} %, test accuracy: {:.2} %",
            train_scores.accuracy * 100.0,
            test_scores.accuracy * 100.0
        );

        result.train_scores = Some(train_scores);
        result.test_scores = Some(test_scores);
        result.predictions.y_pred_test = Some(pred_test);
        result.predictions.y_pred_train = Some(pred_train);
        Ok(result)
    }

    /// Scores are averaged over folds; test predictions are concatenated in
    /// fold order. Times are averaged over the folds with test samples, so
    /// gaps in the fold ids do not dilute them. Train predictions and
    /// history are not kept.
    fn classify_cv(&self, config: &Configuration, plan: &FoldPlan) -> Result<RunResult, EvaluationError> {
        info!("Using cross validation with {} folds", plan.num_folds());
        let bundle = &self.data.bundle;

        let mut train_scores = Vec::new();
        let mut test_scores = Vec::new();
        let mut clf_time = 0.0;
        let mut pred_time = 0.0;
        let mut timed_folds = 0usize;
        let mut pred_test: Vec<usize> = Vec::new();
        let mut proba_test: Option<Vec<Vec<f64>>> = Some(Vec::new());

        for fold in plan.folds() {
            let split = plan.split(bundle, fold);
            debug!(
                "Fold {fold}: {} training samples, {} test samples",
                split.y_train.len(),
                split.y_test.len()
            );

            let fold_config = config.with_title_suffix(&format!(" fold{fold}"));
            let result = self.classify_simple(
                &fold_config,
                &split.x_train,
                &split.y_train,
                &split.x_test,
                &split.y_test,
            )?;

            if self.options.write_to_cache && self.options.save_fold_results {
                let fold_fp = fingerprint(&json!({ "args": config.without_title(), "fold": fold }), "")?;
                let key = artifact_key(&self.data.fingerprint, ArtifactRole::Classifier, &fold_fp);
                let record = self.record(&fold_config, key, &result);
                self.save(&record, &result.predictions)?;
            }

            train_scores.extend(result.train_scores);
            test_scores.extend(result.test_scores);
            if !split.y_test.is_empty() {
                clf_time += result.clf_time;
                pred_time += result.pred_time;
                timed_folds += 1;
            }
            pred_test.extend(result.predictions.y_pred_test.unwrap_or_default());
            proba_test = match (proba_test, result.predictions.y_pred_proba_test) {
                (Some(mut all), Some(fold_proba)) => {
                    all.extend(fold_proba);
                    Some(all)
                }
                (Some(all), None) if split.y_test.is_empty() => Some(all),
                _ => None,
            };
        }

        let timed_folds = timed_folds.max(1) as f64;
        let train_scores = mean_scores(&train_scores);
        let test_scores = mean_scores(&test_scores);
        if let Some(scores) = &test_scores {
            info!("Mean test accuracy: {:.2} %", scores.accuracy * 100.0);
        }

        Ok(RunResult {
            train_scores,
            test_scores,
            predictions: PredictionRecord {
                y_pred_test: Some(pred_test),
                y_pred_train: None,
                y_pred_proba_test: proba_test,
                y_pred_proba_train: None,
            },
            clf_time: clf_time / timed_folds,
            pred_time: pred_time / timed_folds,
            history: None,
        })
    }
}
