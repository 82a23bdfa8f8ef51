//! One-shot evaluation of every configuration in a job.
//!
//! The batch runner expands a job, then runs each projection and each
//! classifier configuration once. Anything already in the cache is skipped.

use std::fmt::Write as _;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use log::{error, info, warn};
use serde::Serialize;

use super::classify::{EvaluationError, Evaluator};
use super::data::{DataError, DatasetRegistry, PreparedData, prepare};
use super::expand::{ExpansionFailure, compile_job};
use super::fingerprint::config_fingerprint;
use super::model::{ClassifierRegistry, ProjectorRegistry};
use crate::schema::{Configuration, JobConfig, JobError, ProjectionRecord};
use crate::store::{ArtifactRole, ResultCache, args_key, artifact_key};

/// Errors that abort a batch.
#[derive(Debug, thiserror::Error)]
pub enum BatchError {
    #[error(transparent)]
    Job(#[from] JobError),
    #[error(transparent)]
    Expansion(#[from] ExpansionFailure),
    #[error(transparent)]
    Data(#[from] DataError),
    #[error("Projection {title} failed: {source}")]
    Projection {
        title: String,
        #[source]
        source: EvaluationError,
    },
    #[error("Classifier {title} failed: {source}")]
    Classifier {
        title: String,
        #[source]
        source: EvaluationError,
    },
}

/// Outcome of one batch job.
#[derive(Debug, Clone, Serialize)]
pub struct BatchSummary {
    pub title: String,
    pub dataset: String,
    /// Concrete classifier configurations.
    pub classifiers: usize,
    /// Concrete projection configurations.
    pub projections: usize,
    /// Configurations skipped because they were cached.
    pub cached: usize,
    /// `Kind: title` of every failed configuration.
    pub errors: Vec<String>,
    /// Cancellation stopped the batch early.
    pub interrupted: bool,
    pub elapsed: f64,
}

/// Outcome of a sequence of batch jobs.
///
/// `summaries` holds every job that finished, also when a later job
/// aborted the sequence with `error`.
#[derive(Debug)]
pub struct BatchRun {
    pub summaries: Vec<BatchSummary>,
    pub error: Option<BatchError>,
}

/// Runs batch jobs against a cache.
pub struct BatchRunner<'a> {
    datasets: &'a DatasetRegistry,
    classifiers: &'a ClassifierRegistry,
    projectors: &'a ProjectorRegistry,
    cache: &'a ResultCache,
    strict: bool,
    cancelled: Arc<AtomicBool>,
}

impl<'a> BatchRunner<'a> {
    pub fn new(
        datasets: &'a DatasetRegistry,
        classifiers: &'a ClassifierRegistry,
        projectors: &'a ProjectorRegistry,
        cache: &'a ResultCache,
    ) -> Self {
        Self {
            datasets,
            classifiers,
            projectors,
            cache,
            strict: false,
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Abort on the first error instead of collecting it.
    pub fn strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    /// Share an externally owned cancellation flag.
    pub fn with_cancel_handle(mut self, cancelled: Arc<AtomicBool>) -> Self {
        self.cancelled = cancelled;
        self
    }

    /// Get cancellation handle.
    pub fn cancel_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancelled)
    }

    /// Load and run job files in order.
    ///
    /// Unreadable job files are skipped unless strict. The first job that
    /// fails stops the sequence, as does cancellation.
    pub fn run_all<P: AsRef<Path>>(&self, jobs: &[P]) -> BatchRun {
        let mut summaries = Vec::with_capacity(jobs.len());
        for (i, path) in jobs.iter().enumerate() {
            let path = path.as_ref();
            info!("Loading batch job {} of {}: {}", i + 1, jobs.len(), path.display());

            let job = match JobConfig::load(path) {
                Ok(job) => job,
                Err(e) if !self.strict => {
                    error!("{e}");
                    continue;
                }
                Err(e) => {
                    return BatchRun {
                        summaries,
                        error: Some(e.into()),
                    };
                }
            };

            match self.run(&job) {
                Ok(summary) => {
                    let interrupted = summary.interrupted;
                    summaries.push(summary);
                    if interrupted {
                        break;
                    }
                }
                Err(e) => {
                    return BatchRun {
                        summaries,
                        error: Some(e),
                    };
                }
            }
        }
        BatchRun {
            summaries,
            error: None,
        }
    }

    /// Run every projection, then every classifier, of a job.
    pub fn run(&self, job: &JobConfig) -> Result<BatchSummary, BatchError> {
        let start = Instant::now();
        info!("Running batch job {}", job.data.title);

        let compiled = compile_job(job, self.strict)?;
        let mut errors: Vec<String> = compiled
            .failures
            .iter()
            .map(|f| format!("{}: {}", capitalize(f.kind), f.title))
            .collect();
        let job = compiled.job;

        let data = prepare(&job.data, self.datasets, Some(self.cache), true)?;

        let mut summary = BatchSummary {
            title: job.data.title.clone(),
            dataset: job.data.dataset.clone(),
            classifiers: job.classifiers.len(),
            projections: job.projections.len(),
            cached: 0,
            errors: Vec::new(),
            interrupted: false,
            elapsed: 0.0,
        };

        info!("Projecting data");
        for (i, config) in job.projections.iter().enumerate() {
            if self.check_cancelled(&mut summary) {
                break;
            }
            info!("Projection {} of {}: {}", i + 1, job.projections.len(), config.label());
            match self.project(config, &data) {
                Ok(true) => summary.cached += 1,
                Ok(false) => {}
                Err(source) => {
                    let error = BatchError::Projection {
                        title: config.label(),
                        source,
                    };
                    error!("{error}");
                    if self.strict {
                        return Err(error);
                    }
                    errors.push(format!("Projection: {}", config.label()));
                }
            }
        }

        info!("Running classifiers");
        let evaluator = Evaluator::new(&data, self.classifiers, Some(self.cache));
        for (i, config) in job.classifiers.iter().enumerate() {
            if self.check_cancelled(&mut summary) {
                break;
            }
            info!("Classifier {} of {}: {}", i + 1, job.classifiers.len(), config.label());
            let result = evaluator.is_cached(config).and_then(|cached| {
                if !cached {
                    evaluator.classify(config)?;
                }
                Ok(cached)
            });
            match result {
                Ok(true) => {
                    info!("Already cached");
                    summary.cached += 1;
                }
                Ok(false) => {}
                Err(source) => {
                    let error = BatchError::Classifier {
                        title: config.label(),
                        source,
                    };
                    error!("{error}");
                    if self.strict {
                        return Err(error);
                    }
                    errors.push(format!("Classifier: {}", config.label()));
                }
            }
        }

        summary.errors = errors;
        summary.elapsed = start.elapsed().as_secs_f64();
        if !summary.errors.is_empty() {
            error!(
                "{} errors! The following configurations failed:\n{}",
                summary.errors.len(),
                summary.errors.join("\n")
            );
        }
        info!(
            "Finished batch job {} in {:.1} s",
            summary.title, summary.elapsed
        );
        Ok(summary)
    }

    /// Project the data with one configuration.
    ///
    /// Train and test samples are transformed together and cut again
    /// afterwards. Returns `true` when the projection was already cached.
    pub fn project(&self, config: &Configuration, data: &PreparedData) -> Result<bool, EvaluationError> {
        let key = artifact_key(
            &data.fingerprint,
            ArtifactRole::Projection,
            &config_fingerprint(config)?,
        );
        if self.cache.exists(&key) {
            info!("Already cached");
            return Ok(true);
        }

        let bundle = &data.bundle;
        let mut projector = self.projectors.create(config, &bundle.specs)?;

        let combined: Vec<_> = bundle.x_train.iter().chain(&bundle.x_test).cloned().collect();
        let start = Instant::now();
        let mut points = projector.fit_transform(&combined)?;
        let proj_time = start.elapsed().as_secs_f64();

        let train_len = bundle.x_train.len();
        if points.len() != combined.len() {
            warn!(
                "Projection returned {} points for {} samples",
                points.len(),
                combined.len()
            );
        }
        let points_test = points.split_off(train_len.min(points.len()));

        let record = ProjectionRecord {
            args: config.clone(),
            hash: key.clone(),
            data_hash: data.fingerprint.clone(),
            points_train: points,
            points_test,
            proj_time,
        };
        self.cache.write_object(&key, &record)?;
        self.cache.write_text(&args_key(&key), config)?;
        Ok(false)
    }

    fn check_cancelled(&self, summary: &mut BatchSummary) -> bool {
        if self.cancelled.load(Ordering::Relaxed) {
            warn!("Cancelled, stopping batch {}", summary.title);
            summary.interrupted = true;
        }
        summary.interrupted
    }
}

fn capitalize(kind: &str) -> String {
    let mut chars = kind.chars();
    chars
        .next()
        .map(|c| c.to_uppercase().chain(chars).collect())
        .unwrap_or_default()
}

/// Plain-text table of several batch summaries.
pub fn render_summaries(summaries: &[BatchSummary]) -> String {
    let mut text = format!(
        "{:40}  {:20}  {:>8}  {:>8}  {:>8}  {:>8}  {:10}\n",
        "Title", "Dataset", "#Clfs", "#Projs", "#Cached", "#Errors", "Time"
    );

    let mut totals = (0, 0, 0, 0, 0.0);
    for s in summaries {
        let title: String = s.title.chars().take(40).collect();
        let dataset: String = s.dataset.chars().take(20).collect();
        let _ = writeln!(
            text,
            "{title:40}  {dataset:20}  {:>8}  {:>8}  {:>8}  {:>8}  {}",
            s.classifiers,
            s.projections,
            s.cached,
            s.errors.len(),
            super::evolution::format_duration(s.elapsed)
        );
        totals.0 += s.classifiers;
        totals.1 += s.projections;
        totals.2 += s.cached;
        totals.3 += s.errors.len();
        totals.4 += s.elapsed;
    }

    let _ = writeln!(
        text,
        "{:40}  {:20}  {:>8}  {:>8}  {:>8}  {:>8}  {}",
        "Total",
        "",
        totals.0,
        totals.1,
        totals.2,
        totals.3,
        super::evolution::format_duration(totals.4)
    );
    text
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{DataArgs, DataBundle, DataSpecs};
    use serde_json::{Value, json};
    use std::fs;
    use tempfile::{TempDir, tempdir};

    fn bundle() -> DataBundle {
        DataBundle {
            x_train: vec![vec![0.0, 1.0, 2.0], vec![1.0, 2.0, 3.0], vec![2.0, 3.0, 4.0]],
            y_train: vec![0, 1, 1],
            x_test: vec![vec![5.0, 6.0, 7.0]],
            y_test: vec![1],
            class_names: vec!["a".into(), "b".into()],
            specs: DataSpecs::default(),
        }
    }

    fn setup() -> (TempDir, ResultCache, JobConfig) {
        let dir = tempdir().unwrap();
        let data_path = dir.path().join("data.json");
        fs::write(&data_path, serde_json::to_string(&bundle()).unwrap()).unwrap();
        let cache = ResultCache::open(dir.path().join("cache")).unwrap();

        let mut data = DataArgs::new("batch", "json_file");
        data.extra
            .insert("path".into(), Value::String(data_path.display().to_string()));

        let config = |v: Value| Configuration::from_value(v).unwrap();
        let job = JobConfig {
            data,
            classifiers: vec![
                config(json!({"title": "naive", "method": "naive"})),
                config(json!({"title": "oracle", "method": "optimal"})),
                config(json!({"title": "missing", "method": "svm"})),
            ],
            projections: vec![config(json!({
                "title": "lead {n_components}",
                "method": "leading_features",
                "n_components": {"is_meta": true, "values": [1, 2]}
            }))],
        };
        (dir, cache, job)
    }

    #[test]
    fn test_batch_runs_and_caches() {
        let (_dir, cache, job) = setup();
        let datasets = DatasetRegistry::with_builtins();
        let classifiers = ClassifierRegistry::with_builtins();
        let projectors = ProjectorRegistry::with_builtins();
        let runner = BatchRunner::new(&datasets, &classifiers, &projectors, &cache);

        let summary = runner.run(&job).unwrap();
        assert_eq!(summary.classifiers, 3);
        assert_eq!(summary.projections, 2);
        assert_eq!(summary.cached, 0);
        assert_eq!(summary.errors, vec!["Classifier: missing".to_string()]);

        let content = cache.content().unwrap();
        assert_eq!(content.datasets.len(), 1);
        assert_eq!(content.classifiers.len(), 2);
        assert_eq!(content.projections.len(), 2);

        let keys = cache.list_keys().unwrap();
        let proj_key = keys
            .iter()
            .find(|k| k.contains("__proj_") && !k.ends_with(".json"))
            .unwrap();
        let record: ProjectionRecord = cache.read_object(proj_key).unwrap();
        assert_eq!(record.points_train.len(), 3);
        assert_eq!(record.points_test.len(), 1);

        // Second run is served from cache
        let again = runner.run(&job).unwrap();
        assert_eq!(again.cached, 4);
        assert_eq!(again.errors.len(), 1);
    }

    #[test]
    fn test_batch_strict() {
        let (_dir, cache, job) = setup();
        let datasets = DatasetRegistry::with_builtins();
        let classifiers = ClassifierRegistry::with_builtins();
        let projectors = ProjectorRegistry::with_builtins();
        let runner = BatchRunner::new(&datasets, &classifiers, &projectors, &cache).strict(true);

        let error = runner.run(&job).unwrap_err();
        assert!(matches!(error, BatchError::Classifier { ref title, .. } if title == "missing"));
    }

    #[test]
    fn test_batch_cancelled() {
        let (_dir, cache, job) = setup();
        let datasets = DatasetRegistry::with_builtins();
        let classifiers = ClassifierRegistry::with_builtins();
        let projectors = ProjectorRegistry::with_builtins();
        let runner = BatchRunner::new(&datasets, &classifiers, &projectors, &cache);
        runner.cancel_handle().store(true, Ordering::Relaxed);

        let summary = runner.run(&job).unwrap();
        assert!(summary.interrupted);
        assert!(cache.content().unwrap().classifiers.is_empty());
    }

    #[test]
    fn test_render_summaries() {
        let summary = BatchSummary {
            title: "job".into(),
            dataset: "json_file".into(),
            classifiers: 3,
            projections: 2,
            cached: 1,
            errors: vec!["Classifier: x".into()],
            interrupted: false,
            elapsed: 65.0,
        };
        let text = render_summaries(&[summary.clone(), summary]);
        assert!(text.starts_with("Title"));
        assert!(text.contains("0:01:05"));
        assert!(text.lines().last().unwrap().starts_with("Total"));
        assert!(text.contains("0:02:10"));
    }

    #[test]
    fn test_run_all_keeps_finished_summaries() {
        let (dir, cache, job) = setup();
        let good = dir.path().join("good.json");
        fs::write(&good, serde_json::to_string(&job).unwrap()).unwrap();

        let mut broken_job = job.clone();
        broken_job.data.title = "broken".into();
        broken_job
            .data
            .extra
            .insert("path".into(), Value::String("no-such-data.json".into()));
        let broken = dir.path().join("broken.json");
        fs::write(&broken, serde_json::to_string(&broken_job).unwrap()).unwrap();

        let missing = dir.path().join("missing.json");

        let datasets = DatasetRegistry::with_builtins();
        let classifiers = ClassifierRegistry::with_builtins();
        let projectors = ProjectorRegistry::with_builtins();
        let runner = BatchRunner::new(&datasets, &classifiers, &projectors, &cache);

        // Missing job file is skipped, the broken dataset stops the run
        let run = runner.run_all(&[&missing, &good, &broken, &good]);
        assert_eq!(run.summaries.len(), 1);
        assert_eq!(run.summaries[0].title, "batch");
        assert!(matches!(run.error, Some(BatchError::Data(_))));

        let run = runner.strict(true).run_all(&[&missing, &good]);
        assert!(run.summaries.is_empty());
        assert!(matches!(run.error, Some(BatchError::Job(JobError::Read { .. }))));
    }
}
