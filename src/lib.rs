//! Autotune - Cached, cross-validated hyperparameter search.
//!
//! This crate evaluates classifier configurations against prepared
//! datasets, memoizes every result in a content-addressed cache, and
//! evolves populations of configurations towards higher test accuracy.
//!
//! # Architecture
//!
//! The crate is split into three main modules:
//!
//! - `schema`: Configurations, tuning specifications, jobs and result records
//! - `store`: The on-disk result cache
//! - `compute`: Expansion, fingerprints, folds, evaluation and the search loop
//!
//! # Example
//!
//! ```rust,no_run
//! use autotune::{
//!     compute::{
//!         ClassifierRegistry, DatasetRegistry, Evaluator, compile_job, prepare,
//!         evolution::TuningEngine,
//!     },
//!     schema::JobConfig,
//!     store::ResultCache,
//! };
//!
//! let job = JobConfig::load("job.json").unwrap();
//! let compiled = compile_job(&job, true).unwrap().job;
//!
//! let cache = ResultCache::open("cache").unwrap();
//! let data = prepare(&compiled.data, &DatasetRegistry::with_builtins(), Some(&cache), false).unwrap();
//!
//! let classifiers = ClassifierRegistry::with_builtins();
//! let mut evaluator = Evaluator::new(&data, &classifiers, Some(&cache));
//!
//! let mut engine =
//!     TuningEngine::from_configurations(compiled.search_config(Some(7)), &compiled.classifiers).unwrap();
//! let outcome = engine.run(&mut evaluator).unwrap();
//!
//! if let Some(best) = outcome.best() {
//!     println!("Best: {} ({:.3})", best.title, best.result.accuracy());
//! }
//! ```

pub mod compute;
pub mod schema;
pub mod store;

// Re-export commonly used types
pub use compute::evolution::TuningEngine;
pub use schema::{Configuration, JobConfig, SearchConfig};
pub use store::ResultCache;
