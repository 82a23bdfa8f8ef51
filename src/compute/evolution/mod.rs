//! Evolutionary hyperparameter search.
//!
//! # Overview
//!
//! - **Mutation** (`genome`): numeric and categorical draws, offspring
//!   construction from tuning templates
//! - **Search loop** (`search`): seeding, deduplication, evaluation and
//!   selection, round by round
//! - **Report** (`report`): markdown report and result export
//!
//! # Example
//!
//! ```rust,no_run
//! use autotune::compute::EvaluationError;
//! use autotune::compute::evolution::TuningEngine;
//! use autotune::schema::{Configuration, EvaluationResult, Scores, SearchConfig};
//! use serde_json::json;
//!
//! let template = Configuration::from_value(json!({
//!     "title": "naive k={k}",
//!     "method": "naive",
//!     "k": {"tune": true, "type": "int", "initial": 3, "min": 1, "max": 9, "sigma": 2}
//! }))
//! .unwrap();
//!
//! let mut engine = TuningEngine::from_configurations(SearchConfig::default(), &[template]).unwrap();
//! let mut evaluate = |config: &Configuration| -> Result<EvaluationResult, EvaluationError> {
//!     let k = config.get("k").and_then(|v| v.as_f64()).unwrap_or(0.0);
//!     let scores = Scores { accuracy: k / 10.0, ..Default::default() };
//!     Ok(EvaluationResult {
//!         train_scores: scores.clone(),
//!         test_scores: scores,
//!         train_time: 0.0,
//!         predict_time: 0.0,
//!     })
//! };
//!
//! let outcome = engine
//!     .run_with_callback(&mut evaluate, |round| {
//!         println!("Round {}: best accuracy = {:.3}", round.round, round.best_accuracy);
//!     })
//!     .unwrap();
//! println!("Best: {:?}", outcome.best().map(|m| &m.title));
//! ```

mod genome;
mod report;
mod search;

pub use genome::MutationRng;
pub use report::{JobReport, ReportError, format_duration, render_history, render_round};
pub use search::{Member, MemberEvaluator, SearchError, TuningEngine, deduplicate, select};
