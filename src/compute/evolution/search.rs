//! Round-based evolutionary search over classifier configurations.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use log::{debug, error, info, warn};

use crate::compute::classify::{EvaluationError, Evaluator};
use crate::compute::fingerprint::{FingerprintError, config_fingerprint};
use crate::schema::{
    ConfigError, Configuration, EvaluationResult, MemberFailure, RankedMember, RoundRecord,
    SearchConfig, SearchConfigError, SearchOutcome, SearchStats, StopReason, TuningTemplate,
};

use super::genome::MutationRng;

/// Evaluates one concrete configuration for ranking.
pub trait MemberEvaluator {
    fn evaluate(&mut self, config: &Configuration) -> Result<EvaluationResult, EvaluationError>;
}

impl<F> MemberEvaluator for F
where
    F: FnMut(&Configuration) -> Result<EvaluationResult, EvaluationError>,
{
    fn evaluate(&mut self, config: &Configuration) -> Result<EvaluationResult, EvaluationError> {
        self(config)
    }
}

impl MemberEvaluator for Evaluator<'_> {
    fn evaluate(&mut self, config: &Configuration) -> Result<EvaluationResult, EvaluationError> {
        Evaluator::evaluate(self, config)
    }
}

/// Errors that abort a search before or between rounds.
#[derive(Debug, thiserror::Error)]
pub enum SearchError {
    #[error("Invalid search configuration: {0}")]
    Config(#[from] SearchConfigError),
    #[error(transparent)]
    Template(#[from] ConfigError),
    #[error(transparent)]
    Fingerprint(#[from] FingerprintError),
}

/// A population member.
#[derive(Debug, Clone)]
pub struct Member {
    pub config: Configuration,
    /// Template the member was derived from.
    pub template: Arc<TuningTemplate>,
    /// Absent until evaluated.
    pub result: Option<EvaluationResult>,
    /// Fingerprint of the configuration, title excluded.
    pub fingerprint: String,
}

impl Member {
    /// Unevaluated member.
    pub fn new(config: Configuration, template: Arc<TuningTemplate>) -> Result<Self, FingerprintError> {
        let fingerprint = config_fingerprint(&config)?;
        Ok(Self {
            config,
            template,
            result: None,
            fingerprint,
        })
    }

    /// Test accuracy, 0 when not evaluated.
    pub fn accuracy(&self) -> f64 {
        self.result.as_ref().map_or(0.0, EvaluationResult::accuracy)
    }

    fn ranked(&self) -> Option<RankedMember> {
        Some(RankedMember {
            title: self.config.label(),
            fingerprint: self.fingerprint.clone(),
            config: self.config.clone(),
            result: self.result.clone()?,
        })
    }
}

/// Drop later members with an already seen fingerprint.
///
/// Returns the kept members in first-occurrence order and the number
/// removed.
pub fn deduplicate(members: Vec<Member>) -> (Vec<Member>, usize) {
    let total = members.len();
    let mut seen = HashSet::new();
    let kept: Vec<Member> = members
        .into_iter()
        .filter(|m| seen.insert(m.fingerprint.clone()))
        .collect();
    let removed = total - kept.len();
    info!("Removed {removed} duplicates, {} left", kept.len());
    (kept, removed)
}

/// Keep the `population` best evaluated members, best first.
///
/// The sort is stable, so equal accuracies keep their evaluation order.
/// Unevaluated members are dropped.
pub fn select(members: Vec<Member>, population: usize) -> Vec<Member> {
    let mut evaluated: Vec<Member> = members.into_iter().filter(|m| m.result.is_some()).collect();
    evaluated.sort_by(|a, b| {
        b.accuracy()
            .partial_cmp(&a.accuracy())
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    evaluated.truncate(population);
    evaluated
}

/// Search engine that mutates, evaluates and selects configurations.
pub struct TuningEngine {
    config: SearchConfig,
    templates: Vec<Arc<TuningTemplate>>,
    rng: MutationRng,
    population: Vec<Member>,
    history: Vec<RoundRecord>,
    round: usize,
    total_evaluations: u64,
    cancelled: Arc<AtomicBool>,
}

impl TuningEngine {
    /// Create a new tuning engine.
    pub fn new(config: SearchConfig, templates: Vec<TuningTemplate>) -> Self {
        let seed = config.random_seed.unwrap_or_else(rand::random);
        debug!("Search seed: {seed}");

        Self {
            config,
            templates: templates.into_iter().map(Arc::new).collect(),
            rng: MutationRng::new(seed),
            population: Vec::new(),
            history: Vec::new(),
            round: 0,
            total_evaluations: 0,
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Create an engine from concrete classifier configurations.
    pub fn from_configurations(
        config: SearchConfig,
        configurations: &[Configuration],
    ) -> Result<Self, ConfigError> {
        let templates = configurations
            .iter()
            .cloned()
            .map(TuningTemplate::parse)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::new(config, templates))
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

    /// Current population.
    pub fn population(&self) -> &[Member] {
        &self.population
    }

    /// Seed the population with every template's initial values.
    pub fn initialize(&mut self) -> Result<(), SearchError> {
        self.round = 0;
        self.total_evaluations = 0;
        self.history.clear();
        self.population = self
            .templates
            .iter()
            .map(|t| Member::new(t.initial_configuration(), Arc::clone(t)))
            .collect::<Result<_, _>>()?;
        Ok(())
    }

    /// Every member unchanged followed by its mutated variants.
    pub fn offspring(&mut self) -> Result<Vec<Member>, SearchError> {
        let mut out = Vec::with_capacity(self.population.len() * self.config.offspring);

        for parent in &self.population {
            out.push(parent.clone());
            for _ in 1..self.config.offspring {
                let config =
                    self.rng
                        .create_variation(&parent.config, &parent.template, &self.config.mutation)?;
                out.push(Member::new(config, Arc::clone(&parent.template))?);
            }
        }
        Ok(out)
    }

    /// Run a single round: offspring, deduplication, evaluation, selection.
    pub fn run_round<E: MemberEvaluator>(&mut self, evaluator: &mut E) -> Result<RoundRecord, SearchError> {
        let start = Instant::now();
        self.round += 1;

        let (mut members, duplicates_removed) = deduplicate(self.offspring()?);
        let total = members.len();
        let mut interrupted = false;
        let mut evaluated = 0;
        let mut failures = Vec::new();
        let mut done = 0;

        for (i, member) in members.iter_mut().enumerate() {
            if self.cancelled.load(Ordering::Relaxed) {
                warn!("Cancelled, stopping round {}", self.round);
                interrupted = true;
                break;
            }
            done = i + 1;

            info!(
                "Round {} member {} of {total}: {}",
                self.round,
                i + 1,
                member.config.label()
            );
            if member.result.is_some() {
                debug!("Already evaluated");
                continue;
            }

            self.total_evaluations += 1;
            evaluated += 1;
            match evaluator.evaluate(&member.config) {
                Ok(result) => member.result = Some(result),
                Err(e) => {
                    error!("{}: {e}", member.config.label());
                    failures.push(MemberFailure {
                        title: member.config.label(),
                        error: e.to_string(),
                    });
                }
            }
        }
        members.truncate(done);

        if !failures.is_empty() {
            error!("{} members failed in round {}", failures.len(), self.round);
        }

        self.population = select(members, self.config.population);
        let ranked: Vec<RankedMember> = self.population.iter().filter_map(Member::ranked).collect();

        let (best_accuracy, mean_accuracy) = match ranked.first() {
            Some(best) => {
                let sum: f64 = ranked.iter().map(|m| m.result.accuracy()).sum();
                (best.result.accuracy(), sum / ranked.len() as f64)
            }
            None => {
                warn!("No successful members in round {}", self.round);
                (0.0, 0.0)
            }
        };

        let record = RoundRecord {
            round: self.round,
            ranked,
            best_accuracy,
            mean_accuracy,
            interrupted,
            wall_time: start.elapsed().as_secs_f64(),
            duplicates_removed,
            evaluated,
            failures,
        };
        info!(
            "Finished round {}: best {:.5}, mean {:.5}",
            record.round, record.best_accuracy, record.mean_accuracy
        );
        self.history.push(record.clone());
        Ok(record)
    }

    /// Check if the search should stop before the next round.
    fn should_stop(&self) -> Option<StopReason> {
        if let Some(last) = self.history.last() {
            if last.interrupted {
                return Some(StopReason::Cancelled);
            }
            if last.ranked.is_empty() {
                return Some(StopReason::EmptyPopulation);
            }
        }

        if self.cancelled.load(Ordering::Relaxed) {
            return Some(StopReason::Cancelled);
        }

        if self.round >= self.config.rounds {
            return Some(StopReason::MaxRounds);
        }

        None
    }

    /// Run the search with a per-round callback.
    pub fn run_with_callback<E, F>(
        &mut self,
        evaluator: &mut E,
        callback: F,
    ) -> Result<SearchOutcome, SearchError>
    where
        E: MemberEvaluator,
        F: Fn(&RoundRecord),
    {
        self.config.validate()?;
        let start_time = Instant::now();

        self.initialize()?;

        let stop_reason = loop {
            if let Some(reason) = self.should_stop() {
                break reason;
            }

            info!("Running round {} of {}", self.round + 1, self.config.rounds);
            let record = self.run_round(evaluator)?;
            callback(&record);
        };

        let elapsed = start_time.elapsed().as_secs_f64();
        info!(
            "Search stopped after {} rounds ({stop_reason:?}), {} evaluations in {elapsed:.1} s",
            self.round, self.total_evaluations
        );

        Ok(SearchOutcome {
            population: self.population.iter().filter_map(Member::ranked).collect(),
            history: self.history.clone(),
            stats: SearchStats {
                rounds: self.round,
                total_evaluations: self.total_evaluations,
                elapsed_seconds: elapsed,
                stop_reason,
            },
        })
    }

    /// Run the search (blocking).
    pub fn run<E: MemberEvaluator>(&mut self, evaluator: &mut E) -> Result<SearchOutcome, SearchError> {
        self.run_with_callback(evaluator, |_| {})
    }
}
