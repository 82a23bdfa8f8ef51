//! Search loop configuration and round records.
//!
//! A tuning job runs `rounds` rounds over a population of classifier
//! configurations. Each round produces a [`RoundRecord`]; the whole run
//! produces a [`SearchOutcome`].

use serde::{Deserialize, Serialize};

use super::{Configuration, EvaluationResult};

/// Top-level configuration of the search loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    /// Number of rounds.
    #[serde(default = "default_rounds")]
    pub rounds: usize,
    /// Members kept after each round.
    #[serde(default = "default_population")]
    pub population: usize,
    /// Offspring per member, the unchanged member included.
    #[serde(default = "default_offspring")]
    pub offspring: usize,
    /// Mutation probabilities.
    #[serde(default)]
    pub mutation: MutationConfig,
    /// Random seed for reproducibility.
    #[serde(default)]
    pub random_seed: Option<u64>,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            rounds: default_rounds(),
            population: default_population(),
            offspring: default_offspring(),
            mutation: MutationConfig::default(),
            random_seed: None,
        }
    }
}

fn default_rounds() -> usize {
    10
}
fn default_population() -> usize {
    10
}
fn default_offspring() -> usize {
    5
}

/// Mutation probabilities.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MutationConfig {
    /// Probability of keeping the parent's value of a tunable parameter.
    #[serde(default = "default_keep_rate")]
    pub keep_rate: f64,
    /// Probability of a uniform draw (instead of a normal one) for numeric
    /// parameters.
    #[serde(default = "default_uniform_rate")]
    pub uniform_rate: f64,
}

impl Default for MutationConfig {
    fn default() -> Self {
        Self {
            keep_rate: default_keep_rate(),
            uniform_rate: default_uniform_rate(),
        }
    }
}

fn default_keep_rate() -> f64 {
    0.2
}
fn default_uniform_rate() -> f64 {
    0.5
}

/// Search configuration validation errors.
#[derive(Debug, thiserror::Error)]
pub enum SearchConfigError {
    #[error("Population size must be at least 1")]
    PopulationTooSmall,
    #[error("Offspring count must be at least 1")]
    NoOffspring,
    #[error("Invalid probability for {name}: {value}")]
    InvalidProbability { name: &'static str, value: f64 },
}

impl SearchConfig {
    /// Validate search configuration.
    pub fn validate(&self) -> Result<(), SearchConfigError> {
        if self.population == 0 {
            return Err(SearchConfigError::PopulationTooSmall);
        }
        if self.offspring == 0 {
            return Err(SearchConfigError::NoOffspring);
        }

        let check = |value: f64, name: &'static str| {
            if (0.0..=1.0).contains(&value) {
                Ok(())
            } else {
                Err(SearchConfigError::InvalidProbability { name, value })
            }
        };
        check(self.mutation.keep_rate, "keep_rate")?;
        check(self.mutation.uniform_rate, "uniform_rate")?;

        Ok(())
    }
}

// ============================================================================
// Results
// ============================================================================

/// An evaluated member as reported after selection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RankedMember {
    pub title: String,
    /// Fingerprint of the configuration, title excluded.
    pub fingerprint: String,
    pub config: Configuration,
    pub result: EvaluationResult,
}

/// A member whose evaluation failed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemberFailure {
    pub title: String,
    pub error: String,
}

/// Record emitted after every round.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoundRecord {
    /// 1-based round number.
    pub round: usize,
    /// Kept members, best first.
    pub ranked: Vec<RankedMember>,
    /// Best test accuracy of the kept members (0 if none).
    pub best_accuracy: f64,
    /// Mean test accuracy of the kept members (0 if none).
    pub mean_accuracy: f64,
    /// Cancellation stopped the round early.
    pub interrupted: bool,
    /// Wall-clock seconds.
    pub wall_time: f64,
    /// Offspring removed as duplicates.
    pub duplicates_removed: usize,
    /// Members actually evaluated this round (cached parents excluded).
    pub evaluated: usize,
    /// Members that failed this round.
    pub failures: Vec<MemberFailure>,
}

/// Reason the search loop stopped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StopReason {
    /// All rounds completed.
    MaxRounds,
    /// Cancellation was requested.
    Cancelled,
    /// A round finished without any successful member.
    EmptyPopulation,
}

/// Summary statistics of a search run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchStats {
    /// Rounds run, interrupted ones included.
    pub rounds: usize,
    /// Evaluator invocations.
    pub total_evaluations: u64,
    pub elapsed_seconds: f64,
    pub stop_reason: StopReason,
}

/// Final output of a search run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchOutcome {
    /// Final population, best first.
    pub population: Vec<RankedMember>,
    /// One record per round, for trend reporting.
    pub history: Vec<RoundRecord>,
    pub stats: SearchStats,
}

impl SearchOutcome {
    /// Best member of the final population.
    pub fn best(&self) -> Option<&RankedMember> {
        self.population.first()
    }
}
