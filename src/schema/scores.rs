//! Scores, evaluation results and cached records.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::Configuration;

/// Support-weighted precision, recall and F-score.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PrecisionRecall {
    pub precision: f64,
    pub recall: f64,
    pub fscore: f64,
    /// Not defined for weighted averages.
    #[serde(default)]
    pub support: Option<f64>,
}

/// Scores of one prediction run.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Scores {
    pub accuracy: f64,
    /// Rows are true labels, columns predicted labels.
    pub confusion_matrix: Option<Vec<Vec<f64>>>,
    pub precision_recall_fscore_support: PrecisionRecall,
}

/// Result of evaluating one configuration, used for ranking.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationResult {
    pub train_scores: Scores,
    pub test_scores: Scores,
    /// Seconds spent fitting.
    pub train_time: f64,
    /// Seconds spent predicting.
    pub predict_time: f64,
}

impl EvaluationResult {
    /// Held-out accuracy used for selection.
    pub fn accuracy(&self) -> f64 {
        self.test_scores.accuracy
    }
}

/// Classification result as stored in the cache.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifierRecord {
    pub args: Configuration,
    /// Absent when the training set was empty.
    pub train_scores: Option<Scores>,
    /// Absent when the test set was empty.
    pub test_scores: Option<Scores>,
    /// Cache key of this record.
    pub hash: String,
    /// Dataset fingerprint.
    pub data_hash: String,
    pub clf_time: f64,
    pub pred_time: f64,
    /// Training history of iterative models.
    #[serde(default)]
    pub history: Option<BTreeMap<String, Vec<f64>>>,
}

impl ClassifierRecord {
    /// Convert into a rankable result; needs both score sets.
    pub fn to_result(&self) -> Option<EvaluationResult> {
        Some(EvaluationResult {
            train_scores: self.train_scores.clone()?,
            test_scores: self.test_scores.clone()?,
            train_time: self.clf_time,
            predict_time: self.pred_time,
        })
    }

    /// Sidecar with scores only, for cache browsing.
    pub fn score_summary(&self) -> ScoreSummary {
        ScoreSummary {
            train_scores: self.train_scores.clone(),
            test_scores: self.test_scores.clone(),
            hash: self.hash.clone(),
            data_hash: self.data_hash.clone(),
            clf_time: self.clf_time,
            pred_time: self.pred_time,
        }
    }
}

/// Scores sidecar (`<key>_scores.json`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoreSummary {
    pub train_scores: Option<Scores>,
    pub test_scores: Option<Scores>,
    pub hash: String,
    pub data_hash: String,
    pub clf_time: f64,
    pub pred_time: f64,
}

/// Predictions stored separately from the record (`<key>_proba`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PredictionRecord {
    pub y_pred_test: Option<Vec<usize>>,
    pub y_pred_train: Option<Vec<usize>>,
    pub y_pred_proba_test: Option<Vec<Vec<f64>>>,
    pub y_pred_proba_train: Option<Vec<Vec<f64>>>,
}

/// Projection result as stored in the cache.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectionRecord {
    pub args: Configuration,
    pub hash: String,
    pub data_hash: String,
    pub points_train: Vec<Vec<f32>>,
    pub points_test: Vec<Vec<f32>>,
    pub proj_time: f64,
}
