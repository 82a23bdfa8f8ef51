//! Dataset bundles as supplied by dataset plugins.

use serde::{Deserialize, Serialize};

/// Feature vector of one sample.
pub type Sample = Vec<f32>;

/// Train and test data plus metadata.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DataBundle {
    pub x_train: Vec<Sample>,
    pub y_train: Vec<usize>,
    #[serde(default)]
    pub x_test: Vec<Sample>,
    #[serde(default)]
    pub y_test: Vec<usize>,
    /// Class names indexed by label.
    pub class_names: Vec<String>,
    #[serde(default)]
    pub specs: DataSpecs,
}

impl DataBundle {
    /// Number of classes, at least as many as there are class names.
    pub fn num_classes(&self) -> usize {
        let max_label = self
            .y_train
            .iter()
            .chain(&self.y_test)
            .max()
            .map_or(0, |m| m + 1);
        self.class_names.len().max(max_label)
    }
}

/// Dataset metadata consumed by classifiers and the fold splitter.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DataSpecs {
    /// Shape of a single sample before flattening.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_shape: Option<Vec<usize>>,
    /// Cross-validation fold id per sample.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cv_folds: Option<Vec<i64>>,
    /// Folds partition the test set instead of the training set.
    #[serde(default)]
    pub cv_folds_for_test_only: bool,
    #[serde(default)]
    pub num_classes: usize,
    #[serde(default)]
    pub dataset_name: String,
    #[serde(default)]
    pub job_title: String,
}
