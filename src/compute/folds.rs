//! Cross-validation fold splitting.
//!
//! A fold assignment vector holds one fold id per sample. Fold ids may start
//! at any base; folds `min..=max` are iterated, empty ones included.
//!
//! Two modes are supported:
//!
//! - [`FoldMode::TrainSet`]: the vector covers the training set. Samples of
//!   the current fold form the test set, the rest the training set. The
//!   dataset's own test set must be empty.
//! - [`FoldMode::TestSet`]: the vector covers the test set. The training set
//!   is used unchanged and the test set is restricted to the current fold.

use std::ops::RangeInclusive;

use crate::schema::{ConfigError, DataBundle, Sample};

/// Which partition a fold vector governs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FoldMode {
    TrainSet,
    TestSet,
}

impl FoldMode {
    /// Mode selected by the `cv_folds_for_test_only` dataset flag.
    pub fn from_test_only(cv_folds_for_test_only: bool) -> Self {
        if cv_folds_for_test_only {
            FoldMode::TestSet
        } else {
            FoldMode::TrainSet
        }
    }

    fn partition(self) -> &'static str {
        match self {
            FoldMode::TrainSet => "training",
            FoldMode::TestSet => "test",
        }
    }
}

/// Sample indices of one fold.
///
/// In [`FoldMode::TrainSet`] both lists index the training set. In
/// [`FoldMode::TestSet`] `train` indexes the training set and `test` the
/// test set.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FoldIndices {
    pub train: Vec<usize>,
    pub test: Vec<usize>,
}

/// Materialized partitions of one fold.
#[derive(Debug, Clone, Default)]
pub struct FoldSplit {
    pub x_train: Vec<Sample>,
    pub y_train: Vec<usize>,
    pub x_test: Vec<Sample>,
    pub y_test: Vec<usize>,
}

/// A validated fold assignment.
#[derive(Debug, Clone)]
pub struct FoldPlan {
    folds: Vec<i64>,
    mode: FoldMode,
    train_len: usize,
    min: i64,
    max: i64,
}

impl FoldPlan {
    /// Validate a fold vector against the partition sizes.
    pub fn new(
        folds: Vec<i64>,
        mode: FoldMode,
        train_len: usize,
        test_len: usize,
    ) -> Result<Self, ConfigError> {
        let (Some(&min), Some(&max)) = (folds.iter().min(), folds.iter().max()) else {
            return Err(ConfigError::EmptyFoldVector);
        };

        let governed = match mode {
            FoldMode::TrainSet => {
                if test_len > 0 {
                    return Err(ConfigError::NonEmptyTestSet(test_len));
                }
                train_len
            }
            FoldMode::TestSet => test_len,
        };

        if folds.len() != governed {
            return Err(ConfigError::FoldLengthMismatch {
                folds: folds.len(),
                samples: governed,
                partition: mode.partition(),
            });
        }

        Ok(Self {
            folds,
            mode,
            train_len,
            min,
            max,
        })
    }

    /// Plan for a dataset, or `None` when it carries no fold vector.
    pub fn from_bundle(bundle: &DataBundle) -> Result<Option<Self>, ConfigError> {
        let Some(folds) = bundle.specs.cv_folds.clone() else {
            return Ok(None);
        };
        let mode = FoldMode::from_test_only(bundle.specs.cv_folds_for_test_only);
        Self::new(folds, mode, bundle.x_train.len(), bundle.x_test.len()).map(Some)
    }

    pub fn mode(&self) -> FoldMode {
        self.mode
    }

    /// Fold ids to iterate, inclusive.
    pub fn folds(&self) -> RangeInclusive<i64> {
        self.min..=self.max
    }

    /// Number of folds, `max - min + 1`.
    pub fn num_folds(&self) -> usize {
        (self.max - self.min + 1) as usize
    }

    /// Sample indices of `fold`.
    pub fn indices(&self, fold: i64) -> FoldIndices {
        let (test, rest): (Vec<usize>, Vec<usize>) =
            (0..self.folds.len()).partition(|&i| self.folds[i] == fold);
        match self.mode {
            FoldMode::TrainSet => FoldIndices { train: rest, test },
            FoldMode::TestSet => FoldIndices {
                train: (0..self.train_len).collect(),
                test,
            },
        }
    }

    /// Materialize the partitions of `fold`.
    pub fn split(&self, bundle: &DataBundle, fold: i64) -> FoldSplit {
        let pick = |x: &[Sample], y: &[usize], indices: &[usize]| {
            indices
                .iter()
                .filter_map(|&i| Some((x.get(i)?.clone(), *y.get(i)?)))
                .unzip::<Sample, usize, Vec<_>, Vec<_>>()
        };

        let indices = self.indices(fold);
        let (x_test, y_test) = match self.mode {
            FoldMode::TrainSet => pick(&bundle.x_train, &bundle.y_train, &indices.test),
            FoldMode::TestSet => pick(&bundle.x_test, &bundle.y_test, &indices.test),
        };
        let (x_train, y_train) = match self.mode {
            FoldMode::TrainSet => pick(&bundle.x_train, &bundle.y_train, &indices.train),
            FoldMode::TestSet => (bundle.x_train.clone(), bundle.y_train.clone()),
        };

        FoldSplit {
            x_train,
            y_train,
            x_test,
            y_test,
        }
    }
}
