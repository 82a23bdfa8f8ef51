//! Model capabilities and the plugin registry.
//!
//! Classifiers and projections are external collaborators. The engine only
//! knows the narrow traits below and creates instances by name through a
//! [`Registry`] built at startup.
//!
//! Two baseline classifiers are built in:
//!
//! - `naive`: predicts the largest class of the training set.
//! - `optimal`: an oracle that returns the true labels. Useful as an upper
//!   bound and for testing.
//!
//! One baseline projection is built in:
//!
//! - `leading_features`: keeps the first `n_components` features (default 2).

use std::collections::{BTreeMap, HashMap};

use crate::schema::{ConfigError, Configuration, DataSpecs, Sample};

/// Errors raised by model capabilities.
#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    #[error("Model used before fitting")]
    NotFitted,
    #[error("Cannot fit on an empty training set")]
    EmptyTrainingSet,
    #[error("Label {label} is out of range for {num_classes} classes")]
    LabelOutOfRange { label: usize, num_classes: usize },
    #[error("{0}")]
    Failed(String),
}

/// A classification model.
///
/// `y` is passed to prediction methods for oracle-style baselines; real
/// models ignore it.
pub trait Classifier {
    /// Fit on a training set.
    fn fit(&mut self, x: &[Sample], y: &[usize]) -> Result<(), ModelError>;

    /// Predict one label per sample.
    fn predict(&self, x: &[Sample], y: &[usize]) -> Result<Vec<usize>, ModelError>;

    /// Class probabilities per sample, if the model provides them.
    fn predict_probability(
        &self,
        _x: &[Sample],
        _y: &[usize],
    ) -> Result<Option<Vec<Vec<f64>>>, ModelError> {
        Ok(None)
    }

    /// Raw decision scores per sample, if the model provides them.
    fn decision_function(&self, _x: &[Sample]) -> Result<Option<Vec<Vec<f64>>>, ModelError> {
        Ok(None)
    }

    /// Per-epoch metrics of iterative models.
    fn training_history(&self) -> Option<BTreeMap<String, Vec<f64>>> {
        None
    }
}

/// A dimensionality reduction.
pub trait Projector {
    /// Fit on `x` and return one point per sample.
    fn fit_transform(&mut self, x: &[Sample]) -> Result<Vec<Vec<f32>>, ModelError>;
}

/// Factory creating a plugin from its configuration and the dataset specs.
pub type Factory<T> = Box<dyn Fn(&Configuration, &DataSpecs) -> Result<Box<T>, ConfigError>>;

/// Name-to-factory plugin registry.
pub struct Registry<T: ?Sized> {
    kind: &'static str,
    factories: HashMap<String, Factory<T>>,
}

impl<T: ?Sized> Registry<T> {
    /// Create an empty registry. `kind` names the plugin type in errors.
    pub fn new(kind: &'static str) -> Self {
        Self {
            kind,
            factories: HashMap::new(),
        }
    }

    /// Register a factory, replacing any previous one with the same name.
    pub fn register<F>(&mut self, name: impl Into<String>, factory: F) -> &mut Self
    where
        F: Fn(&Configuration, &DataSpecs) -> Result<Box<T>, ConfigError> + 'static,
    {
        self.factories.insert(name.into(), Box::new(factory));
        self
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<_> = self.factories.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Create the plugin named by the configuration's `method`.
    pub fn create(&self, config: &Configuration, specs: &DataSpecs) -> Result<Box<T>, ConfigError> {
        let name = config.method()?;
        let factory = self
            .factories
            .get(name)
            .ok_or_else(|| ConfigError::UnknownPlugin {
                kind: self.kind,
                name: name.to_string(),
            })?;
        factory(config, specs)
    }
}

/// Classifier registry.
pub type ClassifierRegistry = Registry<dyn Classifier>;

/// Projection registry.
pub type ProjectorRegistry = Registry<dyn Projector>;

impl Registry<dyn Classifier> {
    /// Registry with the baseline classifiers.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new("classifier");
        registry
            .register("naive", |_, specs| {
                Ok(Box::new(NaiveClassifier::new(specs.num_classes)) as Box<dyn Classifier>)
            })
            .register("optimal", |_, specs| {
                Ok(Box::new(OptimalClassifier::new(specs.num_classes)) as Box<dyn Classifier>)
            });
        registry
    }
}

impl Registry<dyn Projector> {
    /// Registry with the baseline projection.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new("projection");
        registry.register("leading_features", |config, _| {
            let n_components = match config.get("n_components") {
                None => 2,
                Some(value) => value
                    .as_u64()
                    .filter(|n| *n > 0)
                    .ok_or_else(|| ConfigError::InvalidParameter {
                        name: "n_components".to_string(),
                        reason: format!("expected a positive integer, got {value}"),
                    })? as usize,
            };
            Ok(Box::new(LeadingFeatures { n_components }) as Box<dyn Projector>)
        });
        registry
    }
}

fn one_hot(label: usize, num_classes: usize) -> Result<Vec<f64>, ModelError> {
    if label >= num_classes {
        return Err(ModelError::LabelOutOfRange { label, num_classes });
    }
    let mut row = vec![0.0; num_classes];
    row[label] = 1.0;
    Ok(row)
}

/// Majority-class baseline.
#[derive(Debug, Clone)]
pub struct NaiveClassifier {
    num_classes: usize,
    biggest_class: Option<usize>,
}

impl NaiveClassifier {
    pub fn new(num_classes: usize) -> Self {
        Self {
            num_classes,
            biggest_class: None,
        }
    }
}

impl Classifier for NaiveClassifier {
    fn fit(&mut self, _x: &[Sample], y: &[usize]) -> Result<(), ModelError> {
        let num_classes = y.iter().max().map_or(0, |m| m + 1).max(self.num_classes);
        let mut distribution = vec![0usize; num_classes];
        for &label in y {
            distribution[label] += 1;
        }

        // First class wins ties
        let biggest = distribution
            .iter()
            .enumerate()
            .fold(None, |best: Option<(usize, usize)>, (class, &count)| match best {
                Some((_, best_count)) if best_count >= count => best,
                _ => Some((class, count)),
            })
            .map(|(class, _)| class)
            .ok_or(ModelError::EmptyTrainingSet)?;

        log::debug!("Class distribution: {distribution:?}, biggest class: {biggest}");
        self.num_classes = num_classes;
        self.biggest_class = Some(biggest);
        Ok(())
    }

    fn predict(&self, x: &[Sample], _y: &[usize]) -> Result<Vec<usize>, ModelError> {
        let class = self.biggest_class.ok_or(ModelError::NotFitted)?;
        Ok(vec![class; x.len()])
    }

    fn predict_probability(
        &self,
        x: &[Sample],
        _y: &[usize],
    ) -> Result<Option<Vec<Vec<f64>>>, ModelError> {
        let class = self.biggest_class.ok_or(ModelError::NotFitted)?;
        let row = one_hot(class, self.num_classes)?;
        Ok(Some(vec![row; x.len()]))
    }
}

/// Oracle baseline returning the true labels.
#[derive(Debug, Clone)]
pub struct OptimalClassifier {
    num_classes: usize,
}

impl OptimalClassifier {
    pub fn new(num_classes: usize) -> Self {
        Self { num_classes }
    }
}

impl Classifier for OptimalClassifier {
    fn fit(&mut self, _x: &[Sample], _y: &[usize]) -> Result<(), ModelError> {
        Ok(())
    }

    fn predict(&self, _x: &[Sample], y: &[usize]) -> Result<Vec<usize>, ModelError> {
        Ok(y.to_vec())
    }

    fn predict_probability(
        &self,
        _x: &[Sample],
        y: &[usize],
    ) -> Result<Option<Vec<Vec<f64>>>, ModelError> {
        let num_classes = y.iter().max().map_or(0, |m| m + 1).max(self.num_classes);
        y.iter()
            .map(|&label| one_hot(label, num_classes))
            .collect::<Result<Vec<_>, _>>()
            .map(Some)
    }
}

/// Keeps the first `n_components` features of every sample.
#[derive(Debug, Clone)]
pub struct LeadingFeatures {
    n_components: usize,
}

impl Projector for LeadingFeatures {
    fn fit_transform(&mut self, x: &[Sample]) -> Result<Vec<Vec<f32>>, ModelError> {
        Ok(x.iter()
            .map(|sample| {
                let mut point: Vec<f32> = sample.iter().take(self.n_components).copied().collect();
                point.resize(self.n_components, 0.0);
                point
            })
            .collect())
    }
}

/// Class probabilities of a fitted classifier.
///
/// Uses [`Classifier::predict_probability`] when available. Otherwise the
/// decision function is min-max normalized over all values; a single
/// column `p` becomes `[p, 1 - p]`. Returns `None` when the model offers
/// neither.
pub fn class_probabilities(
    model: &dyn Classifier,
    x: &[Sample],
    y: &[usize],
) -> Result<Option<Vec<Vec<f64>>>, ModelError> {
    if let Some(proba) = model.predict_probability(x, y)? {
        return Ok(Some(proba));
    }
    let Some(decision) = model.decision_function(x)? else {
        return Ok(None);
    };

    let (min, max) = decision
        .iter()
        .flatten()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| {
            (lo.min(v), hi.max(v))
        });
    let range = max - min;
    let normalize = |v: f64| if range > 0.0 { (v - min) / range } else { 0.0 };

    Ok(Some(
        decision
            .into_iter()
            .map(|row| match row.as_slice() {
                [p] => {
                    let p = normalize(*p);
                    vec![p, 1.0 - p]
                }
                _ => row.into_iter().map(normalize).collect(),
            })
            .collect(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn specs(num_classes: usize) -> DataSpecs {
        DataSpecs {
            num_classes,
            ..Default::default()
        }
    }

    fn method(name: &str) -> Configuration {
        Configuration::from_value(json!({"method": name})).unwrap()
    }

    #[test]
    fn test_registry_lookup() {
        let registry = ClassifierRegistry::with_builtins();
        assert_eq!(registry.names(), vec!["naive", "optimal"]);
        assert!(registry.create(&method("naive"), &specs(2)).is_ok());
        assert!(matches!(
            registry.create(&method("svm"), &specs(2)),
            Err(ConfigError::UnknownPlugin { kind: "classifier", .. })
        ));
        assert!(matches!(
            registry.create(&Configuration::new(), &specs(2)),
            Err(ConfigError::MissingParameter(_))
        ));
    }

    #[test]
    fn test_naive_majority() {
        let mut clf = NaiveClassifier::new(3);
        let x = vec![vec![0.0]; 5];
        assert!(matches!(clf.predict(&x, &[]), Err(ModelError::NotFitted)));

        clf.fit(&x, &[2, 1, 2, 0, 2]).unwrap();
        assert_eq!(clf.predict(&x[..2], &[]).unwrap(), vec![2, 2]);
        assert_eq!(
            clf.predict_probability(&x[..1], &[]).unwrap(),
            Some(vec![vec![0.0, 0.0, 1.0]])
        );
    }

    #[test]
    fn test_naive_tie_and_empty() {
        let mut clf = NaiveClassifier::new(2);
        clf.fit(&[vec![], vec![]], &[1, 0]).unwrap();
        assert_eq!(clf.predict(&[vec![]], &[]).unwrap(), vec![0]);

        let mut clf = NaiveClassifier::new(0);
        assert!(matches!(clf.fit(&[], &[]), Err(ModelError::EmptyTrainingSet)));
    }

    #[test]
    fn test_optimal_oracle() {
        let clf = OptimalClassifier::new(2);
        let x = vec![vec![0.0]; 3];
        assert_eq!(clf.predict(&x, &[1, 0, 1]).unwrap(), vec![1, 0, 1]);
        assert_eq!(
            clf.predict_probability(&x[..1], &[1]).unwrap(),
            Some(vec![vec![0.0, 1.0]])
        );
    }

    struct Decision(Vec<Vec<f64>>);

    impl Classifier for Decision {
        fn fit(&mut self, _x: &[Sample], _y: &[usize]) -> Result<(), ModelError> {
            Ok(())
        }
        fn predict(&self, x: &[Sample], _y: &[usize]) -> Result<Vec<usize>, ModelError> {
            Ok(vec![0; x.len()])
        }
        fn decision_function(&self, _x: &[Sample]) -> Result<Option<Vec<Vec<f64>>>, ModelError> {
            Ok(Some(self.0.clone()))
        }
    }

    #[test]
    fn test_probabilities_from_decision_function() {
        let model = Decision(vec![vec![-1.0], vec![1.0], vec![0.0]]);
        let proba = class_probabilities(&model, &[], &[]).unwrap().unwrap();
        assert_eq!(proba, vec![vec![0.0, 1.0], vec![1.0, 0.0], vec![0.5, 0.5]]);

        let model = Decision(vec![vec![0.0, 2.0], vec![4.0, 1.0]]);
        let proba = class_probabilities(&model, &[], &[]).unwrap().unwrap();
        assert_eq!(proba, vec![vec![0.0, 0.5], vec![1.0, 0.25]]);
    }

    #[test]
    fn test_no_probabilities() {
        let mut model = NaiveClassifier::new(1);
        model.fit(&[vec![]], &[0]).unwrap();
        assert!(class_probabilities(&model, &[vec![]], &[]).unwrap().is_some());

        struct Plain;
        impl Classifier for Plain {
            fn fit(&mut self, _x: &[Sample], _y: &[usize]) -> Result<(), ModelError> {
                Ok(())
            }
            fn predict(&self, x: &[Sample], _y: &[usize]) -> Result<Vec<usize>, ModelError> {
                Ok(vec![0; x.len()])
            }
        }
        assert!(class_probabilities(&Plain, &[], &[]).unwrap().is_none());
    }

    #[test]
    fn test_leading_features_projection() {
        let registry = ProjectorRegistry::with_builtins();
        let mut proj = registry.create(&method("leading_features"), &specs(0)).unwrap();
        let points = proj
            .fit_transform(&[vec![1.0, 2.0, 3.0], vec![4.0]])
            .unwrap();
        assert_eq!(points, vec![vec![1.0, 2.0], vec![4.0, 0.0]]);

        let bad = Configuration::from_value(json!({"method": "leading_features", "n_components": 0}))
            .unwrap();
        assert!(registry.create(&bad, &specs(0)).is_err());
    }
}
