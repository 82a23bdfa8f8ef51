//! Configuration values for classifiers and projections.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Ordered parameter map. Key order is the order declared in the job file.
pub type ParamMap = Map<String, Value>;

/// Reserved key holding the human-readable title.
pub const TITLE_KEY: &str = "title";

/// Reserved key naming the plugin that handles a configuration.
pub const METHOD_KEY: &str = "method";

/// A single classifier or projection configuration.
///
/// Configurations are values: every modification returns a new
/// configuration and leaves the original untouched, so branches of an
/// expansion or mutated offspring never alias each other.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Configuration(ParamMap);

impl Configuration {
    /// Create an empty configuration.
    pub fn new() -> Self {
        Self(ParamMap::new())
    }

    /// Wrap an existing parameter map.
    pub fn from_map(map: ParamMap) -> Self {
        Self(map)
    }

    /// Build a configuration from a JSON value, which must be an object.
    pub fn from_value(value: Value) -> Result<Self, ConfigError> {
        match value {
            Value::Object(map) => Ok(Self(map)),
            other => Err(ConfigError::NotAnObject(type_name(&other).to_string())),
        }
    }

    /// Get a parameter value.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Iterate over parameters in declared order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    /// Title, if one is set.
    pub fn title(&self) -> Option<&str> {
        self.0.get(TITLE_KEY).and_then(Value::as_str)
    }

    /// Title for logs and reports; falls back to a placeholder.
    pub fn label(&self) -> String {
        self.title().unwrap_or("<untitled>").to_string()
    }

    /// Plugin name stored under `method`.
    pub fn method(&self) -> Result<&str, ConfigError> {
        match self.0.get(METHOD_KEY) {
            Some(Value::String(name)) => Ok(name),
            Some(other) => Err(ConfigError::InvalidParameter {
                name: METHOD_KEY.to_string(),
                reason: format!("expected a string, got {}", type_name(other)),
            }),
            None => Err(ConfigError::MissingParameter(METHOD_KEY.to_string())),
        }
    }

    /// Return a copy with `key` set to `value`.
    ///
    /// Every `{key}` placeholder in the title is replaced by the value's
    /// string form.
    pub fn with_param(&self, key: &str, value: Value) -> Self {
        let mut map = self.0.clone();
        if let Some(Value::String(title)) = map.get_mut(TITLE_KEY) {
            *title = substitute_placeholder(title, key, &value);
        }
        map.insert(key.to_string(), value);
        Self(map)
    }

    /// Return a copy with `suffix` appended to the title.
    pub fn with_title_suffix(&self, suffix: &str) -> Self {
        let mut map = self.0.clone();
        let title = format!("{}{}", self.title().unwrap_or_default(), suffix);
        map.insert(TITLE_KEY.to_string(), Value::String(title));
        Self(map)
    }

    /// Parameters without the cosmetic `title` field.
    pub fn without_title(&self) -> ParamMap {
        let mut map = self.0.clone();
        map.shift_remove(TITLE_KEY);
        map
    }

    /// Borrow the underlying map.
    pub fn as_map(&self) -> &ParamMap {
        &self.0
    }

    /// Consume into the underlying map.
    pub fn into_map(self) -> ParamMap {
        self.0
    }

    /// Convert to a JSON object value.
    pub fn to_value(&self) -> Value {
        Value::Object(self.0.clone())
    }
}

impl From<ParamMap> for Configuration {
    fn from(map: ParamMap) -> Self {
        Self(map)
    }
}

/// String form of a value as it appears in titles.
///
/// Strings are inserted without quotes, everything else uses its JSON text.
pub fn display_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Replace every `{key}` in `title` by the string form of `value`.
pub fn substitute_placeholder(title: &str, key: &str, value: &Value) -> String {
    title.replace(&format!("{{{key}}}"), &display_value(value))
}

/// Short JSON type name for error messages.
pub(crate) fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Configuration errors.
///
/// Always fatal for the configuration they concern; whether they abort a
/// whole job depends on strict mode.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Configuration must be a JSON object, got {0}")]
    NotAnObject(String),
    #[error("Missing required parameter \"{0}\"")]
    MissingParameter(String),
    #[error("Invalid parameter \"{name}\": {reason}")]
    InvalidParameter { name: String, reason: String },
    #[error("Malformed meta descriptor for \"{key}\": {reason}")]
    MalformedMeta { key: String, reason: String },
    #[error("Malformed tuning specification for \"{key}\": {reason}")]
    MalformedTuning { key: String, reason: String },
    #[error("Unknown {kind} \"{name}\"")]
    UnknownPlugin { kind: &'static str, name: String },
    #[error("Cross-validation fold vector is empty")]
    EmptyFoldVector,
    #[error(
        "Length of cv_folds ({folds}) is different from the {partition} set size ({samples})"
    )]
    FoldLengthMismatch {
        folds: usize,
        samples: usize,
        partition: &'static str,
    },
    #[error("Test set must be empty for cross-validation over the training set, found {0} samples")]
    NonEmptyTestSet(usize),
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn config(value: Value) -> Configuration {
        Configuration::from_value(value).unwrap()
    }

    #[test]
    fn test_with_param_substitutes_title() {
        let base = config(json!({"title": "svm C={C} C2={C}", "C": 1}));
        let updated = base.with_param("C", json!(0.5));

        assert_eq!(updated.title(), Some("svm C=0.5 C2=0.5"));
        assert_eq!(updated.get("C"), Some(&json!(0.5)));
        // Original untouched
        assert_eq!(base.title(), Some("svm C={C} C2={C}"));
    }

    #[test]
    fn test_string_values_unquoted_in_title() {
        let base = config(json!({"title": "kernel={kernel}"}));
        let updated = base.with_param("kernel", json!("rbf"));
        assert_eq!(updated.title(), Some("kernel=rbf"));
    }

    #[test]
    fn test_with_param_keeps_declared_order() {
        let base = config(json!({"b": 1, "a": 2, "title": "t"}));
        let updated = base.with_param("b", json!(3));
        let keys: Vec<_> = updated.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, vec!["b", "a", "title"]);
    }

    #[test]
    fn test_without_title() {
        let base = config(json!({"title": "x", "method": "naive"}));
        let map = base.without_title();
        assert!(!map.contains_key(TITLE_KEY));
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn test_method() {
        assert_eq!(config(json!({"method": "naive"})).method().unwrap(), "naive");
        assert!(matches!(
            config(json!({})).method(),
            Err(ConfigError::MissingParameter(_))
        ));
        assert!(matches!(
            config(json!({"method": 3})).method(),
            Err(ConfigError::InvalidParameter { .. })
        ));
    }

    #[test]
    fn test_from_value_rejects_non_object() {
        assert!(matches!(
            Configuration::from_value(json!([1, 2])),
            Err(ConfigError::NotAnObject(_))
        ));
    }

    #[test]
    fn test_title_suffix() {
        let base = config(json!({"title": "knn"}));
        assert_eq!(base.with_title_suffix(" fold2").title(), Some("knn fold2"));
    }
}
