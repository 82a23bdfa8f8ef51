//! Deterministic, order-independent fingerprints.
//!
//! Values are serialized to compact JSON with object keys sorted at every
//! nesting level, then hashed with SHA-256. Two configurations that differ
//! only in declared key order share a fingerprint.

use serde::Serialize;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

use crate::schema::{Configuration, DataArgs};

/// Prefix of dataset fingerprints.
pub const DATA_FINGERPRINT_PREFIX: &str = "data_";

/// Fingerprinting errors.
#[derive(Debug, thiserror::Error)]
pub enum FingerprintError {
    #[error("Value cannot be fingerprinted: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Fingerprint any serializable value, with `prefix` prepended.
pub fn fingerprint<T: Serialize + ?Sized>(value: &T, prefix: &str) -> Result<String, FingerprintError> {
    let canonical = canonical_json(value)?;
    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    Ok(format!("{prefix}{}", hex::encode(hasher.finalize())))
}

/// Compact JSON text with sorted object keys.
pub fn canonical_json<T: Serialize + ?Sized>(value: &T) -> Result<String, FingerprintError> {
    let value = serde_json::to_value(value)?;
    Ok(serde_json::to_string(&sort_keys(value))?)
}

fn sort_keys(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(String, Value)> = map.into_iter().collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            Value::Object(
                entries
                    .into_iter()
                    .map(|(k, v)| (k, sort_keys(v)))
                    .collect::<Map<String, Value>>(),
            )
        }
        Value::Array(items) => Value::Array(items.into_iter().map(sort_keys).collect()),
        other => other,
    }
}

/// Experiment fingerprint of a configuration. The title is cosmetic and
/// left out.
pub fn config_fingerprint(config: &Configuration) -> Result<String, FingerprintError> {
    fingerprint(&config.without_title(), "")
}

/// Fingerprint of the data arguments that shape the prepared dataset.
pub fn data_fingerprint(args: &DataArgs) -> Result<String, FingerprintError> {
    fingerprint(&args.fingerprint_input(), DATA_FINGERPRINT_PREFIX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;
    use std::collections::HashMap;

    #[test]
    fn test_order_independent() {
        let a = json!({"b": 1, "a": {"y": [1, 2], "x": "s"}});
        let b = json!({"a": {"x": "s", "y": [1, 2]}, "b": 1});
        assert_eq!(fingerprint(&a, "").unwrap(), fingerprint(&b, "").unwrap());
    }

    #[test]
    fn test_sensitive_to_values() {
        let a = json!({"lr": 0.5});
        let b = json!({"lr": 0.25});
        let c = json!({"lr": [0.5]});
        let fa = fingerprint(&a, "").unwrap();
        assert_ne!(fa, fingerprint(&b, "").unwrap());
        assert_ne!(fa, fingerprint(&c, "").unwrap());
    }

    #[test]
    fn test_prefix_and_format() {
        let fp = fingerprint(&json!({}), "data_").unwrap();
        assert!(fp.starts_with("data_"));
        let digest = &fp["data_".len()..];
        assert_eq!(digest.len(), 64);
        assert!(digest.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_known_digest() {
        // sha256("{}")
        assert_eq!(
            fingerprint(&json!({}), "").unwrap(),
            "44136fa355b3678a1146ad16f7e8649e94fb4fc21fe77e8310c060f61caaff8a"
        );
    }

    #[test]
    fn test_canonical_json_is_compact_and_sorted() {
        let text = canonical_json(&json!({"b": [ {"d": 1, "c": 2} ], "a": null})).unwrap();
        assert_eq!(text, r#"{"a":null,"b":[{"c":2,"d":1}]}"#);
    }

    #[test]
    fn test_config_fingerprint_ignores_title() {
        let a = Configuration::from_value(json!({"title": "one", "method": "naive"})).unwrap();
        let b = Configuration::from_value(json!({"method": "naive", "title": "two"})).unwrap();
        assert_eq!(config_fingerprint(&a).unwrap(), config_fingerprint(&b).unwrap());
    }

    #[test]
    fn test_non_string_keys_are_errors() {
        let mut map = HashMap::new();
        map.insert((1, 2), "tuple key");
        assert!(fingerprint(&map, "").is_err());
    }

    #[test]
    fn test_data_fingerprint_prefix() {
        let args = DataArgs::new("t", "json_file");
        assert!(data_fingerprint(&args).unwrap().starts_with(DATA_FINGERPRINT_PREFIX));
    }

    proptest! {
        #[test]
        fn prop_insertion_order_irrelevant(
            entries in proptest::collection::btree_map("[a-z]{1,6}", -1000i64..1000, 0..12)
        ) {
            let forward: Map<String, Value> =
                entries.iter().map(|(k, v)| (k.clone(), json!(v))).collect();
            let backward: Map<String, Value> =
                entries.iter().rev().map(|(k, v)| (k.clone(), json!(v))).collect();
            prop_assert_eq!(
                fingerprint(&forward, "").unwrap(),
                fingerprint(&backward, "").unwrap()
            );
        }
    }
}
