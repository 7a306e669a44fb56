//! Canonical JSON serialisation and payload fingerprinting.
//!
//! The dedup guard must hash `{a:1, b:2}` and `{b:2, a:1}` identically, so
//! objects are re-built with sorted keys before serialisation regardless of
//! how the value was constructed.

use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// Re-build a JSON value with object keys sorted at every depth
pub fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let sorted: BTreeMap<String, Value> = map
                .iter()
                .map(|(k, v)| (k.clone(), canonicalize(v)))
                .collect();
            Value::Object(sorted.into_iter().collect())
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}

/// Compact canonical JSON string
pub fn canonical_json(value: &Value) -> String {
    canonicalize(value).to_string()
}

/// Hex-encoded sha256 of the canonical JSON form
pub fn fingerprint(value: &Value) -> String {
    let mut hasher = Sha256::new();
    hasher.update(canonical_json(value).as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_key_order_does_not_change_fingerprint() {
        let a: Value = serde_json::from_str(r#"{"a":1,"b":{"x":true,"y":[1,2]}}"#).unwrap();
        let b: Value = serde_json::from_str(r#"{"b":{"y":[1,2],"x":true},"a":1}"#).unwrap();
        assert_eq!(fingerprint(&a), fingerprint(&b));
    }

    #[test]
    fn test_different_payloads_differ() {
        assert_ne!(
            fingerprint(&json!({"amount": "200.00"})),
            fingerprint(&json!({"amount": "200.01"}))
        );
    }

    #[test]
    fn test_array_order_is_significant() {
        assert_ne!(
            fingerprint(&json!({"members": [1, 2]})),
            fingerprint(&json!({"members": [2, 1]}))
        );
    }
}
