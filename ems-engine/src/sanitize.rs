//! Sanitisation for audit snapshots.
//!
//! Header names containing authorization/token/secret and body keys
//! ssn/dob (at any depth) are replaced with `***` before anything reaches
//! the audit store.

use serde_json::Value;
use std::collections::BTreeMap;

const MASK: &str = "***";
const SENSITIVE_HEADER_FRAGMENTS: [&str; 3] = ["authorization", "token", "secret"];
const SENSITIVE_BODY_KEYS: [&str; 2] = ["ssn", "dob"];

/// Mask sensitive header values, preserving key spelling
pub fn sanitize_headers(headers: &BTreeMap<String, String>) -> BTreeMap<String, String> {
    headers
        .iter()
        .map(|(name, value)| {
            let lowered = name.to_lowercase();
            if SENSITIVE_HEADER_FRAGMENTS.iter().any(|f| lowered.contains(f)) {
                (name.clone(), MASK.to_string())
            } else {
                (name.clone(), value.clone())
            }
        })
        .collect()
}

/// Recursively mask sensitive body keys
pub fn mask_sensitive(value: &Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(key, v)| {
                    if SENSITIVE_BODY_KEYS.contains(&key.to_lowercase().as_str()) {
                        (key.clone(), Value::String(MASK.to_string()))
                    } else {
                        (key.clone(), mask_sensitive(v))
                    }
                })
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.iter().map(mask_sensitive).collect()),
        other => other.clone(),
    }
}
