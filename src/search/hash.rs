//! Deterministic request fingerprints, used as cache and session-tracking
//! keys.

use serde_json::Value;
use sha2::{Digest, Sha256};

/// Request fields that must not influence the fingerprint: they vary between
/// otherwise-identical requests (routing hints, not query content).
const VOLATILE_FIELDS: &[&str] = &["preference"];

/// Fingerprint of a request's normalized parameters plus its session id.
///
/// Two requests hash equal iff they would produce the same results within the
/// same session. Volatile routing fields are stripped before hashing.
/// `serde_json` keeps object keys sorted, so serialization is canonical and
/// key order in the input does not matter.
pub fn create_request_hash(params: &Value, session_id: &str) -> String {
    let normalized = strip_volatile(params);
    let mut hasher = Sha256::new();
    hasher.update(normalized.to_string().as_bytes());
    hasher.update(session_id.as_bytes());
    hex::encode(hasher.finalize())
}

fn strip_volatile(params: &Value) -> Value {
    match params {
        Value::Object(map) => {
            let filtered: serde_json::Map<String, Value> = map
                .iter()
                .filter(|(key, _)| !VOLATILE_FIELDS.contains(&key.as_str()))
                .map(|(key, value)| (key.clone(), value.clone()))
                .collect();
            Value::Object(filtered)
        }
        other => other.clone(),
    }
}
