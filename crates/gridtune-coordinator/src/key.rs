//! Cache keys and TTL computation for processed requests.

use serde_json::Value;
use sha2::{Digest, Sha256};

/// Complexity score at which the TTL is halved.
const MAX_COMPLEXITY: f64 = 5.0;

/// Deterministic cache key for `payload`.
///
/// With `fields` empty the whole payload is hashed. Otherwise only the
/// named top-level fields are, in the order given; a missing field hashes
/// as `null`. Object keys serialize sorted, so field order inside the
/// payload does not matter.
pub fn cache_key(payload: &Value, fields: &[String]) -> String {
    let mut hasher = Sha256::new();
    if fields.is_empty() {
        hasher.update(payload.to_string().as_bytes());
    } else {
        for field in fields {
            let value = payload.get(field).unwrap_or(&Value::Null);
            hasher.update(field.as_bytes());
            hasher.update(b"=");
            hasher.update(value.to_string().as_bytes());
            hasher.update(b"\n");
        }
    }
    format!("req:{}", hex::encode(hasher.finalize()))
}

/// Rough cost of a payload, `0.0..=5.0`, from its word and character
/// counts.
pub fn complexity_score(payload: &Value) -> f64 {
    let text = match payload {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    let words = text.split_whitespace().count() as f64;
    let chars = text.chars().count() as f64;
    (words * 0.1 + chars * 0.01).min(MAX_COMPLEXITY)
}

/// Multiplier in `[0.5, 1.0]`; larger inputs are cached for less time.
pub fn complexity_factor(payload: &Value) -> f64 {
    1.0 - complexity_score(payload) / (2.0 * MAX_COMPLEXITY)
}

/// `base × confidence × complexity × boost`, at least one second.
///
/// Confidence is clamped to `[0, 1]` (NaN counts as zero), so the result
/// never decreases as confidence grows. The cache clamps the result to its
/// own TTL bounds on insert.
pub fn compute_ttl(base_ttl_seconds: u64, confidence: f64, complexity: f64, boost: f64) -> u64 {
    let confidence = if confidence.is_nan() { 0.0 } else { confidence.clamp(0.0, 1.0) };
    let ttl = base_ttl_seconds as f64 * confidence * complexity * boost.max(1.0);
    (ttl.round() as u64).max(1)
}
