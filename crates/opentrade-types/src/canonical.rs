//! Canonical payload hashing for audit events and entity content hashes.
//!
//! Canonicalization makes semantically identical payloads hash identically:
//! object keys are sorted recursively, and the values of a fixed set of
//! sensitive field names are replaced with `"[REDACTED]"` before hashing, so
//! a payload differing only in key order or in a redacted secret produces
//! the same digest. Digests are `0x`-prefixed SHA-256 over the canonical
//! JSON string.

use serde::Serialize;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

/// Field names whose values never participate in a hash.
const REDACTED_FIELDS: &[&str] = &[
    "token",
    "access_token",
    "api_key",
    "password",
    "secret",
    "private_key",
    "signing_secret",
];

fn is_redacted(key: &str) -> bool {
    REDACTED_FIELDS.contains(&key)
}

fn sort_and_redact(value: Value) -> Value {
    match value {
        Value::Array(items) => Value::Array(items.into_iter().map(sort_and_redact).collect()),
        Value::Object(map) => {
            let mut entries: Vec<(String, Value)> = map.into_iter().collect();
            entries.sort_by(|(a, _), (b, _)| a.cmp(b));
            let mut sorted = Map::new();
            for (key, val) in entries {
                if is_redacted(&key) {
                    sorted.insert(key, Value::String("[REDACTED]".to_string()));
                } else {
                    sorted.insert(key, sort_and_redact(val));
                }
            }
            Value::Object(sorted)
        }
        other => other,
    }
}

/// Deterministic, redacted JSON string for `value`.
///
/// # Panics
/// Panics only if `value` cannot be represented as JSON, which cannot happen
/// for the plain-data payload types used in this workspace.
#[must_use]
pub fn canonicalize<T: Serialize>(value: &T) -> String {
    let raw = serde_json::to_value(value).expect("payload types are plain data");
    sort_and_redact(raw).to_string()
}

/// `0x`-prefixed SHA-256 of the canonical form of `value`.
#[must_use]
pub fn hash_canonical<T: Serialize>(value: &T) -> String {
    hash_str(&canonicalize(value))
}

/// `0x`-prefixed SHA-256 of a raw string.
#[must_use]
pub fn hash_str(input: &str) -> String {
    let digest = Sha256::digest(input.as_bytes());
    format!("0x{}", hex::encode(digest))
}

/// `sha256:`-prefixed digest used for bearer-token fingerprints.
#[must_use]
pub fn hash_access_token(token: &str) -> String {
    let digest = Sha256::digest(token.as_bytes());
    format!("sha256:{}", hex::encode(digest))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn key_order_is_irrelevant() {
        let a = json!({"b": 1, "a": {"y": 2, "x": 3}});
        let b = json!({"a": {"x": 3, "y": 2}, "b": 1});
        assert_eq!(hash_canonical(&a), hash_canonical(&b));
    }

    #[test]
    fn redacted_values_are_irrelevant() {
        let a = json!({"offer_id": "o1", "access_token": "tok_one"});
        let b = json!({"offer_id": "o1", "access_token": "tok_two"});
        assert_eq!(hash_canonical(&a), hash_canonical(&b));
    }

    #[test]
    fn non_redacted_values_matter() {
        let a = json!({"offer_id": "o1"});
        let b = json!({"offer_id": "o2"});
        assert_ne!(hash_canonical(&a), hash_canonical(&b));
    }

    #[test]
    fn redaction_recurses_into_arrays() {
        let a = json!({"payees": [{"address": "p1", "secret": "s1"}]});
        let b = json!({"payees": [{"secret": "s2", "address": "p1"}]});
        assert_eq!(hash_canonical(&a), hash_canonical(&b));
    }

    #[test]
    fn canonical_string_is_sorted() {
        let value = json!({"z": 1, "a": 2});
        assert_eq!(canonicalize(&value), r#"{"a":2,"z":1}"#);
    }

    #[test]
    fn hash_has_hex_prefix() {
        let hash = hash_canonical(&json!({"k": "v"}));
        assert!(hash.starts_with("0x"));
        assert_eq!(hash.len(), 2 + 64);
    }

    #[test]
    fn access_token_digest_shape() {
        let digest = hash_access_token("tok_abc");
        assert!(digest.starts_with("sha256:"));
        assert_eq!(digest.len(), 7 + 64);
    }
}
