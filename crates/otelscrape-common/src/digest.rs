//! Canonical JSON encoding and fingerprint digests.
//!
//! Mirrors the content-hash discipline this codebase already uses for
//! config identity (key-sorted, whitespace-free JSON, SHA-256), applied
//! here to record fingerprinting for dedup.

use sha2::{Digest, Sha256};
use unicode_normalization::UnicodeNormalization;

use serde_json::Value;

/// Recursively normalize a JSON value: object keys sorted, string values
/// normalized to Unicode NFC. Arrays retain order (order is meaningful).
fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut sorted: Vec<(&String, &Value)> = map.iter().collect();
            sorted.sort_by(|a, b| a.0.cmp(b.0));
            let mut out = serde_json::Map::new();
            for (k, v) in sorted {
                out.insert(k.nfc().collect::<String>(), canonicalize(v));
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        Value::String(s) => Value::String(s.nfc().collect::<String>()),
        other => other.clone(),
    }
}

/// Canonical, whitespace-free JSON encoding with key-sorted objects and
/// NFC-normalized strings, reproducible regardless of source key order or
/// surrounding whitespace.
pub fn canonical_json(value: &Value) -> String {
    // `serde_json::to_string` already omits whitespace; canonicalize()
    // handles key ordering and Unicode normalization.
    serde_json::to_string(&canonicalize(value)).unwrap_or_default()
}

/// SHA-256 digest (lowercase hex) of a record's canonical JSON encoding.
pub fn full_record_digest(value: &Value) -> String {
    hex_digest(canonical_json(value).as_bytes())
}

/// SHA-256 digest over the concatenation `field1=value1\x1efield2=value2…`
/// for the given `(path, value)` pairs, in the configured key order.
/// `None` values (absent paths) are rendered as the literal string
/// `<absent>` so their presence still participates in the digest.
pub fn keyed_digest<'a>(pairs: impl Iterator<Item = (&'a str, Option<&'a Value>)>) -> String {
    let mut buf = String::new();
    for (path, value) in pairs {
        if !buf.is_empty() {
            buf.push('\u{1e}');
        }
        buf.push_str(path);
        buf.push('=');
        match value {
            Some(v) => buf.push_str(&canonical_json(v)),
            None => buf.push_str("<absent>"),
        }
    }
    hex_digest(buf.as_bytes())
}

fn hex_digest(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn key_order_invariant() {
        let a = json!({"a": 1, "b": 2});
        let b = json!({"b": 2, "a": 1});
        assert_eq!(full_record_digest(&a), full_record_digest(&b));
    }

    #[test]
    fn different_records_differ() {
        let a = json!({"id": "A"});
        let b = json!({"id": "B"});
        assert_ne!(full_record_digest(&a), full_record_digest(&b));
    }

    #[test]
    fn digest_is_64_lowercase_hex() {
        let h = full_record_digest(&json!({"id": 1}));
        assert_eq!(h.len(), 64);
        assert!(h.chars().all(|c| c.is_ascii_hexdigit() && !c.is_uppercase()));
    }

    #[test]
    fn keyed_digest_order_sensitive() {
        let v1 = json!("x");
        let v2 = json!("y");
        let d1 = keyed_digest(vec![("a", Some(&v1)), ("b", Some(&v2))].into_iter());
        let d2 = keyed_digest(vec![("b", Some(&v2)), ("a", Some(&v1))].into_iter());
        assert_ne!(d1, d2, "key order in the configured path list is significant");
    }

    #[test]
    fn keyed_digest_absent_differs_from_null() {
        let null_v = json!(null);
        let with_null = keyed_digest(vec![("a", Some(&null_v))].into_iter());
        let absent = keyed_digest(vec![("a", None)].into_iter());
        assert_ne!(with_null, absent);
    }
}
