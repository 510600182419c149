//! Deterministic fingerprints for synthesized narration.
//!
//! A key must be stable across callers: two requests with the same text,
//! voice and prosody settings always collide, no matter what order the
//! settings object was assembled in. Settings are therefore canonicalized
//! (recursively sorted keys, serde's stable number formatting) before
//! hashing.

use std::collections::BTreeMap;
use std::fmt;

use serde_json::Value;
use sha2::{Digest, Sha256};

/// Content-addressed cache key: SHA-256 hex digest over
/// `text | voice id | canonical settings JSON`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Derive the cache key for one synthesis request. Pure and deterministic.
pub fn compute_key(text: &str, voice_id: &str, settings: &Value) -> CacheKey {
    let mut canonical = String::new();
    write_canonical(settings, &mut canonical);

    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    hasher.update(b"|");
    hasher.update(voice_id.as_bytes());
    hasher.update(b"|");
    hasher.update(canonical.as_bytes());

    let digest = hasher.finalize();
    let mut hex = String::with_capacity(digest.len() * 2);
    for byte in digest {
        use fmt::Write;
        let _ = write!(hex, "{byte:02x}");
    }
    CacheKey(hex)
}

/// Serialize `value` with object keys sorted at every depth.
fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Null => out.push_str("null"),
        Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        Value::Number(n) => out.push_str(&n.to_string()),
        Value::String(s) => write_escaped(s, out),
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        Value::Object(map) => {
            // BTreeMap gives the sorted iteration order regardless of how
            // serde_json stored the object.
            let sorted: BTreeMap<&String, &Value> = map.iter().collect();
            out.push('{');
            for (i, (key, item)) in sorted.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_escaped(key, out);
                out.push(':');
                write_canonical(item, out);
            }
            out.push('}');
        }
    }
}

fn write_escaped(s: &str, out: &mut String) {
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if (c as u32) < 0x20 => {
                use fmt::Write;
                let _ = write!(out, "\\u{:04x}", c as u32);
            }
            c => out.push(c),
        }
    }
    out.push('"');
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn identical_requests_collide() {
        let settings = json!({"stability": 0.5, "style": 0.2});
        let a = compute_key("Hello", "v1", &settings);
        let b = compute_key("Hello", "v1", &settings);
        assert_eq!(a, b);
    }

    #[test]
    fn key_order_does_not_matter() {
        let a: Value = serde_json::from_str(r#"{"stability":0.5,"style":0.2,"speed":1.0}"#).unwrap();
        let b: Value = serde_json::from_str(r#"{"speed":1.0,"style":0.2,"stability":0.5}"#).unwrap();
        assert_eq!(compute_key("text", "v1", &a), compute_key("text", "v1", &b));
    }

    #[test]
    fn nested_objects_canonicalized() {
        let a: Value =
            serde_json::from_str(r#"{"prosody":{"rate":1.1,"pitch":-2},"voice":"warm"}"#).unwrap();
        let b: Value =
            serde_json::from_str(r#"{"voice":"warm","prosody":{"pitch":-2,"rate":1.1}}"#).unwrap();
        assert_eq!(compute_key("t", "v", &a), compute_key("t", "v", &b));
    }

    #[test]
    fn any_input_change_changes_the_key() {
        let settings = json!({"stability": 0.5});
        let base = compute_key("Hello", "v1", &settings);
        assert_ne!(base, compute_key("Hello!", "v1", &settings));
        assert_ne!(base, compute_key("Hello", "v2", &settings));
        assert_ne!(base, compute_key("Hello", "v1", &json!({"stability": 0.6})));
    }

    #[test]
    fn key_is_hex_sha256() {
        let key = compute_key("Hello", "v1", &json!({}));
        assert_eq!(key.as_str().len(), 64);
        assert!(key.as_str().chars().all(|c| c.is_ascii_hexdigit()));
    }
}
