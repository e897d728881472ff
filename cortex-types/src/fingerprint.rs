//! Deterministic request fingerprints.
//!
//! A [`Fingerprint`] is the SHA-256 of a canonical JSON rendering of the
//! request-identifying fields. Canonical means object keys are emitted in
//! sorted order at every depth, so two semantically identical requests hash
//! identically regardless of field insertion order.

use serde::Serialize;
use sha2::{Digest, Sha256};
use std::fmt;

/// SHA-256 digest identifying a gateway request for deduplication.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint([u8; 32]);

impl Fingerprint {
    /// Fingerprint any serializable value via canonical JSON.
    pub fn of<T: Serialize>(value: &T) -> Result<Self, serde_json::Error> {
        let json = serde_json::to_value(value)?;
        let mut canonical = String::new();
        write_canonical(&json, &mut canonical);
        let mut hasher = Sha256::new();
        hasher.update(canonical.as_bytes());
        Ok(Self(hasher.finalize().into()))
    }

    /// The raw digest bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Eight hex chars are enough to tell fingerprints apart in logs.
        let hex = self.to_string();
        write!(f, "Fingerprint({})", &hex[..8])
    }
}

/// Render JSON with object keys sorted at every depth. Numbers, strings,
/// and escaping are delegated to serde_json so the output is valid JSON.
fn write_canonical(value: &serde_json::Value, out: &mut String) {
    match value {
        serde_json::Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                // Keys are strings; serde_json escapes them correctly.
                out.push_str(&serde_json::Value::String((*key).clone()).to_string());
                out.push(':');
                write_canonical(&map[*key], out);
            }
            out.push('}');
        }
        serde_json::Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        other => out.push_str(&other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn key_order_does_not_matter() {
        let a = json!({"model": "m-fast", "tenant": "t1", "temperature": 0.5});
        let b = json!({"temperature": 0.5, "tenant": "t1", "model": "m-fast"});
        assert_eq!(Fingerprint::of(&a).unwrap(), Fingerprint::of(&b).unwrap());
    }

    #[test]
    fn nested_objects_are_canonicalized() {
        let a = json!({"outer": {"b": 1, "a": 2}});
        let b = json!({"outer": {"a": 2, "b": 1}});
        assert_eq!(Fingerprint::of(&a).unwrap(), Fingerprint::of(&b).unwrap());
    }

    #[test]
    fn array_order_matters() {
        let a = json!({"messages": ["x", "y"]});
        let b = json!({"messages": ["y", "x"]});
        assert_ne!(Fingerprint::of(&a).unwrap(), Fingerprint::of(&b).unwrap());
    }

    #[test]
    fn value_changes_change_the_hash() {
        let a = json!({"tenant": "t1"});
        let b = json!({"tenant": "t2"});
        assert_ne!(Fingerprint::of(&a).unwrap(), Fingerprint::of(&b).unwrap());
    }

    #[test]
    fn display_is_lowercase_hex() {
        let fp = Fingerprint::of(&json!({"k": "v"})).unwrap();
        let hex = fp.to_string();
        assert_eq!(hex.len(), 64);
        assert!(hex.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }
}
