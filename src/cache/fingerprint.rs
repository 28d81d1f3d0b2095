//! Deterministic cache keys for tool invocations.

use serde_json::Value;
use sha2::{Digest, Sha256};

/// Serializes `value` with object keys sorted lexicographically at every level.
///
/// Array order is significant and kept as is.
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                write_canonical(&map[key], out);
            }
            out.push('}');
        }
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
        scalar => out.push_str(&scalar.to_string()),
    }
}

/// Cache key for `tool` called with `params`: `"{tool}:{sha256 of canonical params}"`.
pub fn fingerprint(tool: &str, params: &Value) -> String {
    let mut hasher = Sha256::new();
    hasher.update(canonical_json(params).as_bytes());
    format!("{}:{:x}", tool, hasher.finalize())
}
