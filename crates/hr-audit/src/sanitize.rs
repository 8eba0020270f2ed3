//! Deep-plainify visitor for audit payloads.
//!
//! Anything serializable is first dumped to its plain JSON form; the visitor then walks
//! the closed set of shapes (map, sequence, scalar), redacting secret-bearing keys and
//! bounding depth, so only plain data reaches storage.

use serde::Serialize;
use serde_json::{Map, Value};

/// Nesting deeper than this is replaced by a marker string.
pub const MAX_DEPTH: usize = 32;

const REDACTED: &str = "[REDACTED]";
const TRUNCATED: &str = "[TRUNCATED]";
const SECRET_KEYS: &[&str] = &[
    "password",
    "api_key",
    "apikey",
    "token",
    "secret",
    "authorization",
];

#[derive(Debug, thiserror::Error)]
pub enum SanitizeError {
    #[error("value has no plain representation: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Dump a structured value to plain JSON and sanitize it.
pub fn plainify<T: Serialize + ?Sized>(value: &T) -> Result<Value, SanitizeError> {
    let raw = serde_json::to_value(value)?;
    Ok(sanitize(raw))
}

/// Sanitize an already-plain JSON value.
pub fn sanitize(value: Value) -> Value {
    visit(value, 0)
}

fn visit(value: Value, depth: usize) -> Value {
    match value {
        Value::Object(map) => {
            if depth >= MAX_DEPTH {
                return Value::String(TRUNCATED.to_string());
            }
            let mut out = Map::with_capacity(map.len());
            for (key, v) in map {
                let v = if is_secret_key(&key) {
                    Value::String(REDACTED.to_string())
                } else {
                    visit(v, depth + 1)
                };
                out.insert(key, v);
            }
            Value::Object(out)
        }
        Value::Array(items) => {
            if depth >= MAX_DEPTH {
                return Value::String(TRUNCATED.to_string());
            }
            Value::Array(items.into_iter().map(|v| visit(v, depth + 1)).collect())
        }
        scalar => scalar,
    }
}

fn is_secret_key(key: &str) -> bool {
    let key = key.to_ascii_lowercase();
    SECRET_KEYS
        .iter()
        .any(|s| key == *s || key.ends_with(&format!("_{}", s)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::BTreeMap;

    #[derive(Serialize)]
    struct LeaveDecision {
        request_id: i64,
        approved: bool,
        notes: Vec<String>,
    }

    #[test]
    fn structured_values_become_plain_maps() {
        let v = plainify(&LeaveDecision {
            request_id: 3,
            approved: true,
            notes: vec!["ok".to_string()],
        })
        .unwrap();
        assert_eq!(v, json!({"request_id": 3, "approved": true, "notes": ["ok"]}));
    }

    #[test]
    fn secrets_are_redacted_at_any_depth() {
        let v = sanitize(json!({
            "user": {"name": "a", "password": "hunter2"},
            "headers": [{"Authorization": "Bearer x"}],
            "access_token": "t",
            "tokens_used": 12
        }));
        assert_eq!(v["user"]["password"], REDACTED);
        assert_eq!(v["user"]["name"], "a");
        assert_eq!(v["headers"][0]["Authorization"], REDACTED);
        assert_eq!(v["access_token"], REDACTED);
        assert_eq!(v["tokens_used"], 12);
    }

    #[test]
    fn depth_is_bounded() {
        let mut v = json!(1);
        for _ in 0..(MAX_DEPTH + 5) {
            v = json!({ "n": v });
        }
        let out = sanitize(v);
        let mut cur = &out;
        let mut depth = 0;
        while let Some(next) = cur.get("n") {
            cur = next;
            depth += 1;
        }
        assert_eq!(depth, MAX_DEPTH);
        assert_eq!(cur, &json!(TRUNCATED));
    }

    #[test]
    fn non_string_map_keys_are_an_error() {
        let mut m: BTreeMap<(i32, i32), i32> = BTreeMap::new();
        m.insert((1, 2), 3);
        assert!(plainify(&m).is_err());
    }
}
