//! Dots are not allowed in stored attribute names; they are escaped as `#dot;`.
//!
//! | Function            | Input                | Output                  |
//! |---------------------|----------------------|-------------------------|
//! | `escape_dot(s)`     | `"example.com"`      | `"example#dot;com"`     |
//! | `unescape_dot(v)`   | `{"a#dot;b": 1}`     | `{"a.b": 1}`            |

use serde_json::{Map, Value};

const DOT_ESCAPE: &str = "#dot;";

pub fn escape_dot(raw: &str) -> String {
    raw.replace('.', DOT_ESCAPE)
}

/// Restore escaped dots in the keys of every nested object.
///
/// Only object keys are rewritten; arrays and scalar values are returned unchanged.
pub fn unescape_dot(value: &Value) -> Value {
    match value {
        Value::Object(object) => {
            let restored: Map<String, Value> = object
                .iter()
                .map(|(key, nested)| (key.replace(DOT_ESCAPE, "."), unescape_dot(nested)))
                .collect();
            Value::Object(restored)
        }
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn escapes_every_dot() {
        assert_eq!(escape_dot("a.b.c"), "a#dot;b#dot;c");
        assert_eq!(escape_dot("plain"), "plain");
    }

    #[test]
    fn unescapes_nested_object_keys() {
        let stored = json!({
            "example#dot;com": { "www#dot;example#dot;com": 3 },
            "tags": [{ "a#dot;b": 1 }],
            "note": "keep#dot;value",
        });
        let restored = unescape_dot(&stored);
        assert_eq!(restored["example.com"]["www.example.com"], json!(3));
        assert_eq!(restored["tags"], json!([{ "a#dot;b": 1 }]));
        assert_eq!(restored["note"], json!("keep#dot;value"));
    }

    #[test]
    fn escape_and_unescape_agree_on_keys() {
        let key = escape_dot("db.perf.items");
        let restored = unescape_dot(&json!({ key: true }));
        assert_eq!(restored, json!({ "db.perf.items": true }));
    }
}
