use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};

static SENSITIVE_KEY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)(key|token|secret|password|passwd|credential)").expect("sensitive key pattern is valid"));

/// Returns a copy of `value` where every mapping entry whose key looks like a
/// secret is replaced by `<redacted>`. Used before context is written to logs.
pub fn redact_value(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut redacted = Map::with_capacity(map.len());
            for (key, entry) in map {
                let replacement = if SENSITIVE_KEY.is_match(key) && !entry.is_object() {
                    Value::String("<redacted>".into())
                } else {
                    redact_value(entry)
                };
                redacted.insert(key.clone(), replacement);
            }
            Value::Object(redacted)
        }
        Value::Array(items) => Value::Array(items.iter().map(redact_value).collect()),
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn redacts_secret_looking_keys_at_any_depth() {
        let value = json!({
            "owner": "acme",
            "api_token": "abc",
            "db": {"password": "hunter2", "host": "localhost"},
            "items": [{"secret_key": 1}]
        });
        assert_eq!(
            redact_value(&value),
            json!({
                "owner": "acme",
                "api_token": "<redacted>",
                "db": {"password": "<redacted>", "host": "localhost"},
                "items": [{"secret_key": "<redacted>"}]
            })
        );
    }
}
