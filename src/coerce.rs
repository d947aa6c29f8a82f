//! Recursive decoding of strings that hold serialized JSON.
//!
//! LLM replies routinely nest JSON inside JSON strings, sometimes several
//! levels deep. `coerce` unwraps every such string it can and leaves the
//! rest untouched; it never fails.

use std::sync::OnceLock;

use regex::Regex;
use serde_json::Value;

use crate::models::Summary;

fn json_shape() -> Option<&'static Regex> {
    static SHAPE: OnceLock<Option<Regex>> = OnceLock::new();
    SHAPE
        .get_or_init(|| Regex::new(r"(?s)^(\[.*\]|\{.*\})$").ok())
        .as_ref()
}

/// Returns true when the trimmed text is bracketed like a JSON array or object.
pub fn looks_like_json(text: &str) -> bool {
    json_shape().is_some_and(|re| re.is_match(text.trim()))
}

pub fn coerce(value: Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(map.into_iter().map(|(k, v)| (k, coerce(v))).collect()),
        Value::Array(items) => Value::Array(items.into_iter().map(coerce).collect()),
        Value::String(text) => coerce_str(text),
        other => other,
    }
}

fn coerce_str(text: String) -> Value {
    if !looks_like_json(&text) {
        return Value::String(text);
    }
    match serde_json::from_str::<Value>(text.trim()) {
        Ok(parsed) => coerce(parsed),
        Err(_) => Value::String(text),
    }
}

/// Repairs an LLM reply into a structured summary when it decodes to an object.
pub fn parse_summary(text: &str) -> Summary {
    match coerce(Value::String(text.to_string())) {
        Value::Object(map) => Summary::Structured(map),
        _ => Summary::Raw(text.to_string()),
    }
}
