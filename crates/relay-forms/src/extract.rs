use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};

static RE_OBJECT: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)\{.*\}").expect("object regex"));

/// Pulls the outermost `{...}` span out of model output and parses it.
/// Anything that is not a JSON object yields an empty map.
pub fn extract_json_object(text: &str) -> Map<String, Value> {
    let Some(span) = RE_OBJECT.find(text) else {
        return Map::new();
    };
    match serde_json::from_str::<Value>(span.as_str()) {
        Ok(Value::Object(map)) => map,
        _ => Map::new(),
    }
}

/// Non-empty string value of `key`, trimmed.
pub(crate) fn str_field<'a>(map: &'a Map<String, Value>, key: &str) -> Option<&'a str> {
    map.get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
}
