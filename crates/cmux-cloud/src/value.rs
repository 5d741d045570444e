//! Tolerant field access over SDK response JSON.
//!
//! Depending on the endpoint (and API version) Morph returns either flat
//! records (`{"id": ..., "url": ...}`) or wrapped maps
//! (`{"data": {...}}` / `{"attributes": {...}}`). These helpers read a field
//! from whichever shape arrived so callers never pattern-match on wrappers.

use serde_json::Value;

const WRAPPER_KEYS: &[&str] = &["data", "attributes", "instance", "snapshot"];

/// Look up `key` in the object itself or one level down inside a known
/// wrapper object.
pub fn get<'a>(obj: &'a Value, key: &str) -> Option<&'a Value> {
    if let Some(found) = obj.get(key) {
        return Some(found);
    }
    for wrapper in WRAPPER_KEYS {
        if let Some(found) = obj.get(wrapper).and_then(|inner| inner.get(key)) {
            return Some(found);
        }
    }
    None
}

/// String field, accepting only non-empty strings.
pub fn get_str(obj: &Value, key: &str) -> Option<String> {
    match get(obj, key) {
        Some(Value::String(s)) if !s.is_empty() => Some(s.clone()),
        _ => None,
    }
}

/// Port field, accepting either a JSON number or a numeric string.
pub fn get_port(obj: &Value, key: &str) -> Option<u16> {
    match get(obj, key) {
        Some(Value::Number(n)) => n.as_u64().and_then(|p| u16::try_from(p).ok()),
        Some(Value::String(s)) => s.parse().ok(),
        _ => None,
    }
}

/// URL field.
pub fn get_url(obj: &Value, key: &str) -> Option<String> {
    get_str(obj, key)
}
