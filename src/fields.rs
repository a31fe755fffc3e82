//! Lenient accessors over third-party JSON. Missing or mistyped fields yield `None`.

use serde_json::Value;

/// First non-empty string (or number rendered as a string) among `keys`.
pub fn first_text(value: &Value, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| text_at(value.get(*key)?))
}

/// String at a JSON pointer such as `/data/ip`.
pub fn text_at_pointer(value: &Value, pointer: &str) -> Option<String> {
    text_at(value.pointer(pointer)?)
}

fn text_at(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// `AS13335` from `13335`, `"13335"` or `"AS13335"`.
pub fn format_asn(value: &Value) -> Option<String> {
    let raw = match value {
        Value::Number(n) => n.as_u64()?.to_string(),
        Value::String(s) => s.trim().to_string(),
        _ => return None,
    };
    if raw.is_empty() {
        return None;
    }
    if let (Some(prefix), Some(rest)) = (raw.get(..2), raw.get(2..)) {
        if prefix.eq_ignore_ascii_case("as") && !rest.is_empty() {
            return Some(format!("AS{}", rest));
        }
    }
    if raw.chars().all(|c| c.is_ascii_digit()) {
        return Some(format!("AS{}", raw));
    }
    Some(raw)
}

/// Loose truthiness for third-party boolean flags.
///
/// `true`, non-zero numbers and the strings "true"/"yes"/"1" are set; anything
/// else, including a missing field, is unset.
pub fn flag(value: &Value, key: &str) -> bool {
    match value.get(key) {
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
        Some(Value::String(s)) => matches!(s.trim().to_ascii_lowercase().as_str(), "true" | "yes" | "1"),
        _ => false,
    }
}
