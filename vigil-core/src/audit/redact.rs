//! Redaction of sensitive values before data leaves the process

use serde_json::Value;

/// Keys whose values never leave the installation
pub const SENSITIVE_FIELDS: &[&str] = &["password", "password_hash", "ssn", "credit_card"];

pub const REDACTED: &str = "[REDACTED]";

/// Replace every sensitive key's value, at any nesting depth, with `[REDACTED]`
pub fn redact(value: &mut Value) {
    match value {
        Value::Object(map) => {
            for (key, inner) in map.iter_mut() {
                if SENSITIVE_FIELDS.contains(&key.as_str()) {
                    *inner = Value::String(REDACTED.to_string());
                } else {
                    redact(inner);
                }
            }
        }
        Value::Array(items) => items.iter_mut().for_each(redact),
        _ => {}
    }
}

/// Redacted copy; the original is left untouched
pub fn redacted(value: &Value) -> Value {
    let mut copy = value.clone();
    redact(&mut copy);
    copy
}
