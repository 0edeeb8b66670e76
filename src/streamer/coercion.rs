//! Typed coercion for CSV field values: attempt a floating
//! point parse, then a boolean parse, and fall back to the original
//! string. Order matters — a field like `"1"` is coerced to the number
//! `1.0`, not the boolean `true`, because the float branch runs first.

use serde_json::Value;

pub fn coerce_field(raw: &str) -> Value {
    let trimmed = raw.trim();
    if let Ok(f) = trimmed.parse::<f64>() {
        if let Some(n) = serde_json::Number::from_f64(f) {
            return Value::Number(n);
        }
    }
    match trimmed.to_ascii_lowercase().as_str() {
        "true" | "yes" => return Value::Bool(true),
        "false" | "no" => return Value::Bool(false),
        _ => {}
    }
    Value::String(raw.to_string())
}
