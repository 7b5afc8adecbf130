//! Canonical JSON serialization.
//!
//! Compact output with object keys sorted recursively, independent of how
//! the `serde_json::Map` underneath orders its entries. Integral floats are
//! written as integers, so `1.0` and `1` produce the same text.

use std::fmt::Write as _;

use serde_json::Value;

use super::query::value::number;

pub fn to_canonical_string(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
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
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            out.push('{');
            for (i, (key, item)) in entries.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                let _ = write!(out, "{}:", Value::String(key.clone()));
                write_canonical(item, out);
            }
            out.push('}');
        }
        Value::Number(n) if n.is_f64() => {
            let normalized = n
                .as_f64()
                .and_then(|f| number(f).ok())
                .unwrap_or_else(|| value.clone());
            let _ = write!(out, "{normalized}");
        }
        scalar => {
            let _ = write!(out, "{scalar}");
        }
    }
}
