//! Canonical JSON encoding
//!
//! Every hash and every signature is computed over this encoding, so it must
//! be byte-identical on every peer: object keys sorted by UTF-16 code units,
//! no insignificant whitespace, minimal string escaping, integer numbers only.

use serde::Serialize;
use serde_json::Value;
use std::cmp::Ordering;
use thiserror::Error;

/// Canonicalization errors
#[derive(Debug, Error)]
pub enum CanonicalError {
    #[error("value is not representable as JSON: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("non-integer number {0} has no canonical form")]
    NonInteger(String),
}

/// Encode a serializable value as canonical JSON
pub fn canonicalize<T: Serialize + ?Sized>(value: &T) -> Result<String, CanonicalError> {
    let value = serde_json::to_value(value)?;
    canonicalize_value(&value)
}

/// Encode an already-parsed JSON value as canonical JSON
pub fn canonicalize_value(value: &Value) -> Result<String, CanonicalError> {
    check_integers(value)?;
    Ok(canonical_string(value))
}

/// Encode a value whose numbers are all integers.
///
/// Numbers are written as they are; values from untrusted input go through
/// `canonicalize_value`, which rejects fractions first.
pub fn canonical_string(value: &Value) -> String {
    let mut out = String::new();
    write_value(&mut out, value);
    out
}

fn check_integers(value: &Value) -> Result<(), CanonicalError> {
    match value {
        Value::Number(n) if !(n.is_u64() || n.is_i64()) => {
            Err(CanonicalError::NonInteger(n.to_string()))
        }
        Value::Array(items) => items.iter().try_for_each(check_integers),
        Value::Object(map) => map.values().try_for_each(check_integers),
        _ => Ok(()),
    }
}

fn write_value(out: &mut String, value: &Value) {
    match value {
        Value::Null => out.push_str("null"),
        Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        Value::Number(n) => out.push_str(&n.to_string()),
        Value::String(s) => write_string(out, s),
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_value(out, item);
            }
            out.push(']');
        }
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by(|(a, _), (b, _)| utf16_cmp(a, b));
            out.push('{');
            for (i, (key, item)) in entries.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_string(out, key);
                out.push(':');
                write_value(out, item);
            }
            out.push('}');
        }
    }
}

/// Minimal escaping: quote, backslash and control characters only
fn write_string(out: &mut String, s: &str) {
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            '\u{08}' => out.push_str("\\b"),
            '\u{0c}' => out.push_str("\\f"),
            c if c < ' ' => out.push_str(&format!("\\u{:04x}", c as u32)),
            c => out.push(c),
        }
    }
    out.push('"');
}

fn utf16_cmp(a: &str, b: &str) -> Ordering {
    a.encode_utf16().cmp(b.encode_utf16())
}
