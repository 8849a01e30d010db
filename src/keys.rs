//! Content-addressed keys for metadata and pipeline records
//!
//! Identical logical content (modulo string-value case) always yields the same
//! key, so a record can be identified without sending it. The canonical text
//! uses the same layout as the platform's Python SDK (`json.dumps` with sorted
//! keys), which keeps keys stable across both SDKs.

use serde_json::Value;
use sha2::{Digest, Sha256};
use std::fmt::Write as _;
use unicode_normalization::UnicodeNormalization;

use crate::error::{CatalystError, Result};

/// Compute the unique key of a JSON object or string
///
/// Objects: top-level string values are NFKC-normalized and lower-cased, keys
/// are kept as-is, and the result is serialized with sorted keys. Strings are
/// normalized directly. Every other JSON type is rejected.
pub fn unique_key(input: &Value) -> Result<String> {
    let canonical = match input {
        Value::Object(map) => {
            let mut entries: Vec<(&String, Value)> = map
                .iter()
                .map(|(k, v)| match v {
                    Value::String(s) => (k, Value::String(normalize(s))),
                    other => (k, other.clone()),
                })
                .collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));

            let mut out = String::from("{");
            for (i, (key, value)) in entries.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                write_string(&mut out, key);
                out.push_str(": ");
                write_canonical(&mut out, value);
            }
            out.push('}');
            out
        }
        Value::String(s) => normalize(s),
        other => {
            return Err(CatalystError::InvalidArgument(format!(
                "unique key input must be an object or a string, got {}",
                json_type_name(other)
            )))
        }
    };

    Ok(sha256_hex(canonical.as_bytes()))
}

/// Lower-hex SHA-256 digest
pub fn sha256_hex(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

fn normalize(input: &str) -> String {
    input.nfkc().collect::<String>().to_lowercase()
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn write_canonical(out: &mut String, value: &Value) {
    match value {
        Value::Null => out.push_str("null"),
        Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                let _ = write!(out, "{}", i);
            } else if let Some(u) = n.as_u64() {
                let _ = write!(out, "{}", u);
            } else if let Some(f) = n.as_f64() {
                write_float(out, f);
            }
        }
        Value::String(s) => write_string(out, s),
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                write_canonical(out, item);
            }
            out.push(']');
        }
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                write_string(out, key);
                out.push_str(": ");
                write_canonical(out, &map[key.as_str()]);
            }
            out.push('}');
        }
    }
}

/// ASCII-only JSON string: everything outside `' '..='~'` is `\u`-escaped,
/// astral chars as surrogate pairs.
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
            ' '..='~' => out.push(c),
            _ => {
                let mut units = [0u16; 2];
                for unit in c.encode_utf16(&mut units) {
                    let _ = write!(out, "\\u{:04x}", unit);
                }
            }
        }
    }
    out.push('"');
}

/// Shortest round-trip repr, fixed notation for exponents in `-4..16`,
/// scientific (`1e+16`, `1.5e-05`) otherwise.
fn write_float(out: &mut String, f: f64) {
    if f.is_sign_negative() {
        out.push('-');
    }
    let sci = format!("{:e}", f.abs());
    let (mantissa, exp) = sci.split_once('e').unwrap_or((sci.as_str(), "0"));
    let exp: i32 = exp.parse().unwrap_or(0);
    let digits: String = mantissa.chars().filter(char::is_ascii_digit).collect();

    if (-4..16).contains(&exp) {
        if exp >= 0 {
            let int_len = exp as usize + 1;
            if digits.len() <= int_len {
                out.push_str(&digits);
                out.extend(std::iter::repeat('0').take(int_len - digits.len()));
                out.push_str(".0");
            } else {
                out.push_str(&digits[..int_len]);
                out.push('.');
                out.push_str(&digits[int_len..]);
            }
        } else {
            out.push_str("0.");
            out.extend(std::iter::repeat('0').take((-exp - 1) as usize));
            out.push_str(&digits);
        }
    } else {
        out.push_str(&digits[..1]);
        if digits.len() > 1 {
            out.push('.');
            out.push_str(&digits[1..]);
        }
        let _ = write!(out, "e{}{:02}", if exp < 0 { '-' } else { '+' }, exp.abs());
    }
}
