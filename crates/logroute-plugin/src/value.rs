//! Typed parameter values and the coercions that produce them

use std::collections::BTreeMap;

use logroute_common::crd::{SecretKeySelector, SecretValueSource};
use serde_json::Value;

use crate::schema::ParamKind;

/// A secret-capable parameter value
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SecretParam {
    /// Literal string written directly in the manifest
    Literal(String),
    /// Reference not yet resolved by the secret injector
    Reference(SecretKeySelector),
    /// Secret value resolved for inline delivery
    Inline(String),
    /// Path of the file the secret is mounted at
    Mount(String),
}

/// A validated, coerced parameter value
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ParamValue {
    /// String (also used for enums and record keys)
    String(String),
    /// Integer
    Int(i64),
    /// Boolean
    Bool(bool),
    /// Duration, keeping the text as written
    Duration {
        /// Total seconds
        seconds: u64,
        /// Normalized text form
        text: String,
    },
    /// Byte size, keeping the text as written
    Size {
        /// Total bytes
        bytes: u64,
        /// Normalized text form
        text: String,
    },
    /// Ordered list of strings
    List(Vec<String>),
    /// Sorted map of strings
    Map(BTreeMap<String, String>),
    /// Secret-capable string
    Secret(SecretParam),
}

/// Parse a duration into seconds.
///
/// Accepts a bare number of seconds ("30") or a sequence of number/unit pairs
/// with units `s`, `m`, `h`, `d` ("1h30m").
pub fn parse_duration(text: &str) -> Result<u64, String> {
    let text = text.trim();
    if text.is_empty() {
        return Err("empty duration".to_string());
    }
    if let Ok(seconds) = text.parse::<u64>() {
        return Ok(seconds);
    }

    let mut total: u64 = 0;
    let mut digits = String::new();
    for c in text.chars() {
        if c.is_ascii_digit() {
            digits.push(c);
            continue;
        }
        let unit = match c {
            's' => 1,
            'm' => 60,
            'h' => 3600,
            'd' => 86400,
            _ => return Err(format!("invalid duration: {text}, use s, m, h or d units")),
        };
        let n = digits
            .parse::<u64>()
            .map_err(|_| format!("invalid duration: {text}, unit without a number"))?;
        total = n
            .checked_mul(unit)
            .and_then(|v| total.checked_add(v))
            .ok_or_else(|| format!("duration out of range: {text}"))?;
        digits.clear();
    }
    if !digits.is_empty() {
        return Err(format!("invalid duration: {text}, trailing number without unit"));
    }
    Ok(total)
}

/// Parse a byte size.
///
/// Accepts a bare number of bytes or a number with a binary unit suffix
/// (`k`, `m`, `g`, `t`, optionally followed by `b`), case-insensitive.
pub fn parse_size(text: &str) -> Result<u64, String> {
    let text = text.trim();
    let lower = text.to_ascii_lowercase();
    let unit_start = lower
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(lower.len());
    let (number, unit) = lower.split_at(unit_start);
    let n = number
        .parse::<u64>()
        .map_err(|_| format!("invalid size: {text}, use k, m, g or t suffix"))?;
    let multiplier: u64 = match unit.trim_end_matches('b') {
        "" => 1,
        "k" => 1 << 10,
        "m" => 1 << 20,
        "g" => 1 << 30,
        "t" => 1 << 40,
        _ => return Err(format!("invalid size: {text}, use k, m, g or t suffix")),
    };
    n.checked_mul(multiplier)
        .ok_or_else(|| format!("size out of range: {text}"))
}

/// Parse a boolean in any of the accepted spellings
pub fn parse_bool(text: &str) -> Result<bool, String> {
    match text.trim().to_ascii_lowercase().as_str() {
        "true" | "yes" | "on" | "1" => Ok(true),
        "false" | "no" | "off" | "0" => Ok(false),
        _ => Err(format!("invalid boolean: {text}")),
    }
}

/// Check that a record key only uses `[A-Za-z0-9_.-]`
pub fn check_record_key(text: &str) -> Result<(), String> {
    if text.is_empty() {
        return Err("record key must not be empty".to_string());
    }
    if let Some(bad) = text
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-')))
    {
        return Err(format!("record key {text:?} contains {bad:?}"));
    }
    Ok(())
}

fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn coerce_map(value: &Value) -> Result<BTreeMap<String, String>, String> {
    match value {
        Value::Object(entries) => entries
            .iter()
            .map(|(k, v)| {
                scalar_to_string(v)
                    .map(|s| (k.clone(), s))
                    .ok_or_else(|| format!("map value for {k} must be a scalar"))
            })
            .collect(),
        _ => Err("expected a map".to_string()),
    }
}

/// Coerce a raw JSON value according to a parameter kind
pub fn coerce(kind: ParamKind, value: &Value) -> Result<ParamValue, String> {
    if let ParamKind::Secret { accepts_path } = kind {
        if let Some(selector) = SecretValueSource::from_value(value) {
            return Ok(ParamValue::Secret(SecretParam::Reference(selector)));
        }
        if accepts_path {
            return Err("must reference a secret through valueFrom.secretKeyRef".to_string());
        }
        return scalar_to_string(value)
            .map(|s| ParamValue::Secret(SecretParam::Literal(s)))
            .ok_or_else(|| "expected a string or a secret reference".to_string());
    }

    if SecretValueSource::from_value(value).is_some() {
        return Err("secret references are only allowed on secret parameters".to_string());
    }

    match kind {
        ParamKind::String => scalar_to_string(value)
            .map(ParamValue::String)
            .ok_or_else(|| "expected a string".to_string()),
        ParamKind::Int => match value {
            Value::Number(n) => n
                .as_i64()
                .map(ParamValue::Int)
                .ok_or_else(|| format!("expected an integer, got {n}")),
            Value::String(s) => s
                .trim()
                .parse::<i64>()
                .map(ParamValue::Int)
                .map_err(|_| format!("expected an integer, got {s:?}")),
            _ => Err("expected an integer".to_string()),
        },
        ParamKind::Bool => match value {
            Value::Bool(b) => Ok(ParamValue::Bool(*b)),
            other => scalar_to_string(other)
                .ok_or_else(|| "expected a boolean".to_string())
                .and_then(|s| parse_bool(&s))
                .map(ParamValue::Bool),
        },
        ParamKind::Duration => {
            let text = scalar_to_string(value).ok_or_else(|| "expected a duration".to_string())?;
            let seconds = parse_duration(&text)?;
            Ok(ParamValue::Duration {
                seconds,
                text: text.trim().to_string(),
            })
        }
        ParamKind::Size => {
            let text = scalar_to_string(value).ok_or_else(|| "expected a size".to_string())?;
            let bytes = parse_size(&text)?;
            Ok(ParamValue::Size {
                bytes,
                text: text.trim().to_string(),
            })
        }
        ParamKind::List => match value {
            Value::Array(items) => items
                .iter()
                .map(|v| scalar_to_string(v).ok_or_else(|| "list items must be scalars".to_string()))
                .collect::<Result<Vec<_>, _>>()
                .map(ParamValue::List),
            Value::String(s) => Ok(ParamValue::List(
                s.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect(),
            )),
            _ => Err("expected a list".to_string()),
        },
        ParamKind::Map => coerce_map(value).map(ParamValue::Map),
        ParamKind::RecordMap => {
            let map = coerce_map(value)?;
            for key in map.keys() {
                check_record_key(key)?;
            }
            Ok(ParamValue::Map(map))
        }
        ParamKind::Enum(allowed) => {
            let text = scalar_to_string(value).ok_or_else(|| "expected a string".to_string())?;
            if allowed.contains(&text.as_str()) {
                Ok(ParamValue::String(text))
            } else {
                Err(format!("{text:?} is not one of {}", allowed.join(", ")))
            }
        }
        ParamKind::RecordKey => {
            let text = scalar_to_string(value).ok_or_else(|| "expected a string".to_string())?;
            check_record_key(&text)?;
            Ok(ParamValue::String(text))
        }
        ParamKind::Secret { .. } => Err("unreachable secret coercion".to_string()),
    }
}
