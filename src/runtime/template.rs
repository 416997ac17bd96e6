//! `{{dotted.path}}` placeholder resolution for step parameters
//!
//! Resolution is total: a path that does not exist in the context leaves the
//! placeholder text untouched. A string that is exactly one placeholder is
//! replaced by the raw JSON value, so `"{{order.total}}"` stays a number.
//!
//! Each call is a single pass: text substituted from the context is never
//! scanned again, so a payload field holding `{{secret}}` stays literal.
//! Re-resolving a result is a no-op as long as the substituted context values
//! contain no placeholder text of their own; there is no escape syntax, so a
//! caller that feeds the output back in gets that text expanded on that pass.

use regex::{Captures, Regex};
use serde_json::{Map, Value};
use std::sync::LazyLock;

static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{\{\s*([A-Za-z0-9_\-\.\[\]]+?)\s*\}\}").expect("placeholder regex is valid")
});

/// Resolve every placeholder in a parameter map against `context`.
pub fn resolve_params(params: &Map<String, Value>, context: &Value) -> Map<String, Value> {
    params
        .iter()
        .map(|(key, value)| (key.clone(), resolve_value(value, context)))
        .collect()
}

/// Resolve placeholders anywhere inside a JSON value (strings, arrays, objects).
pub fn resolve_value(value: &Value, context: &Value) -> Value {
    match value {
        Value::String(text) => resolve_string(text, context),
        Value::Array(items) => Value::Array(items.iter().map(|v| resolve_value(v, context)).collect()),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), resolve_value(v, context)))
                .collect(),
        ),
        other => other.clone(),
    }
}

fn resolve_string(text: &str, context: &Value) -> Value {
    // Whole-string placeholder keeps the referenced value's JSON type
    if let Some(caps) = PLACEHOLDER.captures(text) {
        if let Some(whole) = caps.get(0) {
            if whole.start() == 0 && whole.end() == text.len() {
                return match lookup(context, &caps[1]) {
                    Some(found) => found.clone(),
                    None => Value::String(text.to_string()),
                };
            }
        }
    }

    let rendered = PLACEHOLDER.replace_all(text, |caps: &Captures| match lookup(context, &caps[1]) {
        Some(found) => render(found),
        None => caps[0].to_string(),
    });
    Value::String(rendered.into_owned())
}

/// Dotted-path lookup. Numeric segments index into arrays (`items.0.sku`).
pub fn lookup<'a>(context: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.')
        .filter(|segment| !segment.is_empty())
        .try_fold(context, |current, segment| match current {
            Value::Object(map) => map.get(segment),
            Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
            _ => None,
        })
}

fn render(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}
