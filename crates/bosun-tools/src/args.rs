// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Typed accessors over dynamic JSON tool arguments, and the pre-dispatch
//! schema check.
//!
//! Tool arguments arrive as untyped JSON.  These helpers keep the
//! extraction code in tools short and the error messages uniform.

use anyhow::{anyhow, bail};
use serde_json::Value;

pub fn required_str<'a>(args: &'a Value, key: &str) -> anyhow::Result<&'a str> {
    args.get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| anyhow!("missing required string argument '{key}'"))
}

pub fn optional_str<'a>(args: &'a Value, key: &str) -> Option<&'a str> {
    args.get(key).and_then(Value::as_str)
}

pub fn required_array<'a>(args: &'a Value, key: &str) -> anyhow::Result<&'a Vec<Value>> {
    args.get(key)
        .and_then(Value::as_array)
        .ok_or_else(|| anyhow!("missing required array argument '{key}'"))
}

pub fn optional_bool(args: &Value, key: &str) -> Option<bool> {
    args.get(key).and_then(Value::as_bool)
}

pub fn optional_u64(args: &Value, key: &str) -> Option<u64> {
    args.get(key).and_then(Value::as_u64)
}

pub fn optional_object<'a>(
    args: &'a Value,
    key: &str,
) -> Option<&'a serde_json::Map<String, Value>> {
    args.get(key).and_then(Value::as_object)
}

/// Validate `args` against a tool's declared JSON-Schema parameters before
/// dispatch: the arguments must be an object, every `required` key must be
/// present, and declared primitive types must match.  This is a shallow
/// structural check; tools still validate their own domain rules.
pub fn check_against_schema(schema: &Value, args: &Value) -> anyhow::Result<()> {
    let Some(args_obj) = args.as_object() else {
        bail!("tool arguments must be a JSON object, got {args}");
    };

    if let Some(required) = schema.get("required").and_then(Value::as_array) {
        for key in required.iter().filter_map(Value::as_str) {
            if !args_obj.contains_key(key) {
                bail!("missing required argument '{key}'");
            }
        }
    }

    if let Some(props) = schema.get("properties").and_then(Value::as_object) {
        for (key, value) in args_obj {
            let Some(declared) = props.get(key) else {
                continue; // unknown keys are tolerated; tools may ignore them
            };
            let Some(expected) = declared.get("type").and_then(Value::as_str) else {
                continue;
            };
            if !type_matches(expected, value) {
                bail!(
                    "argument '{key}' has wrong type: expected {expected}, got {}",
                    type_name(value)
                );
            }
        }
    }

    Ok(())
}

fn type_matches(expected: &str, value: &Value) -> bool {
    match expected {
        "string" => value.is_string(),
        "boolean" => value.is_boolean(),
        "integer" => value.is_i64() || value.is_u64(),
        "number" => value.is_number(),
        "array" => value.is_array(),
        "object" => value.is_object(),
        "null" => value.is_null(),
        _ => true,
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
