// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! JSON Type Definition → JSON Schema conversion, plus instance validation.
//!
//! Sub-agent output contracts are written in JTD (a small, unambiguous
//! schema dialect) in agent definition front-matter.  Validation itself is
//! done against JSON Schema, so the contract is converted first.  The
//! conversion is a pure function of its input: same JTD in, same JSON
//! Schema out, no environment involved.

use serde_json::{json, Map, Value};

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum SchemaError {
    #[error("JTD schema must be an object, got {0}")]
    NotAnObject(String),
    #[error("unknown JTD primitive type '{0}'")]
    UnknownType(String),
    #[error("JTD '{0}' form has the wrong shape")]
    MalformedForm(&'static str),
    #[error("JTD schema mixes mutually exclusive forms: {0}")]
    AmbiguousForm(String),
    #[error("schema failed to compile: {0}")]
    Compile(String),
}

/// Convert a JTD document to an equivalent JSON Schema.
///
/// Top-level `definitions` become a `$defs` sibling; `ref` resolves to
/// `#/$defs/<name>`.  `nullable: true` wraps the converted schema in
/// `oneOf: [schema, {type: "null"}]`.
pub fn jtd_to_json_schema(jtd: &Value) -> Result<Value, SchemaError> {
    let obj = jtd
        .as_object()
        .ok_or_else(|| SchemaError::NotAnObject(jtd.to_string()))?;

    let mut schema = convert_form(obj)?;

    if let Some(defs) = obj.get("definitions") {
        let defs_obj = defs
            .as_object()
            .ok_or(SchemaError::MalformedForm("definitions"))?;
        let mut converted = Map::new();
        for (name, sub) in defs_obj {
            let sub_obj = sub
                .as_object()
                .ok_or(SchemaError::MalformedForm("definitions"))?;
            converted.insert(name.clone(), convert_form(sub_obj)?);
        }
        schema
            .as_object_mut()
            .expect("converted schema is always an object")
            .insert("$defs".into(), Value::Object(converted));
    }

    Ok(schema)
}

/// Validate `instance` against a JSON Schema.
///
/// Returns the list of human-readable validation errors (instance path +
/// message), empty meaning valid.
pub fn validate(schema: &Value, instance: &Value) -> Result<(), Vec<String>> {
    let compiled = match jsonschema::JSONSchema::compile(schema) {
        Ok(c) => c,
        Err(e) => return Err(vec![format!("schema failed to compile: {e}")]),
    };
    let result = match compiled.validate(instance) {
        Ok(()) => Ok(()),
        Err(errors) => Err(errors
            .map(|e| {
                let path = e.instance_path.to_string();
                if path.is_empty() {
                    e.to_string()
                } else {
                    format!("{path}: {e}")
                }
            })
            .collect()),
    };
    result
}

// ─── Conversion ──────────────────────────────────────────────────────────────

const FORM_KEYS: &[&str] = &[
    "type",
    "enum",
    "elements",
    "values",
    "properties",
    "optionalProperties",
    "discriminator",
    "ref",
];

fn convert_form(obj: &Map<String, Value>) -> Result<Value, SchemaError> {
    let present: Vec<&str> = FORM_KEYS
        .iter()
        .copied()
        .filter(|k| obj.contains_key(*k))
        .collect();
    // properties + optionalProperties are one combined form; discriminator
    // requires mapping.  Everything else is mutually exclusive.
    let distinct: Vec<&str> = present
        .iter()
        .copied()
        .filter(|k| *k != "optionalProperties")
        .collect();
    if distinct.len() > 1 {
        return Err(SchemaError::AmbiguousForm(distinct.join("+")));
    }

    let mut schema = if let Some(t) = obj.get("type") {
        convert_type(t)?
    } else if let Some(e) = obj.get("enum") {
        let variants = e.as_array().ok_or(SchemaError::MalformedForm("enum"))?;
        json!({ "type": "string", "enum": variants })
    } else if let Some(items) = obj.get("elements") {
        let items_obj = items
            .as_object()
            .ok_or(SchemaError::MalformedForm("elements"))?;
        json!({ "type": "array", "items": convert_form(items_obj)? })
    } else if let Some(values) = obj.get("values") {
        let values_obj = values
            .as_object()
            .ok_or(SchemaError::MalformedForm("values"))?;
        json!({ "type": "object", "additionalProperties": convert_form(values_obj)? })
    } else if obj.contains_key("properties") || obj.contains_key("optionalProperties") {
        convert_properties(obj)?
    } else if obj.contains_key("discriminator") {
        convert_discriminator(obj)?
    } else if let Some(r) = obj.get("ref") {
        let name = r.as_str().ok_or(SchemaError::MalformedForm("ref"))?;
        json!({ "$ref": format!("#/$defs/{name}") })
    } else {
        // The empty form accepts any value.
        json!({})
    };

    if obj.get("nullable").and_then(Value::as_bool) == Some(true) {
        schema = json!({ "oneOf": [schema, { "type": "null" }] });
    }

    Ok(schema)
}

fn convert_type(t: &Value) -> Result<Value, SchemaError> {
    let name = t
        .as_str()
        .ok_or(SchemaError::MalformedForm("type"))?;
    let converted = match name {
        "boolean" => json!({ "type": "boolean" }),
        "string" => json!({ "type": "string" }),
        "timestamp" => json!({ "type": "string", "format": "date-time" }),
        "float32" | "float64" => json!({ "type": "number" }),
        "int8" | "uint8" | "int16" | "uint16" | "int32" | "uint32" => {
            json!({ "type": "integer" })
        }
        other => return Err(SchemaError::UnknownType(other.to_string())),
    };
    Ok(converted)
}

fn convert_properties(obj: &Map<String, Value>) -> Result<Value, SchemaError> {
    let empty = Map::new();
    let required_props = match obj.get("properties") {
        Some(v) => v
            .as_object()
            .ok_or(SchemaError::MalformedForm("properties"))?,
        None => &empty,
    };
    let optional_props = match obj.get("optionalProperties") {
        Some(v) => v
            .as_object()
            .ok_or(SchemaError::MalformedForm("optionalProperties"))?,
        None => &empty,
    };

    let mut props = Map::new();
    for (key, sub) in required_props.iter().chain(optional_props.iter()) {
        let sub_obj = sub
            .as_object()
            .ok_or(SchemaError::MalformedForm("properties"))?;
        props.insert(key.clone(), convert_form(sub_obj)?);
    }
    let required: Vec<&String> = required_props.keys().collect();

    Ok(json!({
        "type": "object",
        "properties": props,
        "required": required,
        "additionalProperties": false,
    }))
}

fn convert_discriminator(obj: &Map<String, Value>) -> Result<Value, SchemaError> {
    let tag = obj
        .get("discriminator")
        .and_then(Value::as_str)
        .ok_or(SchemaError::MalformedForm("discriminator"))?;
    let mapping = obj
        .get("mapping")
        .and_then(Value::as_object)
        .ok_or(SchemaError::MalformedForm("discriminator"))?;

    let mut branches = Vec::with_capacity(mapping.len());
    for (key, sub) in mapping {
        let sub_obj = sub
            .as_object()
            .ok_or(SchemaError::MalformedForm("discriminator"))?;
        let mut branch = convert_form(sub_obj)?;
        let branch_obj = branch
            .as_object_mut()
            .expect("converted schema is always an object");
        // Merge the tag as a literal-const property and add it to required.
        branch_obj
            .entry("properties")
            .or_insert_with(|| Value::Object(Map::new()))
            .as_object_mut()
            .ok_or(SchemaError::MalformedForm("discriminator"))?
            .insert(tag.to_string(), json!({ "const": key }));
        let required = branch_obj
            .entry("required")
            .or_insert_with(|| Value::Array(Vec::new()));
        required
            .as_array_mut()
            .ok_or(SchemaError::MalformedForm("discriminator"))?
            .push(Value::String(tag.to_string()));
        branches.push(branch);
    }

    Ok(json!({ "oneOf": branches }))
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_form_accepts_anything() {
        let s = jtd_to_json_schema(&json!({})).unwrap();
        assert_eq!(s, json!({}));
        assert!(validate(&s, &json!(42)).is_ok());
        assert!(validate(&s, &json!({"x": []})).is_ok());
    }

    #[test]
    fn primitive_types_map() {
        assert_eq!(
            jtd_to_json_schema(&json!({"type": "boolean"})).unwrap(),
            json!({"type": "boolean"})
        );
        assert_eq!(
            jtd_to_json_schema(&json!({"type": "string"})).unwrap(),
            json!({"type": "string"})
        );
        assert_eq!(
            jtd_to_json_schema(&json!({"type": "timestamp"})).unwrap(),
            json!({"type": "string", "format": "date-time"})
        );
        assert_eq!(
            jtd_to_json_schema(&json!({"type": "float64"})).unwrap(),
            json!({"type": "number"})
        );
        assert_eq!(
            jtd_to_json_schema(&json!({"type": "uint32"})).unwrap(),
            json!({"type": "integer"})
        );
    }

    #[test]
    fn unknown_type_is_error() {
        assert_eq!(
            jtd_to_json_schema(&json!({"type": "quaternion"})),
            Err(SchemaError::UnknownType("quaternion".into()))
        );
    }

    #[test]
    fn enum_form_maps_to_string_enum() {
        let s = jtd_to_json_schema(&json!({"enum": ["red", "green"]})).unwrap();
        assert_eq!(s, json!({"type": "string", "enum": ["red", "green"]}));
        assert!(validate(&s, &json!("red")).is_ok());
        assert!(validate(&s, &json!("blue")).is_err());
    }

    #[test]
    fn elements_form_maps_to_array() {
        let s = jtd_to_json_schema(&json!({"elements": {"type": "string"}})).unwrap();
        assert_eq!(s, json!({"type": "array", "items": {"type": "string"}}));
    }

    #[test]
    fn values_form_maps_to_additional_properties() {
        let s = jtd_to_json_schema(&json!({"values": {"type": "int32"}})).unwrap();
        assert_eq!(
            s,
            json!({"type": "object", "additionalProperties": {"type": "integer"}})
        );
    }

    #[test]
    fn properties_form_requires_exactly_the_required_keys() {
        let s = jtd_to_json_schema(&json!({
            "properties": { "name": {"type": "string"} },
            "optionalProperties": { "age": {"type": "uint8"} }
        }))
        .unwrap();

        assert!(validate(&s, &json!({"name": "x"})).is_ok());
        assert!(validate(&s, &json!({"name": "x", "age": 3})).is_ok());
        // missing required key
        assert!(validate(&s, &json!({"age": 3})).is_err());
        // additionalProperties: false
        assert!(validate(&s, &json!({"name": "x", "extra": true})).is_err());
    }

    #[test]
    fn discriminator_merges_tag_into_branches() {
        let s = jtd_to_json_schema(&json!({
            "discriminator": "event",
            "mapping": {
                "opened": { "properties": { "at": {"type": "timestamp"} } },
                "closed": { "properties": {} }
            }
        }))
        .unwrap();

        assert!(validate(
            &s,
            &json!({"event": "opened", "at": "2026-01-01T00:00:00Z"})
        )
        .is_ok());
        assert!(validate(&s, &json!({"event": "closed"})).is_ok());
        // unknown tag value matches no branch
        assert!(validate(&s, &json!({"event": "reopened"})).is_err());
        // tag missing entirely
        assert!(validate(&s, &json!({"at": "2026-01-01T00:00:00Z"})).is_err());
    }

    #[test]
    fn ref_resolves_into_defs() {
        let s = jtd_to_json_schema(&json!({
            "definitions": { "coord": { "properties": { "x": {"type": "float64"} } } },
            "elements": { "ref": "coord" }
        }))
        .unwrap();
        assert_eq!(s["items"]["$ref"], json!("#/$defs/coord"));
        assert!(s["$defs"]["coord"].is_object());
        assert!(validate(&s, &json!([{"x": 1.5}])).is_ok());
        assert!(validate(&s, &json!([{"x": "no"}])).is_err());
    }

    #[test]
    fn nullable_wraps_in_one_of() {
        let s = jtd_to_json_schema(&json!({"type": "string", "nullable": true})).unwrap();
        assert_eq!(s, json!({"oneOf": [{"type": "string"}, {"type": "null"}]}));
        assert!(validate(&s, &json!(null)).is_ok());
        assert!(validate(&s, &json!("ok")).is_ok());
        assert!(validate(&s, &json!(5)).is_err());
    }

    #[test]
    fn mixed_forms_are_rejected() {
        let err = jtd_to_json_schema(&json!({
            "type": "string",
            "enum": ["a"]
        }))
        .unwrap_err();
        assert!(matches!(err, SchemaError::AmbiguousForm(_)));
    }

    #[test]
    fn conversion_is_deterministic() {
        let jtd = json!({
            "definitions": { "pt": { "properties": { "x": {"type": "int32"}, "y": {"type": "int32"} } } },
            "discriminator": "kind",
            "mapping": {
                "point": { "properties": { "at": { "ref": "pt" } } },
                "none": { "properties": {} }
            }
        });
        let a = jtd_to_json_schema(&jtd).unwrap();
        let b = jtd_to_json_schema(&jtd).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn validate_reports_instance_paths() {
        let s = jtd_to_json_schema(&json!({
            "properties": { "n": {"type": "uint32"} }
        }))
        .unwrap();
        let errors = validate(&s, &json!({"n": "five"})).unwrap_err();
        assert!(!errors.is_empty());
        assert!(errors[0].contains("/n"), "path missing in: {}", errors[0]);
    }
}
