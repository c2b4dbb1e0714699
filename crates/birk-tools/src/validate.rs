// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Structural JSON-schema validation for tool parameters.
//!
//! Covers the subset tool schemas actually use: `type`, `properties`,
//! `required`, `enum`, and `items`, applied recursively.  Anything the
//! schema does not constrain passes.

use serde_json::Value;

/// Validate `params` against `schema`.  Returns the first violation as a
/// human-readable path + message, or `Ok(())`.
pub fn validate_parameters(schema: &Value, params: &Value) -> Result<(), String> {
    validate_at(schema, params, "$")
}

fn validate_at(schema: &Value, value: &Value, path: &str) -> Result<(), String> {
    if let Some(expected) = schema.get("type").and_then(Value::as_str) {
        if !type_matches(expected, value) {
            return Err(format!("{path}: expected {expected}, got {}", type_name(value)));
        }
    }

    if let Some(allowed) = schema.get("enum").and_then(Value::as_array) {
        if !allowed.contains(value) {
            return Err(format!("{path}: value not in enum"));
        }
    }

    if let Some(obj) = value.as_object() {
        if let Some(required) = schema.get("required").and_then(Value::as_array) {
            for key in required.iter().filter_map(Value::as_str) {
                if !obj.contains_key(key) {
                    return Err(format!("{path}: missing required property '{key}'"));
                }
            }
        }
        if let Some(props) = schema.get("properties").and_then(Value::as_object) {
            for (key, sub_schema) in props {
                if let Some(sub_value) = obj.get(key) {
                    validate_at(sub_schema, sub_value, &format!("{path}.{key}"))?;
                }
            }
        }
    }

    if let (Some(items), Some(arr)) = (schema.get("items"), value.as_array()) {
        for (i, element) in arr.iter().enumerate() {
            validate_at(items, element, &format!("{path}[{i}]"))?;
        }
    }

    Ok(())
}

fn type_matches(expected: &str, value: &Value) -> bool {
    match expected {
        "object" => value.is_object(),
        "array" => value.is_array(),
        "string" => value.is_string(),
        "boolean" => value.is_boolean(),
        "integer" => value.is_i64() || value.is_u64(),
        "number" => value.is_number(),
        "null" => value.is_null(),
        // Unknown type keyword: do not reject.
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

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn schema() -> Value {
        json!({
            "type": "object",
            "properties": {
                "selector": { "type": "string" },
                "all": { "type": "boolean" },
                "depth": { "type": "integer" },
                "mode": { "type": "string", "enum": ["text", "html"] },
                "tabs": { "type": "array", "items": { "type": "integer" } },
            },
            "required": ["selector"],
        })
    }

    #[test]
    fn valid_params_pass() {
        let params = json!({ "selector": "#main", "all": true, "depth": 2, "mode": "text" });
        assert!(validate_parameters(&schema(), &params).is_ok());
    }

    #[test]
    fn missing_required_property_fails() {
        let err = validate_parameters(&schema(), &json!({ "all": true })).unwrap_err();
        assert!(err.contains("selector"), "{err}");
    }

    #[test]
    fn wrong_type_fails_with_path() {
        let err =
            validate_parameters(&schema(), &json!({ "selector": 42 })).unwrap_err();
        assert!(err.contains("$.selector"), "{err}");
        assert!(err.contains("expected string"), "{err}");
    }

    #[test]
    fn non_object_root_fails_object_schema() {
        let err = validate_parameters(&schema(), &json!("nope")).unwrap_err();
        assert!(err.contains("expected object"), "{err}");
    }

    #[test]
    fn enum_violation_fails() {
        let err = validate_parameters(
            &schema(),
            &json!({ "selector": "#x", "mode": "pdf" }),
        )
        .unwrap_err();
        assert!(err.contains("enum"), "{err}");
    }

    #[test]
    fn array_items_validated_recursively() {
        let err = validate_parameters(
            &schema(),
            &json!({ "selector": "#x", "tabs": [1, "two"] }),
        )
        .unwrap_err();
        assert!(err.contains("$.tabs[1]"), "{err}");
    }

    #[test]
    fn unconstrained_extra_properties_pass() {
        let params = json!({ "selector": "#x", "anything": { "nested": [1, 2] } });
        assert!(validate_parameters(&schema(), &params).is_ok());
    }

    #[test]
    fn integer_rejects_float() {
        let err = validate_parameters(&schema(), &json!({ "selector": "#x", "depth": 1.5 }))
            .unwrap_err();
        assert!(err.contains("expected integer"), "{err}");
    }

    #[test]
    fn empty_schema_accepts_anything() {
        assert!(validate_parameters(&json!({}), &json!({ "a": 1 })).is_ok());
        assert!(validate_parameters(&json!({}), &json!(null)).is_ok());
    }
}
