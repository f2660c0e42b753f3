//! Argument validation against a tool's declared input schema
//!
//! Only the parts of JSON Schema that tool servers actually rely on are
//! checked: required fields, primitive property types and string enums.
//! Anything else is left for the server to reject.

use crate::Result;
use crate::error::ToolClientError;
use serde_json::{Value, json};

/// Check `arguments` against `schema` before a call leaves the process
///
/// # Example
///
/// ```
/// use toolrelay_client::schema::{object, string, validate_arguments};
/// use serde_json::json;
///
/// let schema = object(json!({"doctype": string(None)}), &["doctype"]);
///
/// assert!(validate_arguments("create_document", &schema, &json!({"doctype": "Invoice"})).is_ok());
/// assert!(validate_arguments("create_document", &schema, &json!({})).is_err());
/// ```
pub fn validate_arguments(tool: &str, schema: &Value, arguments: &Value) -> Result<()> {
    let invalid = |message: String| ToolClientError::Validation {
        tool: tool.to_string(),
        message,
    };

    if !schema.is_object() {
        return Ok(());
    }

    // Servers treat a missing argument object as empty
    let empty = json!({});
    let arguments = if arguments.is_null() { &empty } else { arguments };

    if !validate_basic(arguments, schema) {
        return Err(invalid(format!(
            "expected {}, got {}",
            schema["type"].as_str().unwrap_or("object"),
            type_name(arguments)
        )));
    }

    let Some(fields) = arguments.as_object() else {
        return Ok(());
    };

    if let Some(required) = schema.get("required").and_then(Value::as_array) {
        let missing: Vec<&str> = required
            .iter()
            .filter_map(Value::as_str)
            .filter(|name| fields.get(*name).is_none_or(Value::is_null))
            .collect();

        if !missing.is_empty() {
            return Err(invalid(format!(
                "missing required field(s): {}",
                missing.join(", ")
            )));
        }
    }

    let Some(properties) = schema.get("properties").and_then(Value::as_object) else {
        return Ok(());
    };

    for (name, value) in fields {
        let Some(property) = properties.get(name) else {
            continue;
        };

        if value.is_null() {
            continue;
        }

        if !validate_basic(value, property) {
            return Err(invalid(format!(
                "field '{name}' must be {}, got {}",
                property["type"].as_str().unwrap_or("valid"),
                type_name(value)
            )));
        }

        if let Some(allowed) = property.get("enum").and_then(Value::as_array) {
            if !allowed.contains(value) {
                return Err(invalid(format!(
                    "field '{name}' must be one of {}",
                    Value::Array(allowed.clone())
                )));
            }
        }
    }

    Ok(())
}

/// Validate that a value matches the `type` of a JSON schema
///
/// A schema without a type, or with a type list or unknown type, accepts
/// anything.
pub fn validate_basic(value: &Value, schema: &Value) -> bool {
    let schema_type = match schema.get("type") {
        Some(Value::String(t)) => t.as_str(),
        _ => return true,
    };

    match schema_type {
        "string" => value.is_string(),
        "number" => value.is_number(),
        "integer" => {
            value.is_i64()
                || value.is_u64()
                || value.as_f64().is_some_and(|n| n.is_finite() && n.fract() == 0.0)
        }
        "boolean" => value.is_boolean(),
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
        Value::Number(n) if n.is_f64() => "number",
        Value::Number(_) => "integer",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Create a JSON Schema object type
pub fn object(properties: Value, required: &[&str]) -> Value {
    json!({
        "type": "object",
        "properties": properties,
        "required": required,
    })
}

/// Create a JSON Schema string type
pub fn string(description: Option<&str>) -> Value {
    typed("string", description)
}

/// Create a JSON Schema integer type
pub fn integer(description: Option<&str>) -> Value {
    typed("integer", description)
}

/// Create a JSON Schema boolean type
pub fn boolean(description: Option<&str>) -> Value {
    typed("boolean", description)
}

/// Create an enum schema (string with allowed values)
pub fn enum_string(values: &[&str], description: Option<&str>) -> Value {
    let mut schema = typed("string", description);
    schema["enum"] = json!(values);
    schema
}

fn typed(kind: &str, description: Option<&str>) -> Value {
    match description {
        Some(d) => json!({"type": kind, "description": d}),
        None => json!({"type": kind}),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doctype_schema() -> Value {
        object(
            json!({
                "doctype": string(Some("Document type")),
                "limit": integer(None),
                "draft": boolean(None),
                "order": enum_string(&["asc", "desc"], None),
            }),
            &["doctype"],
        )
    }

    fn message(result: Result<()>) -> String {
        match result {
            Err(ToolClientError::Validation { message, .. }) => message,
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[test]
    fn test_missing_required_field_is_named() {
        let result = validate_arguments("get_list", &doctype_schema(), &json!({}));
        assert!(message(result).contains("doctype"));

        assert!(validate_arguments("get_list", &doctype_schema(), &json!({"doctype": "X"})).is_ok());
    }

    #[test]
    fn test_null_counts_as_missing() {
        let result = validate_arguments("get_list", &doctype_schema(), &json!({"doctype": null}));
        assert!(message(result).contains("doctype"));

        let result = validate_arguments("get_list", &doctype_schema(), &Value::Null);
        assert!(message(result).contains("doctype"));
    }

    #[test]
    fn test_property_types() {
        let schema = doctype_schema();

        let result = validate_arguments("t", &schema, &json!({"doctype": 7}));
        assert!(message(result).contains("'doctype' must be string"));

        let result = validate_arguments("t", &schema, &json!({"doctype": "X", "limit": 1.5}));
        assert!(message(result).contains("'limit'"));

        assert!(
            validate_arguments("t", &schema, &json!({"doctype": "X", "limit": 20, "draft": true}))
                .is_ok()
        );
    }

    #[test]
    fn test_enum_values() {
        let schema = doctype_schema();

        assert!(validate_arguments("t", &schema, &json!({"doctype": "X", "order": "asc"})).is_ok());
        let result = validate_arguments("t", &schema, &json!({"doctype": "X", "order": "up"}));
        assert!(message(result).contains("one of"));
    }

    #[test]
    fn test_unknown_fields_and_loose_schemas_pass() {
        assert!(
            validate_arguments("t", &doctype_schema(), &json!({"doctype": "X", "extra": [1]}))
                .is_ok()
        );
        assert!(validate_arguments("t", &json!({}), &json!({"anything": 1})).is_ok());
        assert!(validate_arguments("t", &Value::Null, &json!("whatever")).is_ok());
    }

    #[test]
    fn test_non_object_arguments_rejected() {
        let result = validate_arguments("t", &doctype_schema(), &json!([1, 2]));
        assert!(message(result).contains("expected object, got array"));
    }

    #[test]
    fn test_validate_basic() {
        assert!(validate_basic(&json!("hello"), &string(None)));
        assert!(!validate_basic(&json!(42), &string(None)));

        assert!(validate_basic(&json!(3), &integer(None)));
        assert!(!validate_basic(&json!(3.5), &integer(None)));
        assert!(validate_basic(&json!(5.0), &integer(None)));
        assert!(!validate_basic(&json!("5"), &integer(None)));

        assert!(validate_basic(&json!(true), &boolean(None)));
        assert!(!validate_basic(&json!(1), &boolean(None)));

        // Type lists are not checked
        assert!(validate_basic(&json!(1), &json!({"type": ["string", "null"]})));
    }
}
