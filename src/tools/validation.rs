//! Validate tool call arguments against JSON Schema before execution.

use serde_json::Value;

/// Validate tool arguments against a JSON Schema.
///
/// Supports the subset tool schemas use: `type`, `required`, `properties`,
/// `additionalProperties: false`, `enum`, `minLength`/`maxLength`,
/// `minimum`/`maximum`, `items` and `maxItems`, recursing into nested objects
/// and arrays. Returns `Err(message)` describing the first violation found.
pub fn validate_arguments(args: &Value, schema: &Value) -> Result<(), String> {
    validate_at("arguments", args, schema)
}

fn validate_at(path: &str, value: &Value, schema: &Value) -> Result<(), String> {
    if let Some(expected_type) = schema.get("type").and_then(|v| v.as_str()) {
        if !value_matches_type(value, expected_type) {
            return Err(if path == "arguments" {
                format!("expected {expected_type} arguments, got {}", json_type_name(value))
            } else {
                format!(
                    "field '{path}' expected type '{expected_type}', got {}",
                    json_type_name(value)
                )
            });
        }
    }

    if let Some(allowed) = schema.get("enum").and_then(|v| v.as_array()) {
        if !allowed.contains(value) {
            return Err(format!("field '{path}' has a value outside the allowed set"));
        }
    }

    match value {
        Value::String(s) => check_string_bounds(path, s, schema)?,
        Value::Number(n) => check_number_bounds(path, n.as_f64(), schema)?,
        Value::Array(items) => {
            if let Some(max) = schema.get("maxItems").and_then(|v| v.as_u64()) {
                if items.len() as u64 > max {
                    return Err(format!("field '{path}' has more than {max} items"));
                }
            }
            if let Some(item_schema) = schema.get("items") {
                for (i, item) in items.iter().enumerate() {
                    validate_at(&format!("{path}[{i}]"), item, item_schema)?;
                }
            }
        }
        Value::Object(obj) => validate_object(path, obj, schema)?,
        _ => {}
    }

    Ok(())
}

fn validate_object(
    path: &str,
    obj: &serde_json::Map<String, Value>,
    schema: &Value,
) -> Result<(), String> {
    if let Some(required) = schema.get("required").and_then(|v| v.as_array()) {
        for field in required {
            if let Some(name) = field.as_str() {
                if !obj.contains_key(name) {
                    return Err(format!("missing required field '{}'", child(path, name)));
                }
            }
        }
    }

    let properties = schema.get("properties").and_then(|v| v.as_object());
    let closed = schema
        .get("additionalProperties")
        .and_then(|v| v.as_bool())
        .is_some_and(|allowed| !allowed);

    for (key, value) in obj {
        match properties.and_then(|p| p.get(key)) {
            Some(prop_schema) => validate_at(&child(path, key), value, prop_schema)?,
            None if closed => {
                return Err(format!("unknown field '{}'", child(path, key)));
            }
            None => {}
        }
    }

    Ok(())
}

fn check_string_bounds(path: &str, s: &str, schema: &Value) -> Result<(), String> {
    let len = s.chars().count() as u64;
    if let Some(min) = schema.get("minLength").and_then(|v| v.as_u64()) {
        if len < min {
            return Err(format!("field '{path}' is shorter than {min} characters"));
        }
    }
    if let Some(max) = schema.get("maxLength").and_then(|v| v.as_u64()) {
        if len > max {
            return Err(format!("field '{path}' is longer than {max} characters"));
        }
    }
    Ok(())
}

fn check_number_bounds(path: &str, n: Option<f64>, schema: &Value) -> Result<(), String> {
    let Some(n) = n else {
        return Ok(());
    };
    if let Some(min) = schema.get("minimum").and_then(|v| v.as_f64()) {
        if n < min {
            return Err(format!("field '{path}' is below the minimum of {min}"));
        }
    }
    if let Some(max) = schema.get("maximum").and_then(|v| v.as_f64()) {
        if n > max {
            return Err(format!("field '{path}' is above the maximum of {max}"));
        }
    }
    Ok(())
}

fn child(path: &str, key: &str) -> String {
    if path == "arguments" {
        key.to_string()
    } else {
        format!("{path}.{key}")
    }
}

fn value_matches_type(value: &Value, expected: &str) -> bool {
    match expected {
        "string" => value.is_string(),
        "number" => value.is_number(),
        "integer" => value.is_i64() || value.is_u64(),
        "boolean" => value.is_boolean(),
        "object" => value.is_object(),
        "array" => value.is_array(),
        "null" => value.is_null(),
        _ => true,
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
