//! Schema-driven argument validation at the dispatch boundary.
//!
//! Model-produced arguments are checked against the tool's declared JSON
//! Schema before the handler sees them: required fields present, declared
//! primitive types respected. Anything deeper is the handler's business —
//! it extracts typed fields with per-field defaults.

use serde_json::Value;

/// Validate `args` against a tool parameter schema. Returns a
/// model-readable problem description on mismatch.
pub fn validate_args(schema: &Value, args: &Value) -> Result<(), String> {
    let Some(obj) = args.as_object() else {
        return Err("arguments must be a JSON object".into());
    };

    let properties = schema.get("properties").and_then(|p| p.as_object());

    if let Some(required) = schema.get("required").and_then(|r| r.as_array()) {
        for field in required.iter().filter_map(|f| f.as_str()) {
            if !obj.contains_key(field) {
                return Err(format!("missing required argument '{field}'"));
            }
        }
    }

    if let Some(properties) = properties {
        for (key, value) in obj {
            let Some(prop) = properties.get(key) else {
                // Unknown extras are tolerated; models pad arguments.
                continue;
            };
            if let Some(expected) = prop.get("type").and_then(|t| t.as_str()) {
                if !type_matches(expected, value) {
                    return Err(format!(
                        "argument '{key}' should be {expected}, got {}",
                        type_name(value)
                    ));
                }
            }
        }
    }

    Ok(())
}

fn type_matches(expected: &str, value: &Value) -> bool {
    match expected {
        "string" => value.is_string(),
        "integer" => value.is_i64() || value.is_u64(),
        "number" => value.is_number(),
        "boolean" => value.is_boolean(),
        "array" => value.is_array(),
        "object" => value.is_object(),
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
