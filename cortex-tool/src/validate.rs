//! Pure argument validation against a JSON-schema subset.
//!
//! The subset covers what tool schemas in practice use: `type`,
//! `required`, `properties` (recursively), numeric `minimum`/`maximum`,
//! and `enum`. Unknown argument fields pass — schemas describe what the
//! tool needs, not everything a model might send along.

use serde_json::Value;
use thiserror::Error;

/// Why validation rejected an argument object.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    /// A required field is absent.
    #[error("missing required field `{field}`")]
    Missing {
        /// The missing field's path.
        field: String,
    },

    /// A field has the wrong JSON type.
    #[error("field `{field}` expected {expected}, got {actual}")]
    TypeMismatch {
        /// The offending field's path.
        field: String,
        /// The schema's declared type.
        expected: String,
        /// The runtime type encountered.
        actual: String,
    },

    /// A numeric field is outside its declared range, or a value is not
    /// in the declared enum.
    #[error("field `{field}` out of range: {detail}")]
    OutOfRange {
        /// The offending field's path.
        field: String,
        /// What bound was violated.
        detail: String,
    },
}

/// Validate `args` against `schema`. Pure: no side effects, no defaults
/// injected, the arguments are returned to the caller untouched.
pub fn validate_args(schema: &Value, args: &Value) -> Result<(), ValidationError> {
    validate_value(schema, args, "")
}

fn validate_value(schema: &Value, value: &Value, path: &str) -> Result<(), ValidationError> {
    if let Some(expected) = schema.get("type").and_then(Value::as_str) {
        check_type(expected, value, path)?;
    }

    if let Some(allowed) = schema.get("enum").and_then(Value::as_array) {
        if !allowed.contains(value) {
            return Err(ValidationError::OutOfRange {
                field: display_path(path),
                detail: format!("{value} is not one of the allowed values"),
            });
        }
    }

    if let Some(number) = value.as_f64() {
        if let Some(min) = schema.get("minimum").and_then(Value::as_f64) {
            if number < min {
                return Err(ValidationError::OutOfRange {
                    field: display_path(path),
                    detail: format!("{number} < minimum {min}"),
                });
            }
        }
        if let Some(max) = schema.get("maximum").and_then(Value::as_f64) {
            if number > max {
                return Err(ValidationError::OutOfRange {
                    field: display_path(path),
                    detail: format!("{number} > maximum {max}"),
                });
            }
        }
    }

    if let Some(object) = value.as_object() {
        if let Some(required) = schema.get("required").and_then(Value::as_array) {
            for name in required.iter().filter_map(Value::as_str) {
                if !object.contains_key(name) {
                    return Err(ValidationError::Missing {
                        field: join_path(path, name),
                    });
                }
            }
        }
        if let Some(properties) = schema.get("properties").and_then(Value::as_object) {
            for (name, field_schema) in properties {
                if let Some(field_value) = object.get(name) {
                    validate_value(field_schema, field_value, &join_path(path, name))?;
                }
            }
        }
    }

    Ok(())
}

fn check_type(expected: &str, value: &Value, path: &str) -> Result<(), ValidationError> {
    let ok = match expected {
        "object" => value.is_object(),
        "array" => value.is_array(),
        "string" => value.is_string(),
        "boolean" => value.is_boolean(),
        "integer" => value.is_i64() || value.is_u64(),
        "number" => value.is_number(),
        "null" => value.is_null(),
        // An unrecognized type keyword constrains nothing.
        _ => true,
    };
    if ok {
        Ok(())
    } else {
        Err(ValidationError::TypeMismatch {
            field: display_path(path),
            expected: expected.to_string(),
            actual: type_name(value).to_string(),
        })
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_i64() || n.is_u64() => "integer",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn join_path(path: &str, name: &str) -> String {
    if path.is_empty() {
        name.to_string()
    } else {
        format!("{path}.{name}")
    }
}

fn display_path(path: &str) -> String {
    if path.is_empty() {
        "<root>".to_string()
    } else {
        path.to_string()
    }
}
