//! Declarative field schemas for client and rule objects.
//!
//! Each transport kind and the rule section describe their allowed fields as
//! a `&[FieldSpec]`. The same table drives validation (a list of field-level
//! errors, never the first one only) and the JSON-Schema printed by `--help`.

use serde_json::{json, Map, Value};

use crate::common::FieldError;

/// Expected type of a configuration field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    String,
    Bool,
    /// Integer within an inclusive range.
    Integer { min: i64, max: i64 },
    /// Array of strings.
    StringList,
    /// Object whose values are all strings.
    StringMap,
    /// String restricted to the listed values.
    Enum(&'static [&'static str]),
}

/// One allowed field of a configuration object.
#[derive(Debug, Clone, Copy)]
pub struct FieldSpec {
    pub name: &'static str,
    pub ty: FieldType,
    pub required: bool,
    pub description: &'static str,
}

impl FieldSpec {
    pub const fn required(name: &'static str, ty: FieldType, description: &'static str) -> Self {
        Self {
            name,
            ty,
            required: true,
            description,
        }
    }

    pub const fn optional(name: &'static str, ty: FieldType, description: &'static str) -> Self {
        Self {
            name,
            ty,
            required: false,
            description,
        }
    }
}

/// Validate `value` against `fields`, rejecting unknown keys.
///
/// Returns every problem found; an empty vector means the object is valid.
pub fn validate_object(value: &Value, fields: &[FieldSpec]) -> Vec<FieldError> {
    let Some(object) = value.as_object() else {
        return vec![FieldError::new("<root>", "must be an object")];
    };

    let mut errors = Vec::new();

    for key in object.keys() {
        if !fields.iter().any(|f| f.name == key) {
            errors.push(FieldError::new(key.as_str(), "is not an allowed field"));
        }
    }

    for field in fields {
        match object.get(field.name) {
            None if field.required => errors.push(FieldError::new(field.name, "is required")),
            None => {}
            Some(v) => check_type(field.name, field.ty, v, &mut errors),
        }
    }

    errors
}

fn check_type(name: &str, ty: FieldType, value: &Value, errors: &mut Vec<FieldError>) {
    match ty {
        FieldType::String => {
            if !value.is_string() {
                errors.push(FieldError::new(name, "must be a string"));
            }
        }
        FieldType::Bool => {
            if !value.is_boolean() {
                errors.push(FieldError::new(name, "must be a boolean"));
            }
        }
        FieldType::Integer { min, max } => match value.as_i64() {
            Some(n) if n < min || n > max => errors.push(FieldError::new(
                name,
                format!("must be between {} and {} (got {})", min, max, n),
            )),
            Some(_) => {}
            None => errors.push(FieldError::new(name, "must be an integer")),
        },
        FieldType::StringList => match value.as_array() {
            Some(items) => {
                for (i, item) in items.iter().enumerate() {
                    if !item.is_string() {
                        errors.push(FieldError::new(format!("{}[{}]", name, i), "must be a string"));
                    }
                }
            }
            None => errors.push(FieldError::new(name, "must be a list of strings")),
        },
        FieldType::StringMap => match value.as_object() {
            Some(entries) => {
                for (key, item) in entries {
                    if !item.is_string() {
                        errors.push(FieldError::new(format!("{}.{}", name, key), "must be a string"));
                    }
                }
            }
            None => errors.push(FieldError::new(name, "must be a mapping of strings")),
        },
        FieldType::Enum(allowed) => match value.as_str() {
            Some(s) if allowed.contains(&s) => {}
            _ => errors.push(FieldError::new(
                name,
                format!("must be one of: {}", allowed.join(", ")),
            )),
        },
    }
}

/// Render a field table as a JSON-Schema document.
pub fn json_schema(fields: &[FieldSpec]) -> Value {
    let mut properties = Map::new();
    for field in fields {
        let mut property = match field.ty {
            FieldType::String => json!({"type": "string"}),
            FieldType::Bool => json!({"type": "boolean"}),
            FieldType::Integer { min, max } => {
                json!({"type": "integer", "minimum": min, "maximum": max})
            }
            FieldType::StringList => json!({"type": "array", "items": {"type": "string"}}),
            FieldType::StringMap => json!({
                "type": "object",
                "patternProperties": {"^.*$": {"type": "string"}}
            }),
            FieldType::Enum(allowed) => json!({"enum": allowed}),
        };
        if !field.description.is_empty() {
            property["description"] = Value::from(field.description);
        }
        properties.insert(field.name.to_string(), property);
    }

    let required: Vec<&str> = fields
        .iter()
        .filter(|f| f.required)
        .map(|f| f.name)
        .collect();

    json!({
        "type": "object",
        "properties": properties,
        "additionalProperties": false,
        "required": required,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const FIELDS: &[FieldSpec] = &[
        FieldSpec::required("kind", FieldType::Enum(&["a", "b"]), ""),
        FieldSpec::required("host", FieldType::String, "Server host."),
        FieldSpec::optional("port", FieldType::Integer { min: 0, max: 65535 }, ""),
        FieldSpec::optional("tls", FieldType::Bool, ""),
        FieldSpec::optional("channels", FieldType::StringList, ""),
        FieldSpec::optional("ids", FieldType::StringMap, ""),
    ];

    fn fields_of(errors: &[FieldError]) -> Vec<&str> {
        errors.iter().map(|e| e.field.as_str()).collect()
    }

    #[test]
    fn test_valid_object_has_no_errors() {
        let value = json!({
            "kind": "a",
            "host": "irc.example.org",
            "port": 6697,
            "tls": true,
            "channels": ["#a", "#b"],
            "ids": {"room": "-100"}
        });
        assert!(validate_object(&value, FIELDS).is_empty());
    }

    #[test]
    fn test_missing_required_fields() {
        let errors = validate_object(&json!({"port": 1}), FIELDS);
        assert_eq!(fields_of(&errors), vec!["kind", "host"]);
        assert!(errors.iter().all(|e| e.message == "is required"));
    }

    #[test]
    fn test_unknown_field_rejected() {
        let errors = validate_object(&json!({"kind": "a", "host": "h", "colour": "red"}), FIELDS);
        assert_eq!(fields_of(&errors), vec!["colour"]);
    }

    #[test]
    fn test_type_mismatches() {
        let value = json!({
            "kind": "c",
            "host": 5,
            "port": 70000,
            "tls": "yes",
            "channels": ["#a", 3],
            "ids": {"room": 1}
        });
        let errors = validate_object(&value, FIELDS);
        assert_eq!(
            fields_of(&errors),
            vec!["kind", "host", "port", "tls", "channels[1]", "ids.room"]
        );
        assert!(errors[2].message.contains("between 0 and 65535"));
    }

    #[test]
    fn test_null_optional_value_is_a_type_error() {
        let errors = validate_object(&json!({"kind": "a", "host": "h", "tls": null}), FIELDS);
        assert_eq!(fields_of(&errors), vec!["tls"]);
    }

    #[test]
    fn test_non_object_rejected() {
        let errors = validate_object(&json!(["a"]), FIELDS);
        assert_eq!(fields_of(&errors), vec!["<root>"]);
    }

    #[test]
    fn test_json_schema_rendering() {
        let schema = json_schema(FIELDS);
        assert_eq!(schema["additionalProperties"], json!(false));
        assert_eq!(schema["required"], json!(["kind", "host"]));
        assert_eq!(schema["properties"]["kind"], json!({"enum": ["a", "b"]}));
        assert_eq!(schema["properties"]["host"]["description"], "Server host.");
        assert_eq!(schema["properties"]["port"]["maximum"], 65535);
    }
}
