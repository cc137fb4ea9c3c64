use crate::definition::{InputDeclaration, InputKind};
use agentflow_core::ValidationError;
use serde_json::Value;

/// Input schema generated from a master agent's declarations.
#[derive(Debug, Clone)]
pub struct InputSchema {
    fields: Vec<InputDeclaration>,
}

impl InputSchema {
    pub fn from_declarations(declarations: &[InputDeclaration]) -> Self {
        Self {
            fields: declarations.to_vec(),
        }
    }

    /// Checks `input` against the declared fields. Undeclared keys are ignored.
    pub fn validate(&self, input: &Value) -> Result<(), ValidationError> {
        let object = match input {
            Value::Object(map) => map,
            Value::Null if self.fields.iter().all(|f| !f.required) => return Ok(()),
            _ => {
                return Err(ValidationError::InvalidRequest(
                    "input must be a JSON object".to_string(),
                ))
            }
        };

        for field in &self.fields {
            match object.get(&field.name) {
                None | Some(Value::Null) => {
                    if field.required {
                        return Err(ValidationError::MissingInput {
                            name: field.name.clone(),
                        });
                    }
                }
                Some(value) => check_kind(field, value)?,
            }
        }
        Ok(())
    }
}

fn check_kind(field: &InputDeclaration, value: &Value) -> Result<(), ValidationError> {
    let invalid = |reason: &str| ValidationError::InvalidInput {
        name: field.name.clone(),
        reason: reason.to_string(),
    };

    match field.kind {
        InputKind::Number => match value {
            Value::Number(_) => Ok(()),
            Value::String(s) if s.trim().parse::<f64>().is_ok() => Ok(()),
            _ => Err(invalid("expected a number")),
        },
        InputKind::Json => match value {
            Value::Object(_) | Value::Array(_) => Ok(()),
            Value::String(s) if serde_json::from_str::<Value>(s).is_ok() => Ok(()),
            _ => Err(invalid("expected a JSON object, array or JSON string")),
        },
        InputKind::FileBase64 => match value {
            Value::String(_) => Ok(()),
            Value::Array(items) if items.iter().all(Value::is_string) => Ok(()),
            _ => Err(invalid("expected a base64 string or a list of them")),
        },
        InputKind::ShortText | InputKind::LongText | InputKind::Date => match value {
            Value::Object(_) | Value::Array(_) => Err(invalid("expected a scalar value")),
            _ => Ok(()),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn decl(name: &str, kind: InputKind, required: bool) -> InputDeclaration {
        InputDeclaration {
            name: name.to_string(),
            description: String::new(),
            kind,
            required,
        }
    }

    #[test]
    fn test_required_and_kinds() {
        let schema = InputSchema::from_declarations(&[
            decl("topic", InputKind::ShortText, true),
            decl("count", InputKind::Number, false),
            decl("files", InputKind::FileBase64, false),
        ]);

        assert!(schema
            .validate(&json!({"topic": "volcanoes", "count": "3", "extra": 1}))
            .is_ok());
        assert_eq!(
            schema.validate(&json!({"count": 3})),
            Err(ValidationError::MissingInput {
                name: "topic".to_string()
            })
        );
        assert!(matches!(
            schema.validate(&json!({"topic": "x", "count": "three"})),
            Err(ValidationError::InvalidInput { name, .. }) if name == "count"
        ));
        assert!(matches!(
            schema.validate(&json!({"topic": "x", "files": ["a", 1]})),
            Err(ValidationError::InvalidInput { name, .. }) if name == "files"
        ));
        assert!(schema.validate(&json!("not an object")).is_err());
    }

    #[test]
    fn test_json_kind_accepts_strings() {
        let schema = InputSchema::from_declarations(&[decl("cfg", InputKind::Json, true)]);
        assert!(schema.validate(&json!({"cfg": "{\"a\": 1}"})).is_ok());
        assert!(schema.validate(&json!({"cfg": "{broken"})).is_err());
    }
}
