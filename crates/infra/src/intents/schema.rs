//! Declarative payload schemas for intent definitions.
//!
//! Each intent declares the fields it expects; validation runs before
//! authorization so malformed requests never reach the engine. Unknown
//! fields are allowed (forward compatibility); required fields must be
//! present and well-typed.

use serde_json::Value as JsonValue;
use uuid::Uuid;

use super::result::IntentError;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum FieldKind {
    String,
    Uuid,
    Number,
    Bool,
    Object,
    Array,
}

impl FieldKind {
    fn accepts(&self, value: &JsonValue) -> bool {
        match self {
            FieldKind::String => value.is_string(),
            FieldKind::Uuid => value
                .as_str()
                .map(|s| Uuid::parse_str(s).is_ok())
                .unwrap_or(false),
            FieldKind::Number => value.is_number(),
            FieldKind::Bool => value.is_boolean(),
            FieldKind::Object => value.is_object(),
            FieldKind::Array => value.is_array(),
        }
    }

    fn describe(&self) -> &'static str {
        match self {
            FieldKind::String => "a string",
            FieldKind::Uuid => "a UUID string",
            FieldKind::Number => "a number",
            FieldKind::Bool => "a boolean",
            FieldKind::Object => "an object",
            FieldKind::Array => "an array",
        }
    }
}

#[derive(Debug, Clone)]
struct FieldSpec {
    name: &'static str,
    kind: FieldKind,
    required: bool,
}

/// A flat field schema for an intent's payload.
#[derive(Debug, Clone, Default)]
pub struct PayloadSchema {
    fields: Vec<FieldSpec>,
}

impl PayloadSchema {
    pub fn new() -> Self {
        Self::default()
    }

    /// A schema accepting any object (query intents with no inputs).
    pub fn any() -> Self {
        Self::default()
    }

    pub fn required(mut self, name: &'static str, kind: FieldKind) -> Self {
        self.fields.push(FieldSpec {
            name,
            kind,
            required: true,
        });
        self
    }

    pub fn optional(mut self, name: &'static str, kind: FieldKind) -> Self {
        self.fields.push(FieldSpec {
            name,
            kind,
            required: false,
        });
        self
    }

    pub fn validate(&self, payload: &JsonValue) -> Result<(), IntentError> {
        if payload.is_null() && self.fields.iter().all(|f| !f.required) {
            return Ok(());
        }

        let Some(object) = payload.as_object() else {
            return Err(IntentError::validation("payload must be an object", None));
        };

        for field in &self.fields {
            match object.get(field.name) {
                None | Some(JsonValue::Null) => {
                    if field.required {
                        return Err(IntentError::validation(
                            format!("missing required field '{}'", field.name),
                            Some(field.name),
                        ));
                    }
                }
                Some(value) => {
                    if !field.kind.accepts(value) {
                        return Err(IntentError::validation(
                            format!("field '{}' must be {}", field.name, field.kind.describe()),
                            Some(field.name),
                        ));
                    }
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn schema() -> PayloadSchema {
        PayloadSchema::new()
            .required("name", FieldKind::String)
            .required("entity_id", FieldKind::Uuid)
            .optional("quantity", FieldKind::Number)
    }

    #[test]
    fn accepts_well_formed_payloads() {
        let payload = json!({
            "name": "Acme",
            "entity_id": "0193e061-0000-7000-8000-000000000000",
            "extra": "ignored",
        });
        assert!(schema().validate(&payload).is_ok());
    }

    #[test]
    fn missing_required_field_is_reported_with_its_name() {
        let err = schema().validate(&json!({"name": "Acme"})).unwrap_err();
        assert_eq!(err.field.as_deref(), Some("entity_id"));
    }

    #[test]
    fn type_mismatches_are_rejected() {
        let err = schema()
            .validate(&json!({"name": 7, "entity_id": "0193e061-0000-7000-8000-000000000000"}))
            .unwrap_err();
        assert_eq!(err.field.as_deref(), Some("name"));

        let err = schema()
            .validate(&json!({"name": "x", "entity_id": "not-a-uuid"}))
            .unwrap_err();
        assert_eq!(err.field.as_deref(), Some("entity_id"));
    }

    #[test]
    fn null_payload_passes_when_nothing_is_required() {
        assert!(PayloadSchema::any().validate(&JsonValue::Null).is_ok());
        assert!(schema().validate(&JsonValue::Null).is_err());
    }
}
