use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde_json::Value;

use crate::error::ValidationError;
use crate::schema::SchemaValidator;

/// What a request body must look like for one content type.
#[derive(Clone)]
pub enum BodySchema {
    /// Opaque bytes (`type: string, format: binary`), passed through unparsed.
    Binary,
    Schema(Arc<dyn SchemaValidator>),
    /// Declared content type without a schema.
    Unconstrained,
}

impl fmt::Debug for BodySchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Binary => f.write_str("Binary"),
            Self::Schema(_) => f.write_str("Schema(..)"),
            Self::Unconstrained => f.write_str("Unconstrained"),
        }
    }
}

/// Compiled request body validator of one operation, keyed by content type.
#[derive(Debug, Clone, Default)]
pub struct BodyValidator {
    declared: bool,
    required: bool,
    schemas: BTreeMap<String, BodySchema>,
}

impl BodyValidator {
    /// Validator for an operation that declares no request body.
    pub fn none() -> Self {
        Self::default()
    }

    pub fn declared(required: bool, schemas: BTreeMap<String, BodySchema>) -> Self {
        Self {
            declared: true,
            required,
            schemas,
        }
    }

    pub fn is_declared(&self) -> bool {
        self.declared
    }

    pub fn is_required(&self) -> bool {
        self.required
    }

    pub fn content_types(&self) -> impl Iterator<Item = &str> {
        self.schemas.keys().map(String::as_str)
    }

    /// Check body presence against the declaration.
    pub fn check_presence(&self, present: bool) -> Result<(), ValidationError> {
        match (self.declared, present) {
            (false, true) => Err(ValidationError::NoRequestBody),
            (true, false) if self.required => Err(ValidationError::RequiredRequestBody),
            _ => Ok(()),
        }
    }

    /// Find the schema for a bare media type: exact match, then `type/*`, then `*/*`.
    pub fn lookup(&self, media_type: &str) -> Option<&BodySchema> {
        if let Some(schema) = self.schemas.get(media_type) {
            return Some(schema);
        }
        if let Some((main, _)) = media_type.split_once('/') {
            if let Some(schema) = self.schemas.get(&format!("{}/*", main)) {
                return Some(schema);
            }
        }
        self.schemas.get("*/*")
    }

    pub fn is_binary(&self, media_type: &str) -> bool {
        matches!(self.lookup(media_type), Some(BodySchema::Binary))
    }

    /// Validate a parsed body.
    pub fn validate(&self, media_type: &str, body: &Value) -> Result<(), ValidationError> {
        match self.lookup(media_type) {
            Some(BodySchema::Schema(schema)) => {
                schema
                    .validate(body)
                    .map_err(|violations| ValidationError::BadRequestBody {
                        content_type: media_type.to_string(),
                        violations: violations.iter().map(|v| v.to_string()).collect(),
                    })
            }
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{JsonSchemaProvider, SchemaProvider};
    use serde_json::json;

    fn user_body(required: bool) -> BodyValidator {
        let schema = JsonSchemaProvider
            .compile(&json!({
                "type": "object",
                "required": ["name"],
                "properties": { "name": { "type": "string" } }
            }))
            .unwrap();
        let mut schemas = BTreeMap::new();
        schemas.insert("application/json".to_string(), BodySchema::Schema(schema));
        schemas.insert("image/*".to_string(), BodySchema::Binary);
        BodyValidator::declared(required, schemas)
    }

    #[test]
    fn undeclared_body_rejects_any_body() {
        let validator = BodyValidator::none();
        assert!(validator.check_presence(false).is_ok());
        assert_eq!(
            validator.check_presence(true).unwrap_err().code(),
            "E_NO_REQUEST_BODY"
        );
    }

    #[test]
    fn required_body_must_be_present() {
        assert_eq!(
            user_body(true).check_presence(false).unwrap_err().code(),
            "E_REQUIRED_REQUEST_BODY"
        );
        assert!(user_body(false).check_presence(false).is_ok());
    }

    #[test]
    fn validates_against_schema() {
        let validator = user_body(true);
        assert!(validator
            .validate("application/json", &json!({ "name": "Ada" }))
            .is_ok());
        match validator.validate("application/json", &json!({})) {
            Err(ValidationError::BadRequestBody {
                content_type,
                violations,
            }) => {
                assert_eq!(content_type, "application/json");
                assert_eq!(violations.len(), 1);
            }
            other => panic!("expected BadRequestBody, got {:?}", other),
        }
    }

    #[test]
    fn wildcard_lookup() {
        let validator = user_body(false);
        assert!(validator.is_binary("image/png"));
        assert!(!validator.is_binary("application/json"));
        assert!(validator.lookup("text/plain").is_none());
    }
}
