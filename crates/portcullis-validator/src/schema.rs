//! Schema validator provider seam.
//!
//! The router never interprets JSON Schema itself: it asks a
//! [`SchemaProvider`] to compile each schema once at startup and keeps the
//! resulting [`SchemaValidator`]s in the operation descriptors.

use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

/// One schema violation reported by a validator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SchemaViolation {
    /// JSON pointer to the offending part of the instance (empty for the root).
    pub instance_path: String,
    pub message: String,
}

impl SchemaViolation {
    pub fn new(instance_path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            instance_path: instance_path.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for SchemaViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.instance_path.is_empty() {
            f.write_str(&self.message)
        } else {
            write!(f, "{}: {}", self.instance_path, self.message)
        }
    }
}

/// A schema could not be compiled.
#[derive(Debug, Error)]
#[error("invalid schema: {0}")]
pub struct SchemaError(pub String);

/// A compiled schema.
pub trait SchemaValidator: Send + Sync {
    /// Validate `value`, returning every violation on failure.
    fn validate(&self, value: &Value) -> Result<(), Vec<SchemaViolation>>;
}

/// Compiles schemas into validators.
pub trait SchemaProvider: Send + Sync {
    fn compile(&self, schema: &Value) -> Result<Arc<dyn SchemaValidator>, SchemaError>;
}

/// Default provider backed by the `jsonschema` crate, with format validation on.
///
/// Supports formats such as date-time, email, uuid, uri, ipv4 and ipv6.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonSchemaProvider;

struct JsonSchemaValidator(jsonschema::Validator);

impl SchemaValidator for JsonSchemaValidator {
    fn validate(&self, value: &Value) -> Result<(), Vec<SchemaViolation>> {
        let violations: Vec<SchemaViolation> = self
            .0
            .iter_errors(value)
            .map(|e| SchemaViolation::new(e.instance_path.to_string(), e.to_string()))
            .collect();
        if violations.is_empty() {
            Ok(())
        } else {
            Err(violations)
        }
    }
}

impl SchemaProvider for JsonSchemaProvider {
    fn compile(&self, schema: &Value) -> Result<Arc<dyn SchemaValidator>, SchemaError> {
        let validator = jsonschema::options()
            .should_validate_formats(true)
            .build(schema)
            .map_err(|e| SchemaError(e.to_string()))?;
        Ok(Arc::new(JsonSchemaValidator(validator)))
    }
}
