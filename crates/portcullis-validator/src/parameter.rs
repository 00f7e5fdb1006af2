use std::fmt;
use std::sync::Arc;

use serde_json::Value;

use crate::coercion::{coerce_shape, CoercionOptions, RawValue, ValueShape};
use crate::error::ValidationError;
use crate::schema::SchemaValidator;

/// Where a parameter is carried on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ParameterLocation {
    Query,
    Header,
    Path,
    Cookie,
}

impl ParameterLocation {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "query" => Some(Self::Query),
            "header" => Some(Self::Header),
            "path" => Some(Self::Path),
            "cookie" => Some(Self::Cookie),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Query => "query",
            Self::Header => "header",
            Self::Path => "path",
            Self::Cookie => "cookie",
        }
    }
}

impl fmt::Display for ParameterLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Compiled validator for one declared parameter.
///
/// Absent values fail when the parameter is required and pass through as
/// `None` otherwise. Present values are cast into the declared shape and
/// then checked against the parameter schema.
#[derive(Clone)]
pub struct ParameterValidator {
    name: String,
    location: ParameterLocation,
    required: bool,
    shape: ValueShape,
    schema: Option<Arc<dyn SchemaValidator>>,
    coercion: CoercionOptions,
}

impl ParameterValidator {
    pub fn new(
        name: impl Into<String>,
        location: ParameterLocation,
        required: bool,
        shape: ValueShape,
        schema: Option<Arc<dyn SchemaValidator>>,
        coercion: CoercionOptions,
    ) -> Self {
        Self {
            name: name.into(),
            location,
            // Path parameters are part of the route template, never optional.
            required: required || location == ParameterLocation::Path,
            shape,
            schema,
            coercion,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn location(&self) -> ParameterLocation {
        self.location
    }

    pub fn required(&self) -> bool {
        self.required
    }

    pub fn shape(&self) -> ValueShape {
        self.shape
    }

    pub fn validate(&self, raw: Option<&RawValue>) -> Result<Option<Value>, ValidationError> {
        let Some(raw) = raw else {
            if self.required {
                return Err(ValidationError::RequiredParameter {
                    name: self.name.clone(),
                    location: self.location.to_string(),
                });
            }
            return Ok(None);
        };

        let value = coerce_shape(raw, self.shape, self.coercion).map_err(|reason| {
            ValidationError::BadParameter {
                name: self.name.clone(),
                location: self.location.to_string(),
                violations: vec![reason],
            }
        })?;

        if let Some(schema) = &self.schema {
            schema.validate(&value).map_err(|violations| {
                ValidationError::bad_parameter(&self.name, self.location.as_str(), violations)
            })?;
        }

        Ok(Some(value))
    }
}

impl fmt::Debug for ParameterValidator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ParameterValidator")
            .field("name", &self.name)
            .field("location", &self.location)
            .field("required", &self.required)
            .field("shape", &self.shape)
            .field("has_schema", &self.schema.is_some())
            .finish()
    }
}
