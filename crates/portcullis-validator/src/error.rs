use thiserror::Error;

use crate::schema::SchemaViolation;

/// A request that does not satisfy its operation's contract.
#[derive(Debug, Clone, Error)]
pub enum ValidationError {
    #[error("missing required parameter '{name}' in {location}")]
    RequiredParameter { name: String, location: String },

    #[error("invalid parameter '{name}' in {location}: {}", join(.violations))]
    BadParameter {
        name: String,
        location: String,
        violations: Vec<String>,
    },

    #[error("query parameter '{name}' is not repeatable")]
    BadQueryString { name: String },

    #[error("this operation does not accept a request body")]
    NoRequestBody,

    #[error("missing required request body")]
    RequiredRequestBody,

    #[error("invalid request body for {content_type}: {}", join(.violations))]
    BadRequestBody {
        content_type: String,
        violations: Vec<String>,
    },

    #[error("request body too large: {size} bytes exceeds limit of {limit} bytes")]
    BodyTooLarge { size: usize, limit: usize },

    #[error("too many headers: {count} exceeds limit of {limit}")]
    TooManyHeaders { count: usize, limit: usize },

    #[error("URI too long: {length} characters exceeds limit of {limit}")]
    UriTooLong { length: usize, limit: usize },

    #[error("header '{name}' too large: {size} bytes exceeds limit of {limit} bytes")]
    HeaderTooLarge {
        name: String,
        size: usize,
        limit: usize,
    },
}

fn join(violations: &[String]) -> String {
    violations.join("; ")
}

impl ValidationError {
    pub fn bad_parameter(
        name: impl Into<String>,
        location: impl Into<String>,
        violations: impl IntoIterator<Item = SchemaViolation>,
    ) -> Self {
        Self::BadParameter {
            name: name.into(),
            location: location.into(),
            violations: violations.into_iter().map(|v| v.to_string()).collect(),
        }
    }

    /// Stable error code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::RequiredParameter { .. } => "E_REQUIRED_PARAMETER",
            Self::BadParameter { .. } => "E_BAD_PARAMETER",
            Self::BadQueryString { .. } => "E_BAD_QUERY_STRING",
            Self::NoRequestBody => "E_NO_REQUEST_BODY",
            Self::RequiredRequestBody => "E_REQUIRED_REQUEST_BODY",
            Self::BadRequestBody { .. } => "E_BAD_REQUEST_BODY",
            Self::BodyTooLarge { .. } => "E_REQUEST_BODY_TOO_LARGE",
            Self::TooManyHeaders { .. } => "E_TOO_MANY_HEADERS",
            Self::UriTooLong { .. } => "E_URI_TOO_LONG",
            Self::HeaderTooLarge { .. } => "E_HEADER_TOO_LARGE",
        }
    }

    /// HTTP status the error maps to.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::UriTooLong { .. } => 414,
            Self::TooManyHeaders { .. } | Self::HeaderTooLarge { .. } => 431,
            _ => 400,
        }
    }

    /// Structured parameters for client-facing error bodies.
    pub fn params(&self) -> serde_json::Value {
        use serde_json::json;
        match self {
            Self::RequiredParameter { name, location } => {
                json!({ "name": name, "location": location })
            }
            Self::BadParameter {
                name,
                location,
                violations,
            } => json!({ "name": name, "location": location, "violations": violations }),
            Self::BadQueryString { name } => json!({ "name": name }),
            Self::NoRequestBody | Self::RequiredRequestBody => json!({}),
            Self::BadRequestBody {
                content_type,
                violations,
            } => json!({ "contentType": content_type, "violations": violations }),
            Self::BodyTooLarge { size, limit } => json!({ "size": size, "limit": limit }),
            Self::TooManyHeaders { count, limit } => json!({ "count": count, "limit": limit }),
            Self::UriTooLong { length, limit } => json!({ "length": length, "limit": limit }),
            Self::HeaderTooLarge { name, size, limit } => {
                json!({ "name": name, "size": size, "limit": limit })
            }
        }
    }
}
