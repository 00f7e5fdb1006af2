//! Runtime and startup error types.

use std::error::Error as StdError;

use http::StatusCode;
use portcullis_compiler::CompileError;
use portcullis_validator::ValidationError;
use serde_json::{json, Value};
use thiserror::Error;

/// Errors detected while assembling an [`HttpRouter`](crate::HttpRouter).
#[derive(Debug, Error)]
pub enum BuildError {
    #[error(transparent)]
    Compile(#[from] CompileError),

    #[error("no body parser for '{media_type}' consumed by operation '{operation_id}'")]
    ParserLack {
        operation_id: String,
        media_type: String,
    },

    #[error("no handler registered for operation '{operation_id}'")]
    HandlerLack { operation_id: String },
}

impl BuildError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Compile(e) => e.code(),
            Self::ParserLack { .. } => "E_PARSER_LACK",
            Self::HandlerLack { .. } => "E_HANDLER_LACK",
        }
    }
}

impl From<portcullis_spec_parser::ParseError> for BuildError {
    fn from(err: portcullis_spec_parser::ParseError) -> Self {
        Self::Compile(CompileError::Parse(err))
    }
}

/// A failure returned by a handler, carrying its own status and code.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct HandlerError {
    pub status: StatusCode,
    pub code: String,
    pub message: String,
    pub params: Value,
    #[source]
    pub source: Option<Box<dyn StdError + Send + Sync>>,
}

impl HandlerError {
    pub fn new(status: StatusCode, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            status,
            code: code.into(),
            message: message.into(),
            params: json!({}),
            source: None,
        }
    }

    /// A 500 wrapping an unexpected failure.
    pub fn internal(source: impl Into<Box<dyn StdError + Send + Sync>>) -> Self {
        let source = source.into();
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            code: "E_INTERNAL".to_string(),
            message: source.to_string(),
            params: json!({}),
            source: Some(source),
        }
    }

    pub fn not_implemented(operation_id: &str) -> Self {
        Self::new(
            StatusCode::NOT_IMPLEMENTED,
            "E_NOT_IMPLEMENTED",
            format!("operation '{}' is not implemented", operation_id),
        )
        .with_params(json!({ "operationId": operation_id }))
    }

    pub fn with_params(mut self, params: Value) -> Self {
        self.params = params;
        self
    }
}

/// Everything that can go wrong while dispatching one request.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("no route for {method} {path}")]
    NotFound { method: String, path: String },

    #[error("unsupported media type '{media_type}'")]
    UnsupportedMediaType {
        media_type: String,
        supported: Vec<String>,
    },

    #[error("unsupported charset '{charset}'")]
    UnsupportedCharset {
        charset: String,
        supported: Vec<String>,
    },

    #[error("none of the produceable media types is acceptable for '{accept}'")]
    UnacceptableMediaType {
        accept: String,
        produceable: Vec<String>,
    },

    #[error("none of the produceable charsets is acceptable for '{accept_charset}'")]
    UnacceptableCharset {
        accept_charset: String,
        produceable: Vec<String>,
    },

    #[error("request body exceeds the limit of {limit} bytes")]
    RequestBodyTooLarge { limit: usize },

    #[error("failed to read request body: {reason}")]
    BadRequestBodyRead { reason: String },

    #[error("request body is not valid {charset}")]
    BadBodyEncoding { charset: String },

    #[error("malformed {media_type} request body: {reason}")]
    BadBody { media_type: String, reason: String },

    #[error("transaction id '{transaction_id}' is already in use")]
    TransactionIdNotUnique { transaction_id: String },

    #[error("transaction '{transaction_id}' timed out after {timeout_ms}ms")]
    Timeout {
        timeout_ms: u64,
        transaction_id: String,
    },

    #[error("no stringifier for response media type '{media_type}'")]
    StringifierLack { media_type: String },

    #[error("response media type '{media_type}' is not produceable")]
    NonProduceableMediaType {
        media_type: String,
        produceable: Vec<String>,
    },

    #[error("response charset '{charset}' is not produceable")]
    NonProduceableCharset {
        charset: String,
        produceable: Vec<String>,
    },

    #[error("handler panicked: {reason}")]
    HandlerPanic { reason: String },

    #[error("failed to serialize response: {reason}")]
    ResponseSerialization { reason: String },

    #[error(transparent)]
    Handler(#[from] HandlerError),
}

impl DispatchError {
    /// Stable error code.
    pub fn code(&self) -> &str {
        match self {
            Self::Validation(e) => e.code(),
            Self::NotFound { .. } => "E_NOT_FOUND",
            Self::UnsupportedMediaType { .. } => "E_UNSUPPORTED_MEDIA_TYPE",
            Self::UnsupportedCharset { .. } => "E_UNSUPPORTED_CHARSET",
            Self::UnacceptableMediaType { .. } => "E_UNACCEPTABLE_MEDIA_TYPE",
            Self::UnacceptableCharset { .. } => "E_UNACCEPTABLE_CHARSET",
            Self::RequestBodyTooLarge { .. } => "E_REQUEST_BODY_TOO_LARGE",
            Self::BadRequestBodyRead { .. } => "E_BAD_REQUEST_BODY_READ",
            Self::BadBodyEncoding { .. } => "E_BAD_BODY_ENCODING",
            Self::BadBody { .. } => "E_BAD_BODY",
            Self::TransactionIdNotUnique { .. } => "E_TRANSACTION_ID_NOT_UNIQUE",
            Self::Timeout { .. } => "E_TRANSACTION_TIMEOUT",
            Self::StringifierLack { .. } => "E_STRINGIFYER_LACK",
            Self::NonProduceableMediaType { .. } => "E_NON_PRODUCEABLE_MEDIA_TYPE",
            Self::NonProduceableCharset { .. } => "E_NON_PRODUCEABLE_CHARSET",
            Self::HandlerPanic { .. } => "E_HANDLER_PANIC",
            Self::ResponseSerialization { .. } => "E_RESPONSE_SERIALIZATION",
            Self::Handler(e) => &e.code,
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::Validation(e) => {
                StatusCode::from_u16(e.status_code()).unwrap_or(StatusCode::BAD_REQUEST)
            }
            Self::NotFound { .. } => StatusCode::NOT_FOUND,
            Self::UnsupportedMediaType { .. } | Self::UnsupportedCharset { .. } => {
                StatusCode::UNSUPPORTED_MEDIA_TYPE
            }
            Self::UnacceptableMediaType { .. } | Self::UnacceptableCharset { .. } => {
                StatusCode::NOT_ACCEPTABLE
            }
            Self::RequestBodyTooLarge { .. }
            | Self::BadRequestBodyRead { .. }
            | Self::BadBodyEncoding { .. }
            | Self::BadBody { .. }
            | Self::TransactionIdNotUnique { .. } => StatusCode::BAD_REQUEST,
            Self::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            Self::StringifierLack { .. }
            | Self::NonProduceableMediaType { .. }
            | Self::NonProduceableCharset { .. }
            | Self::HandlerPanic { .. }
            | Self::ResponseSerialization { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Handler(e) => e.status,
        }
    }

    /// Coarse outcome class recorded on the transaction audit trail.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "not_found",
            Self::TransactionIdNotUnique { .. } => "not_unique",
            Self::Timeout { .. } => "timeout",
            Self::Handler(_) => "handler",
            _ if self.status().is_server_error() => "server",
            _ => "client",
        }
    }

    /// Structured parameters for client-facing error bodies.
    pub fn params(&self) -> Value {
        match self {
            Self::Validation(e) => e.params(),
            Self::NotFound { method, path } => json!({ "method": method, "path": path }),
            Self::UnsupportedMediaType {
                media_type,
                supported,
            } => json!({ "mediaType": media_type, "supported": supported }),
            Self::UnsupportedCharset { charset, supported } => {
                json!({ "charset": charset, "supported": supported })
            }
            Self::UnacceptableMediaType {
                accept,
                produceable,
            } => json!({ "accept": accept, "produceable": produceable }),
            Self::UnacceptableCharset {
                accept_charset,
                produceable,
            } => json!({ "acceptCharset": accept_charset, "produceable": produceable }),
            Self::RequestBodyTooLarge { limit } => json!({ "limit": limit }),
            Self::BadRequestBodyRead { .. } => json!({}),
            Self::BadBodyEncoding { charset } => json!({ "charset": charset }),
            Self::BadBody { media_type, reason } => {
                json!({ "mediaType": media_type, "reason": reason })
            }
            Self::TransactionIdNotUnique { transaction_id } => {
                json!({ "transactionId": transaction_id })
            }
            Self::Timeout {
                timeout_ms,
                transaction_id,
            } => json!({ "timeout": timeout_ms, "transactionId": transaction_id }),
            Self::StringifierLack { media_type } => json!({ "mediaType": media_type }),
            Self::NonProduceableMediaType {
                media_type,
                produceable,
            } => json!({ "mediaType": media_type, "produceable": produceable }),
            Self::NonProduceableCharset {
                charset,
                produceable,
            } => json!({ "charset": charset, "produceable": produceable }),
            Self::HandlerPanic { .. } | Self::ResponseSerialization { .. } => json!({}),
            Self::Handler(e) => e.params.clone(),
        }
    }

    /// The error followed by each of its sources.
    pub fn debug_chain(&self) -> Vec<String> {
        let mut chain = vec![self.to_string()];
        let mut source = self.source();
        while let Some(err) = source {
            let message = err.to_string();
            if chain.last() != Some(&message) {
                chain.push(message);
            }
            source = err.source();
        }
        chain
    }
}
