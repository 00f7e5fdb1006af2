use portcullis_router::RouteError;
use thiserror::Error;

/// Errors produced while compiling a contract. All of them are fatal at startup.
#[derive(Debug, Error)]
pub enum CompileError {
    /// Contract resolution failed.
    #[error(transparent)]
    Parse(#[from] portcullis_spec_parser::ParseError),

    /// Two operations share a method and path template.
    #[error(transparent)]
    Route(#[from] RouteError),

    #[error("unsupported definition of parameter '{name}' ({location}) in {operation}: {reason}")]
    UnsupportedParameterDefinition {
        name: String,
        location: String,
        operation: String,
        reason: String,
    },

    #[error("path parameter '{name}' in {operation} is not declared in both the template and the parameters")]
    UndeclaredPathParameter { name: String, operation: String },

    #[error("unsupported path parameter '{name}' in {operation}: {reason}")]
    UnsupportedPathParameter {
        name: String,
        operation: String,
        reason: String,
    },

    #[error("bad schema for {context}: {reason}")]
    BadSchema { context: String, reason: String },

    #[error("operation {method} {path} has no operationId")]
    MissingOperationId { method: String, path: String },

    #[error("duplicate operationId '{operation_id}': first at {first}, duplicate at {duplicate}")]
    DuplicateOperationId {
        operation_id: String,
        first: String,
        duplicate: String,
    },
}

impl CompileError {
    /// Stable error code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Parse(e) => e.code(),
            Self::Route(e) => e.code(),
            Self::UnsupportedParameterDefinition { .. } => "E_UNSUPPORTED_PARAMETER_DEFINITION",
            Self::UndeclaredPathParameter { .. } => "E_UNDECLARED_PATH_PARAMETER",
            Self::UnsupportedPathParameter { .. } => "E_UNSUPPORTED_PATH_PARAMETER",
            Self::BadSchema { .. } => "E_BAD_SCHEMA",
            Self::MissingOperationId { .. } => "E_MISSING_OPERATION_ID",
            Self::DuplicateOperationId { .. } => "E_DUPLICATE_OPERATION_ID",
        }
    }
}
