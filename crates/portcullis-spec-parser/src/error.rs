use thiserror::Error;

/// Errors produced while resolving a contract.
///
/// All of them are fatal at startup: a contract that fails to resolve never
/// reaches the router.
#[derive(Debug, Error)]
pub enum ParseError {
    /// The document is not an OpenAPI 3.x contract.
    #[error("not a valid OpenAPI 3.x contract")]
    UnknownFormat,

    /// YAML/JSON syntax error.
    #[error("parse error: {0}")]
    Syntax(String),

    /// A local `$ref` points nowhere.
    #[error("unresolved $ref: {0}")]
    UnresolvedRef(String),

    /// A `$ref` chain loops back onto itself.
    #[error("circular $ref detected: {0}")]
    CircularRef(String),

    /// Structural problem in the document.
    #[error("invalid contract: {0}")]
    Structure(String),

    /// A parameter `name` is missing or not a string.
    #[error("bad parameter name in {0}")]
    BadParameterName(String),

    /// A security requirement references a scheme absent from `components.securitySchemes`.
    #[error("undeclared security scheme '{scheme}' in {context}")]
    UndeclaredSecurityScheme { scheme: String, context: String },

    /// I/O error reading the contract file.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ParseError {
    /// Stable error code.
    pub fn code(&self) -> &'static str {
        match self {
            ParseError::UnknownFormat => "E_UNKNOWN_FORMAT",
            ParseError::Syntax(_) | ParseError::Structure(_) => "E_BAD_DOCUMENT",
            ParseError::UnresolvedRef(_) => "E_UNRESOLVED_REF",
            ParseError::CircularRef(_) => "E_CIRCULAR_REF",
            ParseError::BadParameterName(_) => "E_BAD_PARAMETER_NAME",
            ParseError::UndeclaredSecurityScheme { .. } => "E_UNDECLARED_SECURITY_SCHEME",
            ParseError::Io(_) => "E_IO",
        }
    }
}
