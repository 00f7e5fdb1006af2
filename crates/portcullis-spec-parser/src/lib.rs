//! OpenAPI 3.x contract resolver.
//!
//! Reads YAML/JSON contracts and flattens them into fully resolved
//! operations: local `$ref`s are inlined, path-level parameters are
//! inherited, and security requirements are turned into the header/query
//! parameters they imply.

pub mod error;
pub mod model;
pub mod parser;
pub mod security;

pub use error::ParseError;
pub use model::{
    ApiSpec, ContentSchema, Operation, Parameter, ParameterSource, RequestBody, ResponseObject,
    SecurityScheme,
};
pub use parser::{parse_spec, parse_spec_file};
