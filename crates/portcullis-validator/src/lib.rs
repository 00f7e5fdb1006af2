//! Request validation primitives for Portcullis.
//!
//! Casts raw wire strings into typed values, checks them against compiled
//! JSON schemas and reports failures as tagged [`ValidationError`]s. The
//! contract compiler assembles these pieces into per-operation validators;
//! the dispatcher runs them on every request.

pub mod body;
pub mod coercion;
pub mod error;
pub mod limits;
pub mod parameter;
pub mod schema;

pub use body::{BodySchema, BodyValidator};
pub use coercion::{coerce, stringify, CoercionOptions, PrimitiveType, RawValue, ValueShape};
pub use error::ValidationError;
pub use limits::RequestLimits;
pub use parameter::{ParameterLocation, ParameterValidator};
pub use schema::{JsonSchemaProvider, SchemaError, SchemaProvider, SchemaValidator, SchemaViolation};
