//! Compiles a resolved contract into the immutable routing table.
//!
//! Every shape decision happens here, once, at startup: parameter locations
//! and coercions, capture types, body and response schemas, media types.
//! The dispatcher only ever reads the resulting [`OperationDescriptor`]s.

pub mod compile;
pub mod descriptor;
pub mod error;
pub mod query;

pub use compile::{compile, CompileOptions, RoutingTable, DEFAULT_CHARSETS};
pub use descriptor::{OperationDescriptor, OperationParameters, ResponseSchemas};
pub use error::CompileError;
pub use query::QueryParser;
