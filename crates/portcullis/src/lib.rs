//! Portcullis: a contract-driven HTTP dispatcher for OpenAPI 3.x.
//!
//! A contract is resolved and compiled once into an immutable
//! [`RoutingTable`]. Each request then runs inside a transaction: it is
//! routed, its parameters and body are validated and typed, it is handed to
//! the operation's [`Handler`], and the response is checked against the
//! contract before it is written through a [`ResponseSink`].

pub mod codec;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod error_handler;
pub mod fatal;
pub mod handler;
pub mod mock;
pub mod negotiation;
pub mod request;
pub mod response;
pub mod transaction;
pub mod transport;

use std::path::Path;

pub use codec::{BodyParser, BodyStringifier, Charset, Codecs, FormCodec, JsonCodec, TextCodec};
pub use config::RouterConfig;
pub use dispatcher::{HttpRouter, HttpRouterBuilder, Stage};
pub use error::{BuildError, DispatchError, HandlerError};
pub use error_handler::{DefaultErrorHandler, ErrorHandler, ProblemDetails};
pub use fatal::FatalSignal;
pub use handler::{Handler, Parameters};
pub use mock::MockHandler;
pub use negotiation::{MediaRange, RequestBodySpec, ResponseSpec};
pub use request::{BodyReadError, RawBody, RawRequest};
pub use response::{Payload, Response, SerializedResponse};
pub use transaction::{
    new_registry, CallRecord, ErrorRecord, OneshotSink, ResponseSink, SinkError, TracingObserver,
    Transaction, TransactionManager, TransactionObserver, TransactionRegistry,
};
pub use transport::serve;

pub use portcullis_compiler::{OperationDescriptor, RoutingTable};

use portcullis_compiler::{compile, CompileOptions};

/// Resolve and compile a contract file using the router's coercion settings.
pub fn load_contract(path: &Path, config: &RouterConfig) -> Result<RoutingTable, BuildError> {
    let spec = portcullis_spec_parser::parse_spec_file(path)?;
    let options = CompileOptions {
        coercion: config.coercion,
        ..CompileOptions::default()
    };
    Ok(compile(&spec, &options)?)
}
