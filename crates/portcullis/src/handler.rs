use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use portcullis_compiler::OperationDescriptor;
use portcullis_validator::ParameterLocation;
use serde_json::Value;

use crate::error::HandlerError;
use crate::response::{Payload, Response};

/// Validated, typed request values handed to a handler.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Parameters {
    pub path: BTreeMap<String, Value>,
    pub query: BTreeMap<String, Value>,
    /// Keys are lowercase header names.
    pub header: BTreeMap<String, Value>,
    pub body: Option<Payload>,
}

impl Parameters {
    pub fn get(&self, location: ParameterLocation, name: &str) -> Option<&Value> {
        match location {
            ParameterLocation::Path => self.path.get(name),
            ParameterLocation::Query => self.query.get(name),
            ParameterLocation::Header => self.header.get(&name.to_ascii_lowercase()),
            ParameterLocation::Cookie => None,
        }
    }

    /// The body when it was parsed into a structured value.
    pub fn json_body(&self) -> Option<&Value> {
        match &self.body {
            Some(Payload::Value(value)) => Some(value),
            _ => None,
        }
    }
}

/// Business logic bound to one operation id.
pub trait Handler: Send + Sync {
    fn handle(
        &self,
        parameters: Parameters,
        operation: Arc<OperationDescriptor>,
    ) -> BoxFuture<'static, Result<Response, HandlerError>>;
}

impl<F, Fut> Handler for F
where
    F: Fn(Parameters, Arc<OperationDescriptor>) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Response, HandlerError>> + Send + 'static,
{
    fn handle(
        &self,
        parameters: Parameters,
        operation: Arc<OperationDescriptor>,
    ) -> BoxFuture<'static, Result<Response, HandlerError>> {
        (self)(parameters, operation).boxed()
    }
}
