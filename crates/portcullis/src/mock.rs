//! Contract-only responses for operations without business logic.
//!
//! An operation opts in with an `x-portcullis-mock` extension:
//!
//! ```yaml
//! x-portcullis-mock:
//!   status: 200
//!   body: { "id": 1 }
//!   headers: { "x-mocked": "true" }
//!   delay_ms: 50
//! ```

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use http::header::{HeaderName, HeaderValue};
use http::StatusCode;
use portcullis_compiler::OperationDescriptor;
use serde::Deserialize;
use serde_json::Value;

use crate::error::HandlerError;
use crate::handler::{Handler, Parameters};
use crate::response::Response;

/// Extension name, without the vendor prefix.
pub const MOCK_EXTENSION: &str = "mock";

#[derive(Debug, Clone, Deserialize)]
pub struct MockConfig {
    #[serde(default = "default_status")]
    pub status: u16,
    #[serde(default)]
    pub body: Option<Value>,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub delay_ms: u64,
}

fn default_status() -> u16 {
    200
}

impl MockConfig {
    /// Read the mock configuration of an operation, if it declares one.
    pub fn from_operation(operation: &OperationDescriptor) -> Option<Result<Self, String>> {
        let raw = operation.extension(MOCK_EXTENSION)?;
        Some(serde_json::from_value(raw.clone()).map_err(|e| e.to_string()))
    }
}

/// Answers every operation from its `x-portcullis-mock` extension, or with
/// `501 E_NOT_IMPLEMENTED` when there is none.
#[derive(Debug, Default, Clone, Copy)]
pub struct MockHandler;

impl Handler for MockHandler {
    fn handle(
        &self,
        _parameters: Parameters,
        operation: Arc<OperationDescriptor>,
    ) -> BoxFuture<'static, Result<Response, HandlerError>> {
        async move {
            let config = match MockConfig::from_operation(&operation) {
                Some(Ok(config)) => config,
                Some(Err(reason)) => {
                    return Err(HandlerError::new(
                        StatusCode::INTERNAL_SERVER_ERROR,
                        "E_BAD_MOCK",
                        format!("invalid mock for '{}': {}", operation.operation_id, reason),
                    ))
                }
                None => return Err(HandlerError::not_implemented(&operation.operation_id)),
            };

            if config.delay_ms > 0 {
                tokio::time::sleep(Duration::from_millis(config.delay_ms)).await;
            }

            let status = StatusCode::from_u16(config.status).map_err(HandlerError::internal)?;
            let mut response = match config.body {
                Some(body) => Response::json(status, body),
                None => Response::new(status),
            };
            for (name, value) in &config.headers {
                let name = HeaderName::from_bytes(name.as_bytes()).map_err(HandlerError::internal)?;
                let value = HeaderValue::from_str(value).map_err(HandlerError::internal)?;
                response.headers.insert(name, value);
            }
            Ok(response)
        }
        .boxed()
    }
}
