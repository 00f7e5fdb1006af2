//! Translation of dispatch errors into client responses.

use std::collections::HashMap;

use http::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::DispatchError;
use crate::negotiation::ResponseSpec;
use crate::response::Response;

/// Turns any [`DispatchError`] into the response the client sees. Must not fail.
pub trait ErrorHandler: Send + Sync {
    fn handle(&self, transaction_id: &str, spec: &ResponseSpec, error: &DispatchError) -> Response;
}

/// RFC 9457 problem details body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProblemDetails {
    #[serde(rename = "type")]
    pub error_type: String,
    pub title: String,
    pub status: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instance: Option<String>,
    #[serde(flatten)]
    pub extensions: HashMap<String, Value>,
}

impl ProblemDetails {
    pub fn from_error(transaction_id: &str, error: &DispatchError, dev_mode: bool) -> Self {
        let status = error.status();
        let code = error.code();
        // Internal failures only say that something went wrong, unless in dev mode.
        let opaque = status == StatusCode::INTERNAL_SERVER_ERROR && !dev_mode;

        let mut extensions = HashMap::new();
        extensions.insert("code".to_string(), Value::String(code.to_string()));
        extensions.insert(
            "params".to_string(),
            if opaque { json!({}) } else { error.params() },
        );
        extensions.insert(
            "transaction_id".to_string(),
            Value::String(transaction_id.to_string()),
        );
        if dev_mode {
            extensions.insert("debug".to_string(), json!(error.debug_chain()));
        }

        Self {
            error_type: format!(
                "urn:portcullis:error:{}",
                code.trim_start_matches("E_").to_ascii_lowercase().replace('_', "-")
            ),
            title: status.canonical_reason().unwrap_or("Error").to_string(),
            status: status.as_u16(),
            detail: Some(if opaque {
                "internal server error".to_string()
            } else {
                error.to_string()
            }),
            instance: None,
            extensions,
        }
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or_else(|_| {
            json!({
                "type": "urn:portcullis:error:internal",
                "title": "Serialization error",
                "status": 500
            })
        })
    }
}

/// Default error handler producing [`ProblemDetails`] bodies.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultErrorHandler {
    pub dev_mode: bool,
}

impl DefaultErrorHandler {
    pub fn new(dev_mode: bool) -> Self {
        Self { dev_mode }
    }
}

impl ErrorHandler for DefaultErrorHandler {
    fn handle(&self, transaction_id: &str, _spec: &ResponseSpec, error: &DispatchError) -> Response {
        let problem = ProblemDetails::from_error(transaction_id, error, self.dev_mode);
        Response::json(error.status(), problem.to_value())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::HandlerError;

    fn not_found() -> DispatchError {
        DispatchError::NotFound {
            method: "GET".into(),
            path: "/nope".into(),
        }
    }

    #[test]
    fn client_errors_carry_code_and_params() {
        let handler = DefaultErrorHandler::new(false);
        let response = handler.handle("txn-1", &ResponseSpec::default(), &not_found());
        assert_eq!(response.status, StatusCode::NOT_FOUND);

        let Some(crate::Payload::Value(body)) = response.body else {
            panic!("expected a structured body");
        };
        assert_eq!(body["code"], "E_NOT_FOUND");
        assert_eq!(body["params"]["path"], "/nope");
        assert_eq!(body["transaction_id"], "txn-1");
        assert_eq!(body["type"], "urn:portcullis:error:not-found");
        assert_eq!(body["status"], 404);
        assert!(body.get("debug").is_none());
    }

    #[test]
    fn internal_errors_are_opaque_outside_dev_mode() {
        let err = DispatchError::from(HandlerError::internal(std::io::Error::new(
            std::io::ErrorKind::Other,
            "db password rejected",
        )));
        let problem = ProblemDetails::from_error("t", &err, false);
        assert_eq!(problem.detail.as_deref(), Some("internal server error"));
        assert!(!problem.to_value().to_string().contains("password"));

        let problem = ProblemDetails::from_error("t", &err, true);
        assert_eq!(problem.detail.as_deref(), Some("db password rejected"));
        assert_eq!(problem.extensions["debug"][0], "db password rejected");
    }
}
