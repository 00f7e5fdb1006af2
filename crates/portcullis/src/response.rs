//! Handler-facing and wire-facing response shapes.

use bytes::Bytes;
use http::header::{HeaderName, HeaderValue, CONTENT_TYPE};
use http::{HeaderMap, StatusCode};
use serde_json::Value;

/// A response body before serialization.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// Structured value, stringified by the codec for the response media type.
    Value(Value),
    /// Raw bytes sent as-is.
    Bytes(Bytes),
}

/// A response as produced by handlers and error handlers.
#[derive(Debug, Clone)]
pub struct Response {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Option<Payload>,
}

impl Response {
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: None,
        }
    }

    pub fn json(status: StatusCode, body: Value) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: Some(Payload::Value(body)),
        }
    }

    pub fn bytes(status: StatusCode, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: Some(Payload::Bytes(body.into())),
        }
    }

    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn content_type(&self) -> Option<&str> {
        self.headers.get(CONTENT_TYPE).and_then(|v| v.to_str().ok())
    }
}

/// A fully serialized response handed to a [`ResponseSink`](crate::ResponseSink).
#[derive(Debug, Clone)]
pub struct SerializedResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl SerializedResponse {
    /// Bare response used when nothing better can be produced.
    pub fn internal_error() -> Self {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("text/plain; charset=utf-8"));
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            headers,
            body: Bytes::from_static(b"internal server error"),
        }
    }
}
