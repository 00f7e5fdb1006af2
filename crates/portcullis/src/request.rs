//! Transport-agnostic request shape.

use std::future::Future;
use std::net::SocketAddr;
use std::pin::Pin;

use bytes::Bytes;
use http::HeaderMap;
use http_body_util::combinators::UnsyncBoxBody;
use http_body_util::Collected;
use http_body_util::{BodyExt, Full, LengthLimitError, Limited};
use thiserror::Error;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// A request as handed over by a transport adapter.
#[derive(Debug)]
pub struct RawRequest {
    /// Uppercase method.
    pub method: String,
    /// Path plus optional `?query`.
    pub url: String,
    pub headers: HeaderMap,
    pub remote_addr: Option<SocketAddr>,
    pub body: RawBody,
}

impl RawRequest {
    /// A bodiless request, mostly for tests and embedding.
    pub fn new(method: impl AsRef<str>, url: impl Into<String>) -> Self {
        Self {
            method: method.as_ref().to_ascii_uppercase(),
            url: url.into(),
            headers: HeaderMap::new(),
            remote_addr: None,
            body: RawBody::Empty,
        }
    }

    /// Append a header; invalid names or values are skipped.
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        if let (Ok(name), Ok(value)) = (
            http::HeaderName::from_bytes(name.as_bytes()),
            http::HeaderValue::from_str(value),
        ) {
            self.headers.append(name, value);
        }
        self
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = RawBody::Buffered(body.into());
        self
    }

    /// Split the URL into path and query string.
    pub fn path_and_query(&self) -> (&str, &str) {
        match self.url.split_once('?') {
            Some((path, query)) => (path, query),
            None => (self.url.as_str(), ""),
        }
    }

    /// First value of a header, if it is visible ASCII.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

/// Request body: nothing, bytes already in memory, or a stream still on the wire.
pub enum RawBody {
    Empty,
    Buffered(Bytes),
    Stream(UnsyncBoxBody<Bytes, BoxError>),
}

impl std::fmt::Debug for RawBody {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Empty => f.write_str("Empty"),
            Self::Buffered(bytes) => write!(f, "Buffered({} bytes)", bytes.len()),
            Self::Stream(_) => f.write_str("Stream(..)"),
        }
    }
}

#[derive(Debug, Error)]
pub enum BodyReadError {
    #[error("body exceeds {limit} bytes")]
    TooLarge { limit: usize },

    #[error("{0}")]
    Read(String),
}

impl RawBody {
    pub fn from_full(bytes: impl Into<Bytes>) -> Self {
        Self::Stream(
            Full::new(bytes.into())
                .map_err(|never| -> BoxError { match never {} })
                .boxed_unsync(),
        )
    }

    /// Buffer the whole body, failing once more than `limit` bytes arrive.
    pub async fn read_with_limit(self, limit: usize) -> Result<Bytes, BodyReadError> {
        match self {
            Self::Empty => Ok(Bytes::new()),
            Self::Buffered(bytes) if bytes.len() > limit => Err(BodyReadError::TooLarge { limit }),
            Self::Buffered(bytes) => Ok(bytes),
            Self::Stream(body) => match collect_limited(body, limit).await {
                Ok(collected) => Ok(collected.to_bytes()),
                Err(err) if err.downcast_ref::<LengthLimitError>().is_some() => {
                    Err(BodyReadError::TooLarge { limit })
                }
                Err(err) => Err(BodyReadError::Read(err.to_string())),
            },
        }
    }
}

// Boxed outside the async fn so `Send` is proven on concrete types; proving it
// inside the generator witness trips the higher-ranked `From` check.
fn collect_limited(
    body: UnsyncBoxBody<Bytes, BoxError>,
    limit: usize,
) -> Pin<Box<dyn Future<Output = Result<Collected<Bytes>, BoxError>> + Send>> {
    Box::pin(Limited::new(body, limit).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn buffered_body_within_limit() {
        let body = RawBody::Buffered(Bytes::from_static(b"hello"));
        assert_eq!(body.read_with_limit(5).await.unwrap(), "hello");
    }

    #[tokio::test]
    async fn buffered_body_over_limit() {
        let body = RawBody::Buffered(Bytes::from_static(b"hello"));
        assert!(matches!(
            body.read_with_limit(4).await,
            Err(BodyReadError::TooLarge { limit: 4 })
        ));
    }

    #[tokio::test]
    async fn streamed_body_over_limit() {
        let body = RawBody::from_full(vec![b'x'; 64]);
        assert!(matches!(
            body.read_with_limit(16).await,
            Err(BodyReadError::TooLarge { limit: 16 })
        ));
    }

    #[tokio::test]
    async fn streamed_body_is_collected() {
        let body = RawBody::from_full("{\"a\":1}");
        assert_eq!(body.read_with_limit(1024).await.unwrap(), "{\"a\":1}");
    }

    #[test]
    fn url_split() {
        let req = RawRequest::new("get", "/users?limit=2");
        assert_eq!(req.method, "GET");
        assert_eq!(req.path_and_query(), ("/users", "limit=2"));
        assert_eq!(RawRequest::new("GET", "/users").path_and_query(), ("/users", ""));
    }
}
