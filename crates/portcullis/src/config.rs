use std::time::Duration;

use portcullis_validator::{CoercionOptions, RequestLimits};

/// Runtime settings of an [`HttpRouter`](crate::HttpRouter).
#[derive(Debug, Clone)]
pub struct RouterConfig {
    /// Deadline for one transaction, from routing to the handler's response.
    pub timeout: Duration,
    pub limits: RequestLimits,
    /// Correlation header read from requests and written to responses.
    pub transaction_id_header: String,
    pub error_content_type: String,
    /// Expose debug chains in error bodies.
    pub dev_mode: bool,
    pub coercion: CoercionOptions,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            limits: RequestLimits::default(),
            transaction_id_header: "transaction-id".to_string(),
            error_content_type: "application/json".to_string(),
            dev_mode: false,
            coercion: CoercionOptions::default(),
        }
    }
}

impl RouterConfig {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_max_body_size(mut self, max_body_size: usize) -> Self {
        self.limits.max_body_size = max_body_size;
        self
    }

    pub fn with_limits(mut self, limits: RequestLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Header names are matched case-insensitively, so the name is lowercased.
    pub fn with_transaction_id_header(mut self, header: impl Into<String>) -> Self {
        self.transaction_id_header = header.into().to_ascii_lowercase();
        self
    }

    pub fn with_error_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.error_content_type = content_type.into();
        self
    }

    pub fn with_dev_mode(mut self, dev_mode: bool) -> Self {
        self.dev_mode = dev_mode;
        self
    }

    pub fn with_coercion(mut self, coercion: CoercionOptions) -> Self {
        self.coercion = coercion;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = RouterConfig::default();
        assert_eq!(config.timeout, Duration::from_secs(30));
        assert_eq!(config.limits.max_body_size, 1024 * 1024);
        assert_eq!(config.transaction_id_header, "transaction-id");
        assert_eq!(config.error_content_type, "application/json");
        assert!(!config.dev_mode);
        assert!(config.coercion.strict);
    }

    #[test]
    fn builders() {
        let config = RouterConfig::default()
            .with_timeout(Duration::from_millis(30))
            .with_max_body_size(16)
            .with_transaction_id_header("X-Request-Id")
            .with_dev_mode(true)
            .with_coercion(CoercionOptions::lenient());
        assert_eq!(config.timeout, Duration::from_millis(30));
        assert_eq!(config.limits.max_body_size, 16);
        assert_eq!(config.transaction_id_header, "x-request-id");
        assert!(config.dev_mode);
        assert!(!config.coercion.strict);
    }
}
