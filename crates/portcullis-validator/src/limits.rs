use crate::error::ValidationError;

/// Request limits enforced before routing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestLimits {
    /// Maximum request body size in bytes (default: 1MB).
    pub max_body_size: usize,
    /// Maximum number of headers (default: 100).
    pub max_headers: usize,
    /// Maximum header size in bytes, name plus value (default: 8KB).
    pub max_header_size: usize,
    /// Maximum URI length in characters (default: 8KB).
    pub max_uri_length: usize,
}

impl Default for RequestLimits {
    fn default() -> Self {
        Self {
            max_body_size: 1024 * 1024, // 1 MB
            max_headers: 100,
            max_header_size: 8 * 1024, // 8 KB
            max_uri_length: 8 * 1024,  // 8 KB
        }
    }
}

impl RequestLimits {
    pub fn validate_uri(&self, uri: &str) -> Result<(), ValidationError> {
        if uri.len() > self.max_uri_length {
            return Err(ValidationError::UriTooLong {
                length: uri.len(),
                limit: self.max_uri_length,
            });
        }
        Ok(())
    }

    /// Validate header count and individual header sizes.
    pub fn validate_headers<'a, I>(&self, headers: I) -> Result<(), ValidationError>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut count = 0;
        for (name, value) in headers {
            count += 1;
            if count > self.max_headers {
                return Err(ValidationError::TooManyHeaders {
                    count,
                    limit: self.max_headers,
                });
            }
            let header_size = name.len() + value.len();
            if header_size > self.max_header_size {
                return Err(ValidationError::HeaderTooLarge {
                    name: name.to_string(),
                    size: header_size,
                    limit: self.max_header_size,
                });
            }
        }
        Ok(())
    }

    pub fn validate_body_size(&self, body_len: usize) -> Result<(), ValidationError> {
        if body_len > self.max_body_size {
            return Err(ValidationError::BodyTooLarge {
                size: body_len,
                limit: self.max_body_size,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uri_within_limit() {
        let limits = RequestLimits::default();
        assert!(limits.validate_uri("/api/users/123").is_ok());
    }

    #[test]
    fn uri_too_long() {
        let limits = RequestLimits {
            max_uri_length: 10,
            ..Default::default()
        };
        assert!(matches!(
            limits.validate_uri("/api/users/123456789"),
            Err(ValidationError::UriTooLong { limit: 10, .. })
        ));
    }

    #[test]
    fn too_many_headers() {
        let limits = RequestLimits {
            max_headers: 5,
            ..Default::default()
        };
        let names: Vec<String> = (0..10).map(|i| format!("header-{}", i)).collect();
        let result = limits.validate_headers(names.iter().map(|n| (n.as_str(), "value")));
        assert!(matches!(
            result,
            Err(ValidationError::TooManyHeaders { limit: 5, .. })
        ));
    }

    #[test]
    fn header_too_large() {
        let limits = RequestLimits {
            max_header_size: 20,
            ..Default::default()
        };
        let value = "a".repeat(100);
        let result = limits.validate_headers([("x-very-long-header", value.as_str())]);
        match result {
            Err(ValidationError::HeaderTooLarge { name, .. }) => {
                assert_eq!(name, "x-very-long-header")
            }
            other => panic!("expected HeaderTooLarge, got {:?}", other),
        }
    }

    #[test]
    fn body_size() {
        let limits = RequestLimits {
            max_body_size: 100,
            ..Default::default()
        };
        assert!(limits.validate_body_size(100).is_ok());
        assert!(matches!(
            limits.validate_body_size(101),
            Err(ValidationError::BodyTooLarge {
                size: 101,
                limit: 100
            })
        ));
    }
}
