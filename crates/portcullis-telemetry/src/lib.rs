//! Observability setup for Portcullis.
//!
//! Structured logging (JSON or pretty) through `tracing-subscriber`, plus the
//! standard event names and `log_*!` macros every crate logs with.
//!
//! # Usage
//!
//! ```ignore
//! use portcullis_telemetry::{init_logging, LogFormat, TelemetryConfig};
//!
//! let config = TelemetryConfig::new()
//!     .with_log_level("debug")
//!     .with_log_format(LogFormat::Pretty);
//! init_logging(&config)?;
//! ```

pub mod config;
pub mod logging;

pub use config::{LogFormat, TelemetryConfig};
pub use logging::{events, init_logging};

// Used by the exported macros.
#[doc(hidden)]
pub use tracing;

use thiserror::Error;

/// Telemetry errors.
#[derive(Debug, Error)]
pub enum TelemetryError {
    /// Failed to initialize logging.
    #[error("failed to initialize logging: {0}")]
    LoggingInit(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = TelemetryConfig::default();
        assert_eq!(config.service_name, "portcullis");
        assert_eq!(config.log_level, "info");
        assert_eq!(config.log_format, LogFormat::Json);
    }

    #[test]
    fn config_builder() {
        let config = TelemetryConfig::new()
            .with_service_name("test-service")
            .with_log_level("debug")
            .with_log_format(LogFormat::Pretty);

        assert_eq!(config.service_name, "test-service");
        assert_eq!(config.log_level, "debug");
        assert_eq!(config.log_format, LogFormat::Pretty);
    }
}
