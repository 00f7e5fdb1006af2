//! Structured logging to stdout, JSON in production and pretty in development.

use crate::{LogFormat, TelemetryConfig, TelemetryError};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Initialize the global tracing subscriber.
///
/// `RUST_LOG` overrides the configured level. Fails if a subscriber is
/// already installed.
pub fn init_logging(config: &TelemetryConfig) -> Result<(), TelemetryError> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    match config.log_format {
        LogFormat::Json => init_json_logging(filter),
        LogFormat::Pretty => init_pretty_logging(filter),
    }
}

fn init_json_logging(filter: EnvFilter) -> Result<(), TelemetryError> {
    let json_layer = fmt::layer()
        .json()
        .with_target(true)
        .with_current_span(true)
        .with_span_list(false)
        .with_file(false)
        .with_line_number(false)
        .flatten_event(true)
        .with_filter(filter);

    tracing_subscriber::registry()
        .with(json_layer)
        .try_init()
        .map_err(|e: tracing_subscriber::util::TryInitError| {
            TelemetryError::LoggingInit(e.to_string())
        })
}

fn init_pretty_logging(filter: EnvFilter) -> Result<(), TelemetryError> {
    let pretty_layer = fmt::layer()
        .pretty()
        .with_target(true)
        .with_file(true)
        .with_line_number(true)
        .with_filter(filter);

    tracing_subscriber::registry()
        .with(pretty_layer)
        .try_init()
        .map_err(|e: tracing_subscriber::util::TryInitError| {
            TelemetryError::LoggingInit(e.to_string())
        })
}

/// Standard log event names.
pub mod events {
    /// The server is starting up.
    pub const STARTUP: &str = "startup";

    /// The server is shutting down.
    pub const SHUTDOWN: &str = "shutdown";

    /// A contract has been resolved and compiled.
    pub const CONTRACT_LOADED: &str = "contract_loaded";

    /// The server is accepting connections.
    pub const LISTENING: &str = "listening";

    /// A transaction ended.
    pub const CALL: &str = "CALL";

    /// A transaction recorded an error.
    pub const ERROR: &str = "ERROR";

    /// A connection or response write failed.
    pub const TRANSPORT_ERROR: &str = "transport_error";

    /// A request failed contract validation.
    pub const VALIDATION_FAILURE: &str = "validation_failure";

    /// A failure escaped the per-request boundary.
    pub const FATAL_ERROR: &str = "fatal_error";
}

/// Helper macros for structured logging with standard fields.
///
/// These wrap the tracing macros to ensure consistent field naming.
#[macro_export]
macro_rules! log_startup {
    ($($field:tt)*) => {
        $crate::tracing::info!(
            event = $crate::logging::events::STARTUP,
            $($field)*
        )
    };
}

#[macro_export]
macro_rules! log_shutdown {
    ($($field:tt)*) => {
        $crate::tracing::info!(
            event = $crate::logging::events::SHUTDOWN,
            $($field)*
        )
    };
}

#[macro_export]
macro_rules! log_contract_loaded {
    ($($field:tt)*) => {
        $crate::tracing::info!(
            event = $crate::logging::events::CONTRACT_LOADED,
            $($field)*
        )
    };
}

#[macro_export]
macro_rules! log_listening {
    ($($field:tt)*) => {
        $crate::tracing::info!(
            event = $crate::logging::events::LISTENING,
            $($field)*
        )
    };
}

#[macro_export]
macro_rules! log_call {
    ($($field:tt)*) => {
        $crate::tracing::info!(
            event = $crate::logging::events::CALL,
            $($field)*
        )
    };
}

#[macro_export]
macro_rules! log_error {
    ($($field:tt)*) => {
        $crate::tracing::error!(
            event = $crate::logging::events::ERROR,
            $($field)*
        )
    };
}

#[macro_export]
macro_rules! log_transport_error {
    ($($field:tt)*) => {
        $crate::tracing::warn!(
            event = $crate::logging::events::TRANSPORT_ERROR,
            $($field)*
        )
    };
}

#[macro_export]
macro_rules! log_validation_failure {
    ($($field:tt)*) => {
        $crate::tracing::warn!(
            event = $crate::logging::events::VALIDATION_FAILURE,
            $($field)*
        )
    };
}

#[macro_export]
macro_rules! log_fatal_error {
    ($($field:tt)*) => {
        $crate::tracing::error!(
            event = $crate::logging::events::FATAL_ERROR,
            $($field)*
        )
    };
}
