//! Portcullis command-line interface.
//!
//! `serve` answers a contract from mock extensions; `validate` checks
//! contracts without serving them.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use serde::Serialize;
use tokio::net::TcpListener;

use portcullis::mock::{MockConfig, MOCK_EXTENSION};
use portcullis::{load_contract, serve, HttpRouter, MockHandler, RouterConfig};
use portcullis_compiler::{compile, CompileOptions};
use portcullis_telemetry::{init_logging, LogFormat, TelemetryConfig};
use portcullis_validator::CoercionOptions;

#[derive(Parser, Debug)]
#[command(name = "portcullis", about = "Contract-driven HTTP dispatcher for OpenAPI 3.x", version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Serve a contract, answering every operation from its `x-portcullis-mock` extension.
    Serve {
        /// Contract file (YAML or JSON).
        #[arg(long, env = "PORTCULLIS_SPEC")]
        spec: PathBuf,

        /// Listen address.
        #[arg(long, default_value = "0.0.0.0:8080", env = "PORTCULLIS_LISTEN")]
        listen: SocketAddr,

        /// Enable development mode (debug chains in error bodies).
        #[arg(long)]
        dev: bool,

        /// Log level.
        #[arg(long, default_value = "info")]
        log_level: String,

        /// Log format (json or pretty).
        #[arg(long, default_value = "json")]
        log_format: String,

        /// Transaction deadline in milliseconds.
        #[arg(long, default_value = "30000")]
        timeout_ms: u64,

        /// Maximum request body size in bytes (default: 1048576 = 1MB).
        #[arg(long, default_value = "1048576")]
        max_body_size: usize,

        /// Correlation header read from requests and echoed on responses.
        #[arg(long, default_value = "transaction-id")]
        transaction_id_header: String,

        /// Accept non-canonical numbers and 1/0 booleans in parameters.
        #[arg(long)]
        lenient_coercion: bool,
    },

    /// Validate contract(s) without serving them.
    Validate {
        /// Contract file(s) (YAML or JSON).
        #[arg(short, long, required = true, num_args = 1..)]
        spec: Vec<PathBuf>,

        /// Output format (text or json).
        #[arg(long, default_value = "text")]
        format: String,
    },
}

struct ServeArgs {
    spec: PathBuf,
    listen: SocketAddr,
    config: RouterConfig,
}

#[derive(Debug, Serialize)]
struct ValidationIssue {
    code: String,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    location: Option<String>,
}

#[derive(Debug, Serialize)]
struct ValidationResult {
    file: String,
    valid: bool,
    errors: Vec<ValidationIssue>,
    warnings: Vec<ValidationIssue>,
}

/// Run the validate command.
fn run_validate(specs: &[PathBuf], output_format: &str) -> ExitCode {
    let results: Vec<ValidationResult> = specs.iter().map(|path| validate_one(path)).collect();
    let has_errors = results.iter().any(|r| !r.valid);

    if output_format == "json" {
        let output = serde_json::json!({
            "results": results,
            "summary": {
                "total": results.len(),
                "valid": results.iter().filter(|r| r.valid).count(),
                "invalid": results.iter().filter(|r| !r.valid).count(),
            }
        });
        match serde_json::to_string_pretty(&output) {
            Ok(text) => println!("{}", text),
            Err(e) => {
                eprintln!("error: failed to render results: {}", e);
                return ExitCode::from(2);
            }
        }
    } else {
        for result in &results {
            if result.valid && result.warnings.is_empty() {
                eprintln!("✓ {} is valid", result.file);
            } else if result.valid {
                eprintln!("✓ {} is valid (with {} warning(s))", result.file, result.warnings.len());
            } else {
                eprintln!("✗ {} has {} error(s)", result.file, result.errors.len());
            }

            for issue in result.errors.iter().chain(&result.warnings) {
                let suffix = if issue.code.starts_with('W') { " (warning)" } else { "" };
                match &issue.location {
                    Some(loc) => eprintln!("  {} [{}]: {}{}", issue.code, loc, issue.message, suffix),
                    None => eprintln!("  {}: {}{}", issue.code, issue.message, suffix),
                }
            }
        }

        let valid_count = results.iter().filter(|r| r.valid).count();
        let total = results.len();
        eprintln!();
        eprintln!(
            "validated {} contract(s): {} valid, {} invalid",
            total,
            valid_count,
            total - valid_count
        );
    }

    if has_errors {
        ExitCode::from(1)
    } else {
        ExitCode::SUCCESS
    }
}

fn validate_one(path: &PathBuf) -> ValidationResult {
    let file = path.display().to_string();
    let mut errors = Vec::new();
    let mut warnings = Vec::new();

    let table = portcullis_spec_parser::parse_spec_file(path)
        .map_err(|e| (e.code(), e.to_string()))
        .and_then(|spec| {
            compile(&spec, &CompileOptions::default()).map_err(|e| (e.code(), e.to_string()))
        });

    match table {
        Ok(table) => {
            for operation in table.operations() {
                let location = Some(format!("{} {}", operation.method, operation.path));
                match MockConfig::from_operation(operation) {
                    None => warnings.push(ValidationIssue {
                        code: "W_NO_MOCK".to_string(),
                        message: format!(
                            "operation '{}' has no x-portcullis-{} extension and will answer 501",
                            operation.operation_id, MOCK_EXTENSION
                        ),
                        location,
                    }),
                    Some(Err(reason)) => errors.push(ValidationIssue {
                        code: "E_BAD_MOCK".to_string(),
                        message: reason,
                        location,
                    }),
                    Some(Ok(_)) => {}
                }
            }
        }
        Err((code, message)) => errors.push(ValidationIssue {
            code: code.to_string(),
            message,
            location: Some(file.clone()),
        }),
    }

    ValidationResult {
        file,
        valid: errors.is_empty(),
        errors,
        warnings,
    }
}

/// Run the serve command.
async fn run_serve(args: ServeArgs, telemetry: TelemetryConfig) -> ExitCode {
    if let Err(e) = init_logging(&telemetry) {
        eprintln!("error: {}", e);
        return ExitCode::from(1);
    }

    portcullis_telemetry::log_startup!(
        service = %telemetry.service_name,
        version = env!("CARGO_PKG_VERSION"),
        spec = %args.spec.display(),
        "starting"
    );

    match serve_contract(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            portcullis_telemetry::log_fatal_error!(error = %format!("{:#}", e), "portcullis stopped");
            eprintln!("error: {:#}", e);
            ExitCode::from(1)
        }
    }
}

async fn serve_contract(args: ServeArgs) -> anyhow::Result<()> {
    let table = load_contract(&args.spec, &args.config)
        .with_context(|| format!("failed to load contract {}", args.spec.display()))?;
    portcullis_telemetry::log_contract_loaded!(
        title = %table.title,
        api_version = %table.api_version,
        operations = table.operations().len(),
        "contract compiled"
    );

    let router = HttpRouter::builder(Arc::new(table), args.config)
        .default_handler(MockHandler)
        .build()
        .context("failed to build router")?;

    let listener = TcpListener::bind(args.listen)
        .await
        .with_context(|| format!("failed to bind to {}", args.listen))?;
    portcullis_telemetry::log_listening!(addr = %args.listen, "accepting connections");

    let fatal = router.fatal_signal().clone();
    serve(listener, router, shutdown_signal())
        .await
        .context("server loop failed")?;

    if let Some(reason) = fatal.reason() {
        anyhow::bail!("fatal error: {}", reason);
    }
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match cli.command {
        Commands::Validate { spec, format } => run_validate(&spec, &format),
        Commands::Serve {
            spec,
            listen,
            dev,
            log_level,
            log_format,
            timeout_ms,
            max_body_size,
            transaction_id_header,
            lenient_coercion,
        } => {
            let Some(log_format) = LogFormat::parse(&log_format) else {
                eprintln!("error: invalid log format: {}", log_format);
                return ExitCode::from(1);
            };
            let telemetry = TelemetryConfig::new()
                .with_log_level(log_level)
                .with_log_format(log_format);

            let coercion = if lenient_coercion {
                CoercionOptions::lenient()
            } else {
                CoercionOptions::default()
            };
            let config = RouterConfig::default()
                .with_timeout(Duration::from_millis(timeout_ms))
                .with_max_body_size(max_body_size)
                .with_transaction_id_header(transaction_id_header)
                .with_dev_mode(dev)
                .with_coercion(coercion);

            run_serve(
                ServeArgs {
                    spec,
                    listen,
                    config,
                },
                telemetry,
            )
            .await
        }
    }
}
