//! Logging and tracing setup
//!
//! Logs go to stdout, human-readable or JSON. Spans are additionally exported
//! over OTLP when an endpoint is configured (`--otlp-endpoint` or
//! `OTEL_EXPORTER_OTLP_ENDPOINT`).

use opentelemetry::KeyValue;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::{runtime, trace as sdktrace, Resource};
use tracing::Level;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::error::{Error, Result};

#[derive(Clone, Debug)]
pub struct TelemetryConfig {
    /// Service name attached to exported spans
    pub service_name: String,
    pub json_logs: bool,
    /// OTLP gRPC endpoint, e.g. "http://otel-collector:4317"
    pub otlp_endpoint: Option<String>,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: "converge-operator".to_string(),
            json_logs: false,
            otlp_endpoint: resolve_endpoint(None, std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT").ok()),
        }
    }
}

/// An explicit endpoint wins over the environment; blank values disable export
pub fn resolve_endpoint(flag: Option<String>, env: Option<String>) -> Option<String> {
    flag.or(env).filter(|e| !e.trim().is_empty())
}

fn init_tracer(service_name: &str, endpoint: &str) -> Result<sdktrace::Tracer> {
    opentelemetry_otlp::new_pipeline()
        .tracing()
        .with_exporter(
            opentelemetry_otlp::new_exporter()
                .tonic()
                .with_endpoint(endpoint),
        )
        .with_trace_config(sdktrace::config().with_resource(Resource::new(vec![
            KeyValue::new("service.name", service_name.to_string()),
            KeyValue::new("service.version", env!("CARGO_PKG_VERSION")),
        ])))
        .install_batch(runtime::Tokio)
        .map_err(|e| Error::TelemetryError(format!("failed to initialize tracer: {e}")))
}

/// Install the global subscriber; call once, from inside the Tokio runtime
pub fn init_tracing(config: &TelemetryConfig) -> Result<()> {
    let env_filter = EnvFilter::builder()
        .with_default_directive(Level::INFO.into())
        .from_env_lossy();

    let fmt_layer = if config.json_logs {
        fmt::layer().json().with_target(true).boxed()
    } else {
        fmt::layer().with_target(true).boxed()
    };

    let otel_layer = match &config.otlp_endpoint {
        Some(endpoint) => Some(
            tracing_opentelemetry::layer().with_tracer(init_tracer(&config.service_name, endpoint)?),
        ),
        None => None,
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .with(otel_layer)
        .try_init()
        .map_err(|e| Error::TelemetryError(e.to_string()))?;

    match &config.otlp_endpoint {
        Some(endpoint) => tracing::info!("OpenTelemetry tracing initialized ({})", endpoint),
        None => tracing::info!("OpenTelemetry tracing disabled (OTEL_EXPORTER_OTLP_ENDPOINT not set)"),
    }
    Ok(())
}

/// Flush spans that are still buffered
pub fn shutdown_telemetry() {
    opentelemetry::global::shutdown_tracer_provider();
}
