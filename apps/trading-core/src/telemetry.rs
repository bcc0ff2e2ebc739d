//! Tracing Setup
//!
//! Console logging through `tracing-subscriber`, plus an OTLP span exporter
//! when enabled.
//!
//! # Configuration
//!
//! - `RUST_LOG`: filter directives (default: `trading_core=info`)
//! - `OTEL_ENABLED`: set to `true` to export spans over OTLP
//! - `OTEL_EXPORTER_OTLP_ENDPOINT`: OTLP gRPC endpoint (default: `http://localhost:4317`)
//! - `OTEL_SERVICE_NAME`: service name for traces (default: `trading-core`)
//! - `LOG_FORMAT`: `pretty` for ANSI colors without targets
//!
//! # Usage
//!
//! ```rust,ignore
//! use trading_core::telemetry::init_telemetry;
//!
//! #[tokio::main]
//! async fn main() {
//!     let _guard = init_telemetry();
//!     // ... application code
//! }
//! ```

use opentelemetry::trace::TracerProvider;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::trace::SdkTracerProvider;
use tracing_subscriber::{EnvFilter, Registry, layer::SubscriberExt, util::SubscriberInitExt};

const DEFAULT_FILTER: &str = "trading_core=info";

/// Guard that flushes and shuts down the tracer provider on drop.
#[derive(Debug)]
pub struct TelemetryGuard {
    provider: Option<SdkTracerProvider>,
}

impl TelemetryGuard {
    /// Whether spans are exported over OTLP.
    #[must_use]
    pub const fn is_exporting(&self) -> bool {
        self.provider.is_some()
    }
}

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        if let Some(provider) = self.provider.take()
            && let Err(e) = provider.shutdown()
        {
            eprintln!("Error shutting down tracer provider: {e:?}");
        }
    }
}

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}

fn is_pretty() -> bool {
    std::env::var("LOG_FORMAT").is_ok_and(|v| v == "pretty")
}

fn init_console() {
    let pretty = is_pretty();
    if let Err(e) = tracing_subscriber::fmt()
        .with_env_filter(env_filter())
        .with_target(!pretty)
        .with_ansi(pretty)
        .try_init()
    {
        eprintln!("Tracing subscriber already installed: {e}");
    }
}

/// Initialize logging, and OTLP span export when `OTEL_ENABLED=true`.
///
/// Returns a guard that shuts down the tracer provider when dropped. Calling
/// this twice keeps the first subscriber.
#[must_use]
pub fn init_telemetry() -> TelemetryGuard {
    let otel_enabled = std::env::var("OTEL_ENABLED").is_ok_and(|v| v == "true");

    if !otel_enabled {
        init_console();
        return TelemetryGuard { provider: None };
    }

    let endpoint = std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT")
        .unwrap_or_else(|_| "http://localhost:4317".to_string());
    let service_name =
        std::env::var("OTEL_SERVICE_NAME").unwrap_or_else(|_| "trading-core".to_string());

    let exporter = match opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_endpoint(&endpoint)
        .build()
    {
        Ok(exp) => exp,
        Err(e) => {
            eprintln!("Failed to create OTLP exporter: {e:?}, falling back to console logging");
            init_console();
            return TelemetryGuard { provider: None };
        }
    };

    let provider = SdkTracerProvider::builder()
        .with_simple_exporter(exporter)
        .build();
    let tracer = provider.tracer(service_name.clone());

    let pretty = is_pretty();
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(!pretty)
        .with_ansi(pretty);

    if let Err(e) = Registry::default()
        .with(env_filter())
        .with(fmt_layer)
        .with(tracing_opentelemetry::layer().with_tracer(tracer))
        .try_init()
    {
        eprintln!("Tracing subscriber already installed: {e}");
    }

    tracing::info!(
        service_name = %service_name,
        endpoint = %endpoint,
        "OpenTelemetry initialized"
    );

    TelemetryGuard {
        provider: Some(provider),
    }
}
