//! Tracing and OpenTelemetry initialization shared by the worker (C7) and
//! client (C8) binaries.
//!
//! Grounded on the teacher's `telemetry` module
//! (`crates/core/src/telemetry.rs`): an `_from_env()`-configured console +
//! OTLP-exporter `tracing-subscriber` registry, returning a guard that must
//! be held for the process lifetime so the tracer provider flushes on
//! shutdown. Gen-AI span-naming helpers are dropped — this crate has no LLM
//! call sites to annotate.

use std::time::Duration;

use opentelemetry::trace::TracerProvider as _;
use opentelemetry::KeyValue;
use opentelemetry_otlp::{SpanExporter, WithExportConfig};
use opentelemetry_sdk::trace::{RandomIdGenerator, Sampler, SdkTracerProvider};
use opentelemetry_sdk::Resource;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Configuration for this process's tracing setup.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    pub service_name: String,
    pub service_version: Option<String>,
    /// OTLP gRPC endpoint, e.g. `http://localhost:4317`. `None` disables
    /// the OTLP layer entirely and leaves console logging as the only
    /// sink.
    pub otlp_endpoint: Option<String>,
    pub environment: Option<String>,
    pub enable_console: bool,
    pub log_filter: Option<String>,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: "chaingraph".to_string(),
            service_version: None,
            otlp_endpoint: None,
            environment: None,
            enable_console: true,
            log_filter: None,
        }
    }
}

impl TelemetryConfig {
    /// Reads `OTEL_SERVICE_NAME`, `OTEL_SERVICE_VERSION`,
    /// `OTEL_EXPORTER_OTLP_ENDPOINT`, `OTEL_ENVIRONMENT`, and `RUST_LOG`.
    pub fn from_env() -> Self {
        Self {
            service_name: std::env::var("OTEL_SERVICE_NAME").unwrap_or_else(|_| "chaingraph".to_string()),
            service_version: std::env::var("OTEL_SERVICE_VERSION").ok(),
            otlp_endpoint: std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT").ok(),
            environment: std::env::var("OTEL_ENVIRONMENT").ok(),
            enable_console: true,
            log_filter: std::env::var("RUST_LOG").ok(),
        }
    }
}

/// Holds the tracer provider alive; dropping it flushes pending spans and
/// shuts the exporter down. Keep this bound in `main` for the process's
/// whole lifetime.
pub struct TelemetryGuard {
    provider: Option<SdkTracerProvider>,
}

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        if let Some(provider) = self.provider.take() {
            if let Err(e) = provider.shutdown() {
                eprintln!("failed to shut down tracer provider: {e:?}");
            }
        }
    }
}

pub fn init(config: TelemetryConfig) -> TelemetryGuard {
    let mut resource_attrs = vec![KeyValue::new("service.name", config.service_name.clone())];
    if let Some(version) = &config.service_version {
        resource_attrs.push(KeyValue::new("service.version", version.clone()));
    }
    if let Some(env) = &config.environment {
        resource_attrs.push(KeyValue::new("deployment.environment", env.clone()));
    }
    let resource = Resource::builder().with_attributes(resource_attrs).build();

    let filter = config.log_filter.as_ref().and_then(|f| EnvFilter::try_new(f).ok()).unwrap_or_else(|| EnvFilter::new("info"));

    let console_layer =
        config.enable_console.then(|| tracing_subscriber::fmt::layer().with_target(true).with_filter(filter));

    let (provider, otel_layer, otel_status) = if let Some(endpoint) = &config.otlp_endpoint {
        match build_otlp_tracer(endpoint, resource) {
            Ok((provider, tracer)) => {
                let layer = tracing_opentelemetry::layer().with_tracer(tracer);
                (Some(provider), Some(layer), Some(Ok(endpoint.clone())))
            }
            Err(e) => (None, None, Some(Err(e.to_string()))),
        }
    } else {
        (None, None, None)
    };

    tracing_subscriber::registry().with(console_layer).with(otel_layer).init();

    match otel_status {
        Some(Ok(endpoint)) => tracing::info!(endpoint = %endpoint, "OpenTelemetry tracing enabled"),
        Some(Err(e)) => tracing::warn!(error = %e, "failed to initialize OTLP tracer, continuing without it"),
        None => tracing::debug!("OpenTelemetry tracing disabled: OTEL_EXPORTER_OTLP_ENDPOINT not set"),
    }

    TelemetryGuard { provider }
}

fn build_otlp_tracer(
    endpoint: &str,
    resource: Resource,
) -> Result<(SdkTracerProvider, opentelemetry_sdk::trace::Tracer), opentelemetry::trace::TraceError> {
    let exporter = SpanExporter::builder().with_tonic().with_endpoint(endpoint).with_timeout(Duration::from_secs(10)).build()?;

    let provider = SdkTracerProvider::builder()
        .with_batch_exporter(exporter)
        .with_sampler(Sampler::AlwaysOn)
        .with_id_generator(RandomIdGenerator::default())
        .with_resource(resource)
        .build();

    let tracer = provider.tracer("chaingraph");
    Ok((provider, tracer))
}
