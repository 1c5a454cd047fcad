//! Logging and trace export.
//!
//! Log lines go to stdout, as JSON or human-readable text. Spans are also
//! exported over OTLP when `OTEL_EXPORTER_OTLP_ENDPOINT` is set. The filter
//! comes from `RUST_LOG`, defaulting to `info`.

use anyhow::Context;
use clap::ValueEnum;
use opentelemetry::trace::TracerProvider as _;
use opentelemetry::KeyValue;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::trace::{Tracer, TracerProvider};
use opentelemetry_sdk::Resource;
use tracing_opentelemetry::OpenTelemetryLayer;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry};

const SERVICE_NAME: &str = "hooksync";
const DEFAULT_FILTER: &str = "info";
const OTLP_ENDPOINT_VAR: &str = "OTEL_EXPORTER_OTLP_ENDPOINT";

/// Output format for log lines.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    /// One JSON object per line.
    #[default]
    Json,
    /// Human-readable, for terminals.
    Text,
}

/// Keeps the trace exporter alive; call [`TelemetryGuard::shutdown`] before exit.
pub struct TelemetryGuard {
    tracer_provider: Option<TracerProvider>,
}

impl TelemetryGuard {
    /// Flushes pending spans.
    pub fn shutdown(self) {
        if let Some(provider) = self.tracer_provider {
            if let Err(e) = provider.shutdown() {
                tracing::warn!(error = %e, "Failed to shut down tracer provider");
            }
        }
    }
}

/// Installs the global subscriber.
///
/// # Errors
///
/// Fails if a global subscriber is already installed.
pub fn init(format: LogFormat) -> anyhow::Result<TelemetryGuard> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(DEFAULT_FILTER))
        .context("invalid log filter")?;

    let endpoint = std::env::var(OTLP_ENDPOINT_VAR).ok().filter(|v| !v.trim().is_empty());
    let (tracer_provider, otel_layer, exporter_error) = match endpoint.as_deref() {
        Some(endpoint) => match otlp_layer(endpoint) {
            Ok((provider, layer)) => (Some(provider), Some(layer), None),
            Err(err) => (None, None, Some(err)),
        },
        None => (None, None, None),
    };

    let registry = tracing_subscriber::registry().with(otel_layer).with(filter);
    match format {
        LogFormat::Json => registry
            .with(fmt::layer().json().flatten_event(true).with_current_span(true))
            .try_init(),
        LogFormat::Text => registry.with(fmt::layer().with_target(false)).try_init(),
    }
    .context("failed to install tracing subscriber")?;

    match (&endpoint, exporter_error) {
        (Some(_), Some(err)) => {
            tracing::error!(error = %err, "Failed to create OTLP span exporter, tracing disabled")
        }
        (Some(endpoint), None) => tracing::info!(%endpoint, "OpenTelemetry tracing initialized"),
        (None, _) => tracing::debug!("OTLP export disabled ({OTLP_ENDPOINT_VAR} not set)"),
    }

    Ok(TelemetryGuard { tracer_provider })
}

fn otlp_layer(
    endpoint: &str,
) -> anyhow::Result<(TracerProvider, OpenTelemetryLayer<Registry, Tracer>)> {
    opentelemetry::global::set_text_map_propagator(
        opentelemetry_sdk::propagation::TraceContextPropagator::new(),
    );

    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_endpoint(endpoint)
        .build()?;

    let provider = TracerProvider::builder()
        .with_batch_exporter(exporter, opentelemetry_sdk::runtime::Tokio)
        .with_resource(Resource::new(vec![
            KeyValue::new("service.name", SERVICE_NAME),
            KeyValue::new("service.version", env!("CARGO_PKG_VERSION")),
        ]))
        .build();

    let layer = OpenTelemetryLayer::new(provider.tracer(SERVICE_NAME));
    Ok((provider, layer))
}
