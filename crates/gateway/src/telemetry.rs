//! Tracing setup for `serve` and the one-shot CLI commands.

use anyhow::Context;
use opentelemetry::trace::TracerProvider as _;
use opentelemetry_otlp::WithExportConfig as _;
use opentelemetry_sdk::trace::{Sampler, SdkTracerProvider};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use tl_domain::config::{LogFormat, ObservabilityConfig, OtlpConfig};

/// Keeps the span exporter alive; call [`Telemetry::shutdown`] on exit so
/// pending spans are flushed.
pub struct Telemetry {
    tracer_provider: Option<SdkTracerProvider>,
}

impl Telemetry {
    pub fn exporting(&self) -> bool {
        self.tracer_provider.is_some()
    }

    pub fn shutdown(self) {
        if let Some(provider) = self.tracer_provider {
            if let Err(e) = provider.shutdown() {
                tracing::warn!(error = ?e, "OpenTelemetry tracer provider shutdown failed");
            }
        }
    }
}

/// Install the `serve` subscriber: the configured filter and format, plus
/// an OTLP layer when `[observability.otlp]` is present. An exporter that
/// cannot be built is reported and skipped.
pub fn init_server(obs: &ObservabilityConfig) -> Telemetry {
    let filter = filter_or(&obs.log_filter);

    let tracer_provider = match obs.otlp.as_ref().map(otlp_provider).transpose() {
        Ok(p) => p,
        Err(e) => {
            eprintln!("WARNING: {e:#}; starting without OpenTelemetry");
            None
        }
    };
    let otel_layer = tracer_provider.as_ref().zip(obs.otlp.as_ref()).map(|(p, otlp)| {
        tracing_opentelemetry::layer().with_tracer(p.tracer(otlp.service_name.clone()))
    });

    let (json, compact) = match obs.log_format {
        LogFormat::Json => (Some(tracing_subscriber::fmt::layer().json()), None),
        LogFormat::Compact => (None, Some(tracing_subscriber::fmt::layer().compact())),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(json)
        .with(compact)
        .with(otel_layer)
        .init();

    Telemetry { tracer_provider }
}

/// Compact stderr output for one-shot commands; warnings only by default.
pub fn init_cli() {
    tracing_subscriber::fmt()
        .with_env_filter(filter_or("warn"))
        .with_writer(std::io::stderr)
        .compact()
        .init();
}

fn filter_or(fallback: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback))
}

fn otlp_provider(otlp: &OtlpConfig) -> anyhow::Result<SdkTracerProvider> {
    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_endpoint(&otlp.endpoint)
        .build()
        .with_context(|| format!("creating OTLP exporter for {}", otlp.endpoint))?;

    let resource = opentelemetry_sdk::Resource::builder()
        .with_service_name(otlp.service_name.clone())
        .build();

    Ok(SdkTracerProvider::builder()
        .with_batch_exporter(exporter)
        .with_sampler(Sampler::TraceIdRatioBased(otlp.sample_rate))
        .with_resource(resource)
        .build())
}
