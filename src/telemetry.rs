//! OpenTelemetry wiring, only exercised when `OTEL_EXPORTER_OTLP_ENDPOINT` is set.

use opentelemetry::trace::TracerProvider as _;
use opentelemetry_otlp::WithExportConfig;
use tracing_subscriber::Layer;

/// Builds the OpenTelemetry tracing layer from the OTLP endpoint in the environment.
///
/// Returns `None` (and logs a warning) if the exporter could not be built, in which
/// case the caller should fall back to plain stdout logging.
pub fn init_telemetry<S>(_registry: &S) -> Option<Box<dyn Layer<S> + Send + Sync + 'static>>
where
    S: tracing::Subscriber + for<'span> tracing_subscriber::registry::LookupSpan<'span>,
{
    let endpoint = std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT").ok()?;

    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_endpoint(endpoint)
        .build();

    let exporter = match exporter {
        Ok(exporter) => exporter,
        Err(err) => {
            tracing::warn!("failed to build otlp exporter: {:?}", err);
            return None;
        }
    };

    let provider = opentelemetry_sdk::trace::TracerProvider::builder()
        .with_batch_exporter(exporter, opentelemetry_sdk::runtime::Tokio)
        .with_resource(opentelemetry_sdk::Resource::new(vec![
            opentelemetry::KeyValue::new("service.name", "cloud-resource-operator"),
        ]))
        .build();

    let tracer = provider.tracer("cloud-resource-operator");
    opentelemetry::global::set_tracer_provider(provider);

    Some(Box::new(tracing_opentelemetry::layer().with_tracer(tracer)))
}

/// Flushes any buffered spans before process exit.
pub fn shutdown_telemetry() {
    opentelemetry::global::shutdown_tracer_provider();
}
