use std::sync::Once;
use tracing_log::LogTracer;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, Registry, fmt};

#[cfg(feature = "otlp")]
mod otlp {
    use opentelemetry::{KeyValue, trace::TracerProvider};
    use opentelemetry_sdk::{
        Resource,
        trace::{RandomIdGenerator, SdkTracer, SdkTracerProvider},
    };
    use opentelemetry_semantic_conventions::{SCHEMA_URL, resource::SERVICE_VERSION};
    use std::sync::OnceLock;

    static PROVIDER: OnceLock<SdkTracerProvider> = OnceLock::new();

    /// Build a resource with service name & version
    fn resource(service_name: &str, service_version: &str) -> Resource {
        Resource::builder()
            .with_service_name(service_name.to_string())
            .with_schema_url(
                [KeyValue::new(SERVICE_VERSION, service_version.to_string())],
                SCHEMA_URL,
            )
            .build()
    }

    /// Tracer exporting to the endpoint named by the `OTEL_EXPORTER_OTLP_*`
    /// variables. `None` if the exporter cannot be built.
    pub(super) fn tracer(service_name: &str, service_version: &str) -> Option<SdkTracer> {
        let exporter = match opentelemetry_otlp::SpanExporter::builder()
            .with_http()
            .build()
        {
            Ok(exporter) => exporter,
            Err(e) => {
                eprintln!("telemetry: OTLP exporter init failed: {}", e);
                return None;
            }
        };

        let provider = SdkTracerProvider::builder()
            .with_id_generator(RandomIdGenerator::default())
            .with_resource(resource(service_name, service_version))
            .with_batch_exporter(exporter)
            .build();
        let tracer = provider.tracer("picoclaw-tracer");
        let _ = PROVIDER.set(provider);
        Some(tracer)
    }

    pub(super) fn shutdown() {
        if let Some(provider) = PROVIDER.get() {
            if let Err(e) = provider.shutdown() {
                eprintln!("telemetry: OTLP shutdown failed: {}", e);
            }
        }
    }
}

static INIT: Once = Once::new();

/// Setup logging, and span export when built with the `otlp` feature
///
/// # Behavior
/// - `log` records from library crates are bridged into `tracing`
/// - `RUST_LOG` controls filtering (via EnvFilter)
/// - With the `otlp` feature, spans are exported when
///   `OTEL_EXPORTER_OTLP_ENDPOINT` is set and `PICOCLAW_NO_TELEMETRY` is not
///
/// Only the first call does anything. If another logger or subscriber is
/// already installed it is left in place.
///
/// # Arguments
/// - `service_name`: The name of the service (e.g., "picoclaw-db")
/// - `service_version`: The version of the service (e.g., "0.3.0")
pub fn setup_telemetry(service_name: &str, service_version: &str) {
    INIT.call_once(|| install(service_name, service_version));
}

/// Flush and stop span export. Safe to call when export was never enabled.
pub fn shutdown_telemetry() {
    #[cfg(feature = "otlp")]
    otlp::shutdown();
}

/// Whether span export was requested through the environment.
pub fn export_requested() -> bool {
    std::env::var_os("PICOCLAW_NO_TELEMETRY").is_none()
        && std::env::var_os("OTEL_EXPORTER_OTLP_ENDPOINT").is_some()
}

#[cfg_attr(not(feature = "otlp"), allow(unused_variables))]
fn install(service_name: &str, service_version: &str) {
    if LogTracer::init().is_err() {
        return;
    }

    let fmt_layer = fmt::layer().with_target(true).with_writer(std::io::stderr);
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    #[cfg(feature = "otlp")]
    if export_requested() {
        if let Some(tracer) = otlp::tracer(service_name, service_version) {
            let subscriber = Registry::default()
                .with(filter)
                .with(fmt_layer)
                .with(tracing_opentelemetry::layer().with_tracer(tracer));
            let _ = tracing::subscriber::set_global_default(subscriber);
            return;
        }
    }

    let subscriber = Registry::default().with(filter).with(fmt_layer);
    let _ = tracing::subscriber::set_global_default(subscriber);
}
