//! Logging and distributed tracing configuration.

use opentelemetry::trace::TracerProvider as _;
use opentelemetry::KeyValue;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::{runtime, trace as sdktrace, Resource};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use code_play_core::config::TelemetryConfig;
use code_play_core::{Error, Result};

const SERVICE_NAME: &str = "codeplay";

/// Install the global subscriber: env filter, plain or JSON stdout logs, and
/// an OTLP exporter when an endpoint is configured.
pub fn configure_tracing(config: &TelemetryConfig) -> Result<()> {
    let env_filter = tracing_subscriber::EnvFilter::new(
        std::env::var("RUST_LOG").unwrap_or_else(|_| "info,codeplay=debug".into()),
    );

    let plain_layer = (!config.json_logs).then(|| tracing_subscriber::fmt::layer());
    let json_layer = config
        .json_logs
        .then(|| tracing_subscriber::fmt::layer().json());

    let otel_layer = match &config.otlp_endpoint {
        Some(endpoint) => {
            let provider = opentelemetry_otlp::new_pipeline()
                .tracing()
                .with_exporter(
                    opentelemetry_otlp::new_exporter()
                        .tonic()
                        .with_endpoint(endpoint.clone()),
                )
                .with_trace_config(sdktrace::Config::default().with_resource(Resource::new(
                    vec![KeyValue::new("service.name", SERVICE_NAME)],
                )))
                .install_batch(runtime::Tokio)
                .map_err(|e| Error::config(format!("Failed to install OTLP pipeline: {}", e)))?;

            let tracer = provider.tracer(SERVICE_NAME);
            opentelemetry::global::set_tracer_provider(provider);
            Some(tracing_opentelemetry::layer().with_tracer(tracer))
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(plain_layer)
        .with(json_layer)
        .with(otel_layer)
        .try_init()
        .map_err(|e| Error::config(format!("Failed to install tracing subscriber: {}", e)))?;

    if let Some(endpoint) = &config.otlp_endpoint {
        tracing::info!(endpoint = %endpoint, "OpenTelemetry tracing enabled");
    }
    Ok(())
}

/// Flush pending spans on shutdown.
pub fn shutdown_tracing() {
    opentelemetry::global::shutdown_tracer_provider();
}
