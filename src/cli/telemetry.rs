//! Log output plus optional OTLP export.
//!
//! Console logs always go through `tracing-subscriber`. When
//! `OTEL_EXPORTER_OTLP_ENDPOINT` is set, spans and metrics (the rate limiter
//! counters) are also pushed over OTLP/gRPC to the same collector.

use anyhow::{Context, Result};
use once_cell::sync::OnceCell;
use opentelemetry::{
    KeyValue, global,
    propagation::TextMapCompositePropagator,
    trace::TracerProvider as _,
};
use opentelemetry_otlp::{
    Compression, MetricExporter, SpanExporter, WithExportConfig, WithTonicConfig,
};
use opentelemetry_sdk::{
    Resource,
    metrics::{PeriodicReader, SdkMeterProvider},
    propagation::{BaggagePropagator, TraceContextPropagator},
    trace::{SdkTracerProvider, Tracer},
};
use std::{env, time::Duration};
use tracing::{Level, debug, warn};
use tracing_subscriber::{EnvFilter, Registry, fmt, layer::SubscriberExt};
use ulid::Ulid;

static TRACER_PROVIDER: OnceCell<SdkTracerProvider> = OnceCell::new();
static METER_PROVIDER: OnceCell<SdkMeterProvider> = OnceCell::new();

const EXPORT_TIMEOUT: Duration = Duration::from_secs(3);
const METRIC_INTERVAL: Duration = Duration::from_secs(30);

/// Collector settings read from the standard `OTEL_*` variables.
#[derive(Debug, Clone, PartialEq, Eq)]
struct OtlpSettings {
    endpoint: String,
    instance_id: String,
}

impl OtlpSettings {
    /// `None` unless `OTEL_EXPORTER_OTLP_ENDPOINT` is set.
    fn from_env() -> Option<Self> {
        let endpoint = env::var("OTEL_EXPORTER_OTLP_ENDPOINT")
            .ok()
            .filter(|value| !value.trim().is_empty())?;

        if let Ok(protocol) = env::var("OTEL_EXPORTER_OTLP_PROTOCOL")
            && protocol != "grpc"
        {
            warn!("OTEL_EXPORTER_OTLP_PROTOCOL={protocol} is not supported, exporting over grpc");
        }

        Some(Self {
            endpoint: with_scheme(&endpoint),
            instance_id: env::var("OTEL_SERVICE_INSTANCE_ID")
                .unwrap_or_else(|_| Ulid::new().to_string()),
        })
    }

    fn resource(&self) -> Resource {
        Resource::builder_empty()
            .with_attributes([
                KeyValue::new("service.name", env!("CARGO_PKG_NAME")),
                KeyValue::new("service.version", env!("CARGO_PKG_VERSION")),
                KeyValue::new("service.instance.id", self.instance_id.clone()),
            ])
            .build()
    }
}

/// A bare `host:port` is taken as TLS.
fn with_scheme(endpoint: &str) -> String {
    let endpoint = endpoint.trim().trim_end_matches('/');
    if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
        endpoint.to_string()
    } else {
        format!("https://{endpoint}")
    }
}

fn install_tracer(settings: &OtlpSettings) -> Result<Tracer> {
    // OTEL_EXPORTER_OTLP_HEADERS is picked up by the exporter.
    let exporter = SpanExporter::builder()
        .with_tonic()
        .with_endpoint(&settings.endpoint)
        .with_compression(Compression::Gzip)
        .with_timeout(EXPORT_TIMEOUT)
        .build()
        .context("Failed to build OTLP span exporter")?;

    let provider = SdkTracerProvider::builder()
        .with_batch_exporter(exporter)
        .with_resource(settings.resource())
        .build();

    global::set_tracer_provider(provider.clone());
    global::set_text_map_propagator(TextMapCompositePropagator::new(vec![
        Box::new(TraceContextPropagator::new()),
        Box::new(BaggagePropagator::new()),
    ]));
    let tracer = provider.tracer(env!("CARGO_PKG_NAME"));
    let _ = TRACER_PROVIDER.set(provider);

    Ok(tracer)
}

/// Must run before any instrument is created, so the rate limiter counters
/// bind to this provider rather than the no-op default.
fn install_meter(settings: &OtlpSettings) -> Result<()> {
    let exporter = MetricExporter::builder()
        .with_tonic()
        .with_endpoint(&settings.endpoint)
        .with_compression(Compression::Gzip)
        .with_timeout(EXPORT_TIMEOUT)
        .build()
        .context("Failed to build OTLP metric exporter")?;

    let reader = PeriodicReader::builder(exporter)
        .with_interval(METRIC_INTERVAL)
        .build();

    let provider = SdkMeterProvider::builder()
        .with_reader(reader)
        .with_resource(settings.resource())
        .build();

    global::set_meter_provider(provider.clone());
    let _ = METER_PROVIDER.set(provider);
    Ok(())
}

fn env_filter(level: Level) -> Result<EnvFilter> {
    let mut filter = EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env_lossy();
    for directive in [
        "hyper=error",
        "tokio=error",
        "sqlx=warn",
        "redis=warn",
        "opentelemetry_sdk=warn",
    ] {
        filter = filter.add_directive(directive.parse()?);
    }
    Ok(filter)
}

/// Install the global subscriber. Without an explicit verbosity only errors
/// are printed.
///
/// # Errors
/// Returns an error if an exporter cannot be built or a subscriber is
/// already installed.
pub fn init(verbosity_level: Option<Level>) -> Result<()> {
    let filter = env_filter(verbosity_level.unwrap_or(Level::ERROR))?;
    let console = fmt::layer()
        .with_target(false)
        .with_file(false)
        .with_line_number(false)
        .with_thread_ids(false)
        .with_thread_names(false)
        .pretty();

    let Some(settings) = OtlpSettings::from_env() else {
        tracing::subscriber::set_global_default(Registry::default().with(console).with(filter))?;
        return Ok(());
    };

    install_meter(&settings)?;
    let tracer = install_tracer(&settings)?;
    let subscriber = Registry::default()
        .with(console)
        .with(tracing_opentelemetry::layer().with_tracer(tracer))
        .with(filter);
    tracing::subscriber::set_global_default(subscriber)?;

    debug!(endpoint = %settings.endpoint, "OTLP export enabled");
    Ok(())
}

/// Flush pending spans and metrics. Does nothing when export is off.
pub fn shutdown() {
    if let Some(provider) = TRACER_PROVIDER.get()
        && let Err(err) = provider.shutdown()
    {
        debug!("Tracer provider shutdown: {err}");
    }
    if let Some(provider) = METER_PROVIDER.get()
        && let Err(err) = provider.shutdown()
    {
        debug!("Meter provider shutdown: {err}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_scheme_is_kept_or_defaults_to_https() {
        assert_eq!(with_scheme("http://localhost:4317"), "http://localhost:4317");
        assert_eq!(
            with_scheme("https://otel.texgate.dev:4317/"),
            "https://otel.texgate.dev:4317"
        );
        assert_eq!(with_scheme(" collector:4317/ "), "https://collector:4317");
    }

    #[test]
    fn settings_need_an_endpoint() {
        temp_env::with_vars(
            [
                ("OTEL_EXPORTER_OTLP_ENDPOINT", None::<&str>),
                ("OTEL_SERVICE_INSTANCE_ID", None),
            ],
            || assert_eq!(OtlpSettings::from_env(), None),
        );
        temp_env::with_vars(
            [
                ("OTEL_EXPORTER_OTLP_ENDPOINT", Some("  ")),
                ("OTEL_SERVICE_INSTANCE_ID", None),
            ],
            || assert_eq!(OtlpSettings::from_env(), None),
        );
    }

    #[test]
    fn settings_carry_instance_into_resource() {
        temp_env::with_vars(
            [
                ("OTEL_EXPORTER_OTLP_ENDPOINT", Some("collector:4317")),
                ("OTEL_EXPORTER_OTLP_PROTOCOL", None),
                ("OTEL_SERVICE_INSTANCE_ID", Some("node-a")),
            ],
            || {
                let Some(settings) = OtlpSettings::from_env() else {
                    panic!("endpoint is set");
                };
                assert_eq!(settings.endpoint, "https://collector:4317");

                let resource = settings.resource();
                let attribute = |key: &str| {
                    resource
                        .iter()
                        .find(|(k, _)| k.as_str() == key)
                        .map(|(_, value)| value.to_string())
                };
                assert_eq!(attribute("service.instance.id").as_deref(), Some("node-a"));
                assert_eq!(
                    attribute("service.name").as_deref(),
                    Some(env!("CARGO_PKG_NAME"))
                );
            },
        );
    }

    #[test]
    fn shutdown_without_export_is_a_noop() {
        shutdown();
    }
}
