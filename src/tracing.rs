use anyhow::Result;
use opentelemetry::{global, trace::TracerProvider as _};
use opentelemetry_otlp::{SpanExporter, WithExportConfig};
use opentelemetry_sdk::{trace::SdkTracerProvider, Resource};
use tracing::{warn, Subscriber};
use tracing_subscriber::{
    filter::LevelFilter,
    layer::SubscriberExt,
    registry::LookupSpan,
    util::SubscriberInitExt,
    EnvFilter,
    Layer,
    Registry,
};

use crate::config::{OperatorConfig, TelemetryConfig};

const SERVICE_NAME: &str = "gather-operator";

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// How log lines are written to stdout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Compact,
    /// One JSON object per event, carrying the fields of the current
    /// reconcile span.
    Json,
}

impl From<&OperatorConfig> for LogFormat {
    fn from(config: &OperatorConfig) -> Self {
        if config.structured_logging {
            LogFormat::Json
        } else {
            LogFormat::Compact
        }
    }
}

impl LogFormat {
    fn layer<S>(self) -> Box<dyn Layer<S> + Send + Sync>
    where
        S: Subscriber + for<'a> LookupSpan<'a>,
    {
        match self {
            LogFormat::Json => tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(true)
                .with_span_list(false)
                .flatten_event(true)
                .boxed(),
            LogFormat::Compact => tracing_subscriber::fmt::layer().compact().boxed(),
        }
    }
}

/// `RUST_LOG` directives, `info` when unset.
fn env_filter() -> EnvFilter {
    EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy()
}

fn span_provider(telemetry: &TelemetryConfig) -> Result<SdkTracerProvider> {
    let mut exporter = SpanExporter::builder().with_tonic();
    if let Some(endpoint) = &telemetry.endpoint {
        exporter = exporter.with_endpoint(endpoint.clone());
    }
    Ok(SdkTracerProvider::builder()
        .with_resource(Resource::builder().with_service_name(SERVICE_NAME).build())
        .with_batch_exporter(exporter.build()?)
        .build())
}

/// Keeps the span exporter alive. Call [`TracingGuard::shutdown`] before exit
/// so buffered spans are sent.
#[derive(Default)]
pub struct TracingGuard {
    provider: Option<SdkTracerProvider>,
}

impl TracingGuard {
    pub fn exports_spans(&self) -> bool {
        self.provider.is_some()
    }

    pub fn shutdown(self) {
        let Some(provider) = self.provider else {
            return;
        };
        if let Err(err) = provider.force_flush() {
            warn!(error = ?err, "unable to flush spans");
        }
        if let Err(err) = provider.shutdown() {
            warn!(error = ?err, "unable to shut down span exporter");
        }
    }
}

/// Installs the global subscriber: filtered log output, plus OTLP span export
/// when telemetry tracing is enabled.
pub fn init(config: &OperatorConfig) -> Result<TracingGuard> {
    let mut layers: Vec<BoxedLayer> = vec![LogFormat::from(config)
        .layer()
        .with_filter(env_filter())
        .boxed()];

    let mut guard = TracingGuard::default();
    if config.telemetry.enable_tracing {
        let provider = span_provider(&config.telemetry)?;
        global::set_tracer_provider(provider.clone());
        layers.push(
            tracing_opentelemetry::layer()
                .with_tracer(provider.tracer(SERVICE_NAME))
                .boxed(),
        );
        guard.provider = Some(provider);
    }

    if let Err(err) = tracing_subscriber::registry().with(layers).try_init() {
        warn!(error = %err, "global subscriber already installed, keeping it");
    }
    Ok(guard)
}
