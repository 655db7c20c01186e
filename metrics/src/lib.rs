use std::time::{Duration, Instant};

use anyhow::Result;
use opentelemetry::{
    metrics::{Counter, Histogram},
    KeyValue,
};
use opentelemetry_otlp::{MetricExporter, WithExportConfig};
use opentelemetry_sdk::metrics::{PeriodicReader, SdkMeterProvider};
use tracing::info;

/// Installs the global meter provider. Metrics are pushed over OTLP when
/// `export` is set, otherwise instruments are recorded but never exported.
pub fn init_provider(export: bool, endpoint: Option<&str>) -> Result<SdkMeterProvider> {
    let mut provider = SdkMeterProvider::builder();
    if export {
        let mut exporter = MetricExporter::builder().with_tonic();
        if let Some(endpoint) = endpoint {
            exporter = exporter.with_endpoint(endpoint.to_string());
        }
        let reader = PeriodicReader::builder(exporter.build()?).build();
        provider = provider.with_reader(reader);
        info!(endpoint = ?endpoint, "exporting metrics over otlp");
    }
    let provider = provider.build();
    opentelemetry::global::set_meter_provider(provider.clone());
    Ok(provider)
}

pub trait TimerUpdate {
    fn add(&self, duration: Duration, labels: &[KeyValue]);
}

impl TimerUpdate for Counter<f64> {
    fn add(&self, duration: Duration, labels: &[KeyValue]) {
        self.add(duration.as_secs_f64(), labels);
    }
}

impl TimerUpdate for Histogram<f64> {
    fn add(&self, duration: Duration, labels: &[KeyValue]) {
        self.record(duration.as_secs_f64(), labels);
    }
}

/// Records the elapsed time into `metric` when dropped.
pub struct Timer<'a, T: TimerUpdate + Sync> {
    start: Instant,
    metric: &'a T,
    labels: Vec<KeyValue>,
}

impl<'a, T: TimerUpdate + Sync> Timer<'a, T> {
    pub fn start(metric: &'a T) -> Self {
        Self::start_with_labels(metric, &[])
    }

    pub fn start_with_labels(metric: &'a T, labels: &[KeyValue]) -> Self {
        Self {
            start: Instant::now(),
            metric,
            labels: labels.to_vec(),
        }
    }
}

impl<'a, T: TimerUpdate + Sync> Drop for Timer<'a, T> {
    fn drop(&mut self) {
        self.metric.add(self.start.elapsed(), &self.labels);
    }
}

pub mod reconciler_metrics {
    use std::sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    };

    use opentelemetry::{
        metrics::{Counter, Histogram, ObservableCounter},
        KeyValue,
    };

    /// Lifecycle totals kept by the reconciler. The observable counters below
    /// read from these on every collection.
    #[derive(Debug, Default)]
    pub struct LifecycleCounters {
        requests_started: AtomicU64,
        requests_errored: AtomicU64,
    }

    impl LifecycleCounters {
        pub fn request_started(&self) {
            self.requests_started.fetch_add(1, Ordering::Relaxed);
        }

        pub fn request_errored(&self) {
            self.requests_errored.fetch_add(1, Ordering::Relaxed);
        }

        pub fn requests_started(&self) -> u64 {
            self.requests_started.load(Ordering::Relaxed)
        }

        pub fn requests_errored(&self) -> u64 {
            self.requests_errored.load(Ordering::Relaxed)
        }
    }

    #[derive(Debug)]
    pub struct Metrics {
        pub lifecycle: Arc<LifecycleCounters>,
        pub reconcile_duration: Histogram<f64>,
        pub reconcile_errors: Counter<u64>,
        _requests_started: ObservableCounter<u64>,
        _requests_errored: ObservableCounter<u64>,
    }

    impl Default for Metrics {
        fn default() -> Self {
            Self::new()
        }
    }

    impl Metrics {
        pub fn new() -> Metrics {
            let meter = opentelemetry::global::meter("gather-operator");
            let lifecycle = Arc::new(LifecycleCounters::default());

            let requests_started = meter
                .u64_observable_counter("gather_operator.requests_started")
                .with_description("Number of gather requests whose execution job was created")
                .with_callback({
                    let lifecycle = lifecycle.clone();
                    move |observer| observer.observe(lifecycle.requests_started(), &[])
                })
                .build();

            let requests_errored = meter
                .u64_observable_counter("gather_operator.requests_errored")
                .with_description("Number of gather requests whose execution job reported a failure")
                .with_callback({
                    let lifecycle = lifecycle.clone();
                    move |observer| observer.observe(lifecycle.requests_errored(), &[])
                })
                .build();

            let reconcile_duration = meter
                .f64_histogram("gather_operator.reconcile_duration")
                .with_unit("s")
                .with_description("Reconcile pass latencies in seconds")
                .build();

            let reconcile_errors = meter
                .u64_counter("gather_operator.reconcile_errors")
                .with_description("Reconcile passes that ended in an error")
                .build();

            Metrics {
                lifecycle,
                reconcile_duration,
                reconcile_errors,
                _requests_started: requests_started,
                _requests_errored: requests_errored,
            }
        }

        pub fn record_error(&self, kind: &'static str) {
            self.reconcile_errors
                .add(1, &[KeyValue::new("error_kind", kind)]);
        }
    }

}
