//! # Telemetry Features
//!
//! Console logging through `tracing_subscriber::fmt` is always on. On top of
//! it, OpenTelemetry export can be enabled per signal.
//!
//! ## Feature matrix
//!
//! - `trace`: Export spans through an OpenTelemetry tracer provider.
//! - `metrics`: Export the chain's request metrics through an OpenTelemetry
//!   meter provider.
//! - `stdout`: Use the stdout exporter for whichever of the above is enabled.
//!
//! ## Metrics
//!
//! | name              | kind            | attributes                 |
//! |-------------------|-----------------|----------------------------|
//! | `requests`        | counter         | `rpc.method`               |
//! | `errors`          | counter         | `rpc.method`, `rpc.code`   |
//! | `call_duration`   | histogram (ms)  | `rpc.method`               |
//! | `streams_inflight`| up/down counter | `rpc.method`               |
//! | `stream_messages` | counter         | `rpc.method`, `direction`  |
//!
//! The recording helpers compile to no-ops when `metrics` is disabled, so the
//! metrics middleware can call them unconditionally.

#[cfg(all(feature = "stdout", not(any(feature = "trace", feature = "metrics"))))]
compile_error!("The 'stdout' feature requires at least one of 'trace' or 'metrics' to be enabled.");

use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[cfg(feature = "metrics")]
use opentelemetry::metrics::{Counter, Histogram, Meter, UpDownCounter};
#[cfg(feature = "metrics")]
use opentelemetry_sdk::metrics as sdkmetrics;
#[cfg(feature = "metrics")]
use std::sync::OnceLock;

#[cfg(any(feature = "metrics", feature = "trace"))]
use opentelemetry::{InstrumentationScope, KeyValue};
#[cfg(any(feature = "metrics", feature = "trace"))]
use opentelemetry_sdk::Resource;
#[cfg(any(feature = "metrics", feature = "trace"))]
use opentelemetry_semantic_conventions as semvcns;

#[cfg(feature = "trace")]
use opentelemetry::trace::TracerProvider;
#[cfg(feature = "trace")]
use opentelemetry_sdk::propagation::TraceContextPropagator;
#[cfg(feature = "trace")]
use opentelemetry_sdk::trace as sdktrace;

pub struct TelemetryProviders {
    #[cfg(feature = "trace")]
    pub tracer_provider: sdktrace::SdkTracerProvider,
    #[cfg(feature = "metrics")]
    pub meter_provider: sdkmetrics::SdkMeterProvider,
}

impl TelemetryProviders {
    /// Flushes and shuts down whichever exporters are enabled.
    pub fn shutdown(self) {
        #[cfg(feature = "trace")]
        {
            if let Err(err) = self.tracer_provider.force_flush() {
                eprintln!("Error flushing traces: {:#?}", err);
            }
            if let Err(err) = self.tracer_provider.shutdown() {
                eprintln!("Error shutting down tracer: {:#?}", err);
            }
        }

        #[cfg(feature = "metrics")]
        {
            if let Err(err) = self.meter_provider.force_flush() {
                eprintln!("Error flushing metrics: {:#?}", err);
            }
            if let Err(err) = self.meter_provider.shutdown() {
                eprintln!("Error shutting down meter: {:#?}", err);
            }
        }
    }
}

pub fn init_telemetry() -> anyhow::Result<TelemetryProviders> {
    #[cfg(feature = "trace")]
    opentelemetry::global::set_text_map_propagator(TraceContextPropagator::new());

    #[cfg(feature = "trace")]
    let tracer_provider = init_tracer();

    #[cfg(feature = "metrics")]
    let meter_provider = init_metrics();

    #[cfg(any(feature = "metrics", feature = "trace"))]
    let scope = InstrumentationScope::builder("braid")
        .with_version(env!("CARGO_PKG_VERSION"))
        .with_schema_url(semvcns::SCHEMA_URL)
        .build();

    let registry = tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(
            tracing_subscriber::fmt::layer()
                .with_thread_ids(true)
                .with_line_number(true)
                .with_target(false)
                .with_timer(tracing_subscriber::fmt::time::ChronoLocal::rfc_3339())
                .with_file(true)
                .pretty(),
        );

    #[cfg(feature = "trace")]
    let registry = {
        opentelemetry::global::set_tracer_provider(tracer_provider.clone());
        registry.with(
            tracing_opentelemetry::layer()
                .with_tracer(tracer_provider.tracer_with_scope(scope.clone()))
                .with_error_records_to_exceptions(true),
        )
    };

    #[cfg(feature = "metrics")]
    let registry = {
        opentelemetry::global::set_meter_provider(meter_provider.clone());
        let meter = opentelemetry::global::meter_with_scope(scope);
        init_metric_handles(meter);

        registry.with(tracing_opentelemetry::MetricsLayer::new(
            meter_provider.clone(),
        ))
    };

    registry.try_init()?;

    Ok(TelemetryProviders {
        #[cfg(feature = "trace")]
        tracer_provider,
        #[cfg(feature = "metrics")]
        meter_provider,
    })
}

#[cfg(any(feature = "metrics", feature = "trace"))]
fn resource() -> Resource {
    Resource::builder()
        .with_service_name("braid-tonic-server")
        .with_schema_url(
            [KeyValue::new(
                semvcns::resource::SERVICE_VERSION,
                env!("CARGO_PKG_VERSION"),
            )],
            semvcns::SCHEMA_URL,
        )
        .build()
}

#[cfg(feature = "metrics")]
fn init_metrics() -> sdkmetrics::SdkMeterProvider {
    let builder = sdkmetrics::SdkMeterProvider::builder().with_resource(resource());

    #[cfg(feature = "stdout")]
    let builder = {
        use opentelemetry_stdout::MetricExporter;
        let exporter = MetricExporter::default();
        let reader = sdkmetrics::PeriodicReader::builder(exporter)
            .with_interval(std::time::Duration::from_secs(5))
            .build();

        builder.with_reader(reader)
    };

    builder.build()
}

#[cfg(feature = "trace")]
fn init_tracer() -> sdktrace::SdkTracerProvider {
    let builder = sdktrace::SdkTracerProvider::builder().with_resource(resource());

    #[cfg(feature = "stdout")]
    let builder = {
        use opentelemetry_stdout::SpanExporter;
        let batch = sdktrace::BatchSpanProcessor::builder(SpanExporter::default())
            .with_batch_config(
                sdktrace::BatchConfigBuilder::default()
                    .with_scheduled_delay(std::time::Duration::from_secs(5))
                    .with_max_queue_size(2048)
                    .build(),
            )
            .build();
        builder.with_span_processor(batch)
    };

    builder.build()
}

#[cfg(feature = "metrics")]
static REQUESTS: OnceLock<Counter<u64>> = OnceLock::new();
#[cfg(feature = "metrics")]
static ERRORS: OnceLock<Counter<u64>> = OnceLock::new();
#[cfg(feature = "metrics")]
static CALL_DURATION_MS: OnceLock<Histogram<f64>> = OnceLock::new();
#[cfg(feature = "metrics")]
static STREAMS_INFLIGHT: OnceLock<UpDownCounter<i64>> = OnceLock::new();
#[cfg(feature = "metrics")]
static STREAM_MESSAGES: OnceLock<Counter<u64>> = OnceLock::new();

#[cfg(feature = "metrics")]
fn init_metric_handles(meter: Meter) {
    let _ = REQUESTS.set(
        meter
            .u64_counter("requests")
            .with_description("Total gRPC calls entering the chain")
            .build(),
    );

    let _ = ERRORS.set(
        meter
            .u64_counter("errors")
            .with_description("Calls that completed with a non-OK status")
            .build(),
    );

    let _ = CALL_DURATION_MS.set(
        meter
            .f64_histogram("call_duration")
            .with_unit("ms")
            .with_description("End-to-end call duration")
            .build(),
    );

    let _ = STREAMS_INFLIGHT.set(
        meter
            .i64_up_down_counter("streams_inflight")
            .with_description("Concurrent streaming calls")
            .build(),
    );

    let _ = STREAM_MESSAGES.set(
        meter
            .u64_counter("stream_messages")
            .with_description("Messages received and sent on streaming calls")
            .build(),
    );
}

#[cfg(feature = "metrics")]
fn method_attr(method: &str) -> KeyValue {
    KeyValue::new("rpc.method", method.to_string())
}

#[cfg(feature = "metrics")]
pub fn increment_requests(method: &str) {
    if let Some(counter) = REQUESTS.get() {
        counter.add(1, &[method_attr(method)]);
    }
}

#[cfg(not(feature = "metrics"))]
pub fn increment_requests(_method: &str) {}

#[cfg(feature = "metrics")]
pub fn increment_errors(method: &str, code: tonic::Code) {
    if let Some(counter) = ERRORS.get() {
        counter.add(
            1,
            &[
                method_attr(method),
                KeyValue::new("rpc.code", code as i64),
            ],
        );
    }
}

#[cfg(not(feature = "metrics"))]
pub fn increment_errors(_method: &str, _code: tonic::Code) {}

#[cfg(feature = "metrics")]
pub fn record_call_duration(method: &str, duration_ms: f64) {
    if let Some(histogram) = CALL_DURATION_MS.get() {
        histogram.record(duration_ms, &[method_attr(method)]);
    }
}

#[cfg(not(feature = "metrics"))]
pub fn record_call_duration(_method: &str, _duration_ms: f64) {}

#[cfg(feature = "metrics")]
pub fn increment_streams_inflight(method: &str) {
    if let Some(counter) = STREAMS_INFLIGHT.get() {
        counter.add(1, &[method_attr(method)]);
    }
}

#[cfg(not(feature = "metrics"))]
pub fn increment_streams_inflight(_method: &str) {}

#[cfg(feature = "metrics")]
pub fn decrement_streams_inflight(method: &str) {
    if let Some(counter) = STREAMS_INFLIGHT.get() {
        counter.add(-1, &[method_attr(method)]);
    }
}

#[cfg(not(feature = "metrics"))]
pub fn decrement_streams_inflight(_method: &str) {}

#[cfg(feature = "metrics")]
pub fn increment_stream_messages(method: &str, direction: &'static str, count: u64) {
    if let Some(counter) = STREAM_MESSAGES.get() {
        counter.add(
            count,
            &[method_attr(method), KeyValue::new("direction", direction)],
        );
    }
}

#[cfg(not(feature = "metrics"))]
pub fn increment_stream_messages(_method: &str, _direction: &'static str, _count: u64) {}
