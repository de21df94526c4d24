//! Logging setup and optional OTLP trace export.
//!
//! Every archive runs inside an `archive.filter` span and every class visit
//! inside a `class.filter` span. Outcome counters are attached to the span
//! that is current when they are recorded.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use opentelemetry::trace::{TraceContextExt, Tracer, TracerProvider as _};
use opentelemetry::{Context as OtelContext, KeyValue};
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::Resource;
use opentelemetry_sdk::trace::{
    BatchConfigBuilder, BatchSpanProcessor, SdkTracer, SdkTracerProvider, SpanExporter,
};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

const SERVICE_NAME: &str = "jarfilter";
const ARCHIVE_SPAN: &str = "archive.filter";
const CLASS_SPAN: &str = "class.filter";

pub(crate) struct Telemetry {
    tracer: SdkTracer,
    provider: SdkTracerProvider,
}

impl Telemetry {
    /// Export spans to the OTLP/HTTP collector at `endpoint`.
    pub(crate) fn connect(endpoint: &str) -> Result<Self> {
        let exporter = opentelemetry_otlp::SpanExporter::builder()
            .with_http()
            .with_endpoint(trace_endpoint(endpoint)?)
            .build()
            .context("build OTLP span exporter")?;
        Ok(Self::with_exporter(exporter))
    }

    fn with_exporter<E: SpanExporter + 'static>(exporter: E) -> Self {
        // The batch processor exports from its own thread, so rayon workers
        // only enqueue finished spans.
        let batch = BatchConfigBuilder::default()
            .with_scheduled_delay(Duration::from_millis(250))
            .build();
        let provider = SdkTracerProvider::builder()
            .with_resource(Resource::builder().with_service_name(SERVICE_NAME).build())
            .with_span_processor(BatchSpanProcessor::builder(exporter).with_batch_config(batch).build())
            .build();
        let tracer = provider.tracer(SERVICE_NAME);
        opentelemetry::global::set_tracer_provider(provider.clone());
        Self { tracer, provider }
    }

    fn span<T>(&self, name: &'static str, attributes: Vec<KeyValue>, f: impl FnOnce() -> T) -> T {
        self.tracer.in_span(name, |cx| {
            let span = cx.span();
            for attribute in attributes {
                span.set_attribute(attribute);
            }
            f()
        })
    }

    /// Flush pending spans. Called once after every archive is done.
    pub(crate) fn shutdown(&self) -> Result<()> {
        self.provider
            .shutdown()
            .map_err(|err| anyhow!("failed to flush telemetry: {err}"))
    }
}

/// Run `f` inside the span covering one input archive.
pub(crate) fn archive_span<T>(telemetry: Option<&Telemetry>, source: &Path, f: impl FnOnce() -> T) -> T {
    match telemetry {
        Some(telemetry) => telemetry.span(
            ARCHIVE_SPAN,
            vec![KeyValue::new("jarfilter.jar_path", source.display().to_string())],
            f,
        ),
        None => f(),
    }
}

/// Run `f` inside the span covering one class during archive pass `pass`.
pub(crate) fn class_span<T>(
    telemetry: Option<&Telemetry>,
    entry: &str,
    pass: usize,
    f: impl FnOnce() -> T,
) -> T {
    match telemetry {
        Some(telemetry) => telemetry.span(
            CLASS_SPAN,
            vec![
                KeyValue::new("jarfilter.class", entry.to_string()),
                KeyValue::new("jarfilter.archive_pass", pass as i64),
            ],
            f,
        ),
        None => f(),
    }
}

/// Attach a counter to the current span, if any.
pub(crate) fn record(key: &'static str, value: usize) {
    let cx = OtelContext::current();
    let span = cx.span();
    if span.span_context().is_valid() {
        span.set_attribute(KeyValue::new(key, value as i64));
    }
}

/// Trace ID of the current span, for correlating log lines with exports.
pub(crate) fn current_trace_id() -> Option<String> {
    let cx = OtelContext::current();
    let span_context = cx.span().span_context().clone();
    span_context.is_valid().then(|| span_context.trace_id().to_string())
}

/// Accept a collector base URL, or any OTLP signal path, and point it at the
/// trace signal.
fn trace_endpoint(endpoint: &str) -> Result<String> {
    let mut url = reqwest::Url::parse(endpoint).with_context(|| format!("invalid OTLP endpoint {endpoint}"))?;
    let path = url.path().trim_end_matches('/').to_string();
    let traces = match path
        .strip_suffix("/v1/logs")
        .or_else(|| path.strip_suffix("/v1/metrics"))
    {
        Some(base) => format!("{base}/v1/traces"),
        None if path.ends_with("/v1/traces") => path.clone(),
        None => format!("{path}/v1/traces"),
    };
    url.set_path(&traces);
    Ok(url.to_string())
}

/// Log to stderr. `RUST_LOG` overrides the default filter; `quiet` keeps
/// only warnings and errors.
pub(crate) fn init_logging(quiet: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(if quiet { "warn" } else { "jarfilter=info,warn" })
    });
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false).with_writer(std::io::stderr))
        .try_init();
}
