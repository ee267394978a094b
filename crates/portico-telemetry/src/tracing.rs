//! OpenTelemetry span propagation.
//!
//! One server span is started per inbound request (extracted from HTTP
//! headers or from channel-protocol arg2 headers) and one client span per
//! outbound call. When no provider is installed the global no-op provider
//! applies and spans carry the propagated context only.
//!
//! # Example
//!
//! ```rust,ignore
//! use portico_telemetry::tracing::{start_server_span, trace_log_fields, HeaderExtractor};
//!
//! let cx = start_server_span("bar.foo", &HeaderExtractor(request.headers()));
//! for (key, value) in trace_log_fields(&cx) {
//!     tracing::debug!(key, value, "trace field");
//! }
//! ```

use indexmap::IndexMap;
use opentelemetry::propagation::{Extractor, Injector};
use opentelemetry::trace::{SpanKind, TraceContextExt, Tracer};
use opentelemetry::{global, Context, KeyValue};
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::trace::{RandomIdGenerator, Sampler, TracerProvider};
use opentelemetry_sdk::Resource;

use crate::error::TelemetryError;
use crate::logging::fields;
use crate::TelemetryResult;

/// Instrumentation scope name used for every gateway span.
pub const TRACER_NAME: &str = "portico";

/// Tracing configuration.
#[derive(Debug, Clone)]
pub struct TracingConfig {
    /// Whether tracing is enabled.
    pub enabled: bool,

    /// OTLP endpoint (e.g., `http://localhost:4317`).
    pub otlp_endpoint: String,

    /// Service name for spans.
    pub service_name: String,

    /// Service version.
    pub service_version: String,

    /// Deployment environment.
    pub environment: String,

    /// Sampling ratio (0.0 to 1.0).
    pub sample_ratio: f64,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            otlp_endpoint: "http://localhost:4317".to_string(),
            service_name: "portico".to_string(),
            service_version: "0.1.0".to_string(),
            environment: "production".to_string(),
            sample_ratio: 1.0,
        }
    }
}

/// Installs an OTLP tracer provider as the global provider.
///
/// Must be called from within a Tokio runtime.
///
/// # Errors
///
/// Returns `TelemetryError::TracingInit` if the exporter cannot be built.
pub fn init_tracing(config: &TracingConfig) -> TelemetryResult<Option<TracerProvider>> {
    if !config.enabled {
        return Ok(None);
    }

    let resource = Resource::new([
        KeyValue::new(
            opentelemetry_semantic_conventions::attribute::SERVICE_NAME,
            config.service_name.clone(),
        ),
        KeyValue::new(
            opentelemetry_semantic_conventions::attribute::SERVICE_VERSION,
            config.service_version.clone(),
        ),
        KeyValue::new("deployment.environment", config.environment.clone()),
    ]);

    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_endpoint(&config.otlp_endpoint)
        .build()
        .map_err(|e| TelemetryError::TracingInit(e.to_string()))?;

    let sampler = if config.sample_ratio >= 1.0 {
        Sampler::AlwaysOn
    } else if config.sample_ratio <= 0.0 {
        Sampler::AlwaysOff
    } else {
        Sampler::TraceIdRatioBased(config.sample_ratio)
    };

    let provider = TracerProvider::builder()
        .with_batch_exporter(exporter, opentelemetry_sdk::runtime::Tokio)
        .with_sampler(Sampler::ParentBased(Box::new(sampler)))
        .with_id_generator(RandomIdGenerator::default())
        .with_resource(resource)
        .build();

    global::set_tracer_provider(provider.clone());
    global::set_text_map_propagator(
        opentelemetry_sdk::propagation::TraceContextPropagator::new(),
    );

    Ok(Some(provider))
}

/// Extracts a parent context from a carrier.
pub fn extract_context(carrier: &dyn Extractor) -> Context {
    global::get_text_map_propagator(|propagator| propagator.extract(carrier))
}

/// Injects `cx` into a carrier.
pub fn inject_context(cx: &Context, carrier: &mut dyn Injector) {
    global::get_text_map_propagator(|propagator| propagator.inject_context(cx, carrier));
}

/// Starts a server span for an inbound request.
///
/// The parent is extracted from `carrier`. If the carrier holds no valid
/// span context the span becomes a new root.
pub fn start_server_span(operation: impl Into<String>, carrier: &dyn Extractor) -> Context {
    let parent = extract_context(carrier);
    let parent = if parent.span().span_context().is_valid() {
        parent
    } else {
        Context::new()
    };
    start_span(operation.into(), SpanKind::Server, &parent)
}

/// Starts a client span for an outbound call as a child of `parent`.
pub fn start_client_span(operation: impl Into<String>, parent: &Context) -> Context {
    start_span(operation.into(), SpanKind::Client, parent)
}

fn start_span(operation: String, kind: SpanKind, parent: &Context) -> Context {
    let tracer = global::tracer(TRACER_NAME);
    let span = tracer
        .span_builder(operation)
        .with_kind(kind)
        .start_with_context(&tracer, parent);
    parent.with_span(span)
}

/// Ends the active span of `cx`.
pub fn end_span(cx: &Context) {
    cx.span().end();
}

/// Returns the trace/span/sampled log fields for `cx`, or nothing when the
/// context carries no valid span.
#[must_use]
pub fn trace_log_fields(cx: &Context) -> Vec<(&'static str, String)> {
    let span = cx.span();
    let sc = span.span_context();
    if !sc.is_valid() {
        return Vec::new();
    }
    vec![
        (fields::TRACE_ID, sc.trace_id().to_string()),
        (fields::SPAN_ID, sc.span_id().to_string()),
        (fields::TRACE_SAMPLED, sc.is_sampled().to_string()),
    ]
}

/// Carrier over an `http::HeaderMap`.
pub struct HeaderExtractor<'a>(pub &'a http::HeaderMap);

impl Extractor for HeaderExtractor<'_> {
    fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(|v| v.to_str().ok())
    }

    fn keys(&self) -> Vec<&str> {
        self.0.keys().map(http::HeaderName::as_str).collect()
    }
}

/// Injector into an `http::HeaderMap`.
pub struct HeaderInjector<'a>(pub &'a mut http::HeaderMap);

impl Injector for HeaderInjector<'_> {
    fn set(&mut self, key: &str, value: String) {
        if let (Ok(name), Ok(val)) = (
            http::header::HeaderName::try_from(key),
            http::header::HeaderValue::try_from(&value),
        ) {
            self.0.insert(name, val);
        }
    }
}

/// Carrier over channel-protocol headers. Keys are case-sensitive.
pub struct ChannelHeaderExtractor<'a>(pub &'a IndexMap<String, String>);

impl Extractor for ChannelHeaderExtractor<'_> {
    fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    fn keys(&self) -> Vec<&str> {
        self.0.keys().map(String::as_str).collect()
    }
}

/// Injector into channel-protocol headers.
pub struct ChannelHeaderInjector<'a>(pub &'a mut IndexMap<String, String>);

impl Injector for ChannelHeaderInjector<'_> {
    fn set(&mut self, key: &str, value: String) {
        self.0.insert(key.to_string(), value);
    }
}
