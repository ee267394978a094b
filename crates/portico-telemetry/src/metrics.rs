//! Prometheus recorder installation.
//!
//! The gateway emits through the `metrics` facade (see [`crate::scope`]).
//! This module installs the Prometheus recorder behind it, configures
//! latency histogram buckets, and keeps a process-wide handle so the HTTP
//! server can render `/metrics`.
//!
//! # Standard metrics
//!
//! | Metric | Type | Emitted by |
//! |--------|------|------------|
//! | `endpoint.request` | Counter | every inbound request finish |
//! | `endpoint.status` | Counter (`status` label) | inbound HTTP finish |
//! | `endpoint.success` / `endpoint.app-errors` / `endpoint.system-errors` | Counter | inbound channel finish |
//! | `endpoint.latency` / `endpoint.latency-hist` | Histogram (seconds) | every inbound request finish |
//! | `client.request` / `client.success` / `client.errors` | Counter | outbound call helper |
//! | `client.latency` / `client.latency-hist` | Histogram (seconds) | outbound call helper |
//! | `runtime.router.panic` | Counter | HTTP panic capture |

use std::net::SocketAddr;
use std::sync::OnceLock;

use metrics::{describe_counter, describe_histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};

use crate::error::TelemetryError;
use crate::TelemetryResult;

/// Global metrics handle for rendering.
static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Default latency buckets in seconds: 1ms up to 10s.
pub const DEFAULT_LATENCY_BUCKETS: &[f64] = &[
    0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
];

/// Metric names shared by the inbound and outbound paths.
pub mod names {
    /// Inbound request counter.
    pub const ENDPOINT_REQUEST: &str = "endpoint.request";
    /// Inbound success counter.
    pub const ENDPOINT_SUCCESS: &str = "endpoint.success";
    /// Inbound per-status counter.
    pub const ENDPOINT_STATUS: &str = "endpoint.status";
    /// Inbound system error counter.
    pub const ENDPOINT_SYSTEM_ERRORS: &str = "endpoint.system-errors";
    /// Inbound application error counter.
    pub const ENDPOINT_APP_ERRORS: &str = "endpoint.app-errors";
    /// Inbound latency timer.
    pub const ENDPOINT_LATENCY: &str = "endpoint.latency";
    /// Inbound latency histogram.
    pub const ENDPOINT_LATENCY_HIST: &str = "endpoint.latency-hist";
    /// Inbound panic counter.
    pub const ENDPOINT_PANIC: &str = "endpoint.panic";

    /// Outbound request counter.
    pub const CLIENT_REQUEST: &str = "client.request";
    /// Outbound success counter.
    pub const CLIENT_SUCCESS: &str = "client.success";
    /// Outbound error counter.
    pub const CLIENT_ERRORS: &str = "client.errors";
    /// Outbound application error counter.
    pub const CLIENT_APP_ERRORS: &str = "client.app-errors";
    /// Outbound system error counter.
    pub const CLIENT_SYSTEM_ERRORS: &str = "client.system-errors";
    /// Outbound latency timer.
    pub const CLIENT_LATENCY: &str = "client.latency";
    /// Outbound latency histogram.
    pub const CLIENT_LATENCY_HIST: &str = "client.latency-hist";

    /// Router panic counter.
    pub const ROUTER_PANIC: &str = "runtime.router.panic";
}

/// Metrics configuration.
#[derive(Debug, Clone)]
pub struct MetricsConfig {
    /// Whether metrics are enabled.
    pub enabled: bool,

    /// Address of a standalone scrape listener. When `None`, metrics are
    /// only exposed through the gateway's own `/metrics` route.
    pub listen_addr: Option<String>,

    /// Service name for metric labels.
    pub service_name: String,

    /// Buckets applied to every `*latency-hist` histogram.
    pub latency_buckets: Vec<f64>,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            listen_addr: None,
            service_name: "portico".to_string(),
            latency_buckets: DEFAULT_LATENCY_BUCKETS.to_vec(),
        }
    }
}

/// Installs the Prometheus recorder.
///
/// Calling this more than once keeps the first recorder; later calls
/// return `Ok` without touching it.
///
/// # Errors
///
/// Returns `TelemetryError::InvalidAddress` for a bad listener address and
/// `TelemetryError::MetricsInit` if the recorder cannot be installed.
pub fn init_metrics(config: &MetricsConfig) -> TelemetryResult<()> {
    if !config.enabled || METRICS_HANDLE.get().is_some() {
        return Ok(());
    }

    let mut builder = PrometheusBuilder::new()
        .add_global_label("service", config.service_name.clone())
        .set_buckets_for_metric(Matcher::Suffix("latency-hist".to_string()), &config.latency_buckets)
        .map_err(|e| TelemetryError::MetricsInit(e.to_string()))?;

    if let Some(addr) = &config.listen_addr {
        let addr: SocketAddr = addr
            .parse()
            .map_err(|e| TelemetryError::InvalidAddress(format!("{addr}: {e}")))?;
        builder = builder.with_http_listener(addr);
    }

    let handle = builder
        .install_recorder()
        .map_err(|e| TelemetryError::MetricsInit(e.to_string()))?;

    let _ = METRICS_HANDLE.set(handle);
    register_metric_descriptions();

    Ok(())
}

/// Returns the global metrics handle if initialized.
pub fn metrics_handle() -> Option<&'static PrometheusHandle> {
    METRICS_HANDLE.get()
}

/// Renders metrics in Prometheus format.
///
/// Returns `None` if metrics are not initialized.
#[must_use]
pub fn render_metrics() -> Option<String> {
    METRICS_HANDLE.get().map(PrometheusHandle::render)
}

fn register_metric_descriptions() {
    describe_counter!(names::ENDPOINT_REQUEST, "Inbound requests finished");
    describe_counter!(names::ENDPOINT_STATUS, "Inbound HTTP responses by status code");
    describe_counter!(names::ENDPOINT_SUCCESS, "Inbound channel calls that succeeded");
    describe_counter!(
        names::ENDPOINT_SYSTEM_ERRORS,
        "Inbound channel calls that ended in a system error"
    );
    describe_histogram!(names::ENDPOINT_LATENCY_HIST, "Inbound request latency in seconds");
    describe_counter!(names::CLIENT_REQUEST, "Outbound calls started");
    describe_counter!(names::CLIENT_ERRORS, "Outbound calls that failed");
    describe_histogram!(names::CLIENT_LATENCY_HIST, "Outbound call latency in seconds");
    describe_counter!(names::ROUTER_PANIC, "Panics captured by the HTTP router");
}

/// Reads a counter value out of rendered Prometheus text.
///
/// `name` is the facade name (dots and dashes are sanitized to `_` the way
/// the exporter renders them); every `(label, value)` pair must be present
/// on the sample line. Returns `None` if no sample matches.
#[must_use]
pub fn counter_value(rendered: &str, name: &str, labels: &[(&str, &str)]) -> Option<f64> {
    let sanitized: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect();

    rendered
        .lines()
        .filter(|line| !line.starts_with('#'))
        .filter(|line| {
            line.strip_prefix(sanitized.as_str())
                .is_some_and(|rest| rest.starts_with('{') || rest.starts_with(' '))
        })
        .filter(|line| {
            labels
                .iter()
                .all(|(k, v)| line.contains(&format!("{k}=\"{v}\"")))
        })
        .find_map(|line| line.rsplit(' ').next()?.parse().ok())
}
