//! Telemetry error types.

use thiserror::Error;

/// Failure to install one of the process-wide telemetry providers.
///
/// Each is fatal at boot; none can happen once the gateway is serving.
#[derive(Debug, Error)]
pub enum TelemetryError {
    /// The Prometheus recorder could not be built or installed.
    #[error("metrics recorder: {0}")]
    MetricsInit(String),

    /// The OTLP exporter could not be built.
    #[error("span exporter: {0}")]
    TracingInit(String),

    /// The subscriber could not be installed or a filter directive is
    /// invalid.
    #[error("log subscriber: {0}")]
    LoggingInit(String),

    /// The metrics listener address does not parse.
    #[error("metrics listener address {0}")]
    InvalidAddress(String),
}
