//! Telemetry configuration.
//!
//! The subsystem configs each carry a copy of the service identity so they
//! can be installed on their own. [`TelemetryConfig::for_service`] keeps
//! those copies in step.

use crate::logging::LogConfig;
use crate::metrics::MetricsConfig;
use crate::tracing::TracingConfig;

/// Name, version and deployment environment of the running gateway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceIdentity {
    /// Service name; the `service` label on metrics and the OTel resource
    /// name.
    pub name: String,
    /// Service version.
    pub version: String,
    /// Deployment environment.
    pub env: String,
}

impl Default for ServiceIdentity {
    fn default() -> Self {
        Self {
            name: "portico".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            env: "production".to_string(),
        }
    }
}

/// Everything [`init_telemetry`](crate::init_telemetry) installs.
#[derive(Debug, Clone, Default)]
pub struct TelemetryConfig {
    /// Identity stamped into every subsystem.
    pub service: ServiceIdentity,
    /// Subscriber settings.
    pub logging: LogConfig,
    /// Recorder settings.
    pub metrics: MetricsConfig,
    /// Exporter settings.
    pub tracing: TracingConfig,
}

impl TelemetryConfig {
    /// Default subsystems for `service`.
    #[must_use]
    pub fn for_service(service: ServiceIdentity) -> Self {
        Self {
            service,
            ..Self::default()
        }
        .stamped()
    }

    /// Replaces the subscriber settings.
    #[must_use]
    pub fn with_logging(mut self, logging: LogConfig) -> Self {
        self.logging = logging;
        self.stamped()
    }

    /// Replaces the recorder settings.
    #[must_use]
    pub fn with_metrics(mut self, metrics: MetricsConfig) -> Self {
        self.metrics = metrics;
        self.stamped()
    }

    /// Replaces the exporter settings.
    #[must_use]
    pub fn with_tracing(mut self, tracing: TracingConfig) -> Self {
        self.tracing = tracing;
        self.stamped()
    }

    /// Turns span export on towards an OTLP collector.
    #[must_use]
    pub fn with_otlp_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.tracing.enabled = true;
        self.tracing.otlp_endpoint = endpoint.into();
        self
    }

    fn stamped(mut self) -> Self {
        let service = &self.service;
        self.logging.service_name.clone_from(&service.name);
        self.metrics.service_name.clone_from(&service.name);
        self.tracing.service_name.clone_from(&service.name);
        self.tracing.service_version.clone_from(&service.version);
        self.tracing.environment.clone_from(&service.env);
        self
    }
}
