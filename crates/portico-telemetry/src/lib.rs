//! Observability collaborators for the Portico gateway.
//!
//! - **Scopes**: tagged counters, timers, histograms and gauges over the
//!   `metrics` facade, exported in Prometheus format
//! - **Logging**: `tracing-subscriber` installation with per-target levels
//! - **Tracing**: OpenTelemetry span extraction and injection for HTTP and
//!   channel-protocol headers
//!
//! The request core only talks to [`Scope`], the `tracing` facade and the
//! span helpers in [`tracing`](crate::tracing); everything else here is
//! process bootstrap.
//!
//! # Example
//!
//! ```rust,ignore
//! use portico_telemetry::{init_telemetry, ServiceIdentity, TelemetryConfig};
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = TelemetryConfig::for_service(ServiceIdentity {
//!         name: "edge-gateway".to_string(),
//!         ..ServiceIdentity::default()
//!     })
//!     .with_otlp_endpoint("http://localhost:4317");
//!
//!     let _guard = init_telemetry(config).expect("telemetry");
//! }
//! ```

#![doc(html_root_url = "https://docs.rs/portico-telemetry/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod config;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod scope;
pub mod tracing;

pub use config::{ServiceIdentity, TelemetryConfig};
pub use error::TelemetryError;
pub use logging::{fields, init_logging, LogConfig};
pub use metrics::{init_metrics, render_metrics, MetricsConfig};
pub use scope::{Scope, Tags, Timer};
pub use tracing::{init_tracing, TracingConfig};

/// Result type for telemetry operations.
pub type TelemetryResult<T> = Result<T, TelemetryError>;

/// Keeps the span exporter alive; dropping it flushes pending spans.
///
/// Hold it in `main` for the lifetime of the process.
pub struct TelemetryGuard {
    tracer_provider: Option<opentelemetry_sdk::trace::TracerProvider>,
}

impl TelemetryGuard {
    /// Wraps the provider returned by [`init_tracing`], if any.
    #[must_use]
    pub fn new(tracer_provider: Option<opentelemetry_sdk::trace::TracerProvider>) -> Self {
        Self { tracer_provider }
    }

    /// Returns true if spans are exported.
    #[must_use]
    pub fn is_exporting(&self) -> bool {
        self.tracer_provider.is_some()
    }
}

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        let Some(provider) = self.tracer_provider.take() else {
            return;
        };
        // The subscriber may already be gone at this point.
        for err in provider.force_flush().into_iter().filter_map(Result::err) {
            eprintln!("portico: span flush failed: {err}");
        }
        if let Err(err) = provider.shutdown() {
            eprintln!("portico: span exporter shutdown failed: {err}");
        }
    }
}

/// Initializes logging, metrics and tracing in that order.
///
/// # Errors
///
/// Returns `TelemetryError` if any subsystem fails to initialize.
pub fn init_telemetry(config: TelemetryConfig) -> TelemetryResult<TelemetryGuard> {
    init_logging(&config.logging)?;
    init_metrics(&config.metrics)?;
    let tracer_provider = init_tracing(&config.tracing)?;
    Ok(TelemetryGuard::new(tracer_provider))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_guard_without_exporter() {
        let guard = TelemetryGuard::new(None);
        assert!(!guard.is_exporting());
        drop(guard);
    }
}
