//! Liveness check served at `/health`.
//!
//! The check answers `200 {"ok":true,"message":"Healthy, from <service>"}`
//! while the gateway is healthy and `503 {"ok":false,...}` once it has been
//! marked degraded, for example while draining during shutdown.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use http::StatusCode;
use portico_middleware::{handler_fn, HttpStack};
use serde::{Deserialize, Serialize};

/// Body of the `/health` response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthReport {
    /// Whether the gateway is healthy.
    pub ok: bool,
    /// Human-readable status.
    pub message: String,
}

/// Shared health flag of one gateway.
#[derive(Debug, Clone)]
pub struct Health {
    service: Arc<str>,
    healthy: Arc<AtomicBool>,
}

impl Health {
    /// Creates a healthy check for `service`.
    #[must_use]
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: Arc::from(service.into()),
            healthy: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Marks the gateway healthy or degraded.
    pub fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::SeqCst);
    }

    /// Returns the current flag.
    #[must_use]
    pub fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::SeqCst)
    }

    /// Returns the status code and body for the check.
    #[must_use]
    pub fn report(&self) -> (StatusCode, HealthReport) {
        if self.is_healthy() {
            (
                StatusCode::OK,
                HealthReport {
                    ok: true,
                    message: format!("Healthy, from {}", self.service),
                },
            )
        } else {
            (
                StatusCode::SERVICE_UNAVAILABLE,
                HealthReport {
                    ok: false,
                    message: format!("Unhealthy, from {}", self.service),
                },
            )
        }
    }

    /// Builds the endpoint stack that serves the check.
    #[must_use]
    pub fn stack(&self) -> HttpStack {
        let health = self.clone();
        HttpStack::bare(handler_fn(move |ctx, _req, res| {
            let (status, report) = health.report();
            Box::pin(async move {
                res.write_json(status, None, &report);
                ctx
            })
        }))
    }
}
