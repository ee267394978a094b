//! Test doubles shared by the gateway crates.
//!
//! [`MemoryLogSink`] records every log line so tests can assert on the
//! message, level and fields; [`TestRequest`] builds a started
//! [`ServerHttpRequest`] without a transport.

use std::sync::Arc;

use bytes::Bytes;
use http::Method;
use parking_lot::Mutex;
use portico_router::Params;
use portico_telemetry::{init_metrics, render_metrics, MetricsConfig};

use crate::context::RequestContext;
use crate::endpoint::EndpointInfo;
use crate::http_request::{full_body, ServerHttpRequest};
use crate::logger::{ContextLogger, LogRecord, LogSink};

/// Sink that keeps records in memory.
#[derive(Debug, Default)]
pub struct MemoryLogSink {
    records: Mutex<Vec<LogRecord>>,
}

impl MemoryLogSink {
    /// Creates an empty sink.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Returns every record written so far.
    #[must_use]
    pub fn records(&self) -> Vec<LogRecord> {
        self.records.lock().clone()
    }

    /// Returns the first record with `message`.
    #[must_use]
    pub fn find(&self, message: &str) -> Option<LogRecord> {
        self.records
            .lock()
            .iter()
            .find(|r| r.message == message)
            .cloned()
    }

    /// Counts the records with `message`.
    #[must_use]
    pub fn count_message(&self, message: &str) -> usize {
        self.records
            .lock()
            .iter()
            .filter(|r| r.message == message)
            .count()
    }

    /// Returns the messages in write order.
    #[must_use]
    pub fn messages(&self) -> Vec<String> {
        self.records.lock().iter().map(|r| r.message.clone()).collect()
    }

    /// Drops every record.
    pub fn clear(&self) {
        self.records.lock().clear();
    }
}

impl LogSink for MemoryLogSink {
    fn write(&self, record: LogRecord) {
        self.records.lock().push(record);
    }
}

/// Returns a logger writing into `sink`.
#[must_use]
pub fn logger_for(sink: &Arc<MemoryLogSink>) -> ContextLogger {
    ContextLogger::new(Arc::clone(sink) as Arc<dyn LogSink>)
}

/// Returns a `GET` endpoint whose logger writes into `sink`.
#[must_use]
pub fn endpoint_with_sink(
    endpoint: &str,
    handler: &str,
    sink: &Arc<MemoryLogSink>,
) -> EndpointInfo {
    EndpointInfo::new(endpoint, handler, "GET").with_logger(logger_for(sink))
}

/// Installs the process-wide recorder once and returns the current
/// Prometheus text.
///
/// Counters are global, so tests assert on deltas or on labels unique to
/// the test.
#[must_use]
pub fn test_metrics() -> String {
    let _ = init_metrics(&MetricsConfig::default());
    render_metrics().unwrap_or_default()
}

/// Builder for a started [`ServerHttpRequest`].
#[derive(Debug)]
pub struct TestRequest {
    builder: http::request::Builder,
    body: Bytes,
    params: Params,
    ctx: RequestContext,
}

impl TestRequest {
    /// Starts a request with `method` and `uri`.
    #[must_use]
    pub fn new(method: Method, uri: &str) -> Self {
        Self {
            builder: http::Request::builder().method(method).uri(uri),
            body: Bytes::new(),
            params: Params::new(),
            ctx: RequestContext::new(),
        }
    }

    /// Starts a `GET`.
    #[must_use]
    pub fn get(uri: &str) -> Self {
        Self::new(Method::GET, uri)
    }

    /// Starts a `POST`.
    #[must_use]
    pub fn post(uri: &str) -> Self {
        Self::new(Method::POST, uri)
    }

    /// Adds a header.
    #[must_use]
    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.builder = self.builder.header(name, value);
        self
    }

    /// Sets the body.
    #[must_use]
    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// Adds a path parameter.
    #[must_use]
    pub fn param(mut self, name: &str, value: &str) -> Self {
        self.params.push(name, value);
        self
    }

    /// Sets the incoming context.
    #[must_use]
    pub fn context(mut self, ctx: RequestContext) -> Self {
        self.ctx = ctx;
        self
    }

    /// Builds the request for `endpoint`.
    ///
    /// # Panics
    ///
    /// Panics if a header or the URI is invalid.
    #[must_use]
    pub fn build(self, endpoint: Arc<EndpointInfo>) -> ServerHttpRequest {
        let (parts, ()) = self
            .builder
            .body(())
            .expect("valid test request")
            .into_parts();
        ServerHttpRequest::new(parts, full_body(self.body), self.params, self.ctx, endpoint)
    }
}
