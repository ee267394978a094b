//! Per-call telemetry for outbound requests.
//!
//! Every outbound call, whatever the transport, is bracketed by a
//! [`CallHelper`]:
//!
//! ```rust,ignore
//! let (ctx, mut call) = CallHelper::new(&ctx, "Users::get", &options);
//! let ctx = call.start(&ctx);
//! let result = transport.send(&ctx, request).await;
//! let ctx = call.finish(&ctx, result.as_ref().err().map(|e| e as _));
//! ```
//!
//! The helper tags the context with `client`, `clientmethod` and
//! `targetendpoint`, so the latency, success and error series of every
//! client method are distinct. Failures are logged at warn with the error
//! details; successes at debug. Both lines go through the `*_z` logger
//! variants and so obey framework-log suppression.

use std::collections::HashMap;
use std::error::Error as StdError;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use portico_core::{
    scope_tags, CaptureEvent, ContextLogger, LogField, RequestContext, SystemError,
    TimeoutAndRetryOptions,
};
use portico_telemetry::metrics::names;
use portico_telemetry::tracing::{end_span, start_client_span};
use portico_telemetry::{fields, Scope};
use tokio::time::Instant;

use crate::status::RpcStatus;

/// Message logged when an outbound call succeeds.
pub const FINISHED_MESSAGE: &str = "Finished an outgoing client request";

/// Message logged when an outbound call fails.
pub const FAILED_MESSAGE: &str = "Failed to send outgoing client request";

/// Static description of one downstream client.
#[derive(Debug, Clone)]
pub struct ClientOptions {
    client_id: String,
    client_type: String,
    method_names: Arc<HashMap<String, String>>,
    logger: ContextLogger,
    scope: Scope,
    retry: TimeoutAndRetryOptions,
}

impl ClientOptions {
    /// Creates options for `client_id`.
    ///
    /// `method_names` maps each downstream `Service::method` to the
    /// client method name used in metrics.
    #[must_use]
    pub fn new<K, V>(client_id: impl Into<String>, method_names: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            client_id: client_id.into(),
            client_type: "rpc".to_string(),
            method_names: Arc::new(
                method_names
                    .into_iter()
                    .map(|(k, v)| (k.into(), v.into()))
                    .collect(),
            ),
            logger: ContextLogger::tracing(),
            scope: Scope::new(),
            retry: TimeoutAndRetryOptions::default(),
        }
    }

    /// Sets the transport name logged as `client.type`.
    #[must_use]
    pub fn with_client_type(mut self, client_type: impl Into<String>) -> Self {
        self.client_type = client_type.into();
        self
    }

    /// Sets the logger.
    #[must_use]
    pub fn with_logger(mut self, logger: ContextLogger) -> Self {
        self.logger = logger;
        self
    }

    /// Sets the root scope, used when the request context carries none.
    #[must_use]
    pub fn with_scope(mut self, scope: Scope) -> Self {
        self.scope = scope;
        self
    }

    /// Sets the default timeout and retry policy.
    #[must_use]
    pub fn with_retry_options(mut self, retry: TimeoutAndRetryOptions) -> Self {
        self.retry = retry;
        self
    }

    /// Returns the client id.
    #[must_use]
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Returns the client method bound to `service_method`.
    #[must_use]
    pub fn method_name(&self, service_method: &str) -> Option<&str> {
        self.method_names.get(service_method).map(String::as_str)
    }

    /// Returns the default timeout and retry policy.
    #[must_use]
    pub fn retry_options(&self) -> &TimeoutAndRetryOptions {
        &self.retry
    }
}

/// Telemetry bracket around one outbound call.
#[derive(Debug)]
pub struct CallHelper {
    client_type: String,
    logger: ContextLogger,
    scope: Scope,
    success: bool,
    started: Option<(Instant, DateTime<Utc>)>,
    duration: Option<Duration>,
}

impl CallHelper {
    /// Tags `ctx` for `service_method` and returns the tagged context with
    /// a helper bound to it.
    #[must_use]
    pub fn new(
        ctx: &RequestContext,
        service_method: &str,
        options: &ClientOptions,
    ) -> (RequestContext, Self) {
        let method = options.method_name(service_method).unwrap_or(service_method);
        let ctx = ctx.with_scope_tags_default(
            [
                (scope_tags::CLIENT, options.client_id.as_str()),
                (scope_tags::CLIENT_METHOD, method),
                (scope_tags::TARGET_ENDPOINT, service_method),
            ],
            &options.scope,
        );
        let scope = ctx.scope().cloned().unwrap_or_else(|| options.scope.clone());
        let helper = Self {
            client_type: options.client_type.clone(),
            logger: options.logger.clone(),
            scope,
            success: true,
            started: None,
            duration: None,
        };
        (ctx, helper)
    }

    /// Starts the clock and the client span; counts the request.
    #[must_use]
    pub fn start(&mut self, ctx: &RequestContext) -> RequestContext {
        self.started = Some((Instant::now(), Utc::now()));
        self.scope.counter(names::CLIENT_REQUEST).increment(1);
        let operation = self
            .scope
            .tag(scope_tags::TARGET_ENDPOINT)
            .unwrap_or("client")
            .to_string();
        ctx.with_otel_context(start_client_span(operation, ctx.otel_context()))
    }

    /// Marks the response as an application error.
    pub fn set_application_error(&mut self) {
        self.success = false;
    }

    /// Returns the measured latency once finished.
    #[must_use]
    pub fn duration(&self) -> Option<Duration> {
        self.duration
    }

    /// Records an outbound capture event if the request is being captured.
    pub fn capture(&self, ctx: &RequestContext, event: CaptureEvent) {
        if let Some(container) = ctx.event_container() {
            container.push(event);
        }
    }

    /// Records latency, outcome counters and the finish log line.
    ///
    /// Errors are never re-raised here; the caller keeps its `Result`.
    pub fn finish(
        &mut self,
        ctx: &RequestContext,
        err: Option<&(dyn StdError + 'static)>,
    ) -> RequestContext {
        let finished = Instant::now();
        let finished_wall = Utc::now();
        let (started, started_wall) = self.started.unwrap_or((finished, finished_wall));
        let delta = finished.saturating_duration_since(started);
        self.duration = Some(delta);

        self.scope.timer(names::CLIENT_LATENCY).record(delta);
        self.scope
            .histogram(names::CLIENT_LATENCY_HIST)
            .record(delta.as_secs_f64());

        let ctx = ctx.with_endpoint_request_headers(HashMap::new());
        let mut log_fields = vec![
            LogField::time("timestamp-started", started_wall),
            LogField::time("timestamp-finished", finished_wall),
            LogField::int(
                fields::CLIENT_RESPONSE_DURATION,
                i64::try_from(delta.as_millis()).unwrap_or(i64::MAX),
            ),
            LogField::string(fields::CLIENT_TYPE, self.client_type.as_str()),
        ];

        match err {
            Some(err) => {
                if let Some(system) = SystemError::find(err) {
                    self.scope
                        .tagged([(scope_tags::ERROR, system.code.metrics_key())])
                        .counter(names::CLIENT_SYSTEM_ERRORS)
                        .increment(1);
                }
                if let Some(status) = RpcStatus::find(err) {
                    self.scope
                        .counter(&format!("{}.{}", names::CLIENT_ERRORS, status.code()))
                        .increment(1);
                    log_fields.push(LogField::int("code", status.code() as i64));
                    log_fields.push(LogField::string("message", status.message()));
                    log_fields.push(LogField::string("name", status.name()));
                } else {
                    log_fields.push(LogField::error(err));
                }
                self.scope.counter(names::CLIENT_ERRORS).increment(1);
                self.logger.warn_z(&ctx, FAILED_MESSAGE, log_fields);
            }
            None if !self.success => {
                self.scope.counter(names::CLIENT_APP_ERRORS).increment(1);
                self.logger.debug_z(&ctx, FINISHED_MESSAGE, log_fields);
            }
            None => {
                self.scope.counter(names::CLIENT_SUCCESS).increment(1);
                self.logger.debug_z(&ctx, FINISHED_MESSAGE, log_fields);
            }
        }

        end_span(ctx.otel_context());
        ctx
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status::RpcCode;
    use portico_core::fixtures::{logger_for, test_metrics, MemoryLogSink};
    use portico_core::{LogLevel, SystemErrorCode};
    use portico_telemetry::metrics::counter_value;
    use serde_json::Value;

    fn options(client: &str, sink: &Arc<MemoryLogSink>) -> ClientOptions {
        ClientOptions::new(client, [("Users::get", "getUser")])
            .with_client_type("channel")
            .with_logger(logger_for(sink))
    }

    #[test]
    fn test_tags_context() {
        let sink = MemoryLogSink::new();
        let (ctx, _) = CallHelper::new(&RequestContext::new(), "Users::get", &options("users", &sink));

        let tags = ctx.scope_tags();
        assert_eq!(tags["client"], "users");
        assert_eq!(tags["clientmethod"], "getUser");
        assert_eq!(tags["targetendpoint"], "Users::get");
        assert_eq!(ctx.scope().and_then(|s| s.tag("clientmethod")), Some("getUser"));
    }

    #[test]
    fn test_unknown_method_uses_service_method() {
        let sink = MemoryLogSink::new();
        let (ctx, _) = CallHelper::new(&RequestContext::new(), "Users::list", &options("users", &sink));
        assert_eq!(ctx.scope_tags()["clientmethod"], "Users::list");
    }

    #[test]
    fn test_success_is_counted_and_logged() {
        let _ = test_metrics();
        let sink = MemoryLogSink::new();
        let (ctx, mut call) = CallHelper::new(&RequestContext::new(), "Users::get", &options("ok-client", &sink));
        let ctx = call.start(&ctx);
        let _ = call.finish(&ctx, None);

        let record = sink.find(FINISHED_MESSAGE).unwrap();
        assert_eq!(record.level, LogLevel::Debug);
        assert_eq!(record.field("client.type").and_then(Value::as_str), Some("channel"));
        assert!(record.field("timestamp-started").is_some());
        assert!(call.duration().is_some());

        let rendered = test_metrics();
        assert_eq!(counter_value(&rendered, "client.success", &[("client", "ok-client")]), Some(1.0));
        assert_eq!(counter_value(&rendered, "client.request", &[("client", "ok-client")]), Some(1.0));
        assert_eq!(counter_value(&rendered, "client.errors", &[("client", "ok-client")]), None);
    }

    #[test]
    fn test_rpc_status_is_classified() {
        let _ = test_metrics();
        let sink = MemoryLogSink::new();
        let (ctx, mut call) = CallHelper::new(&RequestContext::new(), "Users::get", &options("status-client", &sink));
        let ctx = call.start(&ctx);
        let err = RpcStatus::new(RpcCode::NotFound, "missing").with_name("UserMissing");
        let _ = call.finish(&ctx, Some(&err));

        let record = sink.find(FAILED_MESSAGE).unwrap();
        assert_eq!(record.level, LogLevel::Warn);
        assert_eq!(record.field("code").unwrap(), 5);
        assert_eq!(record.field("message").and_then(Value::as_str), Some("missing"));
        assert_eq!(record.field("name").and_then(Value::as_str), Some("UserMissing"));

        let rendered = test_metrics();
        let labels = [("client", "status-client")];
        assert_eq!(counter_value(&rendered, "client.errors", &labels), Some(1.0));
        assert_eq!(counter_value(&rendered, "client.errors.not-found", &labels), Some(1.0));
    }

    #[test]
    fn test_system_error_is_tagged() {
        let _ = test_metrics();
        let sink = MemoryLogSink::new();
        let (ctx, mut call) = CallHelper::new(&RequestContext::new(), "Users::get", &options("busy-client", &sink));
        let ctx = call.start(&ctx);
        let err = SystemError::new(SystemErrorCode::Busy, "overloaded");
        let _ = call.finish(&ctx, Some(&err));

        assert_eq!(
            sink.find(FAILED_MESSAGE).unwrap().field("error").and_then(Value::as_str),
            Some("system error (busy): overloaded")
        );
        let rendered = test_metrics();
        assert_eq!(
            counter_value(
                &rendered,
                "client.system-errors",
                &[("client", "busy-client"), ("error", "busy")]
            ),
            Some(1.0)
        );
    }

    #[test]
    fn test_application_error() {
        let _ = test_metrics();
        let sink = MemoryLogSink::new();
        let (ctx, mut call) = CallHelper::new(&RequestContext::new(), "Users::get", &options("app-client", &sink));
        let ctx = call.start(&ctx);
        call.set_application_error();
        let _ = call.finish(&ctx, None);

        let rendered = test_metrics();
        assert_eq!(counter_value(&rendered, "client.app-errors", &[("client", "app-client")]), Some(1.0));
        assert_eq!(counter_value(&rendered, "client.success", &[("client", "app-client")]), None);
    }

    #[test]
    fn test_finish_resets_endpoint_request_headers() {
        let sink = MemoryLogSink::new();
        let inbound = RequestContext::new()
            .with_endpoint_request_headers(HashMap::from([("x-token".to_string(), "t".to_string())]));
        let (ctx, mut call) = CallHelper::new(&inbound, "Users::get", &options("hdr-client", &sink));
        let ctx = call.finish(&ctx, None);
        assert!(ctx.endpoint_request_headers().unwrap().is_empty());
    }
}
