//! Per-request context.
//!
//! [`RequestContext`] is the propagation bus of one request. It has two
//! halves that never alias:
//!
//! - **Layered values.** Request UUID, endpoint and handler ids, endpoint
//!   request headers, scope tags, timeout options, routing hints, path
//!   params and the trace context. Every `with_*` call returns a new
//!   context and leaves the receiver untouched.
//! - **Accumulated log fields.** A mutex-guarded sequence shared by every
//!   context derived from the same root, so a client call running
//!   alongside the handler can append concurrently.
//!
//! The request UUID and endpoint id are write-once: the first write wins.
//! Scope tags are merge-only.
//!
//! # Example
//!
//! ```
//! use portico_core::{LogField, RequestContext};
//!
//! let ctx = RequestContext::new()
//!     .with_request_uuid("abc-123")
//!     .with_scope_tags([("endpoint", "bar")]);
//! let child = ctx.with_scope_tags([("handler", "foo")]);
//!
//! child.append_log_fields(vec![LogField::string("user", "42")]);
//!
//! assert_eq!(ctx.request_uuid(), Some("abc-123"));
//! assert_eq!(ctx.scope_tags().get("handler"), None);
//! assert_eq!(child.scope_tags().len(), 2);
//! assert_eq!(ctx.log_fields().len(), 1);
//! ```

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use portico_router::Params;
use portico_telemetry::{Scope, Tags};
use tokio::time::Instant;

use crate::events::EventContainer;
use crate::log::{LogField, LogLevel};

/// Scope tag names set by the framework.
pub mod scope_tags {
    /// Inbound protocol (`HTTP` or `channel`).
    pub const PROTOCOL: &str = "protocol";
    /// Endpoint id.
    pub const ENDPOINT: &str = "endpoint";
    /// Handler id.
    pub const HANDLER: &str = "handler";
    /// Request method.
    pub const METHOD: &str = "method";
    /// Api environment of the caller.
    pub const API_ENVIRONMENT: &str = "apienvironment";
    /// Deployment environment override (`shadow`).
    pub const ENVIRONMENT: &str = "env";
    /// Error classification on system error counters.
    pub const ERROR: &str = "error";
    /// HTTP status code on per-status counters.
    pub const STATUS: &str = "status";
    /// Outbound client id.
    pub const CLIENT: &str = "client";
    /// Outbound client method.
    pub const CLIENT_METHOD: &str = "clientmethod";
    /// Outbound target endpoint.
    pub const TARGET_ENDPOINT: &str = "targetendpoint";

    /// Protocol tag value for HTTP.
    pub const PROTOCOL_HTTP: &str = "HTTP";
    /// Protocol tag value for the channel protocol.
    pub const PROTOCOL_CHANNEL: &str = "channel";
    /// Environment tag value of shadow requests.
    pub const SHADOW_ENVIRONMENT: &str = "shadow";
    /// Api environment used when the caller does not send one.
    pub const DEFAULT_API_ENVIRONMENT: &str = "production";
}

/// Default pause between outbound attempts.
pub const DEFAULT_BACK_OFF: Duration = Duration::from_millis(10);

/// Timeout and retry settings consulted by outbound call helpers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeoutAndRetryOptions {
    /// Budget for every attempt together.
    pub overall_timeout: Duration,
    /// Budget for a single attempt.
    pub per_attempt_timeout: Duration,
    /// Maximum number of attempts, including the first.
    pub max_attempts: u32,
    /// Fixed pause between attempts.
    pub back_off: Duration,
}

impl Default for TimeoutAndRetryOptions {
    fn default() -> Self {
        Self {
            overall_timeout: Duration::from_secs(3),
            per_attempt_timeout: Duration::from_secs(1),
            max_attempts: 1,
            back_off: DEFAULT_BACK_OFF,
        }
    }
}

#[derive(Clone, Default)]
struct ContextData {
    request_uuid: Option<String>,
    endpoint_id: Option<String>,
    handler_id: Option<String>,
    endpoint_request_headers: Option<Arc<HashMap<String, String>>>,
    scope_tags: Arc<Tags>,
    scope: Option<Scope>,
    timeout_and_retry: Option<TimeoutAndRetryOptions>,
    routing_delegate: Option<String>,
    shard_key: Option<String>,
    deadline: Option<Instant>,
    events: Option<Arc<EventContainer>>,
    params: Params,
    otel: opentelemetry::Context,
}

#[derive(Debug, Default)]
struct Accumulated {
    fields: Vec<LogField>,
    deferred: u64,
    level: Option<LogLevel>,
}

/// Mutex-guarded log field container shared along a request.
#[derive(Debug, Default)]
struct LogAccumulator {
    inner: Mutex<Accumulated>,
}

/// Per-request propagation bus.
#[derive(Clone, Default)]
pub struct RequestContext {
    data: Arc<ContextData>,
    log: Arc<LogAccumulator>,
}

impl RequestContext {
    /// Creates an empty context with a fresh log field container.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn derive(&self, update: impl FnOnce(&mut ContextData)) -> Self {
        let mut data = (*self.data).clone();
        update(&mut data);
        Self {
            data: Arc::new(data),
            log: Arc::clone(&self.log),
        }
    }

    /// Sets the request UUID unless one is already set.
    #[must_use]
    pub fn with_request_uuid(&self, uuid: impl Into<String>) -> Self {
        if self.data.request_uuid.is_some() {
            return self.clone();
        }
        let uuid = uuid.into();
        self.derive(|d| d.request_uuid = Some(uuid))
    }

    /// Returns the request UUID.
    #[must_use]
    pub fn request_uuid(&self) -> Option<&str> {
        self.data.request_uuid.as_deref()
    }

    /// Sets the endpoint id unless one is already set.
    #[must_use]
    pub fn with_endpoint_id(&self, endpoint: impl Into<String>) -> Self {
        if self.data.endpoint_id.is_some() {
            return self.clone();
        }
        let endpoint = endpoint.into();
        self.derive(|d| d.endpoint_id = Some(endpoint))
    }

    /// Returns the endpoint id.
    #[must_use]
    pub fn endpoint_id(&self) -> Option<&str> {
        self.data.endpoint_id.as_deref()
    }

    /// Sets the handler id.
    #[must_use]
    pub fn with_handler_id(&self, handler: impl Into<String>) -> Self {
        let handler = handler.into();
        self.derive(|d| d.handler_id = Some(handler))
    }

    /// Returns the handler id.
    #[must_use]
    pub fn handler_id(&self) -> Option<&str> {
        self.data.handler_id.as_deref()
    }

    /// Installs the endpoint request headers (first value per name).
    #[must_use]
    pub fn with_endpoint_request_headers(&self, headers: HashMap<String, String>) -> Self {
        let headers = Arc::new(headers);
        self.derive(|d| d.endpoint_request_headers = Some(headers))
    }

    /// Returns the endpoint request headers.
    #[must_use]
    pub fn endpoint_request_headers(&self) -> Option<&HashMap<String, String>> {
        self.data.endpoint_request_headers.as_deref()
    }

    /// Merges `tags` over the current scope tags.
    ///
    /// An attached measurement scope is re-tagged with the new tags.
    #[must_use]
    pub fn with_scope_tags<K, V>(&self, tags: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        let added: Vec<(String, String)> = tags
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        self.derive(|d| {
            let mut merged = (*d.scope_tags).clone();
            merged.extend(added.iter().cloned());
            d.scope_tags = Arc::new(merged);
            if let Some(scope) = &d.scope {
                d.scope = Some(scope.tagged(added));
            }
        })
    }

    /// Merges `tags` and attaches `scope` if no scope is attached yet.
    ///
    /// A newly attached scope carries every accumulated tag. An already
    /// attached scope is re-tagged and `scope` is ignored.
    #[must_use]
    pub fn with_scope_tags_default<K, V>(
        &self,
        tags: impl IntoIterator<Item = (K, V)>,
        scope: &Scope,
    ) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        let ctx = self.with_scope_tags(tags);
        if ctx.data.scope.is_some() {
            return ctx;
        }
        let attached = scope.tagged(ctx.data.scope_tags.iter().map(|(k, v)| (k.clone(), v.clone())));
        ctx.derive(|d| d.scope = Some(attached))
    }

    /// Returns the accumulated scope tags.
    #[must_use]
    pub fn scope_tags(&self) -> &Tags {
        &self.data.scope_tags
    }

    /// Returns the attached measurement scope.
    #[must_use]
    pub fn scope(&self) -> Option<&Scope> {
        self.data.scope.as_ref()
    }

    /// Sets the timeout and retry options.
    #[must_use]
    pub fn with_timeout_and_retry_options(&self, options: TimeoutAndRetryOptions) -> Self {
        self.derive(|d| d.timeout_and_retry = Some(options))
    }

    /// Returns the timeout and retry options.
    #[must_use]
    pub fn timeout_and_retry_options(&self) -> Option<&TimeoutAndRetryOptions> {
        self.data.timeout_and_retry.as_ref()
    }

    /// Sets the routing delegate.
    #[must_use]
    pub fn with_routing_delegate(&self, delegate: impl Into<String>) -> Self {
        let delegate = delegate.into();
        self.derive(|d| d.routing_delegate = Some(delegate))
    }

    /// Returns the routing delegate.
    #[must_use]
    pub fn routing_delegate(&self) -> Option<&str> {
        self.data.routing_delegate.as_deref()
    }

    /// Sets the shard key.
    #[must_use]
    pub fn with_shard_key(&self, key: impl Into<String>) -> Self {
        let key = key.into();
        self.derive(|d| d.shard_key = Some(key))
    }

    /// Returns the shard key.
    #[must_use]
    pub fn shard_key(&self) -> Option<&str> {
        self.data.shard_key.as_deref()
    }

    /// Sets an absolute deadline. An earlier existing deadline is kept.
    #[must_use]
    pub fn with_deadline(&self, deadline: Instant) -> Self {
        let deadline = match self.data.deadline {
            Some(existing) if existing < deadline => existing,
            _ => deadline,
        };
        self.derive(|d| d.deadline = Some(deadline))
    }

    /// Sets a deadline `timeout` from now.
    #[must_use]
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    /// Returns the deadline.
    #[must_use]
    pub fn deadline(&self) -> Option<Instant> {
        self.data.deadline
    }

    /// Returns the time left before the deadline, or `None` without one.
    #[must_use]
    pub fn remaining(&self) -> Option<Duration> {
        self.data
            .deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }

    /// Returns true if the deadline has passed.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.data.deadline.is_some_and(|d| Instant::now() >= d)
    }

    /// Turns on event capture for this request.
    #[must_use]
    pub fn with_capture(&self) -> Self {
        if self.data.events.is_some() {
            return self.clone();
        }
        self.derive(|d| d.events = Some(Arc::new(EventContainer::new())))
    }

    /// Returns true if events are captured for this request.
    #[must_use]
    pub fn to_capture(&self) -> bool {
        self.data.events.is_some()
    }

    /// Returns the event container when capture is on.
    #[must_use]
    pub fn event_container(&self) -> Option<&Arc<EventContainer>> {
        self.data.events.as_ref()
    }

    /// Sets the path parameters extracted by the router.
    #[must_use]
    pub fn with_params(&self, params: Params) -> Self {
        self.derive(|d| d.params = params)
    }

    /// Returns the path parameters.
    #[must_use]
    pub fn params(&self) -> &Params {
        &self.data.params
    }

    /// Sets the OpenTelemetry context of the request span.
    #[must_use]
    pub fn with_otel_context(&self, cx: opentelemetry::Context) -> Self {
        self.derive(|d| d.otel = cx)
    }

    /// Returns the OpenTelemetry context.
    #[must_use]
    pub fn otel_context(&self) -> &opentelemetry::Context {
        &self.data.otel
    }

    /// Appends fields to the shared log field container.
    pub fn append_log_fields(&self, fields: impl IntoIterator<Item = LogField>) {
        self.log.inner.lock().fields.extend(fields);
    }

    /// Returns a snapshot of the accumulated log fields.
    #[must_use]
    pub fn log_fields(&self) -> Vec<LogField> {
        self.log.inner.lock().fields.clone()
    }

    /// Stores a suppressed framework log line on the context.
    ///
    /// The message goes in under `msg1`, `msg2`, ... followed by its
    /// fields, and the high-water level is raised to `level`.
    pub(crate) fn defer_log(&self, level: LogLevel, msg: &str, fields: Vec<LogField>) {
        let mut acc = self.log.inner.lock();
        acc.deferred += 1;
        let key = format!("msg{}", acc.deferred);
        acc.fields.push(LogField::string(key, msg));
        acc.fields.extend(fields);
        acc.level = Some(acc.level.map_or(level, |current| current.max(level)));
    }

    /// Returns the highest level among deferred log lines.
    #[must_use]
    pub fn deferred_level(&self) -> Option<LogLevel> {
        self.log.inner.lock().level
    }

    /// Returns the number of deferred log lines.
    #[must_use]
    pub fn deferred_count(&self) -> u64 {
        self.log.inner.lock().deferred
    }

    /// Returns the fields every framework log line of this request carries.
    #[must_use]
    pub fn identity_fields(&self) -> Vec<LogField> {
        use portico_telemetry::fields;

        let mut out = Vec::with_capacity(3);
        if let Some(uuid) = self.request_uuid() {
            out.push(LogField::string(fields::REQUEST_UUID, uuid));
        }
        if let Some(endpoint) = self.endpoint_id() {
            out.push(LogField::string(fields::ENDPOINT_ID, endpoint));
        }
        if let Some(handler) = self.handler_id() {
            out.push(LogField::string(fields::HANDLER_ID, handler));
        }
        out
    }
}

impl fmt::Debug for RequestContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestContext")
            .field("request_uuid", &self.data.request_uuid)
            .field("endpoint_id", &self.data.endpoint_id)
            .field("handler_id", &self.data.handler_id)
            .field("scope_tags", &self.data.scope_tags)
            .field("deadline", &self.data.deadline)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_values_are_absent() {
        let ctx = RequestContext::new();
        assert_eq!(ctx.request_uuid(), None);
        assert_eq!(ctx.endpoint_id(), None);
        assert_eq!(ctx.routing_delegate(), None);
        assert_eq!(ctx.shard_key(), None);
        assert!(ctx.endpoint_request_headers().is_none());
        assert!(ctx.timeout_and_retry_options().is_none());
        assert!(ctx.scope_tags().is_empty());
        assert!(ctx.params().is_empty());
        assert!(!ctx.to_capture());
    }

    #[test]
    fn test_request_uuid_is_write_once() {
        let ctx = RequestContext::new().with_request_uuid("first");
        let again = ctx.with_request_uuid("second");
        assert_eq!(again.request_uuid(), Some("first"));
    }

    #[test]
    fn test_endpoint_id_is_write_once() {
        let ctx = RequestContext::new()
            .with_endpoint_id("bar")
            .with_endpoint_id("baz")
            .with_handler_id("foo");
        assert_eq!(ctx.endpoint_id(), Some("bar"));
        assert_eq!(ctx.handler_id(), Some("foo"));
    }

    #[test]
    fn test_scope_tags_merge_without_touching_parent() {
        let parent = RequestContext::new().with_scope_tags([("a", "1"), ("b", "2")]);
        let child = parent.with_scope_tags([("b", "3"), ("c", "4")]);

        assert_eq!(parent.scope_tags().get("b").map(String::as_str), Some("2"));
        assert_eq!(parent.scope_tags().len(), 2);
        assert_eq!(child.scope_tags().get("b").map(String::as_str), Some("3"));
        assert_eq!(child.scope_tags().len(), 3);
    }

    #[test]
    fn test_default_scope_attached_once_and_retagged() {
        let root = Scope::new().tagged([("service", "gw")]);
        let ctx = RequestContext::new()
            .with_scope_tags([("protocol", "HTTP")])
            .with_scope_tags_default([("endpoint", "bar")], &root);

        let scope = ctx.scope().unwrap();
        assert_eq!(scope.tag("service"), Some("gw"));
        assert_eq!(scope.tag("protocol"), Some("HTTP"));
        assert_eq!(scope.tag("endpoint"), Some("bar"));

        let other = Scope::new().tagged([("service", "other")]);
        let ctx = ctx.with_scope_tags_default([("handler", "foo")], &other);
        let scope = ctx.scope().unwrap();
        assert_eq!(scope.tag("service"), Some("gw"));
        assert_eq!(scope.tag("handler"), Some("foo"));

        let ctx = ctx.with_scope_tags([("endpoint", "baz")]);
        assert_eq!(ctx.scope().unwrap().tag("endpoint"), Some("baz"));
    }

    #[test]
    fn test_log_fields_shared_and_snapshotted() {
        let root = RequestContext::new();
        let derived = root.with_request_uuid("u");

        root.append_log_fields(vec![LogField::string("a", "1")]);
        let snapshot = derived.log_fields();
        derived.append_log_fields(vec![LogField::string("b", "2")]);

        assert_eq!(snapshot.len(), 1);
        assert_eq!(root.log_fields().len(), 2);
    }

    #[test]
    fn test_concurrent_appends() {
        let ctx = RequestContext::new();
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let ctx = ctx.clone();
                std::thread::spawn(move || {
                    for j in 0..50 {
                        ctx.append_log_fields(vec![LogField::int(format!("k{i}"), j)]);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(ctx.log_fields().len(), 400);
    }

    #[test]
    fn test_defer_log_counts_and_raises_level() {
        let ctx = RequestContext::new();
        assert_eq!(ctx.deferred_level(), None);

        ctx.defer_log(LogLevel::Info, "first", vec![LogField::string("x", "1")]);
        ctx.defer_log(LogLevel::Warn, "second", vec![]);
        ctx.defer_log(LogLevel::Debug, "third", vec![]);

        assert_eq!(ctx.deferred_count(), 3);
        assert_eq!(ctx.deferred_level(), Some(LogLevel::Warn));

        let keys: Vec<_> = ctx.log_fields().iter().map(|f| f.key().to_string()).collect();
        assert_eq!(keys, vec!["msg1", "x", "msg2", "msg3"]);
    }

    #[tokio::test]
    async fn test_deadline_keeps_earliest() {
        let ctx = RequestContext::new().with_timeout(Duration::from_millis(50));
        let first = ctx.deadline().unwrap();
        let later = ctx.with_timeout(Duration::from_secs(60));
        assert_eq!(later.deadline(), Some(first));
        assert!(!later.is_expired());

        let expired = RequestContext::new().with_deadline(Instant::now() - Duration::from_millis(1));
        assert!(expired.is_expired());
        assert_eq!(expired.remaining(), Some(Duration::ZERO));
    }

    #[test]
    fn test_capture_container_shared() {
        let ctx = RequestContext::new().with_capture();
        let derived = ctx.with_handler_id("foo");
        assert!(derived.to_capture());
        assert!(Arc::ptr_eq(
            ctx.event_container().unwrap(),
            derived.event_container().unwrap()
        ));
    }

    #[test]
    fn test_identity_fields() {
        let ctx = RequestContext::new()
            .with_request_uuid("u-1")
            .with_endpoint_id("bar")
            .with_handler_id("foo");
        let keys: Vec<_> = ctx.identity_fields().iter().map(|f| f.key().to_string()).collect();
        assert_eq!(keys, vec!["requestUUID", "endpointID", "endpointHandler"]);
    }
}
