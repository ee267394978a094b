//! Buffered inbound HTTP response.
//!
//! Handlers and pipeline members write into a [`ServerHttpResponse`]; the
//! buffer is only turned into a wire response by [`ServerHttpResponse::flush`],
//! which also writes the request's finish record. Response middlewares can
//! inspect and replace what is pending in between.
//!
//! The handle is cheap to clone. All clones share one buffer, so the
//! request, the pipeline and the server each hold their own handle.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use http::header::{CONTENT_LENGTH, CONTENT_TYPE};
use http::{HeaderMap, HeaderValue, StatusCode};
use http_body_util::Full;
use parking_lot::Mutex;
use portico_telemetry::metrics::names;
use portico_telemetry::tracing::{end_span, trace_log_fields};
use portico_telemetry::fields;
use serde::Serialize;
use tokio::time::Instant;

use crate::context::{scope_tags, RequestContext};
use crate::endpoint::EndpointInfo;
use crate::events::{CaptureEvent, HttpCapture};
use crate::json::{self, JsonType, PeekError};
use crate::log::{LogField, LogLevel};

/// Message of the finish log line.
pub const FINISH_MESSAGE: &str = "Finished an incoming server HTTP request";

const APPLICATION_JSON: &str = "application/json";

/// Request facts captured at start, used by the finish record.
#[derive(Debug, Clone)]
pub(crate) struct RequestFacts {
    pub(crate) method: String,
    pub(crate) url: String,
    pub(crate) headers: HeaderMap,
    pub(crate) started_at: Instant,
    pub(crate) started_wall: DateTime<Utc>,
}

#[derive(Debug)]
struct ResponseState {
    status: StatusCode,
    headers: HeaderMap,
    pending_body: Option<Bytes>,
    pending_object: Option<serde_json::Value>,
    downstream_finish_time: Option<Duration>,
    request: Option<RequestFacts>,
    request_body: Option<Bytes>,
    finished: bool,
}

/// Shared handle to the response buffer of one inbound HTTP request.
#[derive(Clone)]
pub struct ServerHttpResponse {
    state: Arc<Mutex<ResponseState>>,
    endpoint: Arc<EndpointInfo>,
    ctx: RequestContext,
}

impl ServerHttpResponse {
    /// Creates an empty 200 response for `endpoint`.
    #[must_use]
    pub fn new(endpoint: Arc<EndpointInfo>, ctx: RequestContext) -> Self {
        Self {
            state: Arc::new(Mutex::new(ResponseState {
                status: StatusCode::OK,
                headers: HeaderMap::new(),
                pending_body: None,
                pending_object: None,
                downstream_finish_time: None,
                request: None,
                request_body: None,
                finished: false,
            })),
            endpoint,
            ctx,
        }
    }

    pub(crate) fn start(&self, facts: RequestFacts) {
        self.state.lock().request = Some(facts);
    }

    pub(crate) fn record_request_body(&self, body: Bytes) {
        self.state.lock().request_body = Some(body);
    }

    /// Returns the endpoint this response belongs to.
    #[must_use]
    pub fn endpoint(&self) -> &EndpointInfo {
        &self.endpoint
    }

    /// Returns the buffered status code.
    #[must_use]
    pub fn status(&self) -> StatusCode {
        self.state.lock().status
    }

    /// Returns a copy of the buffered headers.
    #[must_use]
    pub fn headers(&self) -> HeaderMap {
        self.state.lock().headers.clone()
    }

    /// Runs `f` against the buffered headers.
    pub fn update_headers<R>(&self, f: impl FnOnce(&mut HeaderMap) -> R) -> R {
        f(&mut self.state.lock().headers)
    }

    /// Sets the status code without touching the body.
    pub fn write_header(&self, status: StatusCode) {
        self.state.lock().status = status;
    }

    /// Serializes `body` and buffers it with `status` and `headers`.
    ///
    /// A body that serializes to `null`, or fails to serialize, is
    /// replaced by a 500 `{"error":"Could not serialize json response"}`.
    pub fn write_json<T: Serialize + ?Sized>(
        &self,
        status: StatusCode,
        headers: Option<HeaderMap>,
        body: &T,
    ) {
        let encoded = serde_json::to_value(body).and_then(|value| {
            let bytes = serde_json::to_vec(body)?;
            Ok((value, bytes))
        });
        match encoded {
            Ok((serde_json::Value::Null, _)) => {
                self.endpoint.logger.error_z(
                    &self.ctx,
                    "Could not serialize nil pointer body",
                    vec![],
                );
                self.send_error_string(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Could not serialize json response",
                );
            }
            Ok((value, bytes)) => {
                self.buffer(status, headers, Bytes::from(bytes), Some(value));
            }
            Err(err) => {
                self.endpoint.logger.error_z(
                    &self.ctx,
                    "Could not serialize json response",
                    vec![LogField::error(&err)],
                );
                self.send_error_string(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Could not serialize json response",
                );
            }
        }
    }

    /// Buffers pre-serialized JSON.
    pub fn write_json_bytes(
        &self,
        status: StatusCode,
        headers: Option<HeaderMap>,
        bytes: impl Into<Bytes>,
    ) {
        self.buffer(status, headers, bytes.into(), None);
    }

    /// Buffers arbitrary bytes. The content type still defaults to JSON.
    pub fn send_response(&self, status: StatusCode, headers: Option<HeaderMap>, bytes: impl Into<Bytes>) {
        self.buffer(status, headers, bytes.into(), None);
    }

    /// Buffers `{"error":"<msg>"}` with `status`.
    pub fn send_error_string(&self, status: StatusCode, msg: &str) {
        let body = serde_json::json!({ "error": msg });
        self.buffer(status, None, Bytes::from(body.to_string()), Some(body));
    }

    /// Buffers an error body carrying `err`'s message.
    pub fn send_error(&self, status: StatusCode, err: &dyn std::error::Error) {
        self.send_error_string(status, &err.to_string());
    }

    /// Buffers a plain-text body, replacing any pending JSON.
    pub fn send_plain(&self, status: StatusCode, text: &str) {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("text/plain; charset=utf-8"));
        self.buffer(status, Some(headers), Bytes::copy_from_slice(text.as_bytes()), None);
    }

    fn buffer(
        &self,
        status: StatusCode,
        headers: Option<HeaderMap>,
        body: Bytes,
        object: Option<serde_json::Value>,
    ) {
        let mut state = self.state.lock();
        state.status = status;
        if let Some(headers) = headers {
            for name in headers.keys() {
                state.headers.remove(name);
                for value in headers.get_all(name) {
                    state.headers.append(name.clone(), value.clone());
                }
            }
        }
        state.pending_body = Some(body);
        state.pending_object = object;
    }

    /// Returns the pending body and status.
    #[must_use]
    pub fn pending_response(&self) -> (Option<Bytes>, StatusCode) {
        let state = self.state.lock();
        (state.pending_body.clone(), state.status)
    }

    /// Returns the pending object as written by [`write_json`](Self::write_json).
    #[must_use]
    pub fn pending_object(&self) -> Option<serde_json::Value> {
        self.state.lock().pending_object.clone()
    }

    /// Looks up a key path in the pending body.
    pub fn peek_body(&self, path: &[&str]) -> Result<(Bytes, JsonType), PeekError> {
        let body = self.state.lock().pending_body.clone().ok_or(PeekError::NoBody)?;
        json::peek(&body, path)
    }

    /// Records when the last downstream call of the request finished,
    /// relative to the request start.
    pub fn set_downstream_finish_time(&self, elapsed: Duration) {
        self.state.lock().downstream_finish_time = Some(elapsed);
    }

    /// Returns the downstream finish marker.
    #[must_use]
    pub fn downstream_finish_time(&self) -> Option<Duration> {
        self.state.lock().downstream_finish_time
    }

    /// Builds the wire response and writes the finish record.
    ///
    /// Status 204 and 304 always go out with an empty body. The content
    /// type defaults to `application/json`. A second flush still returns
    /// the response but records nothing.
    pub fn flush(&self, ctx: &RequestContext) -> http::Response<Full<Bytes>> {
        let (status, mut headers, body, facts, request_body, finished) = {
            let mut state = self.state.lock();
            let finished = state.finished;
            state.finished = true;
            (
                state.status,
                state.headers.clone(),
                state.pending_body.clone().unwrap_or_default(),
                state.request.clone(),
                state.request_body.clone(),
                finished,
            )
        };

        let body = if matches!(status, StatusCode::NO_CONTENT | StatusCode::NOT_MODIFIED) {
            Bytes::new()
        } else {
            body
        };
        if !headers.contains_key(CONTENT_TYPE) {
            headers.insert(CONTENT_TYPE, HeaderValue::from_static(APPLICATION_JSON));
        }
        headers.insert(CONTENT_LENGTH, HeaderValue::from(body.len()));

        if status.canonical_reason().is_none() {
            self.endpoint.logger.warn(
                ctx,
                "Unknown status code",
                vec![LogField::int("UnknownStatusCode", i64::from(status.as_u16()))],
            );
        }

        match (facts, finished) {
            (None, _) => {
                self.endpoint.logger.error(ctx, "Forgot to start incoming request", vec![]);
            }
            (Some(_), true) => {
                self.endpoint.logger.error(ctx, "Finished an incoming request twice", vec![]);
            }
            (Some(facts), false) => {
                self.finish(ctx, &facts, status, &headers, &body, request_body);
            }
        }

        let mut response = http::Response::new(Full::new(body));
        *response.status_mut() = status;
        *response.headers_mut() = headers;
        response
    }

    fn finish(
        &self,
        ctx: &RequestContext,
        facts: &RequestFacts,
        status: StatusCode,
        headers: &HeaderMap,
        body: &Bytes,
        request_body: Option<Bytes>,
    ) {
        let elapsed = facts.started_at.elapsed();
        let scope = ctx
            .scope()
            .cloned()
            .unwrap_or_else(|| self.endpoint.scope.tagged(ctx.scope_tags().clone()));

        scope.timer(names::ENDPOINT_LATENCY).record(elapsed);
        scope.histogram(names::ENDPOINT_LATENCY_HIST).record(elapsed.as_secs_f64());
        scope.counter(names::ENDPOINT_REQUEST).increment(1);
        scope
            .tagged([(scope_tags::STATUS, status.as_str())])
            .counter(names::ENDPOINT_STATUS)
            .increment(1);

        let mut log_fields = vec![
            LogField::string("method", facts.method.as_str()),
            LogField::string("url", facts.url.as_str()),
            LogField::time("timestamp-started", facts.started_wall),
            LogField::time("timestamp-finished", Utc::now()),
            LogField::int(fields::STATUS_CODE, i64::from(status.as_u16())),
        ];
        log_fields.extend(header_fields(fields::REQUEST_HEADER_PREFIX, &facts.headers));
        log_fields.extend(header_fields(fields::RESPONSE_HEADER_PREFIX, headers));
        log_fields.extend(
            trace_log_fields(ctx.otel_context())
                .into_iter()
                .map(|(k, v)| LogField::string(k, v)),
        );

        let level = if status.as_u16() >= 400 {
            LogLevel::Warn
        } else {
            LogLevel::Debug
        };
        let level = self.endpoint.logger.finish_level(ctx, level);
        self.endpoint.logger.log(level, ctx, FINISH_MESSAGE, log_fields);

        end_span(ctx.otel_context());

        if let Some(container) = ctx.event_container() {
            container.push(CaptureEvent::HttpIncoming {
                endpoint_name: Some(self.endpoint.endpoint_id.clone()),
                handler_name: Some(self.endpoint.handler_id.clone()),
                capture: HttpCapture {
                    req_url: facts.url.clone(),
                    req_method: facts.method.clone(),
                    req_headers: HttpCapture::headers_of(&facts.headers),
                    req_body: request_body.unwrap_or_default(),
                    rsp_status_code: status.as_u16(),
                    rsp_headers: HttpCapture::headers_of(headers),
                    rsp_body: body.clone(),
                },
            });
            (self.endpoint.capture.handler)(container.drain());
        }
    }
}

/// Renders `prefix-name` fields for every header, first value only.
#[must_use]
pub fn header_fields(prefix: &str, headers: &HeaderMap) -> Vec<LogField> {
    headers
        .keys()
        .filter_map(|name| {
            headers.get(name).map(|value| {
                LogField::string(
                    format!("{prefix}-{}", name.as_str()),
                    String::from_utf8_lossy(value.as_bytes()),
                )
            })
        })
        .collect()
}

impl fmt::Debug for ServerHttpResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("ServerHttpResponse")
            .field("status", &state.status)
            .field("finished", &state.finished)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{endpoint_with_sink, MemoryLogSink};
    use http_body_util::BodyExt;

    fn started(sink: &Arc<MemoryLogSink>) -> (ServerHttpResponse, RequestContext) {
        let endpoint = Arc::new(endpoint_with_sink("bar", "foo", sink));
        let ctx = RequestContext::new();
        let res = ServerHttpResponse::new(endpoint, ctx.clone());
        res.start(RequestFacts {
            method: "GET".into(),
            url: "/bar/foo".into(),
            headers: HeaderMap::new(),
            started_at: Instant::now(),
            started_wall: Utc::now(),
        });
        (res, ctx)
    }

    async fn body_of(response: http::Response<Full<Bytes>>) -> Bytes {
        response.into_body().collect().await.unwrap().to_bytes()
    }

    #[tokio::test]
    async fn test_write_json_then_flush() {
        let sink = MemoryLogSink::new();
        let (res, ctx) = started(&sink);

        res.write_json(StatusCode::OK, None, &serde_json::json!({"a": 1}));
        assert_eq!(res.pending_object(), Some(serde_json::json!({"a": 1})));

        let response = res.flush(&ctx);
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[CONTENT_TYPE], APPLICATION_JSON);
        assert_eq!(body_of(response).await, Bytes::from_static(br#"{"a":1}"#));

        let finish = sink.find(FINISH_MESSAGE).unwrap();
        assert_eq!(finish.level, LogLevel::Debug);
        assert_eq!(finish.field("statusCode").unwrap(), 200);
    }

    #[tokio::test]
    async fn test_null_body_is_500() {
        let sink = MemoryLogSink::new();
        let (res, ctx) = started(&sink);

        res.write_json(StatusCode::OK, None, &Option::<u8>::None);
        let response = res.flush(&ctx);

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            body_of(response).await,
            Bytes::from_static(br#"{"error":"Could not serialize json response"}"#)
        );
        assert_eq!(sink.find(FINISH_MESSAGE).unwrap().level, LogLevel::Warn);
    }

    #[tokio::test]
    async fn test_no_content_statuses_drop_body() {
        for status in [StatusCode::NO_CONTENT, StatusCode::NOT_MODIFIED] {
            let sink = MemoryLogSink::new();
            let (res, ctx) = started(&sink);
            res.write_json(status, None, &serde_json::json!({"ignored": true}));
            let response = res.flush(&ctx);
            assert_eq!(response.headers()[CONTENT_LENGTH], "0");
            assert!(body_of(response).await.is_empty());
        }
    }

    #[tokio::test]
    async fn test_unknown_status_warns_once_and_is_sent() {
        let sink = MemoryLogSink::new();
        let (res, ctx) = started(&sink);
        let odd = StatusCode::from_u16(599).unwrap();

        res.write_json_bytes(odd, None, Bytes::from_static(b"{}"));
        let response = res.flush(&ctx);

        assert_eq!(response.status().as_u16(), 599);
        assert_eq!(sink.count_message("Unknown status code"), 1);
    }

    #[test]
    fn test_explicit_content_type_kept() {
        let sink = MemoryLogSink::new();
        let (res, ctx) = started(&sink);
        res.send_plain(StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error\n");
        let response = res.flush(&ctx);
        assert_eq!(response.headers()[CONTENT_TYPE], "text/plain; charset=utf-8");
    }

    #[test]
    fn test_flush_twice_records_once() {
        let sink = MemoryLogSink::new();
        let (res, ctx) = started(&sink);

        res.flush(&ctx);
        res.flush(&ctx);

        assert_eq!(sink.count_message(FINISH_MESSAGE), 1);
        assert_eq!(sink.count_message("Finished an incoming request twice"), 1);
    }

    #[test]
    fn test_flush_without_start() {
        let sink = MemoryLogSink::new();
        let endpoint = Arc::new(endpoint_with_sink("bar", "foo", &sink));
        let ctx = RequestContext::new();
        let res = ServerHttpResponse::new(endpoint, ctx.clone());

        res.flush(&ctx);

        assert_eq!(sink.count_message("Forgot to start incoming request"), 1);
        assert_eq!(sink.count_message(FINISH_MESSAGE), 0);
    }

    #[test]
    fn test_peek_pending_body() {
        let sink = MemoryLogSink::new();
        let (res, _) = started(&sink);
        assert!(matches!(res.peek_body(&["a"]), Err(PeekError::NoBody)));

        res.write_json(StatusCode::OK, None, &serde_json::json!({"a": {"b": "c"}}));
        let (raw, kind) = res.peek_body(&["a", "b"]).unwrap();
        assert_eq!(&raw[..], b"c");
        assert_eq!(kind, JsonType::String);
    }

    #[test]
    fn test_headers_merged_and_downstream_marker() {
        let sink = MemoryLogSink::new();
        let (res, _) = started(&sink);
        let mut headers = HeaderMap::new();
        headers.insert("x-a", HeaderValue::from_static("1"));
        res.write_json_bytes(StatusCode::CREATED, Some(headers), Bytes::from_static(b"{}"));
        res.update_headers(|h| h.insert("x-b", HeaderValue::from_static("2")));

        let headers = res.headers();
        assert_eq!(headers["x-a"], "1");
        assert_eq!(headers["x-b"], "2");
        assert_eq!(res.status(), StatusCode::CREATED);

        assert_eq!(res.downstream_finish_time(), None);
        res.set_downstream_finish_time(Duration::from_millis(5));
        assert_eq!(res.downstream_finish_time(), Some(Duration::from_millis(5)));
    }

    #[test]
    fn test_multi_valued_headers_survive_buffer_and_flush() {
        let sink = MemoryLogSink::new();
        let (res, ctx) = started(&sink);
        res.update_headers(|h| h.insert("set-cookie", HeaderValue::from_static("stale=1")));

        let mut headers = HeaderMap::new();
        headers.append("set-cookie", HeaderValue::from_static("a=1"));
        headers.append("set-cookie", HeaderValue::from_static("b=2"));
        res.write_json_bytes(StatusCode::OK, Some(headers), Bytes::from_static(b"{}"));

        let cookies: Vec<_> = res.headers().get_all("set-cookie").iter().cloned().collect();
        assert_eq!(cookies, vec!["a=1", "b=2"]);

        let response = res.flush(&ctx);
        let cookies: Vec<_> = response.headers().get_all("set-cookie").iter().cloned().collect();
        assert_eq!(cookies, vec!["a=1", "b=2"]);
    }

    #[test]
    fn test_header_fields() {
        let mut headers = HeaderMap::new();
        headers.insert("x-token", HeaderValue::from_static("t"));
        let fields = header_fields("Request-Header", &headers);
        assert_eq!(fields[0].key(), "Request-Header-x-token");
        assert_eq!(fields[0].value(), "t");
    }
}
