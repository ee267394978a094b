//! Inbound HTTP request.
//!
//! [`ServerHttpRequest`] wraps the transport request for one endpoint. On
//! construction it decorates the context (request UUID, endpoint and
//! handler ids, scope tags, endpoint request headers, trace span) and
//! starts the clock of the finish record.
//!
//! Framework-originated failures are written straight to the paired
//! response and reported to the caller as [`Rejected`]:
//!
//! | Failure | Status | Body |
//! |---------|--------|------|
//! | malformed query string or value | 400 | `{"error":"Could not parse query string"}` |
//! | missing mandatory header | 400 | `{"error":"Missing mandatory header: <name>"}` |
//! | body read error | 500 | `{"error":"Could not ReadAll() body"}` |
//! | body is not the expected JSON | 400 | `{"error":"Could not parse json: <reason>"}` |
//!
//! Only the first failure of a request writes a response; the flag is
//! sticky, so later getters return [`Rejected`] without logging again.
//!
//! # Example
//!
//! ```rust,ignore
//! async fn handle(ctx: RequestContext, req: &mut ServerHttpRequest, res: &ServerHttpResponse) -> RequestContext {
//!     let Ok(limit) = req.get_query_int32("limit") else { return ctx };
//!     let body: CreateUser = match req.read_and_unmarshal_body().await {
//!         Ok(body) => body,
//!         Err(_) => return ctx,
//!     };
//!     res.write_json(StatusCode::CREATED, None, &create(body, limit.unwrap_or(10)));
//!     ctx
//! }
//! ```

use std::collections::HashMap;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use chrono::Utc;
use http::header::CONTENT_LENGTH;
use http::{HeaderMap, HeaderValue, Method, StatusCode, Uri};
use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, Empty, Full};
use portico_router::Params;
use portico_telemetry::fields;
use portico_telemetry::tracing::{start_server_span, trace_log_fields, HeaderExtractor};
use serde::de::DeserializeOwned;
use thiserror::Error;
use tokio::time::Instant;

use crate::context::{scope_tags, RequestContext};
use crate::endpoint::EndpointInfo;
use crate::error::BoxError;
use crate::headers::HttpHeaders;
use crate::http_response::{RequestFacts, ServerHttpResponse};
use crate::json::{self, JsonType, PeekError};
use crate::log::LogField;
use crate::query::{parse_query, QueryValue, QueryValues};

/// Body type of inbound requests.
pub type RequestBody = BoxBody<Bytes, BoxError>;

/// Boxes a complete body.
#[must_use]
pub fn full_body(bytes: impl Into<Bytes>) -> RequestBody {
    Full::new(bytes.into())
        .map_err(|never: Infallible| -> BoxError { match never {} })
        .boxed()
}

/// Boxes an empty body.
#[must_use]
pub fn empty_body() -> RequestBody {
    Empty::<Bytes>::new()
        .map_err(|never: Infallible| -> BoxError { match never {} })
        .boxed()
}

/// The request was refused and an error response is already buffered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("request rejected; an error response has been written")]
pub struct Rejected;

/// Returns the request UUID carried in `headers[key]`, or a fresh one.
#[must_use]
pub fn request_uuid_from(headers: &HeaderMap, key: &str) -> String {
    headers
        .get(key)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map_or_else(|| uuid::Uuid::now_v7().to_string(), str::to_string)
}

/// Inbound HTTP request bound to one endpoint.
pub struct ServerHttpRequest {
    method: Method,
    uri: Uri,
    headers: HttpHeaders,
    params: Params,
    remote_addr: Option<SocketAddr>,
    body: Option<RequestBody>,
    raw_body: Option<Bytes>,
    query: Option<QueryValues>,
    parse_failed: bool,
    start_time: Instant,
    ctx: RequestContext,
    endpoint: Arc<EndpointInfo>,
    res: ServerHttpResponse,
}

impl ServerHttpRequest {
    /// Wraps a transport request and starts it.
    #[must_use]
    pub fn new(
        parts: http::request::Parts,
        body: RequestBody,
        params: Params,
        ctx: RequestContext,
        endpoint: Arc<EndpointInfo>,
    ) -> Self {
        let headers = parts.headers;
        let keys = &endpoint.header_keys;

        let mut ctx = ctx;
        if ctx.request_uuid().is_none() {
            let uuid = request_uuid_from(&headers, &keys.request_uuid);
            ctx = ctx.with_request_uuid(uuid.clone());
            ctx.append_log_fields(vec![LogField::string(fields::REQUEST_UUID, uuid)]);
        }

        let api_environment = headers
            .get(keys.api_environment.as_str())
            .and_then(|v| v.to_str().ok())
            .unwrap_or(scope_tags::DEFAULT_API_ENVIRONMENT)
            .to_string();
        let mut tags = vec![
            (scope_tags::ENDPOINT, endpoint.endpoint_id.clone()),
            (scope_tags::HANDLER, endpoint.handler_id.clone()),
            (scope_tags::PROTOCOL, scope_tags::PROTOCOL_HTTP.to_string()),
            (scope_tags::API_ENVIRONMENT, api_environment),
        ];
        if keys.shadow_enabled && headers.contains_key(keys.shadow_request.as_str()) {
            tags.push((scope_tags::ENVIRONMENT, scope_tags::SHADOW_ENVIRONMENT.to_string()));
        }

        let first_values: HashMap<String, String> = headers
            .keys()
            .filter_map(|name| {
                let value = headers.get(name)?.to_str().ok()?;
                Some((name.as_str().to_string(), value.to_string()))
            })
            .collect();

        let span = start_server_span(endpoint.qualified_name(), &HeaderExtractor(&headers));

        ctx = ctx
            .with_endpoint_id(endpoint.endpoint_id.clone())
            .with_handler_id(endpoint.handler_id.clone())
            .with_scope_tags_default(tags, &endpoint.scope)
            .with_endpoint_request_headers(first_values)
            .with_params(params.clone())
            .with_otel_context(span);
        ctx.append_log_fields(vec![
            LogField::string(fields::ENDPOINT_ID, endpoint.endpoint_id.as_str()),
            LogField::string(fields::HANDLER_ID, endpoint.handler_id.as_str()),
        ]);
        ctx.append_log_fields(
            trace_log_fields(ctx.otel_context())
                .into_iter()
                .map(|(k, v)| LogField::string(k, v)),
        );
        if endpoint
            .capture
            .should_capture(&endpoint.endpoint_id, &endpoint.handler_id)
        {
            ctx = ctx.with_capture();
        }

        let start_time = Instant::now();
        let res = ServerHttpResponse::new(Arc::clone(&endpoint), ctx.clone());
        res.start(RequestFacts {
            method: parts.method.to_string(),
            url: parts.uri.to_string(),
            headers: headers.clone(),
            started_at: start_time,
            started_wall: Utc::now(),
        });

        let remote_addr = parts.extensions.get::<SocketAddr>().copied();

        Self {
            method: parts.method,
            uri: parts.uri,
            headers: HttpHeaders::from(headers),
            params,
            remote_addr,
            body: Some(body),
            raw_body: None,
            query: None,
            parse_failed: false,
            start_time,
            ctx,
            endpoint,
            res,
        }
    }

    /// Returns the method.
    #[must_use]
    pub fn method(&self) -> &Method {
        &self.method
    }

    /// Returns the URI.
    #[must_use]
    pub fn uri(&self) -> &Uri {
        &self.uri
    }

    /// Returns the path.
    #[must_use]
    pub fn path(&self) -> &str {
        self.uri.path()
    }

    /// Returns the headers.
    #[must_use]
    pub fn headers(&self) -> &HttpHeaders {
        &self.headers
    }

    /// Returns the headers mutably.
    pub fn headers_mut(&mut self) -> &mut HttpHeaders {
        &mut self.headers
    }

    /// Returns the path parameters.
    #[must_use]
    pub fn params(&self) -> &Params {
        &self.params
    }

    /// Returns the peer address when the transport recorded it.
    #[must_use]
    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.remote_addr
    }

    /// Returns the context built at construction.
    #[must_use]
    pub fn context(&self) -> &RequestContext {
        &self.ctx
    }

    /// Returns the endpoint.
    #[must_use]
    pub fn endpoint(&self) -> &EndpointInfo {
        &self.endpoint
    }

    /// Returns a handle to the paired response.
    #[must_use]
    pub fn response(&self) -> ServerHttpResponse {
        self.res.clone()
    }

    /// Returns when the request started.
    #[must_use]
    pub fn start_time(&self) -> Instant {
        self.start_time
    }

    /// Returns true once a framework failure has been written.
    #[must_use]
    pub fn parse_failed(&self) -> bool {
        self.parse_failed
    }

    fn reject(&mut self, status: StatusCode, msg: &str) -> Rejected {
        if !self.parse_failed {
            self.res.send_error_string(status, msg);
            self.parse_failed = true;
        }
        Rejected
    }

    /// Checks that every header in `required` is present and non-empty.
    pub fn check_headers(&mut self, required: &[&str]) -> bool {
        for name in required {
            let present = self
                .headers
                .as_map()
                .get(*name)
                .is_some_and(|v| !v.is_empty());
            if !present {
                self.endpoint.logger.warn_z(
                    &self.ctx,
                    "Got request without mandatory header",
                    vec![LogField::string("headerName", *name)],
                );
                self.reject(
                    StatusCode::BAD_REQUEST,
                    &format!("Missing mandatory header: {name}"),
                );
                return false;
            }
        }
        true
    }

    fn query_values(&mut self) -> Result<&QueryValues, Rejected> {
        if self.parse_failed {
            return Err(Rejected);
        }
        if self.query.is_none() {
            match parse_query(self.uri.query().unwrap_or_default()) {
                Ok(values) => self.query = Some(values),
                Err(err) => {
                    self.endpoint.logger.warn_z(
                        &self.ctx,
                        "Got request with invalid query string",
                        vec![LogField::error(&err)],
                    );
                    return Err(self.reject(StatusCode::BAD_REQUEST, "Could not parse query string"));
                }
            }
        }
        self.query.as_ref().ok_or(Rejected)
    }

    fn convert<T: QueryValue>(&mut self, key: &str, raw: &str) -> Result<T, Rejected> {
        T::parse_value(raw).map_err(|reason| {
            self.endpoint.logger.warn_z(
                &self.ctx,
                "Got request with invalid query string types",
                vec![
                    LogField::string("expected", T::EXPECTED),
                    LogField::string("actual", raw),
                    LogField::string("key", key),
                    LogField::string(fields::ERROR, reason),
                ],
            );
            self.reject(StatusCode::BAD_REQUEST, "Could not parse query string")
        })
    }

    /// Returns the first value of `key` converted to `T`.
    ///
    /// A missing key is `Ok(None)`.
    pub fn get_query<T: QueryValue>(&mut self, key: &str) -> Result<Option<T>, Rejected> {
        let raw = self
            .query_values()?
            .get(key)
            .and_then(|values| values.first())
            .cloned();
        match raw {
            Some(raw) => self.convert(key, &raw).map(Some),
            None => Ok(None),
        }
    }

    /// Returns every value of `key` converted to `T`, in order, duplicates
    /// included. A missing key is an empty list.
    pub fn get_query_list<T: QueryValue>(&mut self, key: &str) -> Result<Vec<T>, Rejected> {
        let raws = self.query_values()?.get(key).cloned().unwrap_or_default();
        raws.iter().map(|raw| self.convert(key, raw)).collect()
    }

    /// Returns the distinct values of `key` converted to `T`.
    pub fn get_query_set<T: QueryValue>(&mut self, key: &str) -> Result<Vec<T>, Rejected> {
        let mut raws = self.query_values()?.get(key).cloned().unwrap_or_default();
        raws.sort_unstable();
        raws.dedup();
        raws.iter().map(|raw| self.convert(key, raw)).collect()
    }

    /// Returns the first value of `key`.
    pub fn get_query_value(&mut self, key: &str) -> Result<Option<String>, Rejected> {
        self.get_query(key)
    }

    /// Returns every value of `key`.
    pub fn get_query_values(&mut self, key: &str) -> Result<Vec<String>, Rejected> {
        self.get_query_list(key)
    }

    /// Returns `key` as a bool (`true` or `false`).
    pub fn get_query_bool(&mut self, key: &str) -> Result<Option<bool>, Rejected> {
        self.get_query(key)
    }

    /// Returns `key` as an i8.
    pub fn get_query_int8(&mut self, key: &str) -> Result<Option<i8>, Rejected> {
        self.get_query(key)
    }

    /// Returns `key` as an i16.
    pub fn get_query_int16(&mut self, key: &str) -> Result<Option<i16>, Rejected> {
        self.get_query(key)
    }

    /// Returns `key` as an i32.
    pub fn get_query_int32(&mut self, key: &str) -> Result<Option<i32>, Rejected> {
        self.get_query(key)
    }

    /// Returns `key` as an i64.
    pub fn get_query_int64(&mut self, key: &str) -> Result<Option<i64>, Rejected> {
        self.get_query(key)
    }

    /// Returns `key` as an f64.
    pub fn get_query_float64(&mut self, key: &str) -> Result<Option<f64>, Rejected> {
        self.get_query(key)
    }

    /// Returns true if any query key starts with `prefix`.
    pub fn has_query_prefix(&mut self, prefix: &str) -> bool {
        self.query_values()
            .is_ok_and(|values| values.keys().any(|k| k.starts_with(prefix)))
    }

    /// Requires `key` in the query; writes a 400 when it is absent.
    pub fn check_query_value(&mut self, key: &str) -> bool {
        let present = match self.query_values() {
            Ok(values) => values.get(key).is_some_and(|v| !v.is_empty()),
            Err(Rejected) => return false,
        };
        if !present {
            self.endpoint.logger.warn_z(
                &self.ctx,
                "Got request with missing query string value",
                vec![LogField::string("expectedKey", key)],
            );
            self.reject(StatusCode::BAD_REQUEST, "Could not parse query string");
        }
        present
    }

    /// Returns true if `key` is in the query.
    pub fn has_query_value(&mut self, key: &str) -> bool {
        self.query_values()
            .is_ok_and(|values| values.get(key).is_some_and(|v| !v.is_empty()))
    }

    /// Reads the whole body. The bytes are cached; later calls return the
    /// same buffer. The read observes the context deadline.
    pub async fn read_all(&mut self) -> Result<Bytes, Rejected> {
        if let Some(raw) = &self.raw_body {
            return Ok(raw.clone());
        }
        let body = self.body.take().unwrap_or_else(empty_body);
        let collected = match self.ctx.deadline() {
            Some(deadline) => match tokio::time::timeout_at(deadline, body.collect()).await {
                Ok(result) => result.map_err(|e| e.to_string()),
                Err(_) => Err("deadline exceeded while reading body".to_string()),
            },
            None => body.collect().await.map_err(|e| e.to_string()),
        };
        match collected {
            Ok(collected) => {
                let raw = collected.to_bytes();
                self.res.record_request_body(raw.clone());
                self.raw_body = Some(raw.clone());
                Ok(raw)
            }
            Err(reason) => {
                self.endpoint.logger.error_z(
                    &self.ctx,
                    "Could not ReadAll() body",
                    vec![LogField::string(fields::ERROR, reason)],
                );
                Err(self.reject(StatusCode::INTERNAL_SERVER_ERROR, "Could not ReadAll() body"))
            }
        }
    }

    /// Reads the body and deserializes it as JSON.
    pub async fn read_and_unmarshal_body<T: DeserializeOwned>(&mut self) -> Result<T, Rejected> {
        let raw = self.read_all().await?;
        self.unmarshal_body(&raw)
    }

    /// Deserializes `raw` as JSON; writes a 400 on failure.
    pub fn unmarshal_body<T: DeserializeOwned>(&mut self, raw: &[u8]) -> Result<T, Rejected> {
        serde_json::from_slice(raw).map_err(|err| {
            self.endpoint.logger.warn_z(
                &self.ctx,
                "Could not parse json",
                vec![LogField::error(&err)],
            );
            self.reject(StatusCode::BAD_REQUEST, &format!("Could not parse json: {err}"))
        })
    }

    /// Looks up a key path in the body read by [`read_all`](Self::read_all).
    pub fn peek_body(&self, path: &[&str]) -> Result<(Bytes, JsonType), PeekError> {
        let raw = self.raw_body.as_ref().ok_or(PeekError::NoBody)?;
        json::peek(raw, path)
    }

    /// Replaces the cached body. A `Content-Length` header, if present,
    /// is updated to the new length.
    pub fn replace_body(&mut self, body: Bytes) {
        if self.headers.as_map().contains_key(CONTENT_LENGTH) {
            self.headers
                .as_map_mut()
                .insert(CONTENT_LENGTH, HeaderValue::from(body.len()));
        }
        self.body = None;
        self.raw_body = Some(body);
    }
}

impl std::fmt::Debug for ServerHttpRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerHttpRequest")
            .field("method", &self.method)
            .field("uri", &self.uri)
            .field("endpoint", &self.endpoint.qualified_name())
            .field("parse_failed", &self.parse_failed)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::endpoint::RequestHeaderKeys;
    use crate::fixtures::{endpoint_with_sink, MemoryLogSink};
    use crate::headers::Header;
    use crate::http_response::FINISH_MESSAGE;
    use crate::log::LogLevel;

    fn request(
        uri: &str,
        headers: &[(&str, &str)],
        body: &'static [u8],
        sink: &Arc<MemoryLogSink>,
    ) -> ServerHttpRequest {
        let mut builder = http::Request::builder().method(Method::POST).uri(uri);
        for (k, v) in headers {
            builder = builder.header(*k, *v);
        }
        let (parts, ()) = builder.body(()).unwrap().into_parts();
        let endpoint = Arc::new(endpoint_with_sink("bar", "foo", sink));
        ServerHttpRequest::new(
            parts,
            full_body(Bytes::from_static(body)),
            Params::new(),
            RequestContext::new(),
            endpoint,
        )
    }

    #[test]
    fn test_construction_decorates_context() {
        let sink = MemoryLogSink::new();
        let req = request("/bar/foo", &[("x-request-uuid", "abc-123")], b"", &sink);
        let ctx = req.context();

        assert_eq!(ctx.request_uuid(), Some("abc-123"));
        assert_eq!(ctx.endpoint_id(), Some("bar"));
        assert_eq!(ctx.handler_id(), Some("foo"));
        assert_eq!(ctx.scope_tags()["protocol"], "HTTP");
        assert_eq!(ctx.scope_tags()["apienvironment"], "production");
        assert_eq!(ctx.scope_tags().get("env"), None);
        assert_eq!(
            ctx.endpoint_request_headers().unwrap()["x-request-uuid"],
            "abc-123"
        );
        let keys: Vec<_> = ctx.log_fields().iter().map(|f| f.key().to_string()).collect();
        assert!(keys.contains(&"requestUUID".to_string()));
        assert!(keys.contains(&"endpointID".to_string()));
    }

    #[test]
    fn test_generated_uuid_and_api_environment() {
        let sink = MemoryLogSink::new();
        let req = request("/", &[("x-api-environment", "sandbox")], b"", &sink);
        assert_eq!(req.context().request_uuid().map(str::len), Some(36));
        assert_eq!(req.context().scope_tags()["apienvironment"], "sandbox");
    }

    #[test]
    fn test_shadow_request_tagged_when_enabled() {
        let sink = MemoryLogSink::new();
        let keys = RequestHeaderKeys {
            shadow_enabled: true,
            ..RequestHeaderKeys::default()
        };
        let endpoint = Arc::new(endpoint_with_sink("bar", "foo", &sink).with_header_keys(keys));
        let (parts, ()) = http::Request::builder()
            .uri("/")
            .header("x-shadow-request", "true")
            .body(())
            .unwrap()
            .into_parts();
        let req = ServerHttpRequest::new(parts, empty_body(), Params::new(), RequestContext::new(), endpoint);
        assert_eq!(req.context().scope_tags()["env"], "shadow");
    }

    #[test]
    fn test_typed_getters() {
        let sink = MemoryLogSink::new();
        let mut req = request(
            "/?b=true&i=-5&f=2.5&s=x&l=1&l=2&l=1&big=300",
            &[],
            b"",
            &sink,
        );
        assert_eq!(req.get_query_bool("b"), Ok(Some(true)));
        assert_eq!(req.get_query_int8("i"), Ok(Some(-5)));
        assert_eq!(req.get_query_int16("big"), Ok(Some(300)));
        assert_eq!(req.get_query_int64("i"), Ok(Some(-5)));
        assert_eq!(req.get_query_float64("f"), Ok(Some(2.5)));
        assert_eq!(req.get_query_value("s"), Ok(Some("x".to_string())));
        assert_eq!(req.get_query_value("missing"), Ok(None));
        assert_eq!(req.get_query_list::<i32>("l"), Ok(vec![1, 2, 1]));
        let mut set = req.get_query_set::<i32>("l").unwrap();
        set.sort_unstable();
        assert_eq!(set, vec![1, 2]);
        assert!(req.get_query_list::<i32>("missing").unwrap().is_empty());
        assert!(req.has_query_prefix("bi"));
        assert!(!req.has_query_prefix("zz"));
        assert!(req.has_query_value("s"));
        assert!(!req.has_query_value("t"));
        assert!(!req.parse_failed());
    }

    #[test]
    fn test_malformed_query_is_sticky() {
        let sink = MemoryLogSink::new();
        let mut req = request("/foo?%gh&%ij", &[], b"", &sink);

        assert_eq!(req.get_query_value("foo"), Err(Rejected));
        assert_eq!(req.get_query_value("foo"), Err(Rejected));
        assert!(!req.has_query_value("foo"));

        assert_eq!(sink.count_message("Got request with invalid query string"), 1);
        let res = req.response();
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            res.pending_response().0.unwrap(),
            Bytes::from_static(br#"{"error":"Could not parse query string"}"#)
        );
    }

    #[test]
    fn test_bad_typed_value_rejects_once() {
        let sink = MemoryLogSink::new();
        let mut req = request("/?n=abc&m=1", &[], b"", &sink);

        assert_eq!(req.get_query_int32("n"), Err(Rejected));
        assert_eq!(req.get_query_int32("m"), Err(Rejected));

        let record = sink.find("Got request with invalid query string types").unwrap();
        assert_eq!(record.field("expected").unwrap(), "int32");
        assert_eq!(record.field("actual").unwrap(), "abc");
        assert_eq!(record.field("key").unwrap(), "n");
        assert_eq!(sink.count_message("Got request with invalid query string types"), 1);
        assert_eq!(req.response().status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_check_query_value() {
        let sink = MemoryLogSink::new();
        let mut req = request("/?a=1", &[], b"", &sink);
        assert!(req.check_query_value("a"));
        assert!(!req.check_query_value("b"));
        assert_eq!(sink.count_message("Got request with missing query string value"), 1);
        assert_eq!(req.response().status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_check_headers() {
        let sink = MemoryLogSink::new();
        let mut req = request("/", &[("x-token", "t")], b"", &sink);
        assert!(req.check_headers(&["x-token"]));
        assert!(!req.check_headers(&["x-token", "x-uuid"]));
        assert_eq!(
            req.response().pending_response().0.unwrap(),
            Bytes::from_static(br#"{"error":"Missing mandatory header: x-uuid"}"#)
        );
    }

    #[tokio::test]
    async fn test_read_all_is_cached() {
        let sink = MemoryLogSink::new();
        let mut req = request("/", &[], br#"{"a":{"b":1}}"#, &sink);

        let first = req.read_all().await.unwrap();
        let second = req.read_all().await.unwrap();
        assert_eq!(first, second);
        assert_eq!(first.as_ptr(), second.as_ptr());

        let (raw, kind) = req.peek_body(&["a", "b"]).unwrap();
        assert_eq!(&raw[..], b"1");
        assert_eq!(kind, JsonType::Number);
    }

    #[tokio::test]
    async fn test_replace_body_updates_content_length() {
        let sink = MemoryLogSink::new();
        let mut req = request("/", &[("content-length", "2")], b"{}", &sink);
        req.replace_body(Bytes::from_static(b"{\"x\":true}"));

        assert_eq!(req.read_all().await.unwrap(), Bytes::from_static(b"{\"x\":true}"));
        assert_eq!(req.headers().get("content-length").as_deref(), Some("10"));
    }

    #[tokio::test]
    async fn test_unmarshal_failure_is_400() {
        #[derive(serde::Deserialize, Debug)]
        #[allow(dead_code)]
        struct Body {
            name: String,
        }
        let sink = MemoryLogSink::new();
        let mut req = request("/", &[], b"{\"name\":", &sink);

        assert!(req.read_and_unmarshal_body::<Body>().await.is_err());
        assert_eq!(req.response().status(), StatusCode::BAD_REQUEST);
        assert_eq!(sink.count_message("Could not parse json"), 1);
        let (body, _) = req.response().pending_response();
        assert!(String::from_utf8(body.unwrap().to_vec())
            .unwrap()
            .starts_with(r#"{"error":"Could not parse json: "#));
    }

    #[tokio::test]
    async fn test_finish_log_after_rejection() {
        let sink = MemoryLogSink::new();
        let mut req = request("/foo?%gh&%ij", &[], b"", &sink);
        let _ = req.get_query_value("foo");
        let _ = req.get_query_value("foo");

        let ctx = req.context().clone();
        let response = req.response().flush(&ctx);

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(sink.count_message(FINISH_MESSAGE), 1);
        let finish = sink.find(FINISH_MESSAGE).unwrap();
        assert_eq!(finish.level, LogLevel::Warn);
        assert!(finish.field("requestUUID").is_some());
    }
}
