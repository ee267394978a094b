//! HTTP dispatch: route lookup, request-UUID wrapper and panic capture.
//!
//! Every request ends in exactly one flushed response and one finish
//! record, including requests that match no route, use the wrong method
//! or panic inside their stack.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use bytes::Bytes;
use futures_util::FutureExt;
use http::header::{ALLOW, CONTENT_TYPE};
use http::{HeaderMap, HeaderValue, Method, StatusCode};
use http_body_util::Full;
use portico_config::GatewayConfig;
use portico_core::{
    header_fields, request_uuid_from, EndpointInfo, LogField, Params, RequestBody, RequestContext,
    ServerHttpRequest,
};
use portico_middleware::{handler_fn, HttpStack};
use portico_router::{Lookup, Router};
use portico_telemetry::logging::fields;
use portico_telemetry::metrics::{names, render_metrics};

use crate::defaults::EndpointDefaults;
use crate::error::{panic_message, ServerResult};
use crate::health::Health;

/// Endpoint id of the route-miss endpoint.
pub const NOT_FOUND_ENDPOINT: &str = "NotFound";
/// Endpoint id of the wrong-method endpoint.
pub const METHOD_NOT_ALLOWED_ENDPOINT: &str = "MethodNotAllowed";

const PANIC_MESSAGE: &str = "A panic occurred while handling a request";

/// A routed endpoint: its descriptor and its handler stack.
#[derive(Debug, Clone)]
pub struct RouterEndpoint {
    info: Arc<EndpointInfo>,
    stack: Arc<HttpStack>,
}

impl RouterEndpoint {
    /// Creates an endpoint.
    #[must_use]
    pub fn new(info: EndpointInfo, stack: HttpStack) -> Self {
        Self {
            info: Arc::new(info),
            stack: Arc::new(stack),
        }
    }

    /// Returns the descriptor.
    #[must_use]
    pub fn info(&self) -> &EndpointInfo {
        &self.info
    }
}

/// Routes inbound HTTP requests to endpoint stacks.
#[derive(Debug)]
pub struct HttpRouter {
    routes: Router<RouterEndpoint>,
    whitelisted_paths: Vec<String>,
    not_found: RouterEndpoint,
    method_not_allowed: RouterEndpoint,
    defaults: EndpointDefaults,
}

impl Default for HttpRouter {
    fn default() -> Self {
        Self::new(EndpointDefaults::default())
    }
}

impl HttpRouter {
    /// Creates a router with the stock 404 and 405 endpoints.
    #[must_use]
    pub fn new(defaults: EndpointDefaults) -> Self {
        let not_found = RouterEndpoint::new(
            defaults.endpoint(NOT_FOUND_ENDPOINT, NOT_FOUND_ENDPOINT, ""),
            plain_stack(StatusCode::NOT_FOUND, "404 page not found\n"),
        );
        let method_not_allowed = RouterEndpoint::new(
            defaults.endpoint(METHOD_NOT_ALLOWED_ENDPOINT, METHOD_NOT_ALLOWED_ENDPOINT, ""),
            plain_stack(StatusCode::METHOD_NOT_ALLOWED, "Method Not Allowed\n"),
        );
        Self {
            routes: Router::new(),
            whitelisted_paths: Vec::new(),
            not_found,
            method_not_allowed,
            defaults,
        }
    }

    /// Creates a router from the gateway configuration and registers the
    /// built-in `/health` and, when metrics are enabled, `/metrics` routes.
    pub fn from_config(config: &GatewayConfig, health: &Health) -> ServerResult<Self> {
        let mut router = Self::new(EndpointDefaults::from_config(config))
            .with_whitelisted_paths(config.router.whitelisted_paths.clone());
        router.register(Method::GET, "/health", "health", "health", health.stack())?;
        if config.metrics.enabled {
            router.register(Method::GET, "/metrics", "metrics", "metrics", metrics_stack())?;
        }
        Ok(router)
    }

    /// Sets the path prefixes where static and param routes may overlap.
    #[must_use]
    pub fn with_whitelisted_paths(mut self, paths: Vec<String>) -> Self {
        self.whitelisted_paths = paths;
        self
    }

    /// Replaces the stack run when no route matches.
    #[must_use]
    pub fn with_not_found(mut self, stack: HttpStack) -> Self {
        let info = self.defaults.endpoint(NOT_FOUND_ENDPOINT, NOT_FOUND_ENDPOINT, "");
        self.not_found = RouterEndpoint::new(info, stack);
        self
    }

    /// Replaces the stack run when the path matches under other methods
    /// only. The `Allow` header is already set when it runs.
    #[must_use]
    pub fn with_method_not_allowed(mut self, stack: HttpStack) -> Self {
        let info = self
            .defaults
            .endpoint(METHOD_NOT_ALLOWED_ENDPOINT, METHOD_NOT_ALLOWED_ENDPOINT, "");
        self.method_not_allowed = RouterEndpoint::new(info, stack);
        self
    }

    /// Returns the shared endpoint collaborators.
    #[must_use]
    pub fn defaults(&self) -> &EndpointDefaults {
        &self.defaults
    }

    /// Registers a prepared endpoint.
    ///
    /// A trailing `/` on the request path resolves to the same route, so
    /// `pattern` and `pattern/` are served by one registration.
    pub fn handle(&mut self, method: Method, pattern: &str, endpoint: RouterEndpoint) -> ServerResult<()> {
        let whitelisted = self
            .whitelisted_paths
            .iter()
            .any(|prefix| pattern.starts_with(prefix.as_str()));
        self.routes.handle(method, pattern, endpoint, whitelisted)?;
        Ok(())
    }

    /// Builds an endpoint from the defaults and registers it.
    pub fn register(
        &mut self,
        method: Method,
        pattern: &str,
        endpoint_id: &str,
        handler_id: &str,
        stack: HttpStack,
    ) -> ServerResult<()> {
        let info = self.defaults.endpoint(endpoint_id, handler_id, method.as_str());
        self.handle(method, pattern, RouterEndpoint::new(info, stack))
    }

    /// Returns the number of registered routes.
    #[must_use]
    pub fn route_count(&self) -> usize {
        self.routes.route_count()
    }

    /// Serves one request.
    pub async fn dispatch(&self, request: http::Request<RequestBody>) -> http::Response<Full<Bytes>> {
        let (parts, body) = request.into_parts();
        let ctx = self.request_uuid_context(&parts.headers);

        let lookup = self.routes.lookup(&parts.method, parts.uri.path());
        match lookup {
            Lookup::Matched(found) => {
                let params = found.params;
                self.serve(found.value, ctx, parts, body, params, None).await
            }
            Lookup::MethodNotAllowed { allow } => {
                self.serve(&self.method_not_allowed, ctx, parts, body, Params::new(), Some(allow))
                    .await
            }
            Lookup::NotFound => {
                self.serve(&self.not_found, ctx, parts, body, Params::new(), None)
                    .await
            }
        }
    }

    /// Reads or generates the request UUID before any endpoint runs.
    fn request_uuid_context(&self, headers: &HeaderMap) -> RequestContext {
        let uuid = request_uuid_from(headers, &self.defaults.header_keys.request_uuid);
        let ctx = RequestContext::new().with_request_uuid(uuid.clone());
        ctx.append_log_fields(vec![LogField::string(fields::REQUEST_UUID, uuid)]);
        ctx
    }

    async fn serve(
        &self,
        endpoint: &RouterEndpoint,
        ctx: RequestContext,
        parts: http::request::Parts,
        body: RequestBody,
        params: Params,
        allow: Option<String>,
    ) -> http::Response<Full<Bytes>> {
        let mut req = ServerHttpRequest::new(parts, body, params, ctx, Arc::clone(&endpoint.info));
        let res = req.response();
        if let Some(value) = allow.and_then(|a| HeaderValue::from_str(&a).ok()) {
            res.update_headers(|headers| {
                headers.insert(ALLOW, value);
            });
        }

        let ctx = req.context().clone();
        let outcome = AssertUnwindSafe(endpoint.stack.handle(ctx.clone(), &mut req, &res))
            .catch_unwind()
            .await;
        let ctx = match outcome {
            Ok(ctx) => ctx,
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                let info = &endpoint.info;
                ctx.scope()
                    .cloned()
                    .unwrap_or_else(|| info.scope.clone())
                    .counter(names::ROUTER_PANIC)
                    .increment(1);
                let mut log_fields = vec![LogField::string("panic", message)];
                log_fields.extend(header_fields(fields::REQUEST_HEADER_PREFIX, req.headers().as_map()));
                info.logger.error(&ctx, PANIC_MESSAGE, log_fields);
                res.send_plain(StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error\n");
                ctx
            }
        };
        res.flush(&ctx)
    }
}

fn plain_stack(status: StatusCode, text: &'static str) -> HttpStack {
    HttpStack::bare(handler_fn(move |ctx, _req, res| {
        Box::pin(async move {
            res.send_plain(status, text);
            ctx
        })
    }))
}

fn metrics_stack() -> HttpStack {
    HttpStack::bare(handler_fn(|ctx, _req, res| {
        Box::pin(async move {
            match render_metrics() {
                Some(text) => {
                    let mut headers = HeaderMap::new();
                    headers.insert(CONTENT_TYPE, HeaderValue::from_static("text/plain; version=0.0.4"));
                    res.send_response(StatusCode::OK, Some(headers), text);
                }
                None => res.send_error_string(
                    StatusCode::SERVICE_UNAVAILABLE,
                    "metrics recorder is not installed",
                ),
            }
            ctx
        })
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;
    use portico_core::fixtures::{logger_for, MemoryLogSink};
    use portico_core::{empty_body, FINISH_MESSAGE};

    fn router(sink: &Arc<MemoryLogSink>) -> HttpRouter {
        let mut router = HttpRouter::new(EndpointDefaults::default().with_logger(logger_for(sink)));
        router
            .register(
                Method::GET,
                "/users/:id",
                "users",
                "get",
                HttpStack::bare(handler_fn(|ctx, req, res| {
                    let id = req.params().get("id").unwrap_or_default().to_string();
                    Box::pin(async move {
                        res.write_json(StatusCode::OK, None, &serde_json::json!({ "id": id }));
                        ctx
                    })
                })),
            )
            .unwrap();
        router
    }

    fn request(method: Method, uri: &str) -> http::Request<RequestBody> {
        http::Request::builder()
            .method(method)
            .uri(uri)
            .body(empty_body())
            .unwrap()
    }

    async fn body_of(res: http::Response<Full<Bytes>>) -> Bytes {
        res.into_body().collect().await.unwrap().to_bytes()
    }

    #[tokio::test]
    async fn test_params_reach_the_handler() {
        let sink = MemoryLogSink::new();
        let res = router(&sink).dispatch(request(Method::GET, "/users/42")).await;
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(body_of(res).await, Bytes::from_static(br#"{"id":"42"}"#));
    }

    #[tokio::test]
    async fn test_trailing_slash_resolves_to_the_same_route() {
        let sink = MemoryLogSink::new();
        let res = router(&sink).dispatch(request(Method::GET, "/users/42/")).await;
        assert_eq!(res.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_not_found_records_a_finish() {
        let sink = MemoryLogSink::new();
        let res = router(&sink).dispatch(request(Method::GET, "/nope")).await;
        assert_eq!(res.status(), StatusCode::NOT_FOUND);
        assert_eq!(body_of(res).await, Bytes::from_static(b"404 page not found\n"));

        let finish = sink.find(FINISH_MESSAGE).unwrap();
        assert_eq!(
            finish.field(fields::ENDPOINT_ID),
            Some(&serde_json::json!(NOT_FOUND_ENDPOINT))
        );
    }

    #[tokio::test]
    async fn test_wrong_method_sets_allow() {
        let sink = MemoryLogSink::new();
        let res = router(&sink).dispatch(request(Method::DELETE, "/users/1")).await;
        assert_eq!(res.status(), StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(res.headers().get(ALLOW).unwrap(), "GET");
        assert_eq!(body_of(res).await, Bytes::from_static(b"Method Not Allowed\n"));
    }

    #[tokio::test]
    async fn test_panic_is_captured() {
        let sink = MemoryLogSink::new();
        let mut router = router(&sink);
        router
            .register(
                Method::GET,
                "/panicstring",
                "panic",
                "string",
                HttpStack::bare(handler_fn(|ctx, req, _res| {
                    let explode = req.path() == "/panicstring";
                    Box::pin(async move {
                        assert!(!explode, "test");
                        ctx
                    })
                })),
            )
            .unwrap();

        let mut req = request(Method::GET, "/panicstring");
        req.headers_mut().insert("x-token", HeaderValue::from_static("abc"));
        let res = router.dispatch(req).await;

        assert_eq!(res.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body_of(res).await, Bytes::from_static(b"Internal Server Error\n"));
        let record = sink.find(PANIC_MESSAGE).unwrap();
        assert_eq!(record.field("panic"), Some(&serde_json::json!("test")));
        assert_eq!(
            record.field("Request-Header-x-token"),
            Some(&serde_json::json!("abc"))
        );
        assert_eq!(sink.count_message(FINISH_MESSAGE), 1);
    }

    #[tokio::test]
    async fn test_metrics_route_renders_prometheus_text() {
        portico_core::fixtures::test_metrics();
        let router = HttpRouter::from_config(&GatewayConfig::default(), &Health::new("svc")).unwrap();

        let res = router.dispatch(request(Method::GET, "/metrics")).await;
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(
            res.headers().get(CONTENT_TYPE).unwrap(),
            "text/plain; version=0.0.4"
        );
    }

    #[test]
    fn test_metrics_route_follows_config() {
        let mut config = GatewayConfig::default();
        config.metrics.enabled = false;
        let router = HttpRouter::from_config(&config, &Health::new("svc")).unwrap();
        assert_eq!(router.route_count(), 1);
    }

    #[test]
    fn test_duplicate_route_is_rejected() {
        let sink = MemoryLogSink::new();
        let mut router = router(&sink);
        let err = router
            .register(Method::GET, "/users/:id", "users", "again", plain_stack(StatusCode::OK, ""))
            .unwrap_err();
        assert!(matches!(err, crate::ServerError::Route(_)));
    }
}
