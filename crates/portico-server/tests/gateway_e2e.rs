//! End-to-end scenarios through the HTTP and channel routers.
//!
//! HTTP scenarios call `HttpRouter::dispatch` directly; channel scenarios
//! drive `ChannelServer::serve_io` over an in-memory duplex pipe.

use std::sync::Arc;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use http::{HeaderValue, Method, StatusCode};
use http_body_util::{BodyExt, Full};
use indexmap::IndexMap;
use parking_lot::Mutex;
use portico_core::fixtures::{logger_for, test_metrics, MemoryLogSink};
use portico_core::wire::{self, FieldValue, Value};
use portico_core::{
    empty_body, ChannelHeaders, LogLevel, RequestBody, RequestHeaderKeys, FINISH_MESSAGE,
};
use portico_middleware::{channel_handler_fn, handler_fn, ChannelResponse, ChannelStack, HttpStack};
use portico_server::frame::{read_frame, write_frame, DEFAULT_MAX_FRAME_SIZE};
use portico_server::{
    CallFrame, ChannelRouter, ChannelServer, EndpointDefaults, Frame, HttpRouter, ShutdownSignal,
    CHANNEL_FINISH_MESSAGE,
};
use portico_telemetry::metrics::counter_value;

fn defaults(sink: &Arc<MemoryLogSink>) -> EndpointDefaults {
    EndpointDefaults {
        header_keys: RequestHeaderKeys {
            request_uuid: "X-Request-Id".to_string(),
            ..RequestHeaderKeys::default()
        },
        ..EndpointDefaults::default()
    }
    .with_logger(logger_for(sink))
}

fn get(uri: &str) -> http::Request<RequestBody> {
    http::Request::builder()
        .method(Method::GET)
        .uri(uri)
        .body(empty_body())
        .unwrap()
}

async fn body_of(res: http::Response<Full<Bytes>>) -> Bytes {
    res.into_body().collect().await.unwrap().to_bytes()
}

#[tokio::test]
async fn request_uuid_reaches_context_and_finish_log() {
    let sink = MemoryLogSink::new();
    let seen = Arc::new(Mutex::new(None));
    let mut router = HttpRouter::new(defaults(&sink));
    router
        .register(
            Method::GET,
            "/uuid",
            "uuid",
            "echo",
            HttpStack::bare(handler_fn({
                let seen = Arc::clone(&seen);
                move |ctx, _req, res| {
                    *seen.lock() = ctx.request_uuid().map(str::to_string);
                    Box::pin(async move {
                        res.write_json(StatusCode::OK, None, &serde_json::json!({}));
                        ctx
                    })
                }
            })),
        )
        .unwrap();

    let mut req = get("/uuid");
    req.headers_mut()
        .insert("x-request-id", HeaderValue::from_static("abc-123"));
    let res = router.dispatch(req).await;

    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(seen.lock().as_deref(), Some("abc-123"));
    let finish = sink.find(FINISH_MESSAGE).unwrap();
    assert_eq!(finish.field("requestUUID"), Some(&serde_json::json!("abc-123")));
}

#[tokio::test]
async fn malformed_query_is_rejected_once() {
    let sink = MemoryLogSink::new();
    let results = Arc::new(Mutex::new(Vec::new()));
    let mut router = HttpRouter::new(defaults(&sink));
    router
        .register(
            Method::GET,
            "/foo",
            "foo",
            "query",
            HttpStack::bare(handler_fn({
                let results = Arc::clone(&results);
                move |ctx, req, _res| {
                    let first = req.get_query_value("foo").ok().flatten();
                    let second = req.get_query_value("foo").ok().flatten();
                    results.lock().extend([first, second]);
                    Box::pin(async move { ctx })
                }
            })),
        )
        .unwrap();

    let res = router.dispatch(get("/foo?%gh&%ij")).await;

    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    assert_eq!(
        body_of(res).await,
        Bytes::from_static(br#"{"error":"Could not parse query string"}"#)
    );
    assert_eq!(*results.lock(), vec![None, None]);
    assert_eq!(sink.count_message("Got request with invalid query string"), 1);
    assert_eq!(sink.count_message(FINISH_MESSAGE), 1);
    let finish = sink.find(FINISH_MESSAGE).unwrap();
    assert_eq!(finish.level, LogLevel::Warn);
    assert_eq!(finish.field("statusCode"), Some(&serde_json::json!(400)));
}

#[tokio::test]
async fn panicking_handler_returns_500_and_counts() {
    let before = test_metrics();
    let labels = [("endpoint", "panicstring")];
    let baseline = counter_value(&before, "runtime.router.panic", &labels).unwrap_or(0.0);

    let sink = MemoryLogSink::new();
    let mut router = HttpRouter::new(defaults(&sink));
    router
        .register(
            Method::GET,
            "/panicstring",
            "panicstring",
            "panic",
            HttpStack::bare(handler_fn(|ctx, req, _res| {
                let boom = req.path() == "/panicstring";
                Box::pin(async move {
                    if boom {
                        panic!("test");
                    }
                    ctx
                })
            })),
        )
        .unwrap();

    let mut req = get("/panicstring");
    req.headers_mut().insert("x-token", HeaderValue::from_static("t"));
    req.headers_mut().insert("accept", HeaderValue::from_static("*/*"));
    let res = router.dispatch(req).await;

    assert_eq!(res.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body_of(res).await, Bytes::from_static(b"Internal Server Error\n"));

    let after = test_metrics();
    assert_eq!(
        counter_value(&after, "runtime.router.panic", &labels),
        Some(baseline + 1.0)
    );

    let errors: Vec<_> = sink
        .records()
        .into_iter()
        .filter(|r| r.level == LogLevel::Error)
        .collect();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].field("Request-Header-x-token"), Some(&serde_json::json!("t")));
    assert_eq!(errors[0].field("Request-Header-accept"), Some(&serde_json::json!("*/*")));
}

#[tokio::test]
async fn health_reports_degraded_state() {
    let health = portico_server::Health::new("svc");
    let router = HttpRouter::from_config(&portico_config::GatewayConfig::default(), &health).unwrap();

    let res = router.dispatch(get("/health")).await;
    assert_eq!(res.status(), StatusCode::OK);

    health.set_healthy(false);
    let res = router.dispatch(get("/health")).await;
    assert_eq!(res.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(
        body_of(res).await,
        Bytes::from_static(br#"{"ok":false,"message":"Unhealthy, from svc"}"#)
    );
}

/// Headers the framework owns and does not forward downstream.
const STRIPPED: &[&str] = &["x-uuid"];

#[tokio::test]
async fn channel_call_forwards_headers_and_returns_response_headers() {
    let sink = MemoryLogSink::new();
    let downstream: Arc<Mutex<Vec<IndexMap<String, String>>>> = Arc::new(Mutex::new(Vec::new()));

    let mut router = ChannelRouter::new(defaults(&sink));
    router
        .register(
            "SimpleService::Call",
            "simpleService",
            "call",
            ChannelStack::bare(channel_handler_fn({
                let downstream = Arc::clone(&downstream);
                move |ctx, req| {
                    let forwarded: IndexMap<String, String> = req
                        .headers
                        .as_map()
                        .iter()
                        .filter(|(k, _)| !STRIPPED.contains(&k.as_str()))
                        .map(|(k, v)| (k.clone(), v.clone()))
                        .collect();
                    downstream.lock().push(forwarded);
                    let nil_headers = req
                        .headers
                        .as_map()
                        .get("x-nil-response-header")
                        .is_some_and(|v| v == "true");
                    Box::pin(async move {
                        let headers: ChannelHeaders = if nil_headers {
                            ChannelHeaders::new()
                        } else {
                            [("some-res-header", "something")].into_iter().collect()
                        };
                        let body = Value::Struct(vec![FieldValue::new(1, Value::string("ok"))]);
                        Ok((ctx, ChannelResponse::ok(body).with_headers(headers)))
                    })
                }
            })),
        )
        .unwrap();

    let server = ChannelServer::new(router);
    let (client, server_io) = tokio::io::duplex(64 * 1024);
    let (server_read, server_write) = tokio::io::split(server_io);
    let task = tokio::spawn({
        let server = server.clone();
        async move { server.serve_io(server_read, server_write, ShutdownSignal::new()).await }
    });

    let headers: IndexMap<String, String> = [
        ("x-token", "token"),
        ("x-uuid", "uuid"),
        ("x-nil-response-header", "false"),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect();
    let mut arg2 = BytesMut::new();
    wire::write_headers(&mut arg2, &headers).unwrap();
    let mut arg3 = BytesMut::new();
    Value::Struct(vec![FieldValue::new(1, Value::string("hello"))]).encode(&mut arg3);
    let call = Frame::Call(CallFrame {
        id: 1,
        method: "SimpleService::Call".to_string(),
        ttl: Duration::from_secs(1),
        arg2: arg2.freeze(),
        arg3: arg3.freeze(),
    });

    let (mut client_read, mut client_write) = tokio::io::split(client);
    let mut buf = BytesMut::new();
    write_frame(&mut client_write, &call, &mut buf, DEFAULT_MAX_FRAME_SIZE)
        .await
        .unwrap();
    let reply = read_frame(&mut client_read, &mut buf, DEFAULT_MAX_FRAME_SIZE)
        .await
        .unwrap();

    let Some(Frame::Response(response)) = reply else {
        panic!("expected a response frame, got {reply:?}");
    };
    assert!(!response.app_error);
    let mut res_arg2 = response.arg2.clone();
    let res_headers = wire::read_headers(&mut res_arg2).unwrap();
    assert_eq!(res_headers.get("some-res-header").map(String::as_str), Some("something"));

    let forwarded = downstream.lock().clone();
    assert_eq!(forwarded.len(), 1);
    assert_eq!(forwarded[0].get("x-token").map(String::as_str), Some("token"));
    assert!(!forwarded[0].contains_key("x-uuid"));

    let finish = sink.find(CHANNEL_FINISH_MESSAGE).unwrap();
    assert_eq!(finish.level, LogLevel::Debug);

    drop(client_write);
    drop(client_read);
    tokio::time::timeout(Duration::from_secs(1), task).await.unwrap().unwrap();
}

#[tokio::test]
async fn channel_call_to_unknown_method_is_a_bad_request() {
    let server = ChannelServer::new(ChannelRouter::default());
    let (client, server_io) = tokio::io::duplex(4096);
    let (server_read, server_write) = tokio::io::split(server_io);
    let task = tokio::spawn({
        let server = server.clone();
        async move { server.serve_io(server_read, server_write, ShutdownSignal::new()).await }
    });

    let call = Frame::Call(CallFrame {
        id: 5,
        method: "Nope".to_string(),
        ttl: Duration::ZERO,
        arg2: Bytes::new(),
        arg3: Bytes::new(),
    });
    let (mut client_read, mut client_write) = tokio::io::split(client);
    let mut buf = BytesMut::new();
    write_frame(&mut client_write, &call, &mut buf, DEFAULT_MAX_FRAME_SIZE)
        .await
        .unwrap();
    match read_frame(&mut client_read, &mut buf, DEFAULT_MAX_FRAME_SIZE).await.unwrap() {
        Some(Frame::Error(err)) => {
            assert_eq!(err.id, 5);
            assert_eq!(err.code, portico_core::SystemErrorCode::BadRequest);
        }
        other => panic!("unexpected frame {other:?}"),
    }

    drop(client_write);
    drop(client_read);
    tokio::time::timeout(Duration::from_secs(1), task).await.unwrap().unwrap();
}
