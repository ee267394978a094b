//! Lifecycle of one inbound channel call.
//!
//! A call moves through a fixed sequence of states:
//!
//! ```text
//! Init -> ReadHeaders -> ReadBody -> Handle -> WriteHeaders -> WriteBody -> Finish
//! ```
//!
//! Every state checks the call's deadline first. A failed state jumps
//! straight to `Finish`, which records metrics, writes the finish log line
//! and ends the span whatever happened before. The span is parented on the
//! caller's trace headers once arg2 decodes; a call that fails earlier gets
//! a root span so its finish line still carries trace fields. A call whose
//! deadline passed gets no reply: the caller has already timed out.

use std::panic::AssertUnwindSafe;
use std::time::Duration;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures_util::FutureExt;
use indexmap::IndexMap;
use portico_core::wire::{self, ToWire, Value};
use portico_core::{
    scope_tags, BoxError, ChannelHeaders, LogField, LogLevel, RequestContext, SystemError,
    SystemErrorCode,
};
use portico_middleware::{ChannelRequest, ChannelResponse};
use portico_telemetry::logging::fields;
use portico_telemetry::metrics::names;
use portico_telemetry::tracing::{end_span, start_server_span, trace_log_fields, ChannelHeaderExtractor};
use tokio::time::Instant;

use crate::buffer_pool::BufferPool;
use crate::channel_router::ChannelEndpoint;
use crate::error::panic_message;
use crate::frame::{CallFrame, ErrorFrame, Frame, ResponseFrame};

/// Message of the line logged when a channel call completes.
pub const FINISH_MESSAGE: &str = "Finished an incoming server channel request";

/// Step of an inbound call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallState {
    /// Context set up.
    Init,
    /// Decoding arg2.
    ReadHeaders,
    /// Decoding arg3.
    ReadBody,
    /// Running the endpoint stack.
    Handle,
    /// Encoding response headers.
    WriteHeaders,
    /// Encoding the response body.
    WriteBody,
    /// Recording the outcome.
    Finish,
}

impl CallState {
    /// Returns the state name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Init => "init",
            Self::ReadHeaders => "read-headers",
            Self::ReadBody => "read-body",
            Self::Handle => "handle",
            Self::WriteHeaders => "write-headers",
            Self::WriteBody => "write-body",
            Self::Finish => "finish",
        }
    }
}

struct CallFailure {
    code: SystemErrorCode,
    error: BoxError,
}

struct InboundCall<'a> {
    endpoint: &'a ChannelEndpoint,
    pool: &'a BufferPool,
    call: CallFrame,
    ctx: RequestContext,
    started_at: Instant,
    started_wall: DateTime<Utc>,
    request_headers: ChannelHeaders,
    request: Option<ChannelRequest>,
    response: Option<ChannelResponse>,
    arg2: Bytes,
    failure: Option<CallFailure>,
    reply: Option<Frame>,
    span_started: bool,
}

/// Runs `call` against `endpoint` and returns the frame to send back.
pub(crate) async fn handle_call(
    endpoint: &ChannelEndpoint,
    call: CallFrame,
    pool: &BufferPool,
) -> Option<Frame> {
    let mut inbound = InboundCall::new(endpoint, pool, call);
    let mut state = CallState::Init;
    while state != CallState::Finish {
        state = inbound.step(state).await;
    }
    inbound.finish();
    inbound.reply
}

impl<'a> InboundCall<'a> {
    fn new(endpoint: &'a ChannelEndpoint, pool: &'a BufferPool, call: CallFrame) -> Self {
        let info = &endpoint.info;
        let mut ctx = RequestContext::new()
            .with_endpoint_id(info.endpoint_id.clone())
            .with_handler_id(info.handler_id.clone())
            .with_scope_tags_default(
                [
                    (scope_tags::ENDPOINT, info.endpoint_id.as_str()),
                    (scope_tags::HANDLER, info.handler_id.as_str()),
                    (scope_tags::PROTOCOL, scope_tags::PROTOCOL_CHANNEL),
                    (scope_tags::METHOD, call.method.as_str()),
                ],
                &info.scope,
            );
        if call.ttl > Duration::ZERO {
            ctx = ctx.with_timeout(call.ttl);
        }
        ctx.append_log_fields(vec![
            LogField::string(fields::ENDPOINT_ID, info.endpoint_id.as_str()),
            LogField::string(fields::HANDLER_ID, info.handler_id.as_str()),
        ]);

        Self {
            endpoint,
            pool,
            call,
            ctx,
            started_at: Instant::now(),
            started_wall: Utc::now(),
            request_headers: ChannelHeaders::new(),
            request: None,
            response: None,
            arg2: Bytes::new(),
            failure: None,
            reply: None,
            span_started: false,
        }
    }

    async fn step(&mut self, state: CallState) -> CallState {
        if self.ctx.is_expired() {
            let err = SystemError::new(
                SystemErrorCode::Timeout,
                format!("deadline exceeded before {}", state.as_str()),
            );
            return self.fail(SystemErrorCode::Timeout, Box::new(err), false);
        }
        match state {
            CallState::Init => CallState::ReadHeaders,
            CallState::ReadHeaders => self.read_headers(),
            CallState::ReadBody => self.read_body(),
            CallState::Handle => self.handle().await,
            CallState::WriteHeaders => self.write_headers(),
            CallState::WriteBody => self.write_body(),
            CallState::Finish => CallState::Finish,
        }
    }

    /// Records the failure and, when `reply` is set, the error frame.
    fn fail(&mut self, code: SystemErrorCode, error: BoxError, reply: bool) -> CallState {
        if !self.span_started {
            self.start_span(&IndexMap::new());
        }
        if reply {
            self.reply = Some(Frame::Error(ErrorFrame::new(
                self.call.id,
                code,
                error.to_string(),
            )));
        }
        self.failure = Some(CallFailure { code, error });
        CallState::Finish
    }

    fn read_headers(&mut self) -> CallState {
        let mut arg2 = self.call.arg2.clone();
        let headers = match wire::read_headers(&mut arg2).and_then(|h| {
            wire::ensure_empty(&arg2, "arg2")?;
            Ok(h)
        }) {
            Ok(headers) => headers,
            Err(err) => return self.fail(SystemErrorCode::BadRequest, Box::new(err), true),
        };
        self.decorate(&headers);
        self.request_headers = ChannelHeaders::from(headers);
        CallState::ReadBody
    }

    fn decorate(&mut self, headers: &IndexMap<String, String>) {
        let info = &self.endpoint.info;
        let keys = &info.header_keys;

        let uuid = headers
            .get(&keys.request_uuid)
            .filter(|v| !v.is_empty())
            .cloned()
            .unwrap_or_else(|| uuid::Uuid::now_v7().to_string());
        let api_environment = headers
            .get(&keys.api_environment)
            .map_or(scope_tags::DEFAULT_API_ENVIRONMENT, String::as_str);
        let mut tags = vec![(scope_tags::API_ENVIRONMENT, api_environment)];
        if keys.shadow_enabled && headers.contains_key(&keys.shadow_request) {
            tags.push((scope_tags::ENVIRONMENT, scope_tags::SHADOW_ENVIRONMENT));
        }
        let ctx = self
            .ctx
            .with_request_uuid(uuid.clone())
            .with_scope_tags(tags)
            .with_endpoint_request_headers(
                headers.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
            );
        ctx.append_log_fields(vec![LogField::string(fields::REQUEST_UUID, uuid)]);
        if info
            .capture
            .should_capture(&info.endpoint_id, &info.handler_id)
        {
            self.ctx = ctx.with_capture();
        } else {
            self.ctx = ctx;
        }
        self.start_span(headers);
    }

    /// Starts the server span, parented on `headers` when they carry a
    /// valid trace context, and appends its trace log fields.
    fn start_span(&mut self, headers: &IndexMap<String, String>) {
        let span = start_server_span(
            self.endpoint.info.qualified_name(),
            &ChannelHeaderExtractor(headers),
        );
        self.ctx = self.ctx.with_otel_context(span);
        self.ctx.append_log_fields(
            trace_log_fields(self.ctx.otel_context())
                .into_iter()
                .map(|(k, v)| LogField::string(k, v)),
        );
        self.span_started = true;
    }

    fn read_body(&mut self) -> CallState {
        let mut arg3 = self.call.arg3.clone();
        let body = match wire::decode_struct(&mut arg3).and_then(|v| {
            wire::ensure_empty(&arg3, "arg3")?;
            Ok(v)
        }) {
            Ok(body) => body,
            Err(err) => return self.fail(SystemErrorCode::BadRequest, Box::new(err), true),
        };
        self.request = Some(ChannelRequest::new(
            self.call.method.clone(),
            self.request_headers.clone(),
            body,
        ));
        CallState::Handle
    }

    async fn handle(&mut self) -> CallState {
        let Some(mut request) = self.request.take() else {
            return self.fail(
                SystemErrorCode::UnexpectedError,
                "channel call has no decoded body".into(),
                true,
            );
        };
        let endpoint = self.endpoint;
        let run = AssertUnwindSafe(endpoint.stack.handle(self.ctx.clone(), &mut request)).catch_unwind();
        let outcome = match self.ctx.deadline() {
            Some(deadline) => match tokio::time::timeout_at(deadline, run).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    let err = SystemError::new(SystemErrorCode::Timeout, "handler exceeded the call deadline");
                    return self.fail(SystemErrorCode::Timeout, Box::new(err), false);
                }
            },
            None => run.await,
        };

        match outcome {
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                endpoint.info.logger.error(
                    &self.ctx,
                    "A panic occurred while handling a channel call",
                    vec![LogField::string("panic", message.as_str())],
                );
                self.ctx
                    .scope()
                    .cloned()
                    .unwrap_or_else(|| endpoint.info.scope.clone())
                    .counter(names::ENDPOINT_PANIC)
                    .increment(1);
                self.fail(
                    SystemErrorCode::UnexpectedError,
                    format!("handler panicked: {message}").into(),
                    true,
                )
            }
            Ok(Err(err)) => {
                endpoint.info.logger.warn(
                    &self.ctx,
                    "Channel handler returned an error",
                    vec![LogField::error(err.as_ref())],
                );
                let code = SystemError::code_of(err.as_ref());
                self.fail(code, err, true)
            }
            Ok(Ok((ctx, response))) => {
                self.ctx = ctx;
                self.response = Some(response);
                CallState::WriteHeaders
            }
        }
    }

    fn write_headers(&mut self) -> CallState {
        let Some(response) = &self.response else {
            return CallState::Finish;
        };
        let mut buf = self.pool.get();
        match wire::write_headers(&mut *buf, response.headers.as_map()) {
            Ok(()) => {
                self.arg2 = Bytes::copy_from_slice(&buf);
                CallState::WriteBody
            }
            Err(err) => self.fail(SystemErrorCode::UnexpectedError, Box::new(err), true),
        }
    }

    fn write_body(&mut self) -> CallState {
        let Some(response) = &self.response else {
            return CallState::Finish;
        };
        let value = match &response.body {
            Some(body) => body.to_wire(),
            None => Ok(Value::Struct(Vec::new())),
        };
        let value = match value {
            Ok(value) => value,
            Err(err) => return self.fail(SystemErrorCode::UnexpectedError, Box::new(err), true),
        };

        let mut buf = self.pool.get();
        value.encode(&mut *buf);
        self.reply = Some(Frame::Response(ResponseFrame {
            id: self.call.id,
            app_error: !response.success,
            arg2: std::mem::take(&mut self.arg2),
            arg3: Bytes::copy_from_slice(&buf),
        }));
        if let Some(callback) = &self.endpoint.post_response {
            callback(&self.ctx, &self.call.method, response);
        }
        CallState::Finish
    }

    fn finish(&self) {
        let info = &self.endpoint.info;
        let elapsed = self.started_at.elapsed();
        let scope = self
            .ctx
            .scope()
            .cloned()
            .unwrap_or_else(|| info.scope.tagged(self.ctx.scope_tags().clone()));

        scope.timer(names::ENDPOINT_LATENCY).record(elapsed);
        scope.histogram(names::ENDPOINT_LATENCY_HIST).record(elapsed.as_secs_f64());
        scope.counter(names::ENDPOINT_REQUEST).increment(1);

        let app_error = self.response.as_ref().is_some_and(|r| !r.success);
        match &self.failure {
            Some(failure) => scope
                .tagged([(scope_tags::ERROR, failure.code.metrics_key())])
                .counter(names::ENDPOINT_SYSTEM_ERRORS)
                .increment(1),
            None if app_error => scope.counter(names::ENDPOINT_APP_ERRORS).increment(1),
            None => scope.counter(names::ENDPOINT_SUCCESS).increment(1),
        }

        let mut log_fields = vec![
            LogField::string("method", self.call.method.as_str()),
            LogField::time("timestamp-started", self.started_wall),
            LogField::time("timestamp-finished", Utc::now()),
        ];
        log_fields.extend(header_fields(fields::REQUEST_HEADER_PREFIX, &self.request_headers));
        if self.failure.is_none() {
            if let Some(response) = &self.response {
                log_fields.extend(header_fields(fields::RESPONSE_HEADER_PREFIX, &response.headers));
            }
        }
        if let Some(failure) = &self.failure {
            log_fields.push(LogField::error(failure.error.as_ref()));
        }

        let level = if self.failure.is_some() {
            LogLevel::Warn
        } else {
            LogLevel::Debug
        };
        let level = info.logger.finish_level(&self.ctx, level);
        info.logger.log(level, &self.ctx, FINISH_MESSAGE, log_fields);

        end_span(self.ctx.otel_context());
    }
}

/// Renders `prefix-name` fields for every channel header.
fn header_fields(prefix: &str, headers: &ChannelHeaders) -> Vec<LogField> {
    headers
        .as_map()
        .iter()
        .map(|(k, v)| LogField::string(format!("{prefix}-{k}"), v.as_str()))
        .collect()
}
