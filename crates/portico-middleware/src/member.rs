//! Pipeline member and terminal handler traits.
//!
//! Adapters and middlewares implement the same capability set; which list
//! a member is registered in decides whether it runs outer or inner. The
//! HTTP variants signal an abort by writing the response and returning
//! `false`. The channel variants can also fail with an error, which ends
//! the traversal on the spot.
//!
//! # Example
//!
//! ```ignore
//! use portico_middleware::{BoxFuture, HttpMember, SharedState};
//!
//! struct RequireToken;
//!
//! impl HttpMember for RequireToken {
//!     fn name(&self) -> &str {
//!         "require-token"
//!     }
//!
//!     fn handle_request<'a>(
//!         &'a self,
//!         ctx: RequestContext,
//!         req: &'a mut ServerHttpRequest,
//!         res: &'a ServerHttpResponse,
//!         _shared: &'a mut SharedState,
//!     ) -> BoxFuture<'a, (RequestContext, bool)> {
//!         Box::pin(async move {
//!             if req.headers().get("x-token").is_none() {
//!                 res.send_error_string(StatusCode::UNAUTHORIZED, "missing token");
//!                 return (ctx, false);
//!             }
//!             (ctx, true)
//!         })
//!     }
//!
//!     fn handle_response<'a>(
//!         &'a self,
//!         ctx: RequestContext,
//!         _res: &'a ServerHttpResponse,
//!         _shared: &'a mut SharedState,
//!     ) -> BoxFuture<'a, RequestContext> {
//!         Box::pin(async move { ctx })
//!     }
//! }
//! ```

use std::future::Future;
use std::pin::Pin;

use portico_core::wire::{ToWire, Value};
use portico_core::{BoxError, ChannelHeaders, RequestContext, ServerHttpRequest, ServerHttpResponse};

use crate::shared::SharedState;

/// A boxed, sendable future.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Adapter or middleware of an HTTP stack.
pub trait HttpMember: Send + Sync + 'static {
    /// Key of this member's shared-state slot.
    fn name(&self) -> &str;

    /// Schema of the member's options. Tooling only.
    fn json_schema(&self) -> serde_json::Value {
        serde_json::Value::Null
    }

    /// Runs on the way in. Returns `false` to stop the forward traversal;
    /// a member that writes a response body should do so.
    fn handle_request<'a>(
        &'a self,
        ctx: RequestContext,
        req: &'a mut ServerHttpRequest,
        res: &'a ServerHttpResponse,
        shared: &'a mut SharedState,
    ) -> BoxFuture<'a, (RequestContext, bool)>;

    /// Runs on the way out.
    fn handle_response<'a>(
        &'a self,
        ctx: RequestContext,
        res: &'a ServerHttpResponse,
        shared: &'a mut SharedState,
    ) -> BoxFuture<'a, RequestContext>;
}

/// Terminal handler of an HTTP endpoint.
pub trait HttpHandler: Send + Sync + 'static {
    /// Handles the request and writes the response.
    fn handle<'a>(
        &'a self,
        ctx: RequestContext,
        req: &'a mut ServerHttpRequest,
        res: &'a ServerHttpResponse,
    ) -> BoxFuture<'a, RequestContext>;
}

/// [`HttpHandler`] built from a closure.
pub struct FnHandler<F> {
    func: F,
}

/// Wraps a closure as an [`HttpHandler`].
///
/// ```ignore
/// let handler = handler_fn(|ctx, _req, res| {
///     Box::pin(async move {
///         res.write_json(StatusCode::OK, None, &serde_json::json!({"ok": true}));
///         ctx
///     })
/// });
/// ```
pub const fn handler_fn<F>(func: F) -> FnHandler<F>
where
    F: for<'a> Fn(
            RequestContext,
            &'a mut ServerHttpRequest,
            &'a ServerHttpResponse,
        ) -> BoxFuture<'a, RequestContext>
        + Send
        + Sync
        + 'static,
{
    FnHandler { func }
}

impl<F> HttpHandler for FnHandler<F>
where
    F: for<'a> Fn(
            RequestContext,
            &'a mut ServerHttpRequest,
            &'a ServerHttpResponse,
        ) -> BoxFuture<'a, RequestContext>
        + Send
        + Sync
        + 'static,
{
    fn handle<'a>(
        &'a self,
        ctx: RequestContext,
        req: &'a mut ServerHttpRequest,
        res: &'a ServerHttpResponse,
    ) -> BoxFuture<'a, RequestContext> {
        (self.func)(ctx, req, res)
    }
}

/// A response struct that can be written to the channel protocol.
pub type WireResponse = Box<dyn ToWire + Send + Sync>;

/// Decoded inbound channel call.
#[derive(Debug, Clone)]
pub struct ChannelRequest {
    /// `Service::method`.
    pub method: String,
    /// Arg2 headers.
    pub headers: ChannelHeaders,
    /// Arg3 body.
    pub body: Value,
}

impl ChannelRequest {
    /// Creates a request.
    #[must_use]
    pub fn new(method: impl Into<String>, headers: ChannelHeaders, body: Value) -> Self {
        Self {
            method: method.into(),
            headers,
            body,
        }
    }
}

/// Result of a channel handler.
pub struct ChannelResponse {
    /// `false` marks an application error.
    pub success: bool,
    /// Response struct, encoded into arg3.
    pub body: Option<WireResponse>,
    /// Response headers, written into arg2.
    pub headers: ChannelHeaders,
}

impl ChannelResponse {
    /// A successful response.
    #[must_use]
    pub fn ok(body: impl ToWire + Send + Sync + 'static) -> Self {
        Self {
            success: true,
            body: Some(Box::new(body)),
            headers: ChannelHeaders::new(),
        }
    }

    /// An application-error response carrying `body`.
    #[must_use]
    pub fn app_error(body: impl ToWire + Send + Sync + 'static) -> Self {
        Self {
            success: false,
            body: Some(Box::new(body)),
            headers: ChannelHeaders::new(),
        }
    }

    /// An unsuccessful response with no body, used when a member aborts.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            success: false,
            body: None,
            headers: ChannelHeaders::new(),
        }
    }

    /// Sets the response headers.
    #[must_use]
    pub fn with_headers(mut self, headers: ChannelHeaders) -> Self {
        self.headers = headers;
        self
    }
}

impl std::fmt::Debug for ChannelResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelResponse")
            .field("success", &self.success)
            .field("has_body", &self.body.is_some())
            .field("headers", &self.headers)
            .finish()
    }
}

/// Outcome of a channel handler or stack: the updated context and the
/// response.
pub type ChannelOutcome = Result<(RequestContext, ChannelResponse), BoxError>;

/// Adapter or middleware of a channel stack.
pub trait ChannelMember: Send + Sync + 'static {
    /// Key of this member's shared-state slot.
    fn name(&self) -> &str;

    /// Schema of the member's options. Tooling only.
    fn json_schema(&self) -> serde_json::Value {
        serde_json::Value::Null
    }

    /// Runs on the way in. `Ok(false)` stops the forward traversal and
    /// unwinds; an error stops everything and is returned to the caller.
    fn handle_request<'a>(
        &'a self,
        ctx: RequestContext,
        req: &'a mut ChannelRequest,
        res: &'a mut ChannelResponse,
        shared: &'a mut SharedState,
    ) -> BoxFuture<'a, Result<(RequestContext, bool), BoxError>>;

    /// Runs on the way out; may replace the response.
    fn handle_response<'a>(
        &'a self,
        ctx: RequestContext,
        res: &'a mut ChannelResponse,
        shared: &'a mut SharedState,
    ) -> BoxFuture<'a, RequestContext>;
}

/// Terminal handler of a channel endpoint.
pub trait ChannelHandler: Send + Sync + 'static {
    /// Handles one decoded call.
    fn handle<'a>(&'a self, ctx: RequestContext, req: &'a ChannelRequest) -> BoxFuture<'a, ChannelOutcome>;
}

/// [`ChannelHandler`] built from a closure.
pub struct FnChannelHandler<F> {
    func: F,
}

/// Wraps a closure as a [`ChannelHandler`].
pub const fn channel_handler_fn<F>(func: F) -> FnChannelHandler<F>
where
    F: for<'a> Fn(RequestContext, &'a ChannelRequest) -> BoxFuture<'a, ChannelOutcome>
        + Send
        + Sync
        + 'static,
{
    FnChannelHandler { func }
}

impl<F> ChannelHandler for FnChannelHandler<F>
where
    F: for<'a> Fn(RequestContext, &'a ChannelRequest) -> BoxFuture<'a, ChannelOutcome>
        + Send
        + Sync
        + 'static,
{
    fn handle<'a>(&'a self, ctx: RequestContext, req: &'a ChannelRequest) -> BoxFuture<'a, ChannelOutcome> {
        (self.func)(ctx, req)
    }
}
