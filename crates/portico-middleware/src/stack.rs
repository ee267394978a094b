//! Execution stacks: adapters around middlewares around a handler.
//!
//! ```text
//! request  → A0 → A1 → … → M0 → M1 → … → handler
//!                                           ↓
//! response ← A0 ← A1 ← … ← M0 ← M1 ← … ←────┘
//! ```
//!
//! When member `i` of a list returns `false`, the members of that list
//! that already ran unwind in reverse order, starting with `i` itself. If
//! the aborting member is a middleware, every adapter then unwinds too.
//! Members after `i`, and the handler, never run.
//!
//! Adapters always sit outside middlewares. The two lists are never
//! interleaved.

use std::sync::Arc;

use portico_core::{RequestContext, ServerHttpRequest, ServerHttpResponse};

use crate::member::{
    ChannelHandler, ChannelMember, ChannelOutcome, ChannelRequest, ChannelResponse, HttpHandler,
    HttpMember,
};
use crate::shared::SharedState;

/// Type-erased HTTP member.
pub type BoxedHttpMember = Arc<dyn HttpMember>;

/// Type-erased channel member.
pub type BoxedChannelMember = Arc<dyn ChannelMember>;

/// The handler bundle of one HTTP endpoint.
#[derive(Clone)]
pub struct HttpStack {
    adapters: Vec<BoxedHttpMember>,
    middlewares: Vec<BoxedHttpMember>,
    handler: Arc<dyn HttpHandler>,
}

impl HttpStack {
    /// Creates a stack.
    #[must_use]
    pub fn new(
        adapters: Vec<BoxedHttpMember>,
        middlewares: Vec<BoxedHttpMember>,
        handler: impl HttpHandler,
    ) -> Self {
        Self {
            adapters,
            middlewares,
            handler: Arc::new(handler),
        }
    }

    /// Creates a stack with no members.
    #[must_use]
    pub fn bare(handler: impl HttpHandler) -> Self {
        Self::new(Vec::new(), Vec::new(), handler)
    }

    /// Returns the adapters in registration order.
    #[must_use]
    pub fn adapters(&self) -> &[BoxedHttpMember] {
        &self.adapters
    }

    /// Returns the middlewares in registration order.
    #[must_use]
    pub fn middlewares(&self) -> &[BoxedHttpMember] {
        &self.middlewares
    }

    fn shared_state(&self) -> SharedState {
        SharedState::new(
            self.adapters
                .iter()
                .chain(&self.middlewares)
                .map(|m| m.name()),
        )
    }

    /// Runs the request through the stack.
    pub async fn handle(
        &self,
        ctx: RequestContext,
        req: &mut ServerHttpRequest,
        res: &ServerHttpResponse,
    ) -> RequestContext {
        let mut shared = self.shared_state();
        let mut ctx = ctx;

        for (i, adapter) in self.adapters.iter().enumerate() {
            let (next, proceed) = adapter.handle_request(ctx, req, res, &mut shared).await;
            ctx = next;
            if !proceed {
                return unwind_http(&self.adapters[..=i], ctx, res, &mut shared).await;
            }
        }

        for (i, middleware) in self.middlewares.iter().enumerate() {
            let (next, proceed) = middleware.handle_request(ctx, req, res, &mut shared).await;
            ctx = next;
            if !proceed {
                ctx = unwind_http(&self.middlewares[..=i], ctx, res, &mut shared).await;
                return unwind_http(&self.adapters, ctx, res, &mut shared).await;
            }
        }

        ctx = self.handler.handle(ctx, req, res).await;

        ctx = unwind_http(&self.middlewares, ctx, res, &mut shared).await;
        unwind_http(&self.adapters, ctx, res, &mut shared).await
    }
}

impl std::fmt::Debug for HttpStack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpStack")
            .field("adapters", &self.adapters.iter().map(|m| m.name()).collect::<Vec<_>>())
            .field("middlewares", &self.middlewares.iter().map(|m| m.name()).collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

async fn unwind_http(
    members: &[BoxedHttpMember],
    ctx: RequestContext,
    res: &ServerHttpResponse,
    shared: &mut SharedState,
) -> RequestContext {
    let mut ctx = ctx;
    for member in members.iter().rev() {
        ctx = member.handle_response(ctx, res, shared).await;
    }
    ctx
}

/// The handler bundle of one channel endpoint.
#[derive(Clone)]
pub struct ChannelStack {
    adapters: Vec<BoxedChannelMember>,
    middlewares: Vec<BoxedChannelMember>,
    handler: Arc<dyn ChannelHandler>,
}

impl ChannelStack {
    /// Creates a stack.
    #[must_use]
    pub fn new(
        adapters: Vec<BoxedChannelMember>,
        middlewares: Vec<BoxedChannelMember>,
        handler: impl ChannelHandler,
    ) -> Self {
        Self {
            adapters,
            middlewares,
            handler: Arc::new(handler),
        }
    }

    /// Creates a stack with no members.
    #[must_use]
    pub fn bare(handler: impl ChannelHandler) -> Self {
        Self::new(Vec::new(), Vec::new(), handler)
    }

    /// Returns the adapters in registration order.
    #[must_use]
    pub fn adapters(&self) -> &[BoxedChannelMember] {
        &self.adapters
    }

    /// Returns the middlewares in registration order.
    #[must_use]
    pub fn middlewares(&self) -> &[BoxedChannelMember] {
        &self.middlewares
    }

    /// Runs the call through the stack.
    ///
    /// A member error is returned as-is without unwinding. An abort
    /// returns whatever response the members left, which is
    /// [`ChannelResponse::empty`] unless one of them wrote one.
    pub async fn handle(&self, ctx: RequestContext, req: &mut ChannelRequest) -> ChannelOutcome {
        let mut shared = SharedState::new(
            self.adapters
                .iter()
                .chain(&self.middlewares)
                .map(|m| m.name()),
        );
        let mut res = ChannelResponse::empty();
        let mut ctx = ctx;

        for (i, adapter) in self.adapters.iter().enumerate() {
            let (next, proceed) = adapter
                .handle_request(ctx, req, &mut res, &mut shared)
                .await?;
            ctx = next;
            if !proceed {
                ctx = unwind_channel(&self.adapters[..=i], ctx, &mut res, &mut shared).await;
                return Ok((ctx, res));
            }
        }

        for (i, middleware) in self.middlewares.iter().enumerate() {
            let (next, proceed) = middleware
                .handle_request(ctx, req, &mut res, &mut shared)
                .await?;
            ctx = next;
            if !proceed {
                ctx = unwind_channel(&self.middlewares[..=i], ctx, &mut res, &mut shared).await;
                ctx = unwind_channel(&self.adapters, ctx, &mut res, &mut shared).await;
                return Ok((ctx, res));
            }
        }

        let (handled_ctx, mut res) = self.handler.handle(ctx, req).await?;

        let ctx = unwind_channel(&self.middlewares, handled_ctx, &mut res, &mut shared).await;
        let ctx = unwind_channel(&self.adapters, ctx, &mut res, &mut shared).await;
        Ok((ctx, res))
    }
}

impl std::fmt::Debug for ChannelStack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelStack")
            .field("adapters", &self.adapters.iter().map(|m| m.name()).collect::<Vec<_>>())
            .field("middlewares", &self.middlewares.iter().map(|m| m.name()).collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

async fn unwind_channel(
    members: &[BoxedChannelMember],
    ctx: RequestContext,
    res: &mut ChannelResponse,
    shared: &mut SharedState,
) -> RequestContext {
    let mut ctx = ctx;
    for member in members.iter().rev() {
        ctx = member.handle_response(ctx, res, shared).await;
    }
    ctx
}
