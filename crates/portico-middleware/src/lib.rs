//! # Portico Middleware
//!
//! Ordered request processing around endpoint handlers.
//!
//! Every endpoint is dispatched through a stack: an ordered list of
//! adapters, an ordered list of middlewares and one terminal handler.
//! Adapters run strictly outside middlewares on the way in and on the
//! way out:
//!
//! ```text
//! A1.Req → A2.Req → M1.Req → handler → M1.Res → A2.Res → A1.Res
//! ```
//!
//! A member that returns `false` from `handle_request` stops the forward
//! traversal; only the members that already ran see `handle_response`,
//! innermost first.
//!
//! Members are built once at startup and shared by every request. State
//! for one request goes in [`SharedState`] under the member's name, or
//! on the [`RequestContext`](portico_core::RequestContext).
//!
//! ## Example
//!
//! ```ignore
//! use portico_middleware::{handler_fn, HttpStack, stages::LoggerMiddleware};
//!
//! let stack = HttpStack::new(
//!     vec![],
//!     vec![Arc::new(LoggerMiddleware::default())],
//!     handler_fn(|ctx, _req, res| {
//!         Box::pin(async move {
//!             res.write_json(StatusCode::OK, None, &serde_json::json!({"ok": true}));
//!             ctx
//!         })
//!     }),
//! );
//! ```

#![doc(html_root_url = "https://docs.rs/portico-middleware/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod member;
pub mod shared;
pub mod stack;
pub mod stages;

pub use member::{
    channel_handler_fn, handler_fn, BoxFuture, ChannelHandler, ChannelMember, ChannelOutcome,
    ChannelRequest, ChannelResponse, FnChannelHandler, FnHandler, HttpHandler, HttpMember,
    WireResponse,
};
pub use shared::SharedState;
pub use stack::{BoxedChannelMember, BoxedHttpMember, ChannelStack, HttpStack};
