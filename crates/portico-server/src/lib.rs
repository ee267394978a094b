//! Inbound servers of the Portico gateway.
//!
//! This crate turns registered endpoint stacks into running servers:
//!
//! - [`HttpRouter`] resolves `(method, path)` to an endpoint, installs the
//!   request UUID, runs the stack, captures panics and flushes exactly one
//!   response per request. [`HttpServer`] drives it on hyper.
//! - [`ChannelRouter`] resolves `Service::method` calls of the binary
//!   channel protocol; each call runs through a fixed state machine.
//!   [`ChannelServer`] drives it over TCP with length-prefixed frames.
//! - [`Gateway`] runs both with a shared health flag and
//!   [`ShutdownSignal`].
//!
//! # Example
//!
//! ```rust,ignore
//! use http::Method;
//! use portico_server::{HttpRouter, HttpServer, ShutdownSignal};
//!
//! let mut router = HttpRouter::default();
//! router.register(Method::GET, "/users/:id", "users", "get", users_stack())?;
//! HttpServer::new(router)
//!     .run_with_shutdown("0.0.0.0:8080", ShutdownSignal::with_os_signals())
//!     .await?;
//! ```

#![doc(html_root_url = "https://docs.rs/portico-server/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod buffer_pool;
mod channel_router;
mod channel_server;
mod defaults;
mod error;
pub mod frame;
mod gateway;
mod health;
mod http_router;
mod http_server;
mod inbound_call;
pub mod shutdown;

pub use buffer_pool::{BufferPool, PooledBuffer};
pub use channel_router::{parse_method, ChannelEndpoint, ChannelRouter, PostResponseFn};
pub use channel_server::ChannelServer;
pub use defaults::EndpointDefaults;
pub use error::{ServerError, ServerResult};
pub use frame::{CallFrame, ErrorFrame, Frame, FrameError, ResponseFrame};
pub use gateway::Gateway;
pub use health::{Health, HealthReport};
pub use http_router::{HttpRouter, RouterEndpoint, METHOD_NOT_ALLOWED_ENDPOINT, NOT_FOUND_ENDPOINT};
pub use http_server::HttpServer;
pub use inbound_call::{CallState, FINISH_MESSAGE as CHANNEL_FINISH_MESSAGE};
pub use shutdown::{ConnectionTracker, ShutdownSignal};
