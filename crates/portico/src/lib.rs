//! # Portico
//!
//! **Edge gateway framework for HTTP and channel-protocol services**
//!
//! Portico gives every inbound request the same treatment regardless of
//! transport:
//!
//! - **Request context** carrying the request UUID, deadline, scope tags
//!   and accumulated log fields
//! - **Ordered middleware stacks** that wrap a single handler and may
//!   abort a request before it reaches the handler
//! - **Exactly one response** per request, with one finish log line and
//!   one set of endpoint metrics
//! - **Outbound call helpers** with timeouts, retries and status mapping
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use portico::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ConfigLoader::new().with_defaults().with_env_prefix("PORTICO").load()?.gateway()?;
//!     let _telemetry = portico::telemetry::init_telemetry(TelemetryConfig::default())?;
//!
//!     let mut gateway = Gateway::new(config)?;
//!     gateway.http_mut().register(
//!         http::Method::GET,
//!         "/users/:id",
//!         "users",
//!         "get",
//!         HttpStack::bare(handler_fn(|ctx, req, res| {
//!             let id = req.params().get("id").unwrap_or_default().to_string();
//!             Box::pin(async move {
//!                 res.write_json(http::StatusCode::OK, None, &serde_json::json!({ "id": id }));
//!                 ctx
//!             })
//!         })),
//!     )?;
//!
//!     gateway.run_with_shutdown(ShutdownSignal::with_os_signals()).await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Request flow
//!
//! ```text
//! HTTP:    accept → route → context → stack (members → handler) → flush → finish log
//! Channel: accept → frame → headers → body → stack → response headers → body → finish log
//! ```

#![doc(html_root_url = "https://docs.rs/portico/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

// Request context, requests, responses and wire types
pub use portico_core as core;

// HTTP and channel servers
pub use portico_server as server;

// Middleware stacks
pub use portico_middleware as middleware;

// Path routing
pub use portico_router as router;

// Logging, metrics and tracing
pub use portico_telemetry as telemetry;

// Configuration loading
pub use portico_config as config;

// Outbound call helpers
pub use portico_client as client;

/// Prelude module for convenient imports.
///
/// # Example
///
/// ```rust,ignore
/// use portico::prelude::*;
/// ```
pub mod prelude {
    pub use portico_core::{
        ChannelHeaders, ContextLogger, EndpointInfo, GatewayError, GatewayResult, LogField,
        RequestContext, ServerHttpRequest, ServerHttpResponse, SystemError, SystemErrorCode,
    };

    pub use portico_middleware::{
        channel_handler_fn, handler_fn, ChannelMember, ChannelRequest, ChannelResponse,
        ChannelStack, HttpMember, HttpStack, SharedState,
    };

    pub use portico_server::{
        ChannelRouter, ChannelServer, Gateway, Health, HttpRouter, HttpServer, ShutdownSignal,
    };

    pub use portico_config::{ConfigLoader, GatewayConfig};

    pub use portico_telemetry::{Scope, TelemetryConfig};

    pub use portico_client::{CallHelper, ClientOptions, RpcCode, RpcStatus};
}
