//! # Portico Core
//!
//! Request-scoped primitives shared by every Portico gateway protocol.
//!
//! - [`RequestContext`]: immutable, cheaply cloned per-request context
//!   carrying identity, scope tags, deadlines and accumulated log fields
//! - [`ContextLogger`]: logger that prefixes context fields and can defer
//!   framework lines to the finish record
//! - [`GatewayError`] and [`ErrorBuilder`]: located, classified errors
//! - [`ServerHttpRequest`] and [`ServerHttpResponse`]: the inbound HTTP
//!   request wrapper and its buffered response
//! - [`wire`]: the compact binary value codec used by the channel protocol
//! - [`json::peek`]: key-path lookups over raw JSON bytes

#![doc(html_root_url = "https://docs.rs/portico-core/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

mod context;
mod endpoint;
mod error;
mod events;
pub mod fixtures;
mod headers;
mod http_request;
mod http_response;
pub mod json;
mod log;
mod logger;
pub mod query;
mod system_error;
pub mod wire;

pub use context::{scope_tags, RequestContext, TimeoutAndRetryOptions, DEFAULT_BACK_OFF};
pub use endpoint::{EndpointInfo, RequestHeaderKeys};
pub use error::{
    BoxError, ErrorBuilder, ErrorKind, GatewayError, GatewayResult, LOG_FIELD_ERROR_LOCATION,
    LOG_FIELD_ERROR_TYPE,
};
pub use events::{
    CaptureEvent, CaptureHandlerFn, CaptureHooks, EnableCaptureFn, EventContainer, HttpCapture,
    RpcCapture, EVENT_CHANNEL_OUTGOING, EVENT_GRPC_OUTGOING, EVENT_HTTP_INCOMING,
    EVENT_HTTP_OUTGOING,
};
pub use headers::{ChannelHeaders, Header, HeaderError, HttpHeaders};
pub use http_request::{
    empty_body, full_body, request_uuid_from, Rejected, RequestBody, ServerHttpRequest,
};
pub use http_response::{header_fields, ServerHttpResponse, FINISH_MESSAGE};
pub use json::{JsonType, PeekError};
pub use log::{render_fields, LogField, LogLevel};
pub use logger::{ContextLogger, LogRecord, LogSink, TracingSink};
pub use query::{QueryParseError, QueryValue, QueryValues};
pub use system_error::{SystemError, SystemErrorCode};

/// Re-exported so handlers can name path parameters without depending on
/// the router crate.
pub use portico_router::Params;
