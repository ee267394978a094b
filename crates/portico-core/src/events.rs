//! Capture events for deep request inspection.
//!
//! When capture is turned on for a request (see
//! [`RequestContext::with_capture`](crate::RequestContext::with_capture)),
//! inbound and outbound exchanges are recorded into the request's
//! [`EventContainer`]. At finish the container is handed to the configured
//! [`CaptureHooks::handler`].

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;

/// Event name of outbound channel-protocol calls.
pub const EVENT_CHANNEL_OUTGOING: &str = "event-channel-outgoing";
/// Event name of outbound gRPC calls.
pub const EVENT_GRPC_OUTGOING: &str = "event-grpc-outgoing";
/// Event name of inbound HTTP requests.
pub const EVENT_HTTP_INCOMING: &str = "event-http-incoming";
/// Event name of outbound HTTP requests.
pub const EVENT_HTTP_OUTGOING: &str = "event-http-outgoing";

/// An outbound RPC exchange with encoded payloads.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RpcCapture {
    /// Procedure name.
    pub method_name: String,
    /// Target service name.
    pub service_name: String,
    /// Request headers.
    pub req_headers: BTreeMap<String, String>,
    /// Encoded request payload.
    pub req: Bytes,
    /// Response headers.
    pub rsp_headers: BTreeMap<String, String>,
    /// Encoded response payload.
    pub rsp: Bytes,
    /// Whether the call succeeded.
    pub success: bool,
}

/// An HTTP exchange.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HttpCapture {
    /// Request URL.
    pub req_url: String,
    /// Request method.
    pub req_method: String,
    /// Request headers, all values per name.
    pub req_headers: BTreeMap<String, Vec<String>>,
    /// Request body.
    pub req_body: Bytes,
    /// Response status code.
    pub rsp_status_code: u16,
    /// Response headers, all values per name.
    pub rsp_headers: BTreeMap<String, Vec<String>>,
    /// Response body.
    pub rsp_body: Bytes,
}

impl HttpCapture {
    /// Collects a header map into the capture's name → values layout.
    #[must_use]
    pub fn headers_of(map: &http::HeaderMap) -> BTreeMap<String, Vec<String>> {
        let mut out: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for (name, value) in map {
            out.entry(name.as_str().to_string())
                .or_default()
                .push(String::from_utf8_lossy(value.as_bytes()).into_owned());
        }
        out
    }
}

/// A captured request/response pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureEvent {
    /// Outbound channel-protocol call.
    ChannelOutgoing(RpcCapture),
    /// Outbound gRPC call.
    GrpcOutgoing(RpcCapture),
    /// Inbound HTTP request handled by an endpoint.
    HttpIncoming {
        /// Endpoint id, if known.
        endpoint_name: Option<String>,
        /// Handler id, if known.
        handler_name: Option<String>,
        /// The exchange.
        capture: HttpCapture,
    },
    /// Outbound HTTP request.
    HttpOutgoing {
        /// Client id, if known.
        client_id: Option<String>,
        /// Client method, if known.
        client_endpoint: Option<String>,
        /// The exchange.
        capture: HttpCapture,
    },
}

impl CaptureEvent {
    /// Returns the event name.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::ChannelOutgoing(_) => EVENT_CHANNEL_OUTGOING,
            Self::GrpcOutgoing(_) => EVENT_GRPC_OUTGOING,
            Self::HttpIncoming { .. } => EVENT_HTTP_INCOMING,
            Self::HttpOutgoing { .. } => EVENT_HTTP_OUTGOING,
        }
    }
}

/// Events produced during one request. Shared by every derived context.
#[derive(Debug, Default)]
pub struct EventContainer {
    events: Mutex<Vec<CaptureEvent>>,
}

impl EventContainer {
    /// Creates an empty container.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records an event.
    pub fn push(&self, event: CaptureEvent) {
        self.events.lock().push(event);
    }

    /// Returns a snapshot of the recorded events.
    #[must_use]
    pub fn events(&self) -> Vec<CaptureEvent> {
        self.events.lock().clone()
    }

    /// Removes and returns every recorded event.
    pub fn drain(&self) -> Vec<CaptureEvent> {
        std::mem::take(&mut *self.events.lock())
    }

    /// Returns the number of recorded events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    /// Returns true if nothing was recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }
}

/// Decides whether a request on `(endpoint, handler)` is captured.
pub type EnableCaptureFn = Arc<dyn Fn(&str, &str) -> bool + Send + Sync>;

/// Receives the events of a captured request at finish.
pub type CaptureHandlerFn = Arc<dyn Fn(Vec<CaptureEvent>) + Send + Sync>;

/// Gateway-wide capture configuration.
#[derive(Clone)]
pub struct CaptureHooks {
    /// Sampling decision, consulted once per inbound request.
    pub enable: EnableCaptureFn,
    /// Sink for the recorded events.
    pub handler: CaptureHandlerFn,
}

impl CaptureHooks {
    /// Hooks that never capture.
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            enable: Arc::new(|_, _| false),
            handler: Arc::new(|_| {}),
        }
    }

    /// Returns true if `(endpoint, handler)` should be captured.
    #[must_use]
    pub fn should_capture(&self, endpoint: &str, handler: &str) -> bool {
        (self.enable)(endpoint, handler)
    }
}

impl Default for CaptureHooks {
    fn default() -> Self {
        Self::disabled()
    }
}

impl fmt::Debug for CaptureHooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CaptureHooks").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_names() {
        assert_eq!(
            CaptureEvent::ChannelOutgoing(RpcCapture::default()).name(),
            "event-channel-outgoing"
        );
        assert_eq!(
            CaptureEvent::GrpcOutgoing(RpcCapture::default()).name(),
            "event-grpc-outgoing"
        );
        let incoming = CaptureEvent::HttpIncoming {
            endpoint_name: Some("bar".into()),
            handler_name: None,
            capture: HttpCapture::default(),
        };
        assert_eq!(incoming.name(), "event-http-incoming");
    }

    #[test]
    fn test_container_push_and_drain() {
        let container = EventContainer::new();
        assert!(container.is_empty());

        container.push(CaptureEvent::GrpcOutgoing(RpcCapture {
            method_name: "Echo".into(),
            success: true,
            ..RpcCapture::default()
        }));
        assert_eq!(container.len(), 1);
        assert_eq!(container.events().len(), 1);

        let drained = container.drain();
        assert_eq!(drained.len(), 1);
        assert!(container.is_empty());
    }

    #[test]
    fn test_headers_of_keeps_every_value() {
        let mut map = http::HeaderMap::new();
        map.append("x-a", "1".parse().unwrap());
        map.append("x-a", "2".parse().unwrap());
        let headers = HttpCapture::headers_of(&map);
        assert_eq!(headers["x-a"], vec!["1", "2"]);
    }

    #[test]
    fn test_disabled_hooks() {
        let hooks = CaptureHooks::default();
        assert!(!hooks.should_capture("bar", "foo"));
    }
}
