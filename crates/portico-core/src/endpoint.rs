//! Endpoint descriptors shared by the inbound protocols.

use portico_telemetry::Scope;

use crate::events::CaptureHooks;
use crate::logger::ContextLogger;

/// Header names the framework reads from inbound HTTP requests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestHeaderKeys {
    /// Header carrying the caller's request UUID.
    pub request_uuid: String,
    /// Header carrying the caller's api environment.
    pub api_environment: String,
    /// Header marking shadow requests.
    pub shadow_request: String,
    /// Whether shadow requests are tagged `env=shadow`.
    pub shadow_enabled: bool,
}

impl Default for RequestHeaderKeys {
    fn default() -> Self {
        Self {
            request_uuid: "x-request-uuid".to_string(),
            api_environment: "x-api-environment".to_string(),
            shadow_request: "x-shadow-request".to_string(),
            shadow_enabled: false,
        }
    }
}

/// Identity and collaborators of one registered endpoint.
///
/// Built once at registration and shared by every request the endpoint
/// serves.
#[derive(Debug, Clone)]
pub struct EndpointInfo {
    /// Endpoint id, e.g. `bar`.
    pub endpoint_id: String,
    /// Handler id, e.g. `normal`.
    pub handler_id: String,
    /// Method: an HTTP verb, or `Service::method` on the channel protocol.
    pub method: String,
    /// Logger for framework lines.
    pub logger: ContextLogger,
    /// Root measurement scope; request tags are merged on top.
    pub scope: Scope,
    /// Inbound header names.
    pub header_keys: RequestHeaderKeys,
    /// Capture sampling and sink.
    pub capture: CaptureHooks,
}

impl EndpointInfo {
    /// Creates a descriptor with a tracing logger and an untagged scope.
    #[must_use]
    pub fn new(
        endpoint_id: impl Into<String>,
        handler_id: impl Into<String>,
        method: impl Into<String>,
    ) -> Self {
        Self {
            endpoint_id: endpoint_id.into(),
            handler_id: handler_id.into(),
            method: method.into(),
            logger: ContextLogger::tracing(),
            scope: Scope::new(),
            header_keys: RequestHeaderKeys::default(),
            capture: CaptureHooks::disabled(),
        }
    }

    /// Sets the logger.
    #[must_use]
    pub fn with_logger(mut self, logger: ContextLogger) -> Self {
        self.logger = logger;
        self
    }

    /// Sets the root scope.
    #[must_use]
    pub fn with_scope(mut self, scope: Scope) -> Self {
        self.scope = scope;
        self
    }

    /// Sets the inbound header names.
    #[must_use]
    pub fn with_header_keys(mut self, keys: RequestHeaderKeys) -> Self {
        self.header_keys = keys;
        self
    }

    /// Sets the capture hooks.
    #[must_use]
    pub fn with_capture(mut self, capture: CaptureHooks) -> Self {
        self.capture = capture;
        self
    }

    /// Returns `endpoint.handler`, the span and log name of the endpoint.
    #[must_use]
    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.endpoint_id, self.handler_id)
    }
}
