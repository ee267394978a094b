//! Collaborators shared by every endpoint a gateway registers.

use portico_config::GatewayConfig;
use portico_core::{CaptureHooks, ContextLogger, EndpointInfo, RequestHeaderKeys};
use portico_telemetry::Scope;

/// Logger, scope, header names and capture hooks handed to each new
/// [`EndpointInfo`].
#[derive(Debug, Clone)]
pub struct EndpointDefaults {
    /// Logger for framework lines.
    pub logger: ContextLogger,
    /// Root measurement scope.
    pub scope: Scope,
    /// Inbound header names.
    pub header_keys: RequestHeaderKeys,
    /// Capture sampling and sink.
    pub capture: CaptureHooks,
}

impl Default for EndpointDefaults {
    fn default() -> Self {
        Self {
            logger: ContextLogger::tracing(),
            scope: Scope::new(),
            header_keys: RequestHeaderKeys::default(),
            capture: CaptureHooks::disabled(),
        }
    }
}

impl EndpointDefaults {
    /// Derives the defaults from the gateway configuration.
    #[must_use]
    pub fn from_config(config: &GatewayConfig) -> Self {
        Self {
            logger: ContextLogger::tracing()
                .with_skip_framework_logs(config.logging.skip_framework_logs),
            header_keys: config.header_keys(),
            ..Self::default()
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

    /// Sets the capture hooks.
    #[must_use]
    pub fn with_capture(mut self, capture: CaptureHooks) -> Self {
        self.capture = capture;
        self
    }

    /// Builds the descriptor of one endpoint.
    #[must_use]
    pub fn endpoint(
        &self,
        endpoint_id: impl Into<String>,
        handler_id: impl Into<String>,
        method: impl Into<String>,
    ) -> EndpointInfo {
        EndpointInfo::new(endpoint_id, handler_id, method)
            .with_logger(self.logger.clone())
            .with_scope(self.scope.clone())
            .with_header_keys(self.header_keys.clone())
            .with_capture(self.capture.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_header_keys_flow_into_endpoints() {
        let mut config = GatewayConfig::default();
        config.http.request_uuid_header_key = "x-request-id".to_string();
        config.logging.skip_framework_logs = true;

        let info = EndpointDefaults::from_config(&config).endpoint("bar", "normal", "GET");
        assert_eq!(info.header_keys.request_uuid, "x-request-id");
        assert!(info.logger.skips_framework_logs());
        assert_eq!(info.qualified_name(), "bar.normal");
    }
}
