//! Process-wide structured logging.
//!
//! Installs a `tracing-subscriber` registry with either JSON (production) or
//! pretty (development) output. Per-target levels ("sub-logger levels") are
//! appended to the base level as `EnvFilter` directives, so
//! `{"portico_server::channel": "warn"}` quiets only the channel server.
//!
//! # Example
//!
//! ```rust,ignore
//! use portico_telemetry::logging::{init_logging, LogConfig};
//!
//! let config = LogConfig::default().with_target_level("portico_client", "debug");
//! init_logging(&config)?;
//! ```

use std::collections::BTreeMap;

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use crate::error::TelemetryError;
use crate::TelemetryResult;

/// Logging configuration.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Whether logging is enabled.
    pub enabled: bool,

    /// Base log level (e.g., "info", "debug", "warn").
    pub level: String,

    /// Per-target level overrides.
    pub target_levels: BTreeMap<String, String>,

    /// Whether to output JSON format.
    pub json_format: bool,

    /// Whether to include file/line info.
    pub file_line_info: bool,

    /// Whether to include target (module path).
    pub include_target: bool,

    /// Service name for log fields.
    pub service_name: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            level: "info".to_string(),
            target_levels: BTreeMap::new(),
            json_format: true,
            file_line_info: false,
            include_target: true,
            service_name: "portico".to_string(),
        }
    }
}

impl LogConfig {
    /// Creates a development configuration with human-readable output.
    #[must_use]
    pub fn development() -> Self {
        Self {
            level: "debug".to_string(),
            json_format: false,
            file_line_info: true,
            ..Self::default()
        }
    }

    /// Adds a level override for one target.
    #[must_use]
    pub fn with_target_level(mut self, target: impl Into<String>, level: impl Into<String>) -> Self {
        self.target_levels.insert(target.into(), level.into());
        self
    }

    /// Renders the `EnvFilter` directive string.
    #[must_use]
    pub fn filter_directives(&self) -> String {
        let mut directives = vec![self.level.clone()];
        directives.extend(
            self.target_levels
                .iter()
                .map(|(target, level)| format!("{target}={level}")),
        );
        directives.join(",")
    }
}

/// Initializes the logging subsystem.
///
/// # Errors
///
/// Returns `TelemetryError::LoggingInit` if a directive is invalid or a
/// global subscriber is already installed.
pub fn init_logging(config: &LogConfig) -> TelemetryResult<()> {
    if !config.enabled {
        return Ok(());
    }

    let filter = create_env_filter(&config.filter_directives())?;

    if config.json_format {
        let fmt_layer = tracing_subscriber::fmt::layer()
            .json()
            .with_file(config.file_line_info)
            .with_line_number(config.file_line_info)
            .with_target(config.include_target)
            .with_filter(filter);

        tracing_subscriber::registry()
            .with(fmt_layer)
            .try_init()
            .map_err(|e| TelemetryError::LoggingInit(e.to_string()))?;
    } else {
        let fmt_layer = tracing_subscriber::fmt::layer()
            .pretty()
            .with_file(config.file_line_info)
            .with_line_number(config.file_line_info)
            .with_target(config.include_target)
            .with_filter(filter);

        tracing_subscriber::registry()
            .with(fmt_layer)
            .try_init()
            .map_err(|e| TelemetryError::LoggingInit(e.to_string()))?;
    }

    Ok(())
}

/// Creates an env filter from a directive string.
///
/// # Errors
///
/// Returns error if the filter string is invalid.
pub fn create_env_filter(filter: &str) -> TelemetryResult<EnvFilter> {
    EnvFilter::try_new(filter)
        .map_err(|e| TelemetryError::LoggingInit(format!("Invalid log level: {e}")))
}

/// Well-known log field names.
pub mod fields {
    /// Request UUID.
    pub const REQUEST_UUID: &str = "requestUUID";

    /// Endpoint identifier.
    pub const ENDPOINT_ID: &str = "endpointID";

    /// Endpoint handler identifier.
    pub const HANDLER_ID: &str = "endpointHandler";

    /// Trace identifier of the request span.
    pub const TRACE_ID: &str = "trace.traceId";

    /// Span identifier of the request span.
    pub const SPAN_ID: &str = "trace.span";

    /// Whether the request span is sampled.
    pub const TRACE_SAMPLED: &str = "trace.sampled";

    /// Outbound call duration.
    pub const CLIENT_RESPONSE_DURATION: &str = "client.response.duration";

    /// Outbound client protocol.
    pub const CLIENT_TYPE: &str = "client.type";

    /// Prefix for inbound request headers.
    pub const REQUEST_HEADER_PREFIX: &str = "Request-Header";

    /// Prefix for endpoint response headers.
    pub const RESPONSE_HEADER_PREFIX: &str = "Response-Header";

    /// Response status code.
    pub const STATUS_CODE: &str = "statusCode";

    /// Error description.
    pub const ERROR: &str = "error";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = LogConfig::default();
        assert!(config.enabled);
        assert!(config.json_format);
        assert_eq!(config.filter_directives(), "info");
    }

    #[test]
    fn test_development_config() {
        let config = LogConfig::development();
        assert!(!config.json_format);
        assert!(config.file_line_info);
        assert_eq!(config.level, "debug");
    }

    #[test]
    fn test_target_levels_become_directives() {
        let config = LogConfig::default()
            .with_target_level("portico_server", "warn")
            .with_target_level("portico_client", "debug");
        assert_eq!(
            config.filter_directives(),
            "info,portico_client=debug,portico_server=warn"
        );
        assert!(create_env_filter(&config.filter_directives()).is_ok());
    }

    #[test]
    fn test_invalid_level_rejected() {
        assert!(create_env_filter("info,portico=notalevel").is_err());
    }

    #[test]
    fn test_disabled_logging() {
        let config = LogConfig {
            enabled: false,
            ..Default::default()
        };
        assert!(init_logging(&config).is_ok());
    }
}
