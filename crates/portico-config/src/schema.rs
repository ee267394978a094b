//! Typed configuration sections.
//!
//! Keys are camelCase, matching the dotted keys read through
//! [`StaticConfig`](crate::StaticConfig): `http.requestUUIDHeaderKey`,
//! `router.whitelistedPaths`, `shutdown.timeoutSecs` and so on.
//!
//! Every section rejects unknown fields. The root does not, so the same
//! files can carry application keys (downstream clients, feature flags)
//! next to the gateway's own sections.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::time::Duration;

use portico_core::RequestHeaderKeys;
use portico_telemetry::{LogConfig, MetricsConfig, ServiceIdentity, TelemetryConfig, TracingConfig};
use serde::{Deserialize, Serialize};

use crate::ConfigError;

/// Service identity.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct ServiceSection {
    /// Service name, reported by `/health` and on every metric.
    #[serde(default = "default_service_name")]
    pub name: String,

    /// Service version.
    #[serde(default = "default_version")]
    pub version: String,

    /// Deployment environment.
    #[serde(default = "default_env")]
    pub env: String,
}

impl Default for ServiceSection {
    fn default() -> Self {
        Self {
            name: default_service_name(),
            version: default_version(),
            env: default_env(),
        }
    }
}

fn default_service_name() -> String {
    "portico".to_string()
}

fn default_version() -> String {
    "0.1.0".to_string()
}

fn default_env() -> String {
    "production".to_string()
}

/// Inbound HTTP settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct HttpSection {
    /// Bind address.
    #[serde(default = "default_http_addr")]
    pub addr: String,

    /// Header carrying the caller's request UUID.
    #[serde(default = "default_uuid_header", rename = "requestUUIDHeaderKey")]
    pub request_uuid_header_key: String,

    /// Header carrying the api environment.
    #[serde(default = "default_api_env_header")]
    pub api_environment_header_key: String,

    /// Header marking shadow requests.
    #[serde(default = "default_shadow_header")]
    pub shadow_request_header_key: String,
}

impl Default for HttpSection {
    fn default() -> Self {
        Self {
            addr: default_http_addr(),
            request_uuid_header_key: default_uuid_header(),
            api_environment_header_key: default_api_env_header(),
            shadow_request_header_key: default_shadow_header(),
        }
    }
}

fn default_http_addr() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_uuid_header() -> String {
    "x-request-uuid".to_string()
}

fn default_api_env_header() -> String {
    "x-api-environment".to_string()
}

fn default_shadow_header() -> String {
    "x-shadow-request".to_string()
}

/// Shadow request handling.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct ShadowRequestSection {
    /// Tag shadow requests with `env=shadow`.
    #[serde(default)]
    pub enabled: bool,
}

/// Inbound channel-protocol settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct ChannelSection {
    /// Bind address.
    #[serde(default = "default_channel_addr")]
    pub addr: String,

    /// Buffers kept by the framing pool.
    #[serde(default = "default_pool_size")]
    pub buffer_pool_size: usize,

    /// Largest frame payload accepted, in bytes.
    #[serde(default = "default_max_frame")]
    pub max_frame_size: usize,
}

impl Default for ChannelSection {
    fn default() -> Self {
        Self {
            addr: default_channel_addr(),
            buffer_pool_size: default_pool_size(),
            max_frame_size: default_max_frame(),
        }
    }
}

fn default_channel_addr() -> String {
    "0.0.0.0:4040".to_string()
}

const fn default_pool_size() -> usize {
    64
}

const fn default_max_frame() -> usize {
    16 * 1024 * 1024
}

/// HTTP router settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct RouterSection {
    /// Path prefixes where static and param routes may overlap.
    #[serde(default)]
    pub whitelisted_paths: Vec<String>,
}

/// Log output format.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// JSON lines.
    #[default]
    Json,
    /// Human-readable output.
    Pretty,
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct LoggingSection {
    /// Base level.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format.
    #[serde(default)]
    pub format: LogFormat,

    /// Defer framework lines to the request's finish record.
    #[serde(default)]
    pub skip_framework_logs: bool,

    /// Per-target levels, e.g. `hyper: warn`.
    #[serde(default)]
    pub levels: BTreeMap<String, String>,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
            skip_framework_logs: false,
            levels: BTreeMap::new(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Metrics settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct MetricsSection {
    /// Install the Prometheus recorder.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Standalone scrape listener; `/metrics` on the gateway always works.
    #[serde(default)]
    pub listen_addr: Option<String>,

    /// Buckets for `*latency-hist`, in seconds.
    #[serde(default = "default_latency_buckets")]
    pub latency_buckets: Vec<f64>,
}

impl Default for MetricsSection {
    fn default() -> Self {
        Self {
            enabled: true,
            listen_addr: None,
            latency_buckets: default_latency_buckets(),
        }
    }
}

fn default_latency_buckets() -> Vec<f64> {
    portico_telemetry::metrics::DEFAULT_LATENCY_BUCKETS.to_vec()
}

/// Tracing settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct TracingSection {
    /// Export spans over OTLP.
    #[serde(default)]
    pub enabled: bool,

    /// OTLP endpoint.
    #[serde(default = "default_otlp_endpoint")]
    pub otlp_endpoint: String,

    /// Sampling ratio in `0.0..=1.0`.
    #[serde(default = "default_sampling_ratio")]
    pub sampling_ratio: f64,
}

impl Default for TracingSection {
    fn default() -> Self {
        Self {
            enabled: false,
            otlp_endpoint: default_otlp_endpoint(),
            sampling_ratio: default_sampling_ratio(),
        }
    }
}

fn default_otlp_endpoint() -> String {
    "http://localhost:4317".to_string()
}

const fn default_sampling_ratio() -> f64 {
    1.0
}

/// Shutdown settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct ShutdownSection {
    /// How long in-flight connections may drain.
    #[serde(default = "default_shutdown_timeout")]
    pub timeout_secs: u64,
}

impl Default for ShutdownSection {
    fn default() -> Self {
        Self {
            timeout_secs: default_shutdown_timeout(),
        }
    }
}

const fn default_shutdown_timeout() -> u64 {
    10
}

const fn default_true() -> bool {
    true
}

/// The gateway's own configuration sections.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GatewayConfig {
    /// Service identity.
    #[serde(default)]
    pub service: ServiceSection,
    /// Inbound HTTP.
    #[serde(default)]
    pub http: HttpSection,
    /// Shadow request handling.
    #[serde(default)]
    pub shadow_request_handling: ShadowRequestSection,
    /// Inbound channel protocol.
    #[serde(default)]
    pub channel: ChannelSection,
    /// HTTP router.
    #[serde(default)]
    pub router: RouterSection,
    /// Logging.
    #[serde(default)]
    pub logging: LoggingSection,
    /// Metrics.
    #[serde(default)]
    pub metrics: MetricsSection,
    /// Tracing.
    #[serde(default)]
    pub tracing: TracingSection,
    /// Shutdown.
    #[serde(default)]
    pub shutdown: ShutdownSection,
}

impl GatewayConfig {
    /// Local development preset: debug level, pretty output.
    #[must_use]
    pub fn development() -> Self {
        Self {
            service: ServiceSection {
                env: "development".to_string(),
                ..ServiceSection::default()
            },
            logging: LoggingSection {
                level: "debug".to_string(),
                format: LogFormat::Pretty,
                ..LoggingSection::default()
            },
            ..Self::default()
        }
    }

    /// Production preset: JSON logs and framework-log suppression.
    #[must_use]
    pub fn production() -> Self {
        Self {
            logging: LoggingSection {
                skip_framework_logs: true,
                ..LoggingSection::default()
            },
            ..Self::default()
        }
    }

    /// Checks cross-field constraints serde cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_addr("http.addr", &self.http.addr)?;
        check_addr("channel.addr", &self.channel.addr)?;
        if let Some(addr) = &self.metrics.listen_addr {
            check_addr("metrics.listenAddr", addr)?;
        }

        if !(0.0..=1.0).contains(&self.tracing.sampling_ratio) {
            return Err(ConfigError::invalid_value(
                "tracing.samplingRatio",
                "must be between 0.0 and 1.0",
            ));
        }

        for (key, level) in std::iter::once(("logging.level", &self.logging.level))
            .chain(self.logging.levels.values().map(|l| ("logging.levels", l)))
        {
            if !matches!(
                level.to_ascii_lowercase().as_str(),
                "trace" | "debug" | "info" | "warn" | "error" | "off"
            ) {
                return Err(ConfigError::invalid_value(key, format!("unknown level {level}")));
            }
        }

        if let Some(path) = self.router.whitelisted_paths.iter().find(|p| !p.starts_with('/')) {
            return Err(ConfigError::invalid_value(
                "router.whitelistedPaths",
                format!("{path} does not start with /"),
            ));
        }

        if self.channel.buffer_pool_size == 0 {
            return Err(ConfigError::invalid_value("channel.bufferPoolSize", "must be positive"));
        }

        Ok(())
    }

    /// Header names the HTTP request wrapper reads.
    #[must_use]
    pub fn header_keys(&self) -> RequestHeaderKeys {
        RequestHeaderKeys {
            request_uuid: self.http.request_uuid_header_key.clone(),
            api_environment: self.http.api_environment_header_key.clone(),
            shadow_request: self.http.shadow_request_header_key.clone(),
            shadow_enabled: self.shadow_request_handling.enabled,
        }
    }

    /// Drain budget for graceful shutdown.
    #[must_use]
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown.timeout_secs)
    }

    /// Subscriber settings for [`portico_telemetry::init_logging`].
    #[must_use]
    pub fn log_config(&self) -> LogConfig {
        LogConfig {
            level: self.logging.level.clone(),
            target_levels: self.logging.levels.clone(),
            json_format: self.logging.format == LogFormat::Json,
            file_line_info: self.logging.format == LogFormat::Pretty,
            service_name: self.service.name.clone(),
            ..LogConfig::default()
        }
    }

    /// Recorder settings for [`portico_telemetry::init_metrics`].
    #[must_use]
    pub fn metrics_config(&self) -> MetricsConfig {
        MetricsConfig {
            enabled: self.metrics.enabled,
            listen_addr: self.metrics.listen_addr.clone(),
            service_name: self.service.name.clone(),
            latency_buckets: self.metrics.latency_buckets.clone(),
        }
    }

    /// Exporter settings for [`portico_telemetry::init_tracing`].
    #[must_use]
    pub fn tracing_config(&self) -> TracingConfig {
        TracingConfig {
            enabled: self.tracing.enabled,
            otlp_endpoint: self.tracing.otlp_endpoint.clone(),
            service_name: self.service.name.clone(),
            service_version: self.service.version.clone(),
            environment: self.service.env.clone(),
            sample_ratio: self.tracing.sampling_ratio,
        }
    }

    /// Everything [`portico_telemetry::init_telemetry`] needs.
    #[must_use]
    pub fn telemetry_config(&self) -> TelemetryConfig {
        TelemetryConfig::for_service(ServiceIdentity {
            name: self.service.name.clone(),
            version: self.service.version.clone(),
            env: self.service.env.clone(),
        })
        .with_logging(self.log_config())
        .with_metrics(self.metrics_config())
        .with_tracing(self.tracing_config())
    }
}

fn check_addr(key: &str, addr: &str) -> Result<(), ConfigError> {
    addr.parse::<SocketAddr>()
        .map(|_| ())
        .map_err(|_| ConfigError::invalid_value(key, format!("invalid socket address: {addr}")))
}
