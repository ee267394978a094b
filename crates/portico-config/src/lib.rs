//! Layered static configuration for Portico.
//!
//! Configuration is read once at boot from a stack of sources and then
//! frozen:
//!
//! - defaults for every gateway section
//! - TOML, JSON and YAML files (format by extension), optional files and
//!   in-memory strings, merged key by key
//! - `.env` files via `dotenvy`
//! - `PREFIX__SECTION__KEY` environment overrides
//!
//! The result is a [`StaticConfig`]: dotted-key getters over the merged
//! tree (`router.whitelistedPaths`, `http.requestUUIDHeaderKey`) plus
//! [`GatewayConfig`], the strongly typed view of the gateway's own
//! sections.
//!
//! # Example
//!
//! ```no_run
//! use portico_config::ConfigLoader;
//!
//! # fn main() -> Result<(), portico_config::ConfigError> {
//! let config = ConfigLoader::new()
//!     .with_dotenv()?
//!     .with_file("config/gateway.yaml")?
//!     .with_env_prefix("PORTICO")
//!     .load()?;
//! config.freeze();
//!
//! let gateway = config.gateway()?;
//! let keys = gateway.header_keys();
//! # let _ = keys;
//! # Ok(())
//! # }
//! ```
//!
//! # File format
//!
//! ```yaml
//! service:
//!   name: edge-gateway
//! http:
//!   addr: 0.0.0.0:8080
//!   requestUUIDHeaderKey: X-Request-Id
//! shadowRequestHandling:
//!   enabled: true
//! router:
//!   whitelistedPaths: [/legacy]
//! logging:
//!   level: info
//!   skipFrameworkLogs: true
//!   levels:
//!     hyper: warn
//! shutdown:
//!   timeoutSecs: 10
//! ```

#![doc(html_root_url = "https://docs.rs/portico-config/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

mod error;
mod loader;
mod schema;
mod static_config;
mod tree;

pub use error::ConfigError;
pub use loader::ConfigLoader;
pub use schema::*;
pub use static_config::StaticConfig;
