//! A gateway: one HTTP server and one channel server sharing a config,
//! a health flag and a shutdown signal.
//!
//! # Example
//!
//! ```rust,ignore
//! use portico_config::GatewayConfig;
//! use portico_server::{Gateway, ShutdownSignal};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut gateway = Gateway::new(GatewayConfig::development())?;
//!     gateway.http_mut().register(Method::GET, "/users/:id", "users", "get", users_stack())?;
//!     gateway.run_with_shutdown(ShutdownSignal::with_os_signals()).await?;
//!     Ok(())
//! }
//! ```

use portico_config::GatewayConfig;

use crate::channel_router::ChannelRouter;
use crate::channel_server::ChannelServer;
use crate::defaults::EndpointDefaults;
use crate::error::ServerResult;
use crate::health::Health;
use crate::http_router::HttpRouter;
use crate::http_server::HttpServer;
use crate::shutdown::ShutdownSignal;

/// Both inbound servers of one service.
#[derive(Debug)]
pub struct Gateway {
    config: GatewayConfig,
    http: HttpRouter,
    channel: ChannelRouter,
    health: Health,
}

impl Gateway {
    /// Validates `config` and builds empty routers with the built-in
    /// HTTP routes registered.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn new(config: GatewayConfig) -> ServerResult<Self> {
        config.validate()?;
        let health = Health::new(config.service.name.clone());
        let http = HttpRouter::from_config(&config, &health)?;
        let channel = ChannelRouter::new(EndpointDefaults::from_config(&config));
        Ok(Self {
            config,
            http,
            channel,
            health,
        })
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    /// Returns the HTTP router for registration.
    pub fn http_mut(&mut self) -> &mut HttpRouter {
        &mut self.http
    }

    /// Returns the channel router for registration.
    pub fn channel_mut(&mut self) -> &mut ChannelRouter {
        &mut self.channel
    }

    /// Returns the shared health flag.
    #[must_use]
    pub fn health(&self) -> &Health {
        &self.health
    }

    /// Runs both servers until `shutdown` fires and both have drained.
    ///
    /// The health check turns degraded as soon as shutdown starts.
    ///
    /// # Errors
    ///
    /// Returns the first bind or I/O error of either server. The other
    /// server is stopped in that case.
    pub async fn run_with_shutdown(self, shutdown: ShutdownSignal) -> ServerResult<()> {
        let http = HttpServer::from_config(self.http, &self.config);
        let channel = ChannelServer::from_config(self.channel, &self.config);

        let health = self.health.clone();
        let watcher = shutdown.clone();
        tokio::spawn(async move {
            watcher.recv().await;
            health.set_healthy(false);
        });

        let http_addr = self.config.http.addr.clone();
        let channel_addr = self.config.channel.addr.clone();
        let result = tokio::try_join!(
            async {
                let result = http.run_with_shutdown(&http_addr, shutdown.clone()).await;
                if result.is_err() {
                    shutdown.trigger();
                }
                result
            },
            async {
                let result = channel.run_with_shutdown(&channel_addr, shutdown.clone()).await;
                if result.is_err() {
                    shutdown.trigger();
                }
                result
            },
        );
        self.health.set_healthy(false);
        tracing::info!(service = %self.config.service.name, "Gateway stopped");
        result.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn local_config() -> GatewayConfig {
        let mut config = GatewayConfig::default();
        config.http.addr = "127.0.0.1:0".to_string();
        config.channel.addr = "127.0.0.1:0".to_string();
        config.shutdown.timeout_secs = 1;
        config
    }

    #[test]
    fn test_new_registers_builtin_routes() {
        let gateway = Gateway::new(local_config()).unwrap();
        assert!(gateway.http.route_count() >= 1);
        assert!(gateway.health().is_healthy());
    }

    #[tokio::test]
    async fn test_shutdown_degrades_health() {
        let gateway = Gateway::new(local_config()).unwrap();
        let health = gateway.health().clone();
        let shutdown = ShutdownSignal::new();
        let task = tokio::spawn({
            let shutdown = shutdown.clone();
            async move { gateway.run_with_shutdown(shutdown).await }
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        shutdown.trigger();
        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert!(!health.is_healthy());
    }
}
