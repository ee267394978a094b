//! The loaded, freezable configuration store.
//!
//! A [`StaticConfig`] holds the merged value tree produced by
//! [`ConfigLoader`](crate::ConfigLoader). It has a three-step lifecycle:
//!
//! 1. **Open**: [`set`](StaticConfig::set) may still adjust keys (tests,
//!    bootstrap code that derives values).
//! 2. **Frozen**: after [`freeze`](StaticConfig::freeze) every write fails
//!    with [`ConfigError::Frozen`]. The gateway freezes its config once the
//!    servers are built.
//! 3. **Destroyed**: after [`destroy`](StaticConfig::destroy) the panicking
//!    getters panic and the `try_*` getters return
//!    [`ConfigError::Destroyed`]. This catches code that keeps reading
//!    config during shutdown.
//!
//! # Example
//!
//! ```
//! use portico_config::ConfigLoader;
//!
//! let config = ConfigLoader::new().load().unwrap();
//! config.freeze();
//!
//! assert_eq!(config.get_string("http.requestUUIDHeaderKey"), "x-request-uuid");
//! assert!(config.set("http.addr", "127.0.0.1:1").is_err());
//! ```

use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::tree;
use crate::{ConfigError, GatewayConfig};

/// Frozen-after-boot configuration with dotted-key getters.
#[derive(Debug, Default)]
pub struct StaticConfig {
    tree: RwLock<Value>,
    frozen: AtomicBool,
    destroyed: AtomicBool,
}

impl StaticConfig {
    /// Wraps a value tree.
    #[must_use]
    pub fn new(tree: Value) -> Self {
        Self {
            tree: RwLock::new(tree),
            frozen: AtomicBool::new(false),
            destroyed: AtomicBool::new(false),
        }
    }

    /// Forbids further writes.
    pub fn freeze(&self) {
        self.frozen.store(true, Ordering::Release);
    }

    /// Returns true once frozen.
    #[must_use]
    pub fn is_frozen(&self) -> bool {
        self.frozen.load(Ordering::Acquire)
    }

    /// Invalidates the store; later reads panic or fail.
    pub fn destroy(&self) {
        self.destroyed.store(true, Ordering::Release);
        *self.tree.write() = Value::Null;
    }

    /// Returns true once destroyed.
    #[must_use]
    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::Acquire)
    }

    /// Writes `value` under the dotted `key`.
    pub fn set(&self, key: &str, value: impl Into<Value>) -> Result<(), ConfigError> {
        self.check_alive()?;
        if self.is_frozen() {
            return Err(ConfigError::Frozen { key: key.to_string() });
        }
        if tree::insert(&mut self.tree.write(), key, value.into()) {
            Ok(())
        } else {
            Err(ConfigError::type_mismatch(key, "object path"))
        }
    }

    /// Returns true if `key` is present.
    ///
    /// # Panics
    ///
    /// Panics if the store was destroyed.
    #[must_use]
    pub fn contains_key(&self, key: &str) -> bool {
        self.alive_or_panic();
        tree::lookup(&self.tree.read(), key).is_some()
    }

    /// Returns a copy of the value under `key`.
    pub fn try_value(&self, key: &str) -> Result<Value, ConfigError> {
        self.check_alive()?;
        tree::lookup(&self.tree.read(), key)
            .cloned()
            .ok_or_else(|| ConfigError::missing_key(key))
    }

    /// Deserializes the value under `key`.
    pub fn try_get<T: DeserializeOwned>(&self, key: &str) -> Result<T, ConfigError> {
        serde_json::from_value(self.try_value(key)?)
            .map_err(|e| ConfigError::invalid_value(key, e.to_string()))
    }

    /// Reads a string.
    pub fn try_string(&self, key: &str) -> Result<String, ConfigError> {
        match self.try_value(key)? {
            Value::String(s) => Ok(s),
            _ => Err(ConfigError::type_mismatch(key, "string")),
        }
    }

    /// Reads a boolean.
    pub fn try_bool(&self, key: &str) -> Result<bool, ConfigError> {
        self.try_value(key)?
            .as_bool()
            .ok_or_else(|| ConfigError::type_mismatch(key, "boolean"))
    }

    /// Reads an integer.
    pub fn try_int(&self, key: &str) -> Result<i64, ConfigError> {
        self.try_value(key)?
            .as_i64()
            .ok_or_else(|| ConfigError::type_mismatch(key, "integer"))
    }

    /// Reads a float; integers are widened.
    pub fn try_float(&self, key: &str) -> Result<f64, ConfigError> {
        self.try_value(key)?
            .as_f64()
            .ok_or_else(|| ConfigError::type_mismatch(key, "number"))
    }

    /// Reads a list of strings.
    pub fn try_string_list(&self, key: &str) -> Result<Vec<String>, ConfigError> {
        let Value::Array(items) = self.try_value(key)? else {
            return Err(ConfigError::type_mismatch(key, "list"));
        };
        items
            .into_iter()
            .map(|item| match item {
                Value::String(s) => Ok(s),
                _ => Err(ConfigError::type_mismatch(key, "list of strings")),
            })
            .collect()
    }

    /// Reads a string.
    ///
    /// # Panics
    ///
    /// Panics if the store was destroyed or the key is missing or not a
    /// string.
    #[must_use]
    pub fn get_string(&self, key: &str) -> String {
        must(self.try_string(key))
    }

    /// Reads a boolean.
    ///
    /// # Panics
    ///
    /// Panics if the store was destroyed or the key is missing or not a
    /// boolean.
    #[must_use]
    pub fn get_bool(&self, key: &str) -> bool {
        must(self.try_bool(key))
    }

    /// Reads an integer.
    ///
    /// # Panics
    ///
    /// Panics if the store was destroyed or the key is missing or not an
    /// integer.
    #[must_use]
    pub fn get_int(&self, key: &str) -> i64 {
        must(self.try_int(key))
    }

    /// Reads a float.
    ///
    /// # Panics
    ///
    /// Panics if the store was destroyed or the key is missing or not a
    /// number.
    #[must_use]
    pub fn get_float(&self, key: &str) -> f64 {
        must(self.try_float(key))
    }

    /// Reads a list of strings.
    ///
    /// # Panics
    ///
    /// Panics if the store was destroyed or the key is missing or not a
    /// list of strings.
    #[must_use]
    pub fn get_string_list(&self, key: &str) -> Vec<String> {
        must(self.try_string_list(key))
    }

    /// Deserializes the gateway's own sections.
    pub fn gateway(&self) -> Result<GatewayConfig, ConfigError> {
        self.check_alive()?;
        Ok(serde_json::from_value(self.tree.read().clone())?)
    }

    fn check_alive(&self) -> Result<(), ConfigError> {
        if self.is_destroyed() {
            Err(ConfigError::Destroyed)
        } else {
            Ok(())
        }
    }

    fn alive_or_panic(&self) {
        if self.is_destroyed() {
            panic!("{}", ConfigError::Destroyed);
        }
    }
}

fn must<T>(result: Result<T, ConfigError>) -> T {
    match result {
        Ok(value) => value,
        Err(err) => panic!("{err}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn store() -> StaticConfig {
        StaticConfig::new(json!({
            "http": {"requestUUIDHeaderKey": "X-Request-Id"},
            "router": {"whitelistedPaths": ["/legacy", "/v1"]},
            "shutdown": {"timeoutSecs": 5},
            "tracing": {"samplingRatio": 0.25, "enabled": false}
        }))
    }

    #[test]
    fn test_typed_getters() {
        let config = store();
        assert_eq!(config.get_string("http.requestUUIDHeaderKey"), "X-Request-Id");
        assert_eq!(config.get_string_list("router.whitelistedPaths"), vec!["/legacy", "/v1"]);
        assert_eq!(config.get_int("shutdown.timeoutSecs"), 5);
        assert!((config.get_float("tracing.samplingRatio") - 0.25).abs() < f64::EPSILON);
        assert!(!config.get_bool("tracing.enabled"));
        assert!(config.contains_key("router"));
        assert!(!config.contains_key("router.missing"));
    }

    #[test]
    fn test_try_getters_report_errors() {
        let config = store();
        assert!(matches!(
            config.try_string("http.missing"),
            Err(ConfigError::MissingKey { .. })
        ));
        assert!(matches!(
            config.try_bool("shutdown.timeoutSecs"),
            Err(ConfigError::TypeMismatch { expected: "boolean", .. })
        ));
        let timeout: u64 = config.try_get("shutdown.timeoutSecs").unwrap();
        assert_eq!(timeout, 5);
    }

    #[test]
    fn test_freeze_blocks_writes() {
        let config = store();
        config.set("clients.users.timeout", 100).unwrap();
        assert_eq!(config.get_int("clients.users.timeout"), 100);

        config.freeze();
        assert!(config.is_frozen());
        assert!(matches!(
            config.set("clients.users.timeout", 200),
            Err(ConfigError::Frozen { .. })
        ));
        assert_eq!(config.get_int("clients.users.timeout"), 100);
    }

    #[test]
    fn test_destroy_fails_try_reads() {
        let config = store();
        config.destroy();
        assert!(matches!(
            config.try_string("http.requestUUIDHeaderKey"),
            Err(ConfigError::Destroyed)
        ));
        assert!(config.gateway().is_err());
    }

    #[test]
    #[should_panic(expected = "configuration has been destroyed")]
    fn test_destroy_panics_reads() {
        let config = store();
        config.destroy();
        let _ = config.get_string("http.requestUUIDHeaderKey");
    }

    #[test]
    #[should_panic(expected = "missing configuration key: nope")]
    fn test_missing_key_panics() {
        let _ = store().get_int("nope");
    }

    #[test]
    fn test_gateway_sections() {
        let gateway = store().gateway().unwrap();
        assert_eq!(gateway.http.request_uuid_header_key, "X-Request-Id");
        assert_eq!(gateway.shutdown.timeout_secs, 5);
        assert_eq!(gateway.http.addr, "0.0.0.0:8080");
    }
}
