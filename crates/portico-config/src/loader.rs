//! Layered configuration loading.
//!
//! Layers apply in call order; later layers override earlier ones key by
//! key, so a file only needs the keys it changes:
//!
//! 1. defaults (the serialized [`GatewayConfig`] defaults or a preset)
//! 2. files and in-memory strings (TOML, JSON or YAML)
//! 3. environment overrides (`PREFIX__SECTION__KEY`)

use std::env;
use std::fs;
use std::path::Path;

use serde_json::Value;
use tracing::debug;

use crate::tree;
use crate::{ConfigError, GatewayConfig, StaticConfig};

/// Configuration loader with layered approach.
///
/// # Example
///
/// ```no_run
/// use portico_config::ConfigLoader;
///
/// # fn main() -> Result<(), portico_config::ConfigError> {
/// let config = ConfigLoader::new()
///     .with_file("config/base.yaml")?
///     .with_optional_file("config/production.yaml")?
///     .with_env_prefix("PORTICO")
///     .load()?;
///
/// let gateway = config.gateway()?;
/// println!("listening on {}", gateway.http.addr);
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct ConfigLoader {
    tree: Value,
    env_prefix: Option<String>,
    env_vars: Option<Vec<(String, String)>>,
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigLoader {
    /// Creates a loader seeded with the default sections.
    #[must_use]
    pub fn new() -> Self {
        Self {
            tree: seed(&GatewayConfig::default()),
            env_prefix: None,
            env_vars: None,
        }
    }

    /// Resets to the default sections.
    #[must_use]
    pub fn with_defaults(mut self) -> Self {
        self.tree = seed(&GatewayConfig::default());
        self
    }

    /// Resets to the development preset.
    #[must_use]
    pub fn with_development(mut self) -> Self {
        self.tree = seed(&GatewayConfig::development());
        self
    }

    /// Resets to the production preset.
    #[must_use]
    pub fn with_production(mut self) -> Self {
        self.tree = seed(&GatewayConfig::production());
        self
    }

    /// Layers a file; the format follows the extension (`toml`, `json`,
    /// `yaml` or `yml`).
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the file is missing, unreadable, in an
    /// unknown format or malformed.
    pub fn with_file<P: AsRef<Path>>(mut self, path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ConfigError::file_not_found(path));
        }

        let content = fs::read_to_string(path).map_err(|e| ConfigError::read_error(path, e))?;
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_lowercase)
            .unwrap_or_default();
        let layer = parse(&content, &extension).map_err(|err| match err {
            ConfigError::ValidationError(_) => ConfigError::validation_error(format!(
                "unsupported configuration file format: {}",
                path.display()
            )),
            other => other,
        })?;

        debug!(path = %path.display(), "loaded configuration file");
        tree::merge(&mut self.tree, layer);
        Ok(self)
    }

    /// Layers a file if it exists.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the file exists but cannot be loaded.
    pub fn with_optional_file<P: AsRef<Path>>(self, path: P) -> Result<Self, ConfigError> {
        if path.as_ref().exists() {
            self.with_file(path)
        } else {
            Ok(self)
        }
    }

    /// Layers configuration text in the given format.
    ///
    /// ```
    /// use portico_config::ConfigLoader;
    ///
    /// let config = ConfigLoader::new()
    ///     .with_string("http:\n  requestUUIDHeaderKey: X-Request-Id\n", "yaml")
    ///     .unwrap()
    ///     .load()
    ///     .unwrap();
    ///
    /// assert_eq!(config.get_string("http.requestUUIDHeaderKey"), "X-Request-Id");
    /// ```
    pub fn with_string(mut self, content: &str, format: &str) -> Result<Self, ConfigError> {
        let layer = parse(content, &format.to_lowercase())?;
        tree::merge(&mut self.tree, layer);
        Ok(self)
    }

    /// Layers an already-built value tree.
    #[must_use]
    pub fn with_value(mut self, layer: Value) -> Self {
        tree::merge(&mut self.tree, layer);
        self
    }

    /// Loads `.env` from the working directory into the process
    /// environment, if present.
    pub fn with_dotenv(self) -> Result<Self, ConfigError> {
        match dotenvy::dotenv() {
            Ok(_) => Ok(self),
            Err(err) if err.not_found() => Ok(self),
            Err(err) => Err(err.into()),
        }
    }

    /// Loads a specific env file into the process environment.
    pub fn with_dotenv_file<P: AsRef<Path>>(self, path: P) -> Result<Self, ConfigError> {
        dotenvy::from_path(path.as_ref())?;
        Ok(self)
    }

    /// Applies `PREFIX__SECTION__KEY` overrides from the environment.
    ///
    /// Segments match existing keys case-insensitively and ignoring
    /// underscores, so `PORTICO__HTTP__REQUEST_UUID_HEADER_KEY` sets
    /// `http.requestUUIDHeaderKey`.
    #[must_use]
    pub fn with_env_prefix(mut self, prefix: &str) -> Self {
        self.env_prefix = Some(prefix.to_uppercase());
        self
    }

    /// Uses `vars` instead of the process environment for overrides.
    #[must_use]
    pub fn with_env_vars<K, V>(mut self, vars: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.env_vars = Some(vars.into_iter().map(|(k, v)| (k.into(), v.into())).collect());
        self
    }

    /// Applies environment overrides, validates, and returns the store.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if an override cannot be parsed, a section
    /// has an unknown field, or validation fails.
    pub fn load(mut self) -> Result<StaticConfig, ConfigError> {
        if let Some(prefix) = self.env_prefix.take() {
            self.apply_env_overrides(&prefix)?;
        }

        let gateway: GatewayConfig = serde_json::from_value(self.tree.clone())?;
        gateway.validate()?;

        Ok(StaticConfig::new(self.tree))
    }

    /// Returns the store without overrides or validation.
    #[must_use]
    pub fn load_unvalidated(self) -> StaticConfig {
        StaticConfig::new(self.tree)
    }

    fn apply_env_overrides(&mut self, prefix: &str) -> Result<(), ConfigError> {
        let vars = match self.env_vars.take() {
            Some(vars) => vars,
            None => env::vars().collect(),
        };
        let marker = format!("{prefix}__");
        let mut vars: Vec<_> = vars.into_iter().filter(|(k, _)| k.starts_with(&marker)).collect();
        vars.sort();

        for (key, value) in vars {
            self.apply_env_var(&key, &value, prefix)?;
        }
        Ok(())
    }

    fn apply_env_var(&mut self, key: &str, value: &str, prefix: &str) -> Result<(), ConfigError> {
        let path = key
            .strip_prefix(prefix)
            .and_then(|k| k.strip_prefix("__"))
            .ok_or_else(|| ConfigError::env_parse_error(key, "invalid key format"))?;
        let segments: Vec<&str> = path.split("__").collect();
        if segments.iter().any(|s| s.is_empty()) {
            return Err(ConfigError::env_parse_error(key, "empty key segment"));
        }

        let resolved = tree::resolve_env_path(&self.tree, &segments).join(".");
        let parsed = match tree::lookup(&self.tree, &resolved) {
            Some(Value::Bool(_)) => parse_bool(value)
                .map(Value::Bool)
                .ok_or_else(|| ConfigError::env_parse_error(key, "expected boolean"))?,
            Some(Value::Number(_)) => parse_number(value)
                .ok_or_else(|| ConfigError::env_parse_error(key, "expected number"))?,
            Some(Value::Array(items)) => {
                let numeric = items.first().is_some_and(Value::is_number);
                parse_list(value, numeric)
                    .ok_or_else(|| ConfigError::env_parse_error(key, "expected list of numbers"))?
            }
            Some(Value::Object(_)) => {
                return Err(ConfigError::env_parse_error(key, "cannot replace a section"));
            }
            Some(Value::String(_) | Value::Null) | None => Value::String(value.to_string()),
        };

        debug!(var = key, key = %resolved, "applied environment override");
        if tree::insert(&mut self.tree, &resolved, parsed) {
            Ok(())
        } else {
            Err(ConfigError::env_parse_error(key, "path crosses a non-section value"))
        }
    }
}

fn seed(config: &GatewayConfig) -> Value {
    serde_json::to_value(config).unwrap_or(Value::Null)
}

fn parse(content: &str, format: &str) -> Result<Value, ConfigError> {
    match format {
        "toml" => Ok(toml::from_str(content)?),
        "json" => Ok(serde_json::from_str(content)?),
        "yaml" | "yml" => Ok(serde_yaml::from_str(content)?),
        _ => Err(ConfigError::validation_error(format!(
            "unsupported configuration format: {format}"
        ))),
    }
}

/// Parse a boolean from a string.
fn parse_bool(s: &str) -> Option<bool> {
    match s.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn parse_number(s: &str) -> Option<Value> {
    if let Ok(int) = s.parse::<i64>() {
        return Some(Value::from(int));
    }
    s.parse::<f64>()
        .ok()
        .and_then(serde_json::Number::from_f64)
        .map(Value::Number)
}

fn parse_list(s: &str, numeric: bool) -> Option<Value> {
    let items = s.split(',').map(str::trim).filter(|item| !item.is_empty());
    if numeric {
        items.map(parse_number).collect::<Option<Vec<_>>>().map(Value::Array)
    } else {
        Some(Value::Array(items.map(|i| Value::String(i.to_string())).collect()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_loader_new() {
        let config = ConfigLoader::new().load().unwrap();
        assert_eq!(config.get_string("http.addr"), "0.0.0.0:8080");
        assert_eq!(config.get_string("service.name"), "portico");
    }

    #[test]
    fn test_layers_merge_key_by_key() {
        let config = ConfigLoader::new()
            .with_string("[http]\nrequestUUIDHeaderKey = \"X-Request-Id\"\n", "toml")
            .unwrap()
            .with_string(r#"{"http": {"addr": "127.0.0.1:9000"}}"#, "json")
            .unwrap()
            .load()
            .unwrap();

        assert_eq!(config.get_string("http.requestUUIDHeaderKey"), "X-Request-Id");
        assert_eq!(config.get_string("http.addr"), "127.0.0.1:9000");
        assert_eq!(config.get_string("http.apiEnvironmentHeaderKey"), "x-api-environment");
    }

    #[test]
    fn test_application_keys_survive() {
        let config = ConfigLoader::new()
            .with_string("clients:\n  users:\n    timeout: 250\n", "yaml")
            .unwrap()
            .load()
            .unwrap();
        assert_eq!(config.get_int("clients.users.timeout"), 250);
    }

    #[test]
    fn test_unknown_section_field_is_rejected() {
        let result = ConfigLoader::new()
            .with_string("router:\n  whitelist: [/x]\n", "yaml")
            .unwrap()
            .load();
        assert!(matches!(result, Err(ConfigError::JsonError(_))));
    }

    #[test]
    fn test_unsupported_format() {
        assert!(ConfigLoader::new().with_string("a=b", "ini").is_err());
    }

    #[test]
    fn test_with_file_yaml_and_toml() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("base.yaml");
        let mut file = std::fs::File::create(&base).unwrap();
        writeln!(file, "service:\n  name: edge\nrouter:\n  whitelistedPaths: [/legacy]").unwrap();

        let overlay = dir.path().join("prod.toml");
        std::fs::write(&overlay, "[service]\nenv = \"staging\"\n").unwrap();

        let config = ConfigLoader::new()
            .with_file(&base)
            .unwrap()
            .with_optional_file(&overlay)
            .unwrap()
            .with_optional_file(dir.path().join("missing.yaml"))
            .unwrap()
            .load()
            .unwrap();

        let gateway = config.gateway().unwrap();
        assert_eq!(gateway.service.name, "edge");
        assert_eq!(gateway.service.env, "staging");
        assert_eq!(gateway.router.whitelisted_paths, vec!["/legacy"]);
    }

    #[test]
    fn test_with_file_errors() {
        assert!(matches!(
            ConfigLoader::new().with_file("/nonexistent/gateway.yaml"),
            Err(ConfigError::FileNotFound { .. })
        ));

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gateway.ini");
        std::fs::write(&path, "x").unwrap();
        assert!(matches!(
            ConfigLoader::new().with_file(&path),
            Err(ConfigError::ValidationError(msg)) if msg.contains("gateway.ini")
        ));
    }

    #[test]
    fn test_env_overrides() {
        let config = ConfigLoader::new()
            .with_env_prefix("PORTICO")
            .with_env_vars([
                ("PORTICO__HTTP__REQUEST_UUID_HEADER_KEY", "X-Request-Id"),
                ("PORTICO__SHUTDOWN__TIMEOUT_SECS", "3"),
                ("PORTICO__SHADOW_REQUEST_HANDLING__ENABLED", "yes"),
                ("PORTICO__ROUTER__WHITELISTED_PATHS", "/a, /b"),
                ("PORTICO__LOGGING__LEVELS__HYPER", "warn"),
                ("OTHER__HTTP__ADDR", "ignored"),
            ])
            .load()
            .unwrap();

        let gateway = config.gateway().unwrap();
        assert_eq!(gateway.http.request_uuid_header_key, "X-Request-Id");
        assert_eq!(gateway.shutdown.timeout_secs, 3);
        assert!(gateway.shadow_request_handling.enabled);
        assert_eq!(gateway.router.whitelisted_paths, vec!["/a", "/b"]);
        assert_eq!(gateway.logging.levels["hyper"], "warn");
        assert_eq!(gateway.http.addr, "0.0.0.0:8080");
    }

    #[test]
    fn test_env_override_type_errors() {
        let result = ConfigLoader::new()
            .with_env_prefix("PORTICO")
            .with_env_vars([("PORTICO__SHUTDOWN__TIMEOUT_SECS", "soon")])
            .load();
        assert!(matches!(result, Err(ConfigError::EnvParseError { .. })));

        let result = ConfigLoader::new()
            .with_env_prefix("PORTICO")
            .with_env_vars([("PORTICO__HTTP", "x")])
            .load();
        assert!(matches!(result, Err(ConfigError::EnvParseError { .. })));
    }

    #[test]
    fn test_numeric_list_override() {
        let config = ConfigLoader::new()
            .with_env_prefix("PORTICO")
            .with_env_vars([("PORTICO__METRICS__LATENCY_BUCKETS", "0.1,1,10")])
            .load()
            .unwrap();
        assert_eq!(config.gateway().unwrap().metrics.latency_buckets, vec![0.1, 1.0, 10.0]);
    }

    #[test]
    fn test_validation_runs_on_load() {
        let result = ConfigLoader::new()
            .with_string(r#"{"http": {"addr": "not an address"}}"#, "json")
            .unwrap()
            .load();
        assert!(matches!(result, Err(ConfigError::InvalidValue { .. })));
        let unchecked = ConfigLoader::new()
            .with_string(r#"{"http": {"addr": "not an address"}}"#, "json")
            .unwrap()
            .load_unvalidated();
        assert_eq!(unchecked.get_string("http.addr"), "not an address");
    }

    #[test]
    fn test_presets() {
        let dev = ConfigLoader::new().with_development().load().unwrap();
        assert_eq!(dev.get_string("logging.format"), "pretty");
        let prod = ConfigLoader::new().with_production().load().unwrap();
        assert!(prod.get_bool("logging.skipFrameworkLogs"));
    }

    #[test]
    fn test_parse_bool() {
        assert_eq!(parse_bool("TRUE"), Some(true));
        assert_eq!(parse_bool("off"), Some(false));
        assert_eq!(parse_bool("maybe"), None);
    }
}
