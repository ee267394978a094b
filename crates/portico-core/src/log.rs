//! Structured log fields and levels.

use std::fmt;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use serde_json::Value;

/// One structured log field.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LogField {
    key: String,
    value: Value,
}

impl LogField {
    /// Creates a field from any JSON-convertible value.
    pub fn new(key: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }

    /// Creates a string field.
    pub fn string(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self::new(key, Value::String(value.into()))
    }

    /// Creates an integer field.
    pub fn int(key: impl Into<String>, value: i64) -> Self {
        Self::new(key, value)
    }

    /// Creates a boolean field.
    pub fn bool(key: impl Into<String>, value: bool) -> Self {
        Self::new(key, value)
    }

    /// Creates an `error` field holding the error message.
    pub fn error(err: &dyn std::error::Error) -> Self {
        Self::string(portico_telemetry::fields::ERROR, err.to_string())
    }

    /// Creates an RFC 3339 timestamp field.
    pub fn time(key: impl Into<String>, value: DateTime<Utc>) -> Self {
        Self::string(key, value.to_rfc3339_opts(SecondsFormat::Nanos, true))
    }

    /// Returns the key.
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Returns the value.
    #[must_use]
    pub fn value(&self) -> &Value {
        &self.value
    }
}

/// Renders fields as a JSON object. Later keys overwrite earlier ones.
#[must_use]
pub fn render_fields(fields: &[LogField]) -> String {
    let map: serde_json::Map<String, Value> = fields
        .iter()
        .map(|f| (f.key.clone(), f.value.clone()))
        .collect();
    Value::Object(map).to_string()
}

/// Severity of a log record, ordered from least to most severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum LogLevel {
    /// Debug.
    #[default]
    Debug,
    /// Info.
    Info,
    /// Warn.
    Warn,
    /// Error.
    Error,
    /// Panic. The logger panics after writing.
    Panic,
}

impl LogLevel {
    /// Returns the lowercase name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
            Self::Panic => "panic",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
