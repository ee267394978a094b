//! Gateway error taxonomy.
//!
//! Errors that cross a module boundary (client, middleware, endpoint) are
//! stamped with a [`ErrorKind`] and a location string of the form
//! `module-class::module-name`. The location is produced by an
//! [`ErrorBuilder`] bound to the module.
//!
//! When a builder is asked about an error it did not produce, it reports
//! the pseudo-location `~module-class::module-name`. The leading `~` tells
//! a reader of the logs that the error was re-wrapped, not raised here.
//!
//! # Example
//!
//! ```
//! use portico_core::{ErrorBuilder, ErrorKind, GatewayError};
//!
//! let builder = ErrorBuilder::new("client", "bar");
//! let err = builder.error(std::io::Error::other("connection reset"), ErrorKind::ChannelSystem);
//!
//! assert_eq!(err.location(), "client::bar");
//! assert_eq!(err.kind(), Some(ErrorKind::ChannelSystem));
//! assert_eq!(err.to_string(), "connection reset");
//! ```

use std::error::Error as StdError;
use std::fmt;

use thiserror::Error;

use crate::log::LogField;

/// Boxed error type used as the underlying cause.
pub type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// Result type alias using [`GatewayError`].
pub type GatewayResult<T> = Result<T, GatewayError>;

/// Log field holding the error location.
pub const LOG_FIELD_ERROR_LOCATION: &str = "errorLocation";

/// Log field holding the error kind.
pub const LOG_FIELD_ERROR_TYPE: &str = "errorType";

/// Error grouping used for filtering in logs and metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Transport system errors on the channel protocol.
    ChannelSystem,
    /// Exceptions declared in a client's service definition.
    ClientException,
    /// Malformed client responses: undefined exceptions, missing
    /// required fields, empty payloads.
    BadResponse,
}

impl ErrorKind {
    /// Returns the name used in logs.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::ChannelSystem => "ChannelSystemError",
            Self::ClientException => "ClientException",
            Self::BadResponse => "BadResponse",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An error stamped with a kind and the location that produced it.
///
/// Displays as the underlying error; kind and location travel as
/// metadata and are rendered into log fields by [`ErrorBuilder`].
#[derive(Debug, Error)]
#[error("{source}")]
pub struct GatewayError {
    kind: Option<ErrorKind>,
    location: String,
    #[source]
    source: BoxError,
}

impl GatewayError {
    /// Returns the error kind, if the producer assigned one.
    #[must_use]
    pub fn kind(&self) -> Option<ErrorKind> {
        self.kind
    }

    /// Returns the producing location.
    #[must_use]
    pub fn location(&self) -> &str {
        &self.location
    }

    /// Returns the wrapped error.
    #[must_use]
    pub fn inner(&self) -> &(dyn StdError + Send + Sync + 'static) {
        self.source.as_ref()
    }

    /// Consumes the wrapper and returns the wrapped error.
    #[must_use]
    pub fn into_inner(self) -> BoxError {
        self.source
    }

    /// Returns true if the kind is [`ErrorKind::ChannelSystem`].
    #[must_use]
    pub fn is_channel_system(&self) -> bool {
        self.kind == Some(ErrorKind::ChannelSystem)
    }
}

/// Produces [`GatewayError`]s for one module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorBuilder {
    location: String,
}

impl ErrorBuilder {
    /// Creates a builder whose errors are located at `class::name`.
    #[must_use]
    pub fn new(module_class: &str, module_name: &str) -> Self {
        Self {
            location: format!("{module_class}::{module_name}"),
        }
    }

    /// Returns the location stamped on produced errors.
    #[must_use]
    pub fn location(&self) -> &str {
        &self.location
    }

    /// Wraps `err` with this builder's location and `kind`.
    pub fn error(&self, err: impl Into<BoxError>, kind: ErrorKind) -> GatewayError {
        GatewayError {
            kind: Some(kind),
            location: self.location.clone(),
            source: err.into(),
        }
    }

    /// Wraps `err` keeping the kind and location of an existing error.
    pub fn rebuild(&self, existing: &GatewayError, err: impl Into<BoxError>) -> GatewayError {
        GatewayError {
            kind: existing.kind,
            location: existing.location.clone(),
            source: err.into(),
        }
    }

    /// Wraps a foreign error under this builder's pseudo-location.
    ///
    /// A [`GatewayError`] is returned unchanged. Anything else gets the
    /// location `~class::name` and no kind.
    pub fn classify(&self, err: BoxError) -> GatewayError {
        match err.downcast::<GatewayError>() {
            Ok(gateway) => *gateway,
            Err(foreign) => GatewayError {
                kind: None,
                location: self.pseudo_location(),
                source: foreign,
            },
        }
    }

    /// Returns the `errorLocation` log field for `err`.
    pub fn log_field_error_location(&self, err: &(dyn StdError + 'static)) -> LogField {
        let location = match err.downcast_ref::<GatewayError>() {
            Some(gateway) => gateway.location.clone(),
            None => self.pseudo_location(),
        };
        LogField::string(LOG_FIELD_ERROR_LOCATION, location)
    }

    /// Returns the `errorType` log field for `err`.
    ///
    /// Foreign errors and errors without a kind report `unknown`.
    pub fn log_field_error_type(&self, err: &(dyn StdError + 'static)) -> LogField {
        let kind = err
            .downcast_ref::<GatewayError>()
            .and_then(GatewayError::kind)
            .map_or("unknown", |k| k.as_str());
        LogField::string(LOG_FIELD_ERROR_TYPE, kind)
    }

    fn pseudo_location(&self) -> String {
        format!("~{}", self.location)
    }
}
