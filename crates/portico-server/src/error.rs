//! Error types for the gateway servers.

use std::any::Any;

use portico_config::ConfigError;
use portico_router::RouterError;
use thiserror::Error;

use crate::frame::FrameError;

/// Errors raised while registering endpoints or running a server.
#[derive(Debug, Error)]
pub enum ServerError {
    /// The listen address could not be parsed.
    #[error("invalid listen address '{0}'")]
    InvalidAddress(String),

    /// The listener could not be bound.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        /// Address that was requested.
        addr: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// An HTTP route could not be registered.
    #[error("route registration failed: {0}")]
    Route(#[from] RouterError),

    /// A channel method name is not `Service::method`.
    #[error("malformed channel method name '{0}'")]
    MalformedMethod(String),

    /// A channel method was registered twice.
    #[error("channel method '{0}' is already registered")]
    DuplicateMethod(String),

    /// A channel frame could not be read or written.
    #[error(transparent)]
    Frame(#[from] FrameError),

    /// Configuration was invalid.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Transport I/O failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ServerError {
    /// Creates a bind error.
    pub fn bind(addr: impl Into<String>, source: std::io::Error) -> Self {
        Self::Bind {
            addr: addr.into(),
            source,
        }
    }
}

/// Result type alias using [`ServerError`].
pub type ServerResult<T> = Result<T, ServerError>;

/// Renders a caught panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bind_error_message() {
        let err = ServerError::bind(
            "127.0.0.1:1",
            std::io::Error::new(std::io::ErrorKind::AddrInUse, "in use"),
        );
        assert_eq!(err.to_string(), "failed to bind 127.0.0.1:1: in use");
    }

    #[test]
    fn test_route_error_converts() {
        let err: ServerError = RouterError::bad_path("//").into();
        assert!(err.to_string().starts_with("route registration failed"));
    }

    #[test]
    fn test_panic_message() {
        let payload = std::panic::catch_unwind(|| panic!("boom {}", 1)).unwrap_err();
        assert_eq!(panic_message(payload.as_ref()), "boom 1");
        let payload = std::panic::catch_unwind(|| panic!("static")).unwrap_err();
        assert_eq!(panic_message(payload.as_ref()), "static");
    }
}
