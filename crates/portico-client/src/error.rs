//! Client error types.

use portico_core::BoxError;
use thiserror::Error;

/// Result type for outbound calls.
pub type ClientResult<T> = Result<T, ClientError>;

/// Failure of an outbound call after the retry driver gave up.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The overall budget ran out.
    #[error("call timed out after {attempts} attempt(s)")]
    Timeout {
        /// Attempts started before the budget ran out.
        attempts: u32,
    },

    /// The last attempt exceeded its per-attempt timeout.
    #[error("attempt {attempt} timed out")]
    AttemptTimeout {
        /// One-based number of the attempt.
        attempt: u32,
    },

    /// The last attempt failed.
    #[error("{0}")]
    Call(#[source] BoxError),
}

impl ClientError {
    /// Returns true for either timeout variant.
    #[must_use]
    pub const fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::AttemptTimeout { .. })
    }
}
