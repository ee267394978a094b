//! Structured RPC status errors.
//!
//! Outbound RPC transports that report a status code (rather than a
//! system-error frame) surface it as an [`RpcStatus`]. The call helper
//! recognises it and counts it under `client.errors.<code>`.

use std::fmt;

use thiserror::Error;

/// Status code of a structured RPC error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RpcCode {
    /// Cancelled by the caller.
    Cancelled = 1,
    /// Unknown failure.
    Unknown = 2,
    /// Invalid argument.
    InvalidArgument = 3,
    /// Deadline exceeded.
    DeadlineExceeded = 4,
    /// Not found.
    NotFound = 5,
    /// Already exists.
    AlreadyExists = 6,
    /// Permission denied.
    PermissionDenied = 7,
    /// Resource exhausted.
    ResourceExhausted = 8,
    /// Failed precondition.
    FailedPrecondition = 9,
    /// Aborted.
    Aborted = 10,
    /// Out of range.
    OutOfRange = 11,
    /// Not implemented.
    Unimplemented = 12,
    /// Internal error.
    Internal = 13,
    /// Unavailable.
    Unavailable = 14,
    /// Data loss.
    DataLoss = 15,
    /// Unauthenticated.
    Unauthenticated = 16,
}

impl RpcCode {
    /// Returns the kebab-case name used in metric names.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Cancelled => "cancelled",
            Self::Unknown => "unknown",
            Self::InvalidArgument => "invalid-argument",
            Self::DeadlineExceeded => "deadline-exceeded",
            Self::NotFound => "not-found",
            Self::AlreadyExists => "already-exists",
            Self::PermissionDenied => "permission-denied",
            Self::ResourceExhausted => "resource-exhausted",
            Self::FailedPrecondition => "failed-precondition",
            Self::Aborted => "aborted",
            Self::OutOfRange => "out-of-range",
            Self::Unimplemented => "unimplemented",
            Self::Internal => "internal",
            Self::Unavailable => "unavailable",
            Self::DataLoss => "data-loss",
            Self::Unauthenticated => "unauthenticated",
        }
    }
}

impl fmt::Display for RpcCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A structured RPC error: code, message and an optional error name.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("code:{code} message:{message}")]
pub struct RpcStatus {
    code: RpcCode,
    message: String,
    name: String,
}

impl RpcStatus {
    /// Creates a status.
    #[must_use]
    pub fn new(code: RpcCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            name: String::new(),
        }
    }

    /// Sets the application error name.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Returns the code.
    #[must_use]
    pub fn code(&self) -> RpcCode {
        self.code
    }

    /// Returns the message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Returns the error name; empty if none was set.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Finds a status in `err` or its source chain.
    #[must_use]
    pub fn find<'a>(err: &'a (dyn std::error::Error + 'static)) -> Option<&'a Self> {
        let mut current = Some(err);
        while let Some(e) = current {
            if let Some(status) = e.downcast_ref::<Self>() {
                return Some(status);
            }
            current = e.source();
        }
        None
    }
}
