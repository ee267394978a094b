//! Channel-protocol system errors.
//!
//! A system error travels in its own frame instead of a response and
//! carries one of a fixed set of codes. Each code has a stable metrics
//! key used as the `error` tag of `*.system-errors` counters.

use std::fmt;

use thiserror::Error;

/// Code of a channel-protocol system error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum SystemErrorCode {
    /// The call exceeded its deadline.
    Timeout = 0x01,
    /// The caller cancelled the call.
    Cancelled = 0x02,
    /// The server is overloaded.
    Busy = 0x03,
    /// The server refused the call.
    Declined = 0x04,
    /// Anything else that went wrong while handling the call.
    UnexpectedError = 0x05,
    /// The call was malformed or addressed an unknown method.
    BadRequest = 0x06,
    /// A transport failure.
    NetworkError = 0x07,
    /// The peer violated the framing protocol.
    ProtocolError = 0xff,
}

impl SystemErrorCode {
    /// Returns the `error` tag value used in metrics.
    #[must_use]
    pub const fn metrics_key(self) -> &'static str {
        match self {
            Self::Timeout => "timeout",
            Self::Cancelled => "cancelled",
            Self::Busy => "busy",
            Self::Declined => "declined",
            Self::UnexpectedError => "unexpected-error",
            Self::BadRequest => "bad-request",
            Self::NetworkError => "network-error",
            Self::ProtocolError => "protocol-error",
        }
    }

    /// Parses a code byte; unknown bytes map to `UnexpectedError`.
    #[must_use]
    pub const fn from_u8(byte: u8) -> Self {
        match byte {
            0x01 => Self::Timeout,
            0x02 => Self::Cancelled,
            0x03 => Self::Busy,
            0x04 => Self::Declined,
            0x06 => Self::BadRequest,
            0x07 => Self::NetworkError,
            0xff => Self::ProtocolError,
            _ => Self::UnexpectedError,
        }
    }
}

impl fmt::Display for SystemErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.metrics_key())
    }
}

/// A system error with its code and message.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("system error ({code}): {message}")]
pub struct SystemError {
    /// Error code.
    pub code: SystemErrorCode,
    /// Human-readable message.
    pub message: String,
}

impl SystemError {
    /// Creates a system error.
    #[must_use]
    pub fn new(code: SystemErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// Finds a system error in `err` or its source chain.
    #[must_use]
    pub fn find<'a>(err: &'a (dyn std::error::Error + 'static)) -> Option<&'a Self> {
        let mut current = Some(err);
        while let Some(e) = current {
            if let Some(system) = e.downcast_ref::<Self>() {
                return Some(system);
            }
            current = e.source();
        }
        None
    }

    /// Returns the code of the system error in `err`'s chain.
    ///
    /// Any other error maps to `UnexpectedError`.
    #[must_use]
    pub fn code_of(err: &(dyn std::error::Error + 'static)) -> SystemErrorCode {
        Self::find(err).map_or(SystemErrorCode::UnexpectedError, |e| e.code)
    }
}
