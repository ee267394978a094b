//! Route registration errors.

use thiserror::Error;

/// Result type for route registration.
pub type RouterResult<T> = Result<T, RouterError>;

/// Errors returned when a route cannot be registered.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RouterError {
    /// The path is empty or contains an empty segment (`//`).
    #[error("bad path: {path:?}")]
    BadPath {
        /// The offending path.
        path: String,
    },

    /// The pattern is already registered, or an existing pattern would
    /// already match it.
    #[error("path value already set: {path:?}")]
    Exists {
        /// The normalized pattern that collided.
        path: String,
    },

    /// A `*` appears somewhere other than the final segment.
    #[error("/* must be the last path segment: {path:?}")]
    WildcardNotLast {
        /// The offending pattern.
        path: String,
    },

    /// More than one `*` appears in the pattern.
    #[error("path can not contain more than one *: {path:?}")]
    MultipleWildcards {
        /// The offending pattern.
        path: String,
    },

    /// A parameter segment uses a different name than an existing route at
    /// the same position.
    #[error(
        "path {path:?} has a different param key {actual:?}, it should be the same key {expected:?} as in existing path {existing:?}"
    )]
    ParamMismatch {
        /// The pattern being registered.
        path: String,
        /// The parameter segment in the new pattern.
        actual: String,
        /// The parameter segment already registered at this position.
        expected: String,
        /// The pattern that introduced the existing parameter.
        existing: String,
    },
}

impl RouterError {
    /// Creates a bad path error.
    pub fn bad_path(path: impl Into<String>) -> Self {
        Self::BadPath { path: path.into() }
    }

    /// Creates a collision error.
    pub fn exists(path: impl Into<String>) -> Self {
        Self::Exists { path: path.into() }
    }

    /// Returns `true` if this error means the route collides with an
    /// existing one.
    #[must_use]
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Exists { .. } | Self::ParamMismatch { .. })
    }
}
