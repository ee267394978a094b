//! Built-in pipeline members.

pub mod logger;

pub use logger::{LoggerMiddleware, LoggerOptions};
