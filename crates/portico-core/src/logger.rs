//! Context-aware logger.
//!
//! [`ContextLogger`] prepends the request's accumulated log fields to every
//! record and writes it to a [`LogSink`]. The default sink is
//! [`TracingSink`], which emits one `tracing` event per record.
//!
//! # Framework log suppression
//!
//! With [`ContextLogger::with_skip_framework_logs`] enabled, the `*_z`
//! methods do not write anything. They store the message on the context
//! instead (`msg1`, `msg2`, ...) and raise the context's high-water level.
//! The finish line of the request is then written at
//! [`ContextLogger::finish_level`], so a suppressed warning still promotes
//! the one line that does reach the sink.
//!
//! # Example
//!
//! ```rust,ignore
//! let logger = ContextLogger::tracing().with_skip_framework_logs(true);
//!
//! logger.warn_z(&ctx, "Could not parse json", vec![LogField::error(&err)]);
//! // nothing written yet; ctx now holds msg1 and a warn high-water mark
//!
//! let level = logger.finish_level(&ctx, LogLevel::Debug);
//! logger.log(level, &ctx, "Finished an incoming server HTTP request", vec![]);
//! ```

use std::fmt;
use std::sync::Arc;

use crate::context::RequestContext;
use crate::log::{render_fields, LogField, LogLevel};

/// One record handed to a sink.
#[derive(Debug, Clone, PartialEq)]
pub struct LogRecord {
    /// Severity.
    pub level: LogLevel,
    /// Message.
    pub message: String,
    /// Context fields followed by call fields.
    pub fields: Vec<LogField>,
}

impl LogRecord {
    /// Returns the first field named `key`.
    #[must_use]
    pub fn field(&self, key: &str) -> Option<&serde_json::Value> {
        self.fields.iter().find(|f| f.key() == key).map(LogField::value)
    }
}

/// Destination of context log records.
pub trait LogSink: Send + Sync + 'static {
    /// Writes one record.
    fn write(&self, record: LogRecord);
}

/// Sink that emits records as `tracing` events under the `portico` target.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl LogSink for TracingSink {
    fn write(&self, record: LogRecord) {
        let fields = render_fields(&record.fields);
        let message = record.message.as_str();
        match record.level {
            LogLevel::Debug => tracing::debug!(target: "portico", fields = %fields, "{message}"),
            LogLevel::Info => tracing::info!(target: "portico", fields = %fields, "{message}"),
            LogLevel::Warn => tracing::warn!(target: "portico", fields = %fields, "{message}"),
            LogLevel::Error | LogLevel::Panic => {
                tracing::error!(target: "portico", fields = %fields, level_name = record.level.as_str(), "{message}");
            }
        }
    }
}

/// Logger that carries context fields into every record.
#[derive(Clone)]
pub struct ContextLogger {
    sink: Arc<dyn LogSink>,
    skip_framework_logs: bool,
}

impl ContextLogger {
    /// Creates a logger over `sink`.
    #[must_use]
    pub fn new(sink: Arc<dyn LogSink>) -> Self {
        Self {
            sink,
            skip_framework_logs: false,
        }
    }

    /// Creates a logger over [`TracingSink`].
    #[must_use]
    pub fn tracing() -> Self {
        Self::new(Arc::new(TracingSink))
    }

    /// Turns framework log suppression on or off.
    #[must_use]
    pub fn with_skip_framework_logs(mut self, skip: bool) -> Self {
        self.skip_framework_logs = skip;
        self
    }

    /// Returns true if `*_z` calls are deferred to the context.
    #[must_use]
    pub fn skips_framework_logs(&self) -> bool {
        self.skip_framework_logs
    }

    /// Writes a record at `level` with the context fields prepended.
    pub fn log(&self, level: LogLevel, ctx: &RequestContext, msg: &str, fields: Vec<LogField>) {
        let mut all = ctx.log_fields();
        all.extend(fields);
        self.sink.write(LogRecord {
            level,
            message: msg.to_string(),
            fields: all,
        });
    }

    /// Logs at debug.
    pub fn debug(&self, ctx: &RequestContext, msg: &str, fields: Vec<LogField>) {
        self.log(LogLevel::Debug, ctx, msg, fields);
    }

    /// Logs at info.
    pub fn info(&self, ctx: &RequestContext, msg: &str, fields: Vec<LogField>) {
        self.log(LogLevel::Info, ctx, msg, fields);
    }

    /// Logs at warn.
    pub fn warn(&self, ctx: &RequestContext, msg: &str, fields: Vec<LogField>) {
        self.log(LogLevel::Warn, ctx, msg, fields);
    }

    /// Logs at error.
    pub fn error(&self, ctx: &RequestContext, msg: &str, fields: Vec<LogField>) {
        self.log(LogLevel::Error, ctx, msg, fields);
    }

    /// Logs at panic level, then panics with `msg`.
    pub fn panic(&self, ctx: &RequestContext, msg: &str, fields: Vec<LogField>) -> ! {
        self.log(LogLevel::Panic, ctx, msg, fields);
        panic!("{msg}");
    }

    fn log_z(&self, level: LogLevel, ctx: &RequestContext, msg: &str, fields: Vec<LogField>) {
        if self.skip_framework_logs {
            ctx.defer_log(level, msg, fields);
        } else {
            self.log(level, ctx, msg, fields);
        }
    }

    /// Framework debug line; deferred when suppression is on.
    pub fn debug_z(&self, ctx: &RequestContext, msg: &str, fields: Vec<LogField>) {
        self.log_z(LogLevel::Debug, ctx, msg, fields);
    }

    /// Framework info line; deferred when suppression is on.
    pub fn info_z(&self, ctx: &RequestContext, msg: &str, fields: Vec<LogField>) {
        self.log_z(LogLevel::Info, ctx, msg, fields);
    }

    /// Framework warn line; deferred when suppression is on.
    pub fn warn_z(&self, ctx: &RequestContext, msg: &str, fields: Vec<LogField>) {
        self.log_z(LogLevel::Warn, ctx, msg, fields);
    }

    /// Framework error line; deferred when suppression is on.
    pub fn error_z(&self, ctx: &RequestContext, msg: &str, fields: Vec<LogField>) {
        self.log_z(LogLevel::Error, ctx, msg, fields);
    }

    /// Pushes fields onto the context without writing a record.
    pub fn append(&self, ctx: &RequestContext, fields: Vec<LogField>) {
        ctx.append_log_fields(fields);
    }

    /// Level of a request's finish line: `level` promoted to the highest
    /// deferred level.
    #[must_use]
    pub fn finish_level(&self, ctx: &RequestContext, level: LogLevel) -> LogLevel {
        ctx.deferred_level().map_or(level, |deferred| deferred.max(level))
    }
}

impl Default for ContextLogger {
    fn default() -> Self {
        Self::tracing()
    }
}

impl fmt::Debug for ContextLogger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContextLogger")
            .field("skip_framework_logs", &self.skip_framework_logs)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::MemoryLogSink;

    #[test]
    fn test_context_fields_come_first() {
        let sink = MemoryLogSink::new();
        let logger = ContextLogger::new(sink.clone());
        let ctx = RequestContext::new();
        ctx.append_log_fields(vec![LogField::string("requestUUID", "u")]);

        logger.info(&ctx, "hello", vec![LogField::int("n", 1)]);

        let records = sink.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].level, LogLevel::Info);
        let keys: Vec<_> = records[0].fields.iter().map(LogField::key).collect();
        assert_eq!(keys, vec!["requestUUID", "n"]);
    }

    #[test]
    fn test_z_variants_write_when_not_skipping() {
        let sink = MemoryLogSink::new();
        let logger = ContextLogger::new(sink.clone());
        let ctx = RequestContext::new();

        logger.warn_z(&ctx, "framework", vec![]);

        assert_eq!(sink.count_message("framework"), 1);
        assert_eq!(ctx.deferred_count(), 0);
    }

    #[test]
    fn test_z_variants_defer_when_skipping() {
        let sink = MemoryLogSink::new();
        let logger = ContextLogger::new(sink.clone()).with_skip_framework_logs(true);
        let ctx = RequestContext::new();

        logger.info_z(&ctx, "one", vec![LogField::string("k", "v")]);
        logger.error_z(&ctx, "two", vec![]);
        logger.debug_z(&ctx, "three", vec![]);

        assert!(sink.records().is_empty());
        assert_eq!(ctx.deferred_count(), 3);
        assert_eq!(logger.finish_level(&ctx, LogLevel::Debug), LogLevel::Error);

        logger.log(LogLevel::Error, &ctx, "finished", vec![]);
        let record = &sink.records()[0];
        assert_eq!(record.field("msg1").unwrap(), "one");
        assert_eq!(record.field("msg2").unwrap(), "two");
        assert_eq!(record.field("msg3").unwrap(), "three");
        assert_eq!(record.field("k").unwrap(), "v");
    }

    #[test]
    fn test_finish_level_without_deferred() {
        let logger = ContextLogger::tracing();
        let ctx = RequestContext::new();
        assert_eq!(logger.finish_level(&ctx, LogLevel::Warn), LogLevel::Warn);
    }

    #[test]
    fn test_append_does_not_write() {
        let sink = MemoryLogSink::new();
        let logger = ContextLogger::new(sink.clone());
        let ctx = RequestContext::new();

        logger.append(&ctx, vec![LogField::string("a", "b")]);

        assert!(sink.records().is_empty());
        assert_eq!(ctx.log_fields().len(), 1);
    }

    #[test]
    #[should_panic(expected = "fatal")]
    fn test_panic_logs_then_panics() {
        let logger = ContextLogger::new(MemoryLogSink::new());
        logger.panic(&RequestContext::new(), "fatal", vec![]);
    }

    #[test]
    fn test_tracing_sink_accepts_every_level() {
        let logger = ContextLogger::tracing();
        let ctx = RequestContext::new();
        for level in [LogLevel::Debug, LogLevel::Info, LogLevel::Warn, LogLevel::Error] {
            logger.log(level, &ctx, "line", vec![]);
        }
    }
}
