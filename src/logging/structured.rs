use std::collections::BTreeMap;
use tracing::{debug, error, info, trace, warn};

/// Context information for log messages
#[derive(Debug, Clone)]
pub struct LogContext {
    /// Component name (e.g., "scheduler", "entsoe", "relay")
    pub component: String,
    /// Additional context fields, printed in key order
    pub extra_fields: BTreeMap<String, String>,
}

impl LogContext {
    /// Create a new log context
    pub fn new(component: &str) -> Self {
        Self {
            component: component.to_string(),
            extra_fields: BTreeMap::new(),
        }
    }

    /// Add extra field
    #[must_use]
    pub fn with_field(mut self, key: &str, value: impl ToString) -> Self {
        self.extra_fields.insert(key.to_string(), value.to_string());
        self
    }
}

/// Structured logger with context
#[derive(Debug, Clone)]
pub struct StructuredLogger {
    context: LogContext,
    fields: String,
}

impl StructuredLogger {
    /// Create a new structured logger with context
    pub fn new(context: LogContext) -> Self {
        let fields = format_fields(&context);
        Self { context, fields }
    }

    pub fn component(&self) -> &str {
        &self.context.component
    }

    pub fn info(&self, message: &str) {
        info!(fields = %self.fields, "{}", message);
    }

    pub fn warn(&self, message: &str) {
        warn!(fields = %self.fields, "{}", message);
    }

    pub fn error(&self, message: &str) {
        error!(fields = %self.fields, "{}", message);
    }

    pub fn debug(&self, message: &str) {
        debug!(fields = %self.fields, "{}", message);
    }

    pub fn trace(&self, message: &str) {
        trace!(fields = %self.fields, "{}", message);
    }
}

fn format_fields(context: &LogContext) -> String {
    let mut fields = vec![format!("component={}", context.component)];
    for (key, value) in &context.extra_fields {
        fields.push(format!("{key}={value}"));
    }
    fields.join(",")
}

/// Create a logger for a specific component
pub fn get_logger(component: &str) -> StructuredLogger {
    StructuredLogger::new(LogContext::new(component))
}

/// Create a logger with full context
pub fn get_logger_with_context(context: LogContext) -> StructuredLogger {
    StructuredLogger::new(context)
}
