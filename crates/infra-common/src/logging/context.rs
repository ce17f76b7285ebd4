use std::collections::BTreeMap;
use std::fmt;
use tracing::{Level, Span};

/// Context information for logging.
///
/// A `LogContext` is built per request (or per background task) and handed to
/// the components doing the work, so every event they emit lands under a span
/// keyed by the same trace id.
#[derive(Debug, Clone)]
pub struct LogContext {
    /// Component that is generating the log
    pub component: String,
    /// Operation or action being performed
    pub operation: Option<String>,
    /// Correlation id shared by every span of one request
    pub trace_id: Option<String>,
    /// Additional contextual fields
    pub fields: BTreeMap<String, String>,
}

impl LogContext {
    /// Create a new log context with just the component name
    pub fn new<S: Into<String>>(component: S) -> Self {
        LogContext {
            component: component.into(),
            operation: None,
            trace_id: None,
            fields: BTreeMap::new(),
        }
    }

    /// Create a new log context with component and operation
    pub fn with_operation<S: Into<String>, T: Into<String>>(component: S, operation: T) -> Self {
        LogContext {
            operation: Some(operation.into()),
            ..Self::new(component)
        }
    }

    /// Attach the request trace id
    pub fn with_trace_id<S: Into<String>>(mut self, trace_id: S) -> Self {
        self.trace_id = Some(trace_id.into());
        self
    }

    /// Add a field to the context
    pub fn with_field<S: Into<String>, T: Into<String>>(mut self, key: S, value: T) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    /// Create a span carrying this context's component, operation and trace id
    pub fn span(&self, level: Level) -> Span {
        let operation = self.operation.as_deref().unwrap_or("-");
        let trace_id = self.trace_id.as_deref().unwrap_or("-");
        match level {
            Level::TRACE => tracing::trace_span!("identity", component = %self.component, operation = %operation, trace_id = %trace_id),
            Level::DEBUG => tracing::debug_span!("identity", component = %self.component, operation = %operation, trace_id = %trace_id),
            Level::WARN => tracing::warn_span!("identity", component = %self.component, operation = %operation, trace_id = %trace_id),
            Level::ERROR => tracing::error_span!("identity", component = %self.component, operation = %operation, trace_id = %trace_id),
            _ => tracing::info_span!("identity", component = %self.component, operation = %operation, trace_id = %trace_id),
        }
    }
}

impl fmt::Display for LogContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]", self.component)?;

        if let Some(op) = &self.operation {
            write!(f, "[{}]", op)?;
        }

        if let Some(trace_id) = &self.trace_id {
            write!(f, "[trace_id={}]", trace_id)?;
        }

        for (key, value) in &self.fields {
            write!(f, "[{}={}]", key, value)?;
        }

        Ok(())
    }
}
