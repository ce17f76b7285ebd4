//! Per-request context passed to every operation

use std::time::Duration;

use identity_infra_common::LogContext;
use tracing::{Level, Span};
use uuid::Uuid;

/// Carries the trace id, the rate-limit subject and an optional deadline.
///
/// Components log under [`RequestContext::span`] instead of a process-wide
/// logger, so every event of one request shares the same trace id.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub trace_id: String,
    /// Caller address or other subject used for rate limiting
    pub client_ip: Option<String>,
    /// Cancels the operation once elapsed
    pub timeout: Option<Duration>,
}

impl Default for RequestContext {
    fn default() -> Self {
        Self::new()
    }
}

impl RequestContext {
    pub fn new() -> Self {
        Self {
            trace_id: Uuid::new_v4().to_string(),
            client_ip: None,
            timeout: None,
        }
    }

    pub fn with_trace_id(mut self, trace_id: impl Into<String>) -> Self {
        self.trace_id = trace_id.into();
        self
    }

    pub fn with_client_ip(mut self, client_ip: impl Into<String>) -> Self {
        self.client_ip = Some(client_ip.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Log context for `component` performing `operation` under this request
    pub fn log_context(&self, component: &str, operation: &str) -> LogContext {
        let ctx = LogContext::with_operation(component, operation).with_trace_id(&self.trace_id);
        match &self.client_ip {
            Some(ip) => ctx.with_field("client_ip", ip),
            None => ctx,
        }
    }

    pub fn span(&self, component: &str, operation: &str) -> Span {
        self.log_context(component, operation).span(Level::INFO)
    }
}
