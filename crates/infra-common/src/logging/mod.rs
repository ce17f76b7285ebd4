//! Logging setup, request-scoped contexts and redaction

pub mod context;
pub mod redact;
pub mod setup;

pub use context::LogContext;
pub use redact::{redact_email, redact_token, sanitize_for_logging};
pub use setup::{LoggingConfig, log_welcome, parse_log_level, setup_logging};
