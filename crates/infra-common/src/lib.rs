//! # Infra-Common
//!
//! Shared infrastructure for the identity services.
//!
//! This crate provides:
//! - Tracing subscriber setup with env-filter and optional JSON output
//! - Request-scoped log contexts that carry a trace id through every component
//! - Redaction helpers so credentials, tokens and emails never reach the logs
//! - Error context decoration for errors crossing a persistence boundary

pub mod errors;
pub mod logging;

pub use errors::{Error, ErrorContext, ErrorExt, Result};
pub use logging::{LogContext, LoggingConfig, setup_logging};
