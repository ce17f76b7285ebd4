//! Error types for authentication operations

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::types::AuthType;

/// Authentication engine errors.
///
/// `AuthenticationFailed` is deliberately opaque: strategies log the precise
/// cause (with redacted values) and return this variant so callers cannot
/// tell an unknown account from a wrong password or a forged assertion.
#[derive(Debug, Clone, Error)]
pub enum AuthError {
    /// Missing or invalid provider, secret or strategy configuration
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Malformed request payload
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Authentication failed")]
    AuthenticationFailed,

    /// The request named an auth type with no registered strategy
    #[error("No strategy registered for auth type '{0}'")]
    NotRegistered(AuthType),

    /// Identity provider or metadata endpoint failure
    #[error("Upstream error: {0}")]
    Upstream(String),

    #[error("Rate limit exceeded, retry after {reset_at}")]
    RateLimitExceeded { reset_at: DateTime<Utc> },

    #[error("Invalid token: {0}")]
    InvalidToken(String),

    #[error("Token expired")]
    TokenExpired,

    #[error("Token revoked")]
    TokenRevoked,

    /// A collaborator store failed to record durable state
    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Cache error: {0}")]
    Cache(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AuthError {
    /// Stable machine-readable code for the transport layer
    pub fn code(&self) -> &'static str {
        match self {
            AuthError::Configuration(_) => "CONFIGURATION_ERROR",
            AuthError::Validation(_) => "VALIDATION_ERROR",
            AuthError::AuthenticationFailed => "INVALID_CREDENTIALS",
            AuthError::NotRegistered(_) => "NOT_REGISTERED",
            AuthError::Upstream(_) => "UPSTREAM_ERROR",
            AuthError::RateLimitExceeded { .. } => "RATE_LIMITED",
            AuthError::InvalidToken(_) => "INVALID_TOKEN",
            AuthError::TokenExpired => "TOKEN_EXPIRED",
            AuthError::TokenRevoked => "TOKEN_REVOKED",
            AuthError::Persistence(_) => "PERSISTENCE_ERROR",
            AuthError::Cache(_) => "CACHE_ERROR",
            AuthError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// True when the caller caused the failure and may act on it
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            AuthError::Validation(_)
                | AuthError::AuthenticationFailed
                | AuthError::RateLimitExceeded { .. }
                | AuthError::InvalidToken(_)
                | AuthError::TokenExpired
                | AuthError::TokenRevoked
        )
    }

    /// True for token validation failures that the caller should treat as "invalid"
    pub fn is_token_rejection(&self) -> bool {
        matches!(
            self,
            AuthError::InvalidToken(_) | AuthError::TokenExpired | AuthError::TokenRevoked
        )
    }
}

impl From<jsonwebtoken::errors::Error> for AuthError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        use jsonwebtoken::errors::ErrorKind;
        match err.kind() {
            ErrorKind::ExpiredSignature => AuthError::TokenExpired,
            _ => AuthError::InvalidToken(err.to_string()),
        }
    }
}

impl From<reqwest::Error> for AuthError {
    fn from(err: reqwest::Error) -> Self {
        AuthError::Upstream(err.to_string())
    }
}

impl From<validator::ValidationErrors> for AuthError {
    fn from(err: validator::ValidationErrors) -> Self {
        AuthError::Validation(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, AuthError>;
