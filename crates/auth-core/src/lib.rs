//! # Auth-Core
//!
//! Multi-strategy authentication engine for the identity service.
//!
//! This crate provides:
//! - Password, OAuth 2.0 and SAML 2.0 strategies behind one registry
//! - Provider attribute normalization and SAML group sync
//! - A two-level cache for identity-provider metadata
//! - HS256 access/refresh tokens with a shared revocation list
//! - Login and registration rate limiting that survives a cache outage
//!
//! ## Architecture
//!
//! [`AuthService`] is the facade. It rate limits the caller, resolves the
//! strategy for the requested [`AuthType`] from the [`StrategyManager`] and
//! issues a [`TokenPair`] through the [`TokenService`]. User, grant and
//! session persistence and the shared cache are collaborator traits in
//! [`store`].

pub mod attributes;
pub mod config;
pub mod context;
pub mod error;
pub mod jwt;
pub mod manager;
pub mod metrics;
pub mod oauth;
pub mod rate_limit;
pub mod saml;
pub mod service;
pub mod session;
pub mod store;
pub mod strategy;
pub mod types;

pub use attributes::{extract_groups, AttributeMapper, CanonicalAttributes};
pub use config::{AuthConfig, RuntimeEnvironment, SamlProviderType};
pub use context::RequestContext;
pub use error::{AuthError, Result};
pub use jwt::{Claims, JwtConfig, SecretValidator, TokenBlacklist, TokenService};
pub use manager::{StrategyManager, StrategyManagerBuilder};
pub use metrics::{AuthMetrics, MetricsSnapshot};
pub use rate_limit::{
    ActionKind, FallbackRateLimiter, LocalRateLimiter, RateLimitConfig, RateLimitDecision, RateLimiter,
    SharedRateLimiter,
};
pub use saml::{SamlMetadataCache, XmlSignatureProvider};
pub use service::{AuthService, AuthServiceBuilder};
pub use session::SessionManager;
pub use strategy::{AuthenticationStrategy, NormalStrategy, OAuthStrategy, SamlStrategy, Strategy};
pub use types::{AuthOutcome, AuthPayload, AuthType, Identity, TokenPair};

use identity_infra_common::logging::{log_welcome, setup_logging, LoggingConfig};

/// Build a service backed by the in-memory stores
pub async fn init(config: AuthConfig) -> Result<AuthService> {
    AuthService::builder(config).build().await
}

/// Install the global tracing subscriber from `LOG_LEVEL` and `LOG_FORMAT`
pub fn init_logging() -> Result<()> {
    let config = LoggingConfig::from_env().map_err(|e| AuthError::Configuration(e.to_string()))?;
    let app_name = config.app_name.clone();
    setup_logging(config).map_err(|e| AuthError::Configuration(e.to_string()))?;
    log_welcome(&app_name, env!("CARGO_PKG_VERSION"));
    Ok(())
}
