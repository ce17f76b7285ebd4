//! Authentication service facade
//!
//! The operations the transport layer calls: authenticate, logout, token
//! validation and refresh. [`AuthServiceBuilder`] wires every collaborator in
//! a single phase and registers the strategies the configuration enables.

use std::sync::Arc;
use std::time::Duration;

use identity_infra_common::logging::redact_token;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn, Instrument};

use crate::config::AuthConfig;
use crate::context::RequestContext;
use crate::error::{AuthError, Result};
use crate::jwt::{TokenBlacklist, TokenService};
use crate::manager::{StrategyManager, StrategyManagerBuilder};
use crate::metrics::{AuthMetrics, MetricsSnapshot};
use crate::rate_limit::{ActionKind, FallbackRateLimiter, RateLimitDecision, SharedRateLimiter};
use crate::saml::{SamlMetadataCache, XmlSignatureProvider};
use crate::session::{spawn_session_sweeper, SessionManager};
use crate::store::{
    FederatedSessionStore, GrantStore, InMemoryGrantStore, InMemorySessionStore, InMemorySharedCache,
    InMemoryUserStore, SharedCache, UserStore,
};
use crate::strategy::{AuthenticationStrategy, NormalStrategy, OAuthStrategy, SamlStrategy, Strategy};
use crate::types::{AuthOutcome, AuthPayload, AuthType, Identity, TokenPair};

const COMPONENT: &str = "auth_service";

/// Entry point for every authentication operation
///
/// # Example
///
/// ```
/// use identity_auth_core::{AuthConfig, AuthError, AuthService, RequestContext};
/// use identity_auth_core::types::{AuthPayload, CredentialsPayload};
///
/// # tokio_test::block_on(async {
/// let mut config = AuthConfig::default();
/// config.jwt.secret = "Xk9#mP2$vL7!qR4@wT8%nB3^hJ6&zC1*".to_string();
/// let service = AuthService::builder(config).build().await?;
///
/// let payload = AuthPayload::Credentials(CredentialsPayload {
///     email: "nobody@example.com".to_string(),
///     password: "secret".to_string(),
/// });
/// let result = service.authenticate(&RequestContext::new(), None, payload).await;
/// assert!(matches!(result, Err(AuthError::AuthenticationFailed)));
/// # Ok::<(), AuthError>(())
/// # }).unwrap();
/// ```
pub struct AuthService {
    config: AuthConfig,
    manager: StrategyManager,
    tokens: Arc<TokenService>,
    rate_limiter: FallbackRateLimiter,
    sessions: Arc<SessionManager>,
    metrics: Arc<AuthMetrics>,
}

impl AuthService {
    pub fn builder(config: AuthConfig) -> AuthServiceBuilder {
        AuthServiceBuilder::new(config)
    }

    /// Authenticate one request.
    ///
    /// `auth_type` defaults to the configured active type. The caller is
    /// rate limited before any strategy runs, and the strategy is cancelled
    /// once the context's timeout elapses.
    pub async fn authenticate(
        &self,
        ctx: &RequestContext,
        auth_type: Option<AuthType>,
        payload: AuthPayload,
    ) -> Result<AuthOutcome> {
        let auth_type = auth_type.unwrap_or_else(|| self.manager.active_auth_type());
        let span = ctx.span(COMPONENT, "authenticate");

        async move {
            if let Some(subject) = rate_limit_subject(ctx, &payload) {
                self.enforce(&subject, ActionKind::Login).await?;
            }

            payload.validate()?;
            if payload.auth_type() != auth_type {
                return Err(AuthError::Validation(format!(
                    "{} payload sent for auth type {}",
                    payload.auth_type(),
                    auth_type
                )));
            }

            let strategy = self.manager.get_strategy(auth_type)?;
            let result = self.run(ctx, strategy, &payload).await;

            match &result {
                Ok(AuthOutcome::Authenticated { identity, .. }) => {
                    self.metrics.record_authentication(true);
                    info!(auth_type = %auth_type, user_id = %identity.user_id, "Authentication succeeded");
                }
                Ok(AuthOutcome::Redirect(redirect)) => {
                    debug!(auth_type = %auth_type, provider = %redirect.provider, "Authentication continues at provider");
                }
                Err(e) => {
                    self.metrics.record_authentication(false);
                    warn!(auth_type = %auth_type, error_code = e.code(), "Authentication failed");
                }
            }
            result
        }
        .instrument(span)
        .await
    }

    async fn run(&self, ctx: &RequestContext, strategy: &Strategy, payload: &AuthPayload) -> Result<AuthOutcome> {
        match ctx.timeout {
            Some(limit) => tokio::time::timeout(limit, strategy.authenticate(ctx, payload))
                .await
                .map_err(|_| AuthError::Upstream(format!("authentication timed out after {:?}", limit)))?,
            None => strategy.authenticate(ctx, payload).await,
        }
    }

    /// Revoke `access_token` for the rest of its lifetime
    pub async fn logout(&self, ctx: &RequestContext, access_token: &str) -> Result<()> {
        async {
            let claims = self.tokens.revoke(access_token).await?;
            info!(user_id = %claims.sub, token = %redact_token(access_token), "Logged out");
            Ok(())
        }
        .instrument(ctx.span(COMPONENT, "logout"))
        .await
    }

    /// Identity behind a valid, unrevoked access token
    pub async fn validate_token(&self, ctx: &RequestContext, token: &str) -> Result<Identity> {
        async {
            let claims = self.tokens.validate_access_token(token).await?;
            Ok(claims.to_identity())
        }
        .instrument(ctx.span(COMPONENT, "validate_token"))
        .await
    }

    /// Rotate a refresh token into a new pair
    pub async fn refresh(&self, ctx: &RequestContext, refresh_token: &str) -> Result<TokenPair> {
        self.tokens
            .refresh(refresh_token)
            .instrument(ctx.span(COMPONENT, "refresh"))
            .await
    }

    /// Revoke every token issued to `user_id` so far
    pub async fn logout_everywhere(&self, ctx: &RequestContext, user_id: &str) -> Result<()> {
        self.tokens
            .revoke_user(user_id)
            .instrument(ctx.span(COMPONENT, "logout_everywhere"))
            .await
    }

    /// Count a registration attempt by `identifier` against the register limit
    pub async fn check_registration_allowed(
        &self,
        ctx: &RequestContext,
        identifier: &str,
    ) -> Result<RateLimitDecision> {
        self.enforce(identifier, ActionKind::Register)
            .instrument(ctx.span(COMPONENT, "check_registration_allowed"))
            .await
    }

    async fn enforce(&self, identifier: &str, kind: ActionKind) -> Result<RateLimitDecision> {
        let decision = self.rate_limiter.check(identifier, kind).await;
        if !decision.allowed {
            warn!(action = %kind, reset_at = %decision.reset_at, "Rate limit exceeded");
            return Err(AuthError::RateLimitExceeded {
                reset_at: decision.reset_at,
            });
        }
        Ok(decision)
    }

    /// Start the background sweep of expired SAML sessions
    pub fn spawn_session_sweeper(&self) -> JoinHandle<()> {
        spawn_session_sweeper(
            self.sessions.clone(),
            Duration::from_secs(self.config.saml.sweep_interval_seconds),
        )
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    pub fn strategies(&self) -> &StrategyManager {
        &self.manager
    }

    pub fn token_service(&self) -> &TokenService {
        &self.tokens
    }

    pub fn rate_limiter(&self) -> &FallbackRateLimiter {
        &self.rate_limiter
    }

    pub fn session_manager(&self) -> &SessionManager {
        &self.sessions
    }

    pub fn config(&self) -> &AuthConfig {
        &self.config
    }
}

/// Caller address, or the account for password logins without one
fn rate_limit_subject(ctx: &RequestContext, payload: &AuthPayload) -> Option<String> {
    if let Some(ip) = &ctx.client_ip {
        return Some(ip.clone());
    }
    match payload {
        AuthPayload::Credentials(credentials) => Some(credentials.email.trim().to_ascii_lowercase()),
        _ => None,
    }
}

/// Wires collaborators and registers strategies.
///
/// Stores left unset fall back to the in-memory implementations.
pub struct AuthServiceBuilder {
    config: AuthConfig,
    users: Option<Arc<dyn UserStore>>,
    grants: Option<Arc<dyn GrantStore>>,
    sessions: Option<Arc<dyn FederatedSessionStore>>,
    cache: Option<Arc<dyn SharedCache>>,
    signer: Option<Arc<dyn XmlSignatureProvider>>,
    metrics: Option<Arc<AuthMetrics>>,
    http: Option<reqwest::Client>,
}

impl AuthServiceBuilder {
    pub fn new(config: AuthConfig) -> Self {
        Self {
            config,
            users: None,
            grants: None,
            sessions: None,
            cache: None,
            signer: None,
            metrics: None,
            http: None,
        }
    }

    pub fn user_store(mut self, users: Arc<dyn UserStore>) -> Self {
        self.users = Some(users);
        self
    }

    pub fn grant_store(mut self, grants: Arc<dyn GrantStore>) -> Self {
        self.grants = Some(grants);
        self
    }

    pub fn session_store(mut self, sessions: Arc<dyn FederatedSessionStore>) -> Self {
        self.sessions = Some(sessions);
        self
    }

    pub fn shared_cache(mut self, cache: Arc<dyn SharedCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn signature_provider(mut self, signer: Arc<dyn XmlSignatureProvider>) -> Self {
        self.signer = Some(signer);
        self
    }

    pub fn metrics(mut self, metrics: Arc<AuthMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Override the HTTP client used for provider calls
    pub fn http_client(mut self, http: reqwest::Client) -> Self {
        self.http = Some(http);
        self
    }

    /// Validate configuration and secret, then register strategies.
    ///
    /// Normal is always registered. OAuth and SAML are registered when they
    /// have providers; a failure is fatal only for the active auth type.
    pub async fn build(self) -> Result<AuthService> {
        let config = self.config;
        config.validate()?;

        let metrics = self.metrics.unwrap_or_default();
        let cache: Arc<dyn SharedCache> = self.cache.unwrap_or_else(|| Arc::new(InMemorySharedCache::new()));
        let users: Arc<dyn UserStore> = self.users.unwrap_or_else(|| Arc::new(InMemoryUserStore::new()));
        let grants: Arc<dyn GrantStore> = self.grants.unwrap_or_else(|| Arc::new(InMemoryGrantStore::new()));
        let session_store: Arc<dyn FederatedSessionStore> =
            self.sessions.unwrap_or_else(|| Arc::new(InMemorySessionStore::new()));
        let http = match self.http {
            Some(http) => http,
            None => reqwest::Client::builder()
                .timeout(config.http_timeout())
                .build()
                .map_err(|e| AuthError::Configuration(format!("failed to build HTTP client: {}", e)))?,
        };

        let tokens = Arc::new(TokenService::new(
            config.jwt.clone(),
            config.environment,
            TokenBlacklist::new(cache.clone()),
        )?);
        let sessions = Arc::new(SessionManager::new(grants, session_store));
        let rate_limiter = FallbackRateLimiter::new(
            SharedRateLimiter::new(cache.clone(), config.rate_limit.clone()),
            metrics.clone(),
        )
        .await;

        let active = config.auth_type;
        let mut manager = StrategyManager::builder(active);
        register(&mut manager, active, NormalStrategy::new(users.clone(), tokens.clone()))?;

        if !config.oauth.providers.is_empty() {
            let strategy = OAuthStrategy::new(
                config.oauth.clone(),
                http.clone(),
                users.clone(),
                sessions.clone(),
                tokens.clone(),
            );
            register(&mut manager, active, strategy)?;
        }

        if !config.saml.providers.is_empty() {
            let metadata = SamlMetadataCache::new(
                http.clone(),
                Duration::from_secs(config.saml.metadata_ttl_seconds),
                metrics.clone(),
            )
            .with_shared_cache(cache.clone());
            let strategy = SamlStrategy::new(
                config.saml.clone(),
                metadata,
                self.signer,
                users.clone(),
                sessions.clone(),
                tokens.clone(),
            );
            register(&mut manager, active, strategy)?;
        }

        let manager = manager.build();
        info!(
            active = %active,
            registered = ?manager.registered_types(),
            environment = ?config.environment,
            "Authentication service ready"
        );

        Ok(AuthService {
            config,
            manager,
            tokens,
            rate_limiter,
            sessions,
            metrics,
        })
    }
}

fn register(manager: &mut StrategyManagerBuilder, active: AuthType, strategy: impl Into<Strategy>) -> Result<()> {
    let strategy = strategy.into();
    let auth_type = strategy.auth_type();
    match manager.register(strategy) {
        Ok(()) => Ok(()),
        Err(e) if auth_type == active => Err(e),
        Err(e) => {
            warn!(auth_type = %auth_type, error = %e, "Skipping strategy for inactive auth type");
            Ok(())
        }
    }
}
