//! OAuth 2.0 authorization-code login

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use identity_infra_common::logging::redact_email;
use tracing::{debug, info, warn};

use super::{payload_mismatch, AuthenticationStrategy};
use crate::attributes::map_oauth_profile;
use crate::config::OAuthSettings;
use crate::context::RequestContext;
use crate::error::{AuthError, Result};
use crate::jwt::TokenService;
use crate::oauth::{OAuthProviderClient, OAuthStateStore};
use crate::session::SessionManager;
use crate::store::UserStore;
use crate::types::{AuthOutcome, AuthPayload, AuthType, Identity, OAuthPayload, RedirectInstruction};

pub struct OAuthStrategy {
    settings: OAuthSettings,
    clients: BTreeMap<String, OAuthProviderClient>,
    /// Client construction failures, reported by `validate_config`
    invalid: Vec<String>,
    states: OAuthStateStore,
    users: Arc<dyn UserStore>,
    sessions: Arc<SessionManager>,
    tokens: Arc<TokenService>,
}

impl OAuthStrategy {
    pub fn new(
        settings: OAuthSettings,
        http: reqwest::Client,
        users: Arc<dyn UserStore>,
        sessions: Arc<SessionManager>,
        tokens: Arc<TokenService>,
    ) -> Self {
        let mut clients = BTreeMap::new();
        let mut invalid = Vec::new();
        for (name, provider) in &settings.providers {
            match OAuthProviderClient::new(name, provider.clone(), http.clone()) {
                Ok(client) => {
                    clients.insert(name.clone(), client);
                }
                Err(e) => invalid.push(e.to_string()),
            }
        }

        Self {
            states: OAuthStateStore::new(Duration::from_secs(settings.state_ttl_seconds)),
            settings,
            clients,
            invalid,
            users,
            sessions,
            tokens,
        }
    }

    pub fn providers(&self) -> impl Iterator<Item = &str> {
        self.clients.keys().map(String::as_str)
    }

    fn client(&self, provider: &str) -> Result<&OAuthProviderClient> {
        self.clients.get(provider).ok_or_else(|| {
            AuthError::Validation(format!("unknown oauth provider '{}'", provider))
        })
    }

    async fn start(&self, client: &OAuthProviderClient) -> Result<AuthOutcome> {
        let state = self.states.issue(client.name()).await;
        let url = client.authorization_url(&state);
        debug!(provider = %client.name(), "Issued OAuth authorization redirect");

        Ok(AuthOutcome::Redirect(RedirectInstruction {
            provider: client.name().to_string(),
            url,
            state: Some(state),
            saml_request: None,
            relay_state: None,
        }))
    }

    async fn callback(&self, client: &OAuthProviderClient, payload: &OAuthPayload, code: &str) -> Result<AuthOutcome> {
        let provider = client.name();
        let Some(state) = payload.state.as_deref() else {
            warn!(provider = %provider, "OAuth callback without state");
            return Err(AuthError::AuthenticationFailed);
        };
        self.states.consume(state, provider).await?;

        let provider_tokens = client.exchange_code(code).await?;
        let userinfo = client.fetch_userinfo(&provider_tokens.access_token).await?;
        let profile = map_oauth_profile(provider, &userinfo, &client.config().attribute_mapping)?;

        let user = self.users.get_or_create_user_by_provider_identity(&profile).await?;
        if !user.active {
            warn!(provider = %provider, user_id = %user.id, "OAuth login for inactive account");
            return Err(AuthError::AuthenticationFailed);
        }

        let grant = provider_tokens.into_grant(provider, &profile.provider_user_id);
        self.sessions.store_oauth_tokens(&user.id, grant).await?;

        let identity = Identity::from_user(&user, Some(provider.to_string()), Vec::new());
        let tokens = self.tokens.issue_pair(&identity)?;
        info!(
            provider = %provider,
            user_id = %user.id,
            email = %redact_email(&user.email),
            "OAuth login succeeded"
        );
        Ok(AuthOutcome::Authenticated { tokens, identity })
    }
}

#[async_trait]
impl AuthenticationStrategy for OAuthStrategy {
    fn auth_type(&self) -> AuthType {
        AuthType::OAuth
    }

    fn validate_config(&self) -> Result<()> {
        let mut problems = self.settings.problems();
        problems.extend(self.invalid.iter().cloned());
        if problems.is_empty() {
            Ok(())
        } else {
            Err(AuthError::Configuration(problems.join("; ")))
        }
    }

    async fn authenticate(&self, _ctx: &RequestContext, payload: &AuthPayload) -> Result<AuthOutcome> {
        let AuthPayload::OAuth(oauth) = payload else {
            return Err(payload_mismatch(AuthType::OAuth, payload));
        };
        let client = self.client(&oauth.provider)?;

        match oauth.code.as_deref() {
            None => self.start(client).await,
            Some(code) => self.callback(client, oauth, code).await,
        }
    }
}
