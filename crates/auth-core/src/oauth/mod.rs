//! OAuth 2.0 authorization-code client
//!
//! The authorization URL is built with the `oauth2` crate. The code exchange
//! and the user-info call go through the shared `reqwest` client so they obey
//! the configured HTTP timeout and the caller's cancellation.

pub mod state;

use identity_infra_common::logging::sanitize_for_logging;
use oauth2::basic::BasicClient;
use oauth2::{AuthUrl, ClientId, ClientSecret, CsrfToken, RedirectUrl, Scope, TokenUrl};
use reqwest::StatusCode;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::config::OAuthProviderConfig;
use crate::error::{AuthError, Result};
use crate::types::{ProviderGrant, RawAttributes};

pub use state::OAuthStateStore;

/// Token endpoint response
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderTokens {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub expires_in: Option<i64>,
    #[serde(default)]
    pub token_type: Option<String>,
}

impl ProviderTokens {
    pub fn into_grant(self, provider: &str, provider_user_id: &str) -> ProviderGrant {
        ProviderGrant::new(
            provider,
            provider_user_id,
            self.access_token,
            self.refresh_token,
            self.expires_in,
        )
    }
}

/// Client for one configured provider
pub struct OAuthProviderClient {
    name: String,
    config: OAuthProviderConfig,
    client: BasicClient,
    http: reqwest::Client,
}

impl OAuthProviderClient {
    pub fn new(name: &str, config: OAuthProviderConfig, http: reqwest::Client) -> Result<Self> {
        let invalid = |field: &str, e: oauth2::url::ParseError| {
            AuthError::Configuration(format!("oauth provider '{}' has an invalid {}: {}", name, field, e))
        };

        let client = BasicClient::new(
            ClientId::new(config.client_id.clone()),
            Some(ClientSecret::new(config.client_secret.clone())),
            AuthUrl::new(config.auth_url.clone()).map_err(|e| invalid("auth_url", e))?,
            Some(TokenUrl::new(config.token_url.clone()).map_err(|e| invalid("token_url", e))?),
        )
        .set_redirect_uri(
            RedirectUrl::new(config.redirect_uri.clone()).map_err(|e| invalid("redirect_uri", e))?,
        );

        Ok(Self {
            name: name.to_string(),
            config,
            client,
            http,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &OAuthProviderConfig {
        &self.config
    }

    /// Consent-screen URL carrying `state`
    pub fn authorization_url(&self, state: &str) -> String {
        let state = state.to_string();
        let (url, _) = self
            .client
            .authorize_url(move || CsrfToken::new(state))
            .add_scopes(self.config.scopes.iter().cloned().map(Scope::new))
            .url();
        url.to_string()
    }

    /// Exchange an authorization code for provider tokens.
    ///
    /// A 400/401 answer means the provider rejected the code; any other
    /// failure is an upstream error. Nothing is retried.
    pub async fn exchange_code(&self, code: &str) -> Result<ProviderTokens> {
        let params = [
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", self.config.redirect_uri.as_str()),
            ("client_id", self.config.client_id.as_str()),
            ("client_secret", self.config.client_secret.as_str()),
        ];

        let response = self
            .http
            .post(&self.config.token_url)
            .header(reqwest::header::ACCEPT, "application/json")
            .form(&params)
            .send()
            .await
            .map_err(|e| AuthError::Upstream(format!("{} token exchange failed: {}", self.name, e)))?;

        let status = response.status();
        if matches!(status, StatusCode::BAD_REQUEST | StatusCode::UNAUTHORIZED) {
            let body = response
                .json::<serde_json::Map<String, serde_json::Value>>()
                .await
                .unwrap_or_default();
            warn!(
                provider = %self.name,
                status_code = status.as_u16(),
                response = ?sanitize_for_logging(&body),
                "Provider rejected authorization code"
            );
            return Err(AuthError::AuthenticationFailed);
        }
        if !status.is_success() {
            return Err(AuthError::Upstream(format!(
                "{} token endpoint returned {}",
                self.name,
                status.as_u16()
            )));
        }

        let tokens = response.json::<ProviderTokens>().await.map_err(|e| {
            AuthError::Upstream(format!("{} token response unreadable: {}", self.name, e))
        })?;
        debug!(provider = %self.name, has_refresh_token = tokens.refresh_token.is_some(), "Exchanged authorization code");
        Ok(tokens)
    }

    /// Fetch the raw user-info document with the provider access token
    pub async fn fetch_userinfo(&self, access_token: &str) -> Result<RawAttributes> {
        let response = self
            .http
            .get(&self.config.userinfo_url)
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(|e| AuthError::Upstream(format!("{} user info request failed: {}", self.name, e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(AuthError::Upstream(format!(
                "{} user info endpoint returned {}",
                self.name,
                status.as_u16()
            )));
        }

        response
            .json::<RawAttributes>()
            .await
            .map_err(|e| AuthError::Upstream(format!("{} user info unreadable: {}", self.name, e)))
    }
}
