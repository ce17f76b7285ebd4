//! Core types shared by every strategy

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::error::{AuthError, Result};

/// Raw, loosely typed attributes asserted by an external identity provider.
///
/// Values are strings, string arrays, or whatever opaque JSON shape the
/// provider chose to send.
pub type RawAttributes = HashMap<String, serde_json::Value>;

static PROVIDER_NAME_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z0-9_-]{1,64}$").expect("provider name pattern is valid"));

/// Role given to every provisioned account
pub const DEFAULT_ROLE: &str = "user";

/// Authentication protocol selector.
///
/// Exactly one strategy may be registered per value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthType {
    Normal,
    #[serde(rename = "oauth")]
    OAuth,
    Saml,
}

impl AuthType {
    pub const ALL: [AuthType; 3] = [AuthType::Normal, AuthType::OAuth, AuthType::Saml];

    pub fn as_str(&self) -> &'static str {
        match self {
            AuthType::Normal => "normal",
            AuthType::OAuth => "oauth",
            AuthType::Saml => "saml",
        }
    }
}

impl fmt::Display for AuthType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AuthType {
    type Err = AuthError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "normal" => Ok(AuthType::Normal),
            "oauth" => Ok(AuthType::OAuth),
            "saml" => Ok(AuthType::Saml),
            other => Err(AuthError::Validation(format!("unknown auth type '{}'", other))),
        }
    }
}

/// Local user record, owned by the external user store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub roles: Vec<String>,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    /// Create a new user ID
    pub fn new_id() -> String {
        Uuid::new_v4().to_string()
    }

    /// "First Last", falling back to the email when no name is known
    pub fn display_name(&self) -> String {
        let full = format!("{} {}", self.first_name, self.last_name);
        let full = full.trim();
        if full.is_empty() {
            self.email.clone()
        } else {
            full.to_string()
        }
    }
}

/// Fields needed to provision a local user
#[derive(Debug, Clone)]
pub struct NewUser {
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub roles: Vec<String>,
}

/// Canonical profile returned by an OAuth provider after attribute mapping
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderProfile {
    pub provider: String,
    pub provider_user_id: String,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub avatar_url: Option<String>,
}

/// Canonical result of any strategy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub user_id: String,
    pub email: String,
    pub display_name: String,
    pub roles: Vec<String>,
    /// Originating provider for federated logins
    pub provider: Option<String>,
    /// Raw groups asserted by the provider, before role sync
    pub groups: Vec<String>,
}

impl Identity {
    pub fn from_user(user: &User, provider: Option<String>, groups: Vec<String>) -> Self {
        Self {
            user_id: user.id.clone(),
            email: user.email.clone(),
            display_name: user.display_name(),
            roles: user.roles.clone(),
            provider,
            groups,
        }
    }
}

/// Signed access and refresh tokens
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: String,
    /// Access token lifetime in seconds
    pub expires_in: u64,
    pub access_expires_at: DateTime<Utc>,
    pub refresh_expires_at: DateTime<Utc>,
}

/// An OAuth provider's token grant for a local user.
///
/// Superseded, never duplicated, on re-authentication with the same
/// (user, provider) pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderGrant {
    pub id: String,
    pub user_id: String,
    pub provider: String,
    pub provider_user_id: String,
    #[serde(skip_serializing)]
    pub access_token: String,
    #[serde(skip_serializing)]
    pub refresh_token: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ProviderGrant {
    pub fn new(
        provider: impl Into<String>,
        provider_user_id: impl Into<String>,
        access_token: impl Into<String>,
        refresh_token: Option<String>,
        expires_in_seconds: Option<i64>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            user_id: String::new(),
            provider: provider.into(),
            provider_user_id: provider_user_id.into(),
            access_token: access_token.into(),
            refresh_token,
            expires_at: expires_in_seconds.map(|secs| now + Duration::seconds(secs)),
            created_at: now,
            updated_at: now,
        }
    }
}

/// A SAML login recorded against a local user
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FederatedSession {
    pub id: String,
    pub user_id: String,
    /// Name of the SAML provider configuration that asserted the login
    pub saml_config_id: String,
    pub session_index: Option<String>,
    pub name_id: String,
    pub attributes: RawAttributes,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl FederatedSession {
    /// Build a session lasting `duration`, which must be positive
    pub fn new(
        user_id: impl Into<String>,
        saml_config_id: impl Into<String>,
        session_index: Option<String>,
        name_id: impl Into<String>,
        attributes: RawAttributes,
        duration: Duration,
    ) -> Result<Self> {
        if duration <= Duration::zero() {
            return Err(AuthError::Validation(
                "federated session duration must be positive".to_string(),
            ));
        }
        let created_at = Utc::now();
        Ok(Self {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.into(),
            saml_config_id: saml_config_id.into(),
            session_index,
            name_id: name_id.into(),
            attributes,
            created_at,
            expires_at: created_at + duration,
        })
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// Email and password submitted to the normal strategy
#[derive(Clone, Validate, Deserialize)]
pub struct CredentialsPayload {
    #[validate(length(min = 1, max = 254), email)]
    pub email: String,

    #[validate(length(min = 1, max = 1024))]
    pub password: String,
}

impl std::fmt::Debug for CredentialsPayload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialsPayload")
            .field("email", &self.email)
            .field("password", &"[REDACTED]")
            .finish()
    }
}

/// OAuth start (no code) or callback (code and state)
#[derive(Debug, Clone, Validate, Deserialize)]
pub struct OAuthPayload {
    #[validate(regex(path = *PROVIDER_NAME_REGEX))]
    pub provider: String,

    #[validate(length(min = 1, max = 2048))]
    pub code: Option<String>,

    #[validate(length(min = 1, max = 512))]
    pub state: Option<String>,
}

/// SAML start (no response) or assertion consumer (base64 response)
#[derive(Debug, Clone, Validate, Deserialize)]
pub struct SamlPayload {
    #[validate(regex(path = *PROVIDER_NAME_REGEX))]
    pub provider: Option<String>,

    #[validate(length(min = 1))]
    pub saml_response: Option<String>,

    pub relay_state: Option<String>,
}

/// Auth-type-specific request payload
#[derive(Debug, Clone)]
pub enum AuthPayload {
    Credentials(CredentialsPayload),
    OAuth(OAuthPayload),
    Saml(SamlPayload),
}

impl AuthPayload {
    /// The auth type this payload is shaped for
    pub fn auth_type(&self) -> AuthType {
        match self {
            AuthPayload::Credentials(_) => AuthType::Normal,
            AuthPayload::OAuth(_) => AuthType::OAuth,
            AuthPayload::Saml(_) => AuthType::Saml,
        }
    }

    pub fn validate(&self) -> Result<()> {
        match self {
            AuthPayload::Credentials(p) => p.validate()?,
            AuthPayload::OAuth(p) => p.validate()?,
            AuthPayload::Saml(p) => p.validate()?,
        }
        Ok(())
    }
}

/// Where to send the browser to continue a federated login
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedirectInstruction {
    pub provider: String,
    pub url: String,
    /// OAuth CSRF state
    pub state: Option<String>,
    /// Base64 AuthnRequest for the SAML POST or redirect binding
    pub saml_request: Option<String>,
    pub relay_state: Option<String>,
}

/// Outcome of one authentication step
#[derive(Debug, Clone)]
pub enum AuthOutcome {
    Authenticated { tokens: TokenPair, identity: Identity },
    Redirect(RedirectInstruction),
}

impl AuthOutcome {
    pub fn tokens(&self) -> Option<&TokenPair> {
        match self {
            AuthOutcome::Authenticated { tokens, .. } => Some(tokens),
            AuthOutcome::Redirect(_) => None,
        }
    }

    pub fn identity(&self) -> Option<&Identity> {
        match self {
            AuthOutcome::Authenticated { identity, .. } => Some(identity),
            AuthOutcome::Redirect(_) => None,
        }
    }
}
