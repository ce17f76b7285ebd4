//! Configuration for the authentication engine
//!
//! Loaded with the `config` crate from (lowest precedence first) built-in
//! defaults, an optional file, `AUTH__`-prefixed nested environment variables
//! and a handful of well-known flat variables (`AUTH_TYPE`, `JWT_SECRET`,
//! `ENVIRONMENT`, `SESSION_DURATION`).

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::time::Duration;

use config::{Config, Environment, File};
use serde::{Deserialize, Deserializer, Serialize};
use tracing::warn;

use crate::error::{AuthError, Result};
use crate::jwt::JwtConfig;
use crate::rate_limit::RateLimitConfig;
use crate::types::AuthType;

/// Operator-declared deployment mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeEnvironment {
    #[default]
    Development,
    Production,
}

impl RuntimeEnvironment {
    pub fn is_production(&self) -> bool {
        matches!(self, RuntimeEnvironment::Production)
    }
}

/// Main configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Default auth type for requests that do not select one
    #[serde(deserialize_with = "lenient_auth_type")]
    pub auth_type: AuthType,
    pub environment: RuntimeEnvironment,
    /// Lifetime of a local login session (`SESSION_DURATION`).
    ///
    /// The engine only validates it; the transport layer that sets session
    /// cookies reads it through [`AuthConfig::session_duration`].
    pub session_duration_seconds: u64,
    /// Upper bound for each provider network call
    pub http_timeout_seconds: u64,
    pub jwt: JwtConfig,
    pub rate_limit: RateLimitConfig,
    pub oauth: OAuthSettings,
    pub saml: SamlSettings,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            auth_type: AuthType::Normal,
            environment: RuntimeEnvironment::Development,
            session_duration_seconds: 24 * 3600,
            http_timeout_seconds: 10,
            jwt: JwtConfig::default(),
            rate_limit: RateLimitConfig::default(),
            oauth: OAuthSettings::default(),
            saml: SamlSettings::default(),
        }
    }
}

/// OAuth provider table
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OAuthSettings {
    pub providers: BTreeMap<String, OAuthProviderConfig>,
    /// How long an issued CSRF state stays redeemable
    pub state_ttl_seconds: u64,
}

impl Default for OAuthSettings {
    fn default() -> Self {
        Self {
            providers: BTreeMap::new(),
            state_ttl_seconds: 600,
        }
    }
}

/// One OAuth 2.0 identity provider
#[derive(Clone, Default, Deserialize)]
#[serde(default)]
pub struct OAuthProviderConfig {
    pub client_id: String,
    pub client_secret: String,
    pub redirect_uri: String,
    pub scopes: Vec<String>,
    pub auth_url: String,
    pub token_url: String,
    pub userinfo_url: String,
    /// Canonical field name -> provider claim name overrides
    pub attribute_mapping: HashMap<String, String>,
    /// Directory tenant, Microsoft only
    pub tenant: Option<String>,
}

impl std::fmt::Debug for OAuthProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OAuthProviderConfig")
            .field("client_id", &self.client_id)
            .field("client_secret", &"[REDACTED]")
            .field("redirect_uri", &self.redirect_uri)
            .field("scopes", &self.scopes)
            .field("auth_url", &self.auth_url)
            .field("token_url", &self.token_url)
            .field("userinfo_url", &self.userinfo_url)
            .finish()
    }
}

impl OAuthProviderConfig {
    /// Fill endpoints and scopes for well-known providers when left empty
    pub fn with_well_known_defaults(mut self, name: &str) -> Self {
        let (auth, token, userinfo) = match name {
            "google" => (
                "https://accounts.google.com/o/oauth2/v2/auth".to_string(),
                "https://oauth2.googleapis.com/token".to_string(),
                "https://www.googleapis.com/oauth2/v2/userinfo".to_string(),
            ),
            "microsoft" => {
                let tenant = self.tenant.clone().unwrap_or_else(|| "common".to_string());
                (
                    format!("https://login.microsoftonline.com/{}/oauth2/v2.0/authorize", tenant),
                    format!("https://login.microsoftonline.com/{}/oauth2/v2.0/token", tenant),
                    "https://graph.microsoft.com/v1.0/me".to_string(),
                )
            }
            _ => return self,
        };

        if self.auth_url.is_empty() {
            self.auth_url = auth;
        }
        if self.token_url.is_empty() {
            self.token_url = token;
        }
        if self.userinfo_url.is_empty() {
            self.userinfo_url = userinfo;
        }
        if self.scopes.is_empty() {
            self.scopes = vec!["openid".into(), "profile".into(), "email".into()];
        }
        self
    }

    fn problems(&self, name: &str) -> Vec<String> {
        let mut problems = Vec::new();
        for (field, value) in [
            ("client_id", &self.client_id),
            ("client_secret", &self.client_secret),
            ("redirect_uri", &self.redirect_uri),
            ("auth_url", &self.auth_url),
            ("token_url", &self.token_url),
            ("userinfo_url", &self.userinfo_url),
        ] {
            if value.trim().is_empty() {
                problems.push(format!("oauth provider '{}' is missing {}", name, field));
            }
        }
        problems
    }
}

/// SAML identity provider flavor, selects the attribute mapping table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SamlProviderType {
    Okta,
    Auth0,
    Adfs,
    Shibboleth,
    #[default]
    Custom,
}

pub const ADFS_GROUPS_CLAIM: &str = "http://schemas.microsoft.com/ws/2008/06/identity/claims/groups";
pub const SHIBBOLETH_GROUPS_OID: &str = "urn:oid:1.3.6.1.4.1.5923.1.5.1.1";

/// SAML service-provider settings and the IdP table
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SamlSettings {
    pub sp_entity_id: String,
    pub acs_url: String,
    /// SP certificate (PEM) embedded in the KeyInfo of signed AuthnRequests
    pub certificate_path: Option<PathBuf>,
    /// SP private key (PEM); AuthnRequests are signed only when set
    pub private_key_path: Option<PathBuf>,
    /// Lifetime of a federated session record
    pub session_duration_seconds: u64,
    /// Tolerance applied to NotBefore / NotOnOrAfter
    pub clock_skew_seconds: u64,
    pub metadata_ttl_seconds: u64,
    /// Interval of the expired federated session sweep
    pub sweep_interval_seconds: u64,
    pub providers: BTreeMap<String, SamlProviderConfig>,
}

impl Default for SamlSettings {
    fn default() -> Self {
        Self {
            sp_entity_id: String::new(),
            acs_url: String::new(),
            certificate_path: None,
            private_key_path: None,
            session_duration_seconds: 8 * 3600,
            clock_skew_seconds: 60,
            metadata_ttl_seconds: 24 * 3600,
            sweep_interval_seconds: 300,
            providers: BTreeMap::new(),
        }
    }
}

/// One SAML 2.0 identity provider
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SamlProviderConfig {
    #[serde(rename = "type")]
    pub provider_type: SamlProviderType,
    pub metadata_url: Option<String>,
    pub entity_id: Option<String>,
    pub sso_url: Option<String>,
    /// IdP signing certificate (PEM or bare base64 DER)
    pub certificate: Option<String>,
    pub jit_provisioning: bool,
    pub group_sync: bool,
    pub group_attribute: Option<String>,
    /// Canonical key -> source attribute name, used by the custom flavor
    pub attribute_mapping: HashMap<String, String>,
}

impl SamlProviderConfig {
    /// Configured group attribute, or the flavor's conventional one
    pub fn group_attribute(&self) -> String {
        if let Some(attr) = &self.group_attribute {
            return attr.clone();
        }
        match self.provider_type {
            SamlProviderType::Adfs => ADFS_GROUPS_CLAIM.to_string(),
            SamlProviderType::Shibboleth => SHIBBOLETH_GROUPS_OID.to_string(),
            _ => "groups".to_string(),
        }
    }

    pub(crate) fn problems(&self, name: &str) -> Vec<String> {
        let has = |v: &Option<String>| v.as_deref().map(|s| !s.trim().is_empty()).unwrap_or(false);
        let mut missing = Vec::new();
        match self.provider_type {
            SamlProviderType::Okta | SamlProviderType::Auth0 | SamlProviderType::Shibboleth => {}
            SamlProviderType::Adfs => {
                if !has(&self.entity_id) {
                    missing.push("entity_id");
                }
            }
            SamlProviderType::Custom => {
                if !has(&self.entity_id) {
                    missing.push("entity_id");
                }
                if !has(&self.sso_url) {
                    missing.push("sso_url");
                }
            }
        }

        // Without metadata, everything a login needs must be inline
        if !has(&self.metadata_url) {
            for (field, value) in [
                ("entity_id", &self.entity_id),
                ("sso_url", &self.sso_url),
                ("certificate", &self.certificate),
            ] {
                if !has(value) && !missing.contains(&field) {
                    missing.push(field);
                }
            }
        }

        if missing.is_empty() {
            Vec::new()
        } else {
            vec![format!("saml provider '{}' is missing {}", name, missing.join(", "))]
        }
    }
}

impl AuthConfig {
    /// Load configuration, optionally layering a file under the environment
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::from(path));
        }

        let built = builder
            .add_source(
                Environment::with_prefix("AUTH")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .set_override_option("auth_type", std::env::var("AUTH_TYPE").ok())
            .and_then(|b| b.set_override_option("jwt.secret", std::env::var("JWT_SECRET").ok()))
            .and_then(|b| b.set_override_option("environment", std::env::var("ENVIRONMENT").ok()))
            .and_then(|b| {
                b.set_override_option("session_duration_seconds", std::env::var("SESSION_DURATION").ok())
            })
            .and_then(|b| b.build())
            .map_err(|e| AuthError::Configuration(e.to_string()))?;

        let mut config: AuthConfig = built
            .try_deserialize()
            .map_err(|e| AuthError::Configuration(e.to_string()))?;
        config.apply_provider_defaults();
        Ok(config)
    }

    /// Load from the environment only
    pub fn from_env() -> Result<Self> {
        Self::load(None)
    }

    pub fn apply_provider_defaults(&mut self) {
        self.oauth.providers = std::mem::take(&mut self.oauth.providers)
            .into_iter()
            .map(|(name, provider)| {
                let provider = provider.with_well_known_defaults(&name);
                (name, provider)
            })
            .collect();
    }

    pub fn session_duration(&self) -> Duration {
        Duration::from_secs(self.session_duration_seconds)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_seconds)
    }

    /// Check the settings required by the active auth type.
    ///
    /// Every problem is collected into one configuration error.
    pub fn validate(&self) -> Result<()> {
        let mut problems = Vec::new();

        if self.jwt.secret.is_empty() {
            problems.push("jwt secret is required".to_string());
        }
        if self.session_duration_seconds == 0 {
            problems.push("session duration must be positive".to_string());
        }

        match self.auth_type {
            AuthType::Normal => {}
            AuthType::OAuth => problems.extend(self.oauth.problems()),
            AuthType::Saml => problems.extend(self.saml.problems()),
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(AuthError::Configuration(problems.join("; ")))
        }
    }
}

impl OAuthSettings {
    pub(crate) fn problems(&self) -> Vec<String> {
        if self.providers.is_empty() {
            return vec!["oauth requires at least one provider".to_string()];
        }
        self.providers
            .iter()
            .flat_map(|(name, provider)| provider.problems(name))
            .collect()
    }
}

impl SamlSettings {
    pub(crate) fn problems(&self) -> Vec<String> {
        let mut problems = Vec::new();
        if self.sp_entity_id.trim().is_empty() {
            problems.push("saml sp_entity_id is required".to_string());
        }
        if self.acs_url.trim().is_empty() {
            problems.push("saml acs_url is required".to_string());
        }
        if self.providers.is_empty() {
            problems.push("saml requires at least one provider".to_string());
        }
        for (label, path) in [
            ("certificate", &self.certificate_path),
            ("private key", &self.private_key_path),
        ] {
            if let Some(path) = path {
                if !path.exists() {
                    problems.push(format!("saml {} file not found: {}", label, path.display()));
                }
            }
        }
        for (name, provider) in &self.providers {
            problems.extend(provider.problems(name));
        }
        problems
    }
}

fn lenient_auth_type<'de, D>(deserializer: D) -> std::result::Result<AuthType, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    Ok(raw.parse().unwrap_or_else(|_| {
        warn!(value = %raw, "Invalid AUTH_TYPE, defaulting to normal");
        AuthType::Normal
    }))
}
