//! JWT token issuance, validation and revocation

pub mod blacklist;
pub mod secret;

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::RuntimeEnvironment;
use crate::error::{AuthError, Result};
use crate::types::{Identity, TokenPair};

pub use blacklist::TokenBlacklist;
pub use secret::{SecretReport, SecretValidator};

/// Which half of a pair a token is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenType {
    Access,
    Refresh,
}

/// Claims carried by both tokens of a pair
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    // Standard claims
    pub iss: String,
    pub sub: String,              // Local user ID
    pub jti: String,
    pub iat: i64,
    pub nbf: i64,
    pub exp: i64,
    /// Issue instant in nanoseconds, compared against user revocation cut-offs
    #[serde(default)]
    pub iat_ns: i64,

    // Custom claims
    pub email: String,
    pub name: String,
    pub roles: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    #[serde(rename = "type")]
    pub token_type: TokenType,
}

impl Claims {
    pub fn expires_at(&self) -> DateTime<Utc> {
        DateTime::from_timestamp(self.exp, 0).unwrap_or_else(Utc::now)
    }

    /// Issue instant with sub-second precision, falling back to `iat`
    pub fn issued_at_nanos(&self) -> i64 {
        if self.iat_ns > 0 {
            self.iat_ns
        } else {
            self.iat.saturating_mul(1_000_000_000)
        }
    }

    pub fn to_identity(&self) -> Identity {
        Identity {
            user_id: self.sub.clone(),
            email: self.email.clone(),
            display_name: self.name.clone(),
            roles: self.roles.clone(),
            provider: self.provider.clone(),
            groups: Vec::new(),
        }
    }
}

/// JWT configuration
#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct JwtConfig {
    pub secret: String,
    pub issuer: String,
    pub access_ttl_minutes: u64,
    pub refresh_ttl_hours: u64,
}

impl Default for JwtConfig {
    fn default() -> Self {
        Self {
            secret: String::new(),
            issuer: "identity-service".to_string(),
            access_ttl_minutes: 15,
            refresh_ttl_hours: 168,  // 7 days
        }
    }
}

impl std::fmt::Debug for JwtConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JwtConfig")
            .field("secret", &"[REDACTED]")
            .field("issuer", &self.issuer)
            .field("access_ttl_minutes", &self.access_ttl_minutes)
            .field("refresh_ttl_hours", &self.refresh_ttl_hours)
            .finish()
    }
}

impl JwtConfig {
    pub fn access_ttl(&self) -> Duration {
        Duration::from_secs(self.access_ttl_minutes * 60)
    }

    pub fn refresh_ttl(&self) -> Duration {
        Duration::from_secs(self.refresh_ttl_hours * 3600)
    }
}

/// Issues and validates HS256 access/refresh pairs.
///
/// Every validation consults the [`TokenBlacklist`] before trusting a
/// structurally valid signature.
pub struct TokenService {
    config: JwtConfig,
    encoding_key: Arc<EncodingKey>,
    decoding_key: Arc<DecodingKey>,
    header: Header,
    blacklist: TokenBlacklist,
}

impl TokenService {
    /// Build the service after checking the secret's strength
    pub fn new(
        config: JwtConfig,
        environment: RuntimeEnvironment,
        blacklist: TokenBlacklist,
    ) -> Result<Self> {
        if config.secret.is_empty() {
            return Err(AuthError::Configuration("JWT secret is required".to_string()));
        }
        SecretValidator::new(environment).validate_secret(&config.secret)?;

        Ok(Self {
            encoding_key: Arc::new(EncodingKey::from_secret(config.secret.as_bytes())),
            decoding_key: Arc::new(DecodingKey::from_secret(config.secret.as_bytes())),
            header: Header::new(Algorithm::HS256),
            config,
            blacklist,
        })
    }

    pub fn blacklist(&self) -> &TokenBlacklist {
        &self.blacklist
    }

    pub fn access_ttl(&self) -> Duration {
        self.config.access_ttl()
    }

    pub fn refresh_ttl(&self) -> Duration {
        self.config.refresh_ttl()
    }

    /// Mint an access and refresh token for `identity`
    pub fn issue_pair(&self, identity: &Identity) -> Result<TokenPair> {
        let now = Utc::now();
        let (access_token, access_expires_at) =
            self.sign(identity, TokenType::Access, now, self.access_ttl())?;
        let (refresh_token, refresh_expires_at) =
            self.sign(identity, TokenType::Refresh, now, self.refresh_ttl())?;

        debug!(user_id = %identity.user_id, "Issued token pair");
        Ok(TokenPair {
            access_token,
            refresh_token,
            token_type: "Bearer".to_string(),
            expires_in: self.access_ttl().as_secs(),
            access_expires_at,
            refresh_expires_at,
        })
    }

    pub async fn validate_access_token(&self, token: &str) -> Result<Claims> {
        self.validate(token, TokenType::Access).await
    }

    pub async fn validate_refresh_token(&self, token: &str) -> Result<Claims> {
        self.validate(token, TokenType::Refresh).await
    }

    /// Exchange a refresh token for a new pair, revoking the one presented.
    ///
    /// The revocation is a set-if-absent, so concurrent redemptions of the
    /// same token rotate it at most once.
    pub async fn refresh(&self, refresh_token: &str) -> Result<TokenPair> {
        let claims = self.validate_refresh_token(refresh_token).await?;
        let signature = TokenBlacklist::signature_of(refresh_token)
            .ok_or_else(|| AuthError::InvalidToken("malformed token".to_string()))?;
        if !self.blacklist.claim_until(signature, claims.expires_at()).await? {
            debug!(user_id = %claims.sub, "Refresh token already redeemed");
            return Err(AuthError::TokenRevoked);
        }
        self.issue_pair(&claims.to_identity())
    }

    /// Blacklist `token` for the rest of its natural lifetime.
    ///
    /// Expired tokens are accepted and ignored; forged ones are rejected.
    pub async fn revoke(&self, token: &str) -> Result<Claims> {
        let mut validation = self.validation();
        validation.validate_exp = false;
        let claims = decode::<Claims>(token, &self.decoding_key, &validation)?.claims;
        self.revoke_signature(token, claims.expires_at()).await?;
        Ok(claims)
    }

    /// Invalidate every token issued so far to `user_id`
    pub async fn revoke_user(&self, user_id: &str) -> Result<()> {
        self.blacklist
            .blacklist_user(user_id, Utc::now(), self.refresh_ttl())
            .await?;
        info!(user_id = %user_id, "Revoked all tokens for user");
        Ok(())
    }

    async fn revoke_signature(&self, token: &str, expires_at: DateTime<Utc>) -> Result<()> {
        let signature = TokenBlacklist::signature_of(token)
            .ok_or_else(|| AuthError::InvalidToken("malformed token".to_string()))?;
        self.blacklist.add_until(signature, expires_at).await
    }

    async fn validate(&self, token: &str, expected: TokenType) -> Result<Claims> {
        let claims = decode::<Claims>(token, &self.decoding_key, &self.validation())?.claims;

        if claims.token_type != expected {
            return Err(AuthError::InvalidToken(format!(
                "expected {:?} token",
                expected
            )));
        }

        let signature = TokenBlacklist::signature_of(token)
            .ok_or_else(|| AuthError::InvalidToken("malformed token".to_string()))?;
        if self.blacklist.is_blacklisted(signature).await? {
            return Err(AuthError::TokenRevoked);
        }

        if let Some(revoked_at) = self.blacklist.user_revoked_at(&claims.sub).await? {
            if claims.issued_at_nanos() <= revoked_at {
                return Err(AuthError::TokenRevoked);
            }
        }

        Ok(claims)
    }

    fn validation(&self) -> Validation {
        let mut validation = Validation::new(self.header.alg);
        validation.set_issuer(&[self.config.issuer.clone()]);
        validation.validate_nbf = true;
        validation.leeway = 0;
        validation
    }

    fn sign(
        &self,
        identity: &Identity,
        token_type: TokenType,
        now: DateTime<Utc>,
        ttl: Duration,
    ) -> Result<(String, DateTime<Utc>)> {
        let ttl = chrono::Duration::from_std(ttl)
            .map_err(|e| AuthError::Configuration(format!("token TTL out of range: {}", e)))?;
        let exp = now + ttl;

        let claims = Claims {
            iss: self.config.issuer.clone(),
            sub: identity.user_id.clone(),
            jti: Uuid::new_v4().to_string(),
            iat: now.timestamp(),
            nbf: now.timestamp(),
            exp: exp.timestamp(),
            iat_ns: blacklist::unix_nanos(now),
            email: identity.email.clone(),
            name: identity.display_name.clone(),
            roles: identity.roles.clone(),
            provider: identity.provider.clone(),
            token_type,
        };

        let token = encode(&self.header, &claims, &self.encoding_key)
            .map_err(|e| AuthError::Internal(format!("token signing failed: {}", e)))?;
        Ok((token, exp))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemorySharedCache;

    const SECRET: &str = "Xk9#mP2$vL7!qR4@wT8%nB3^hJ6&zC1*";

    fn service() -> TokenService {
        let config = JwtConfig {
            secret: SECRET.to_string(),
            ..Default::default()
        };
        let blacklist = TokenBlacklist::new(Arc::new(InMemorySharedCache::new()));
        TokenService::new(config, RuntimeEnvironment::Production, blacklist).unwrap()
    }

    fn identity() -> Identity {
        Identity {
            user_id: "user-1".to_string(),
            email: "alice@example.com".to_string(),
            display_name: "Alice".to_string(),
            roles: vec!["user".to_string(), "instructor".to_string()],
            provider: None,
            groups: vec![],
        }
    }

    #[test]
    fn test_jwt_config_default() {
        let config = JwtConfig::default();
        assert_eq!(config.access_ttl(), Duration::from_secs(900));
        assert_eq!(config.refresh_ttl(), Duration::from_secs(7 * 24 * 3600));
        assert!(!format!("{:?}", config).contains("secret: \"\""));
    }

    #[test]
    fn test_weak_secret_rejected_in_production() {
        let config = JwtConfig {
            secret: "short".to_string(),
            ..Default::default()
        };
        let blacklist = TokenBlacklist::new(Arc::new(InMemorySharedCache::new()));
        assert!(matches!(
            TokenService::new(config, RuntimeEnvironment::Production, blacklist),
            Err(AuthError::Configuration(_))
        ));
    }

    #[tokio::test]
    async fn test_pair_carries_roles() {
        let service = service();
        let pair = service.issue_pair(&identity()).unwrap();
        assert_eq!(pair.expires_in, 900);

        let claims = service.validate_access_token(&pair.access_token).await.unwrap();
        assert_eq!(claims.sub, "user-1");
        assert_eq!(claims.roles, vec!["user", "instructor"]);
        assert_eq!(claims.token_type, TokenType::Access);
    }

    #[tokio::test]
    async fn test_token_type_is_enforced() {
        let service = service();
        let pair = service.issue_pair(&identity()).unwrap();
        assert!(matches!(
            service.validate_access_token(&pair.refresh_token).await,
            Err(AuthError::InvalidToken(_))
        ));
        assert!(service.validate_refresh_token(&pair.refresh_token).await.is_ok());
    }

    #[tokio::test]
    async fn test_tampered_token_rejected() {
        let service = service();
        let pair = service.issue_pair(&identity()).unwrap();
        let tampered = format!("{}x", pair.access_token);
        assert!(matches!(
            service.validate_access_token(&tampered).await,
            Err(AuthError::InvalidToken(_))
        ));
    }
}
