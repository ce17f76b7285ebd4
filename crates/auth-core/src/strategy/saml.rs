//! SAML 2.0 login
//!
//! Two steps. Without a response the strategy issues an AuthnRequest for the
//! chosen identity provider. With a response it verifies the assertion,
//! provisions or updates the local user and records a federated session.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use chrono::Utc;
use identity_infra_common::logging::redact_email;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use super::{payload_mismatch, AuthenticationStrategy};
use crate::attributes::{extract_groups, AttributeMapper};
use crate::config::{SamlProviderConfig, SamlSettings};
use crate::context::RequestContext;
use crate::error::{AuthError, Result};
use crate::jwt::TokenService;
use crate::saml::xml::parse_response;
use crate::saml::{normalize_certificate, AuthnRequest, IdpMetadata, SamlMetadataCache, XmlSignatureProvider};
use crate::session::SessionManager;
use crate::store::UserStore;
use crate::types::{
    AuthOutcome, AuthPayload, AuthType, FederatedSession, Identity, NewUser, RedirectInstruction,
    SamlPayload, User, DEFAULT_ROLE,
};

pub struct SamlStrategy {
    settings: SamlSettings,
    metadata: SamlMetadataCache,
    signer: Option<Arc<dyn XmlSignatureProvider>>,
    sp_private_key: OnceCell<String>,
    sp_certificate: OnceCell<String>,
    users: Arc<dyn UserStore>,
    sessions: Arc<SessionManager>,
    tokens: Arc<TokenService>,
}

impl SamlStrategy {
    pub fn new(
        settings: SamlSettings,
        metadata: SamlMetadataCache,
        signer: Option<Arc<dyn XmlSignatureProvider>>,
        users: Arc<dyn UserStore>,
        sessions: Arc<SessionManager>,
        tokens: Arc<TokenService>,
    ) -> Self {
        Self {
            settings,
            metadata,
            signer,
            sp_private_key: OnceCell::new(),
            sp_certificate: OnceCell::new(),
            users,
            sessions,
            tokens,
        }
    }

    pub fn metadata_cache(&self) -> &SamlMetadataCache {
        &self.metadata
    }

    fn signer(&self) -> Result<&dyn XmlSignatureProvider> {
        self.signer
            .as_deref()
            .ok_or_else(|| AuthError::Configuration("no XML signature provider configured".to_string()))
    }

    /// The requested provider, or the first configured one
    fn provider(&self, requested: Option<&str>) -> Result<(&str, &SamlProviderConfig)> {
        let found = match requested {
            Some(name) => self.settings.providers.get_key_value(name),
            None => self.settings.providers.first_key_value(),
        };
        found
            .map(|(name, provider)| (name.as_str(), provider))
            .ok_or_else(|| match requested {
                Some(name) => AuthError::Validation(format!("unknown saml provider '{}'", name)),
                None => AuthError::Configuration("no saml providers configured".to_string()),
            })
    }

    async fn idp_metadata(&self, name: &str, provider: &SamlProviderConfig) -> Result<Option<IdpMetadata>> {
        match non_empty(&provider.metadata_url) {
            Some(url) => self.metadata.fetch_entry(url, name).await?.parse().map(Some),
            None => Ok(None),
        }
    }

    async fn entity_id(&self, name: &str, provider: &SamlProviderConfig) -> Result<Option<String>> {
        if let Some(entity_id) = non_empty(&provider.entity_id) {
            return Ok(Some(entity_id.to_string()));
        }
        Ok(self.idp_metadata(name, provider).await?.and_then(|m| m.entity_id))
    }

    async fn sso_url(&self, name: &str, provider: &SamlProviderConfig) -> Result<String> {
        if let Some(url) = non_empty(&provider.sso_url) {
            return Ok(url.to_string());
        }
        let metadata = self.idp_metadata(name, provider).await?.ok_or_else(|| {
            AuthError::Configuration(format!("saml provider '{}' has neither sso_url nor metadata_url", name))
        })?;
        metadata
            .sso_url()
            .map(str::to_string)
            .ok_or_else(|| AuthError::Upstream(format!("metadata for '{}' lists no SSO endpoint", name)))
    }

    /// Configured certificate first, then the one published in metadata
    async fn idp_certificate(&self, name: &str, provider: &SamlProviderConfig) -> Result<Option<String>> {
        if let Some(certificate) = non_empty(&provider.certificate) {
            return Ok(Some(normalize_certificate(certificate)));
        }
        Ok(self
            .idp_metadata(name, provider)
            .await?
            .and_then(|m| m.signing_certificate)
            .map(|c| normalize_certificate(&c)))
    }

    async fn sp_private_key(&self) -> Result<Option<&str>> {
        load_pem(&self.sp_private_key, self.settings.private_key_path.as_deref(), "private key").await
    }

    async fn sp_certificate(&self) -> Result<Option<&str>> {
        load_pem(&self.sp_certificate, self.settings.certificate_path.as_deref(), "certificate").await
    }

    async fn start(&self, payload: &SamlPayload) -> Result<AuthOutcome> {
        let (name, provider) = self.provider(payload.provider.as_deref())?;
        let sso_url = self.sso_url(name, provider).await?;

        let request = AuthnRequest::new(&sso_url, &self.settings.acs_url, &self.settings.sp_entity_id);
        let mut xml = request.to_xml()?;
        if let Some(key) = self.sp_private_key().await? {
            let certificate = self.sp_certificate().await?;
            xml = self.signer()?.sign_authn_request(&xml, key, certificate)?;
        }

        debug!(provider = %name, request_id = %request.id, "Issued SAML AuthnRequest");
        Ok(AuthOutcome::Redirect(RedirectInstruction {
            provider: name.to_string(),
            url: sso_url,
            state: None,
            saml_request: Some(STANDARD.encode(xml)),
            relay_state: payload.relay_state.clone(),
        }))
    }

    /// Provider named by the payload, else the one whose entity id is the issuer
    async fn provider_for_issuer(&self, requested: Option<&str>, issuer: &str) -> Result<(&str, &SamlProviderConfig)> {
        if requested.is_some() {
            return self.provider(requested);
        }
        for (name, provider) in &self.settings.providers {
            match self.entity_id(name, provider).await {
                Ok(Some(entity_id)) if entity_id == issuer => return Ok((name.as_str(), provider)),
                Ok(_) => {}
                Err(e) => warn!(provider = %name, error = %e, "Could not resolve SAML provider entity id"),
            }
        }
        warn!(issuer = %issuer, "No SAML provider matches the assertion issuer");
        Err(AuthError::AuthenticationFailed)
    }

    async fn consume(&self, payload: &SamlPayload, encoded: &str) -> Result<AuthOutcome> {
        let compact: String = encoded.chars().filter(|c| !c.is_whitespace()).collect();
        let xml = STANDARD
            .decode(compact)
            .ok()
            .and_then(|bytes| String::from_utf8(bytes).ok())
            .ok_or_else(|| reject("SAML response is not base64 encoded UTF-8"))?;

        let response = parse_response(&xml).map_err(|e| {
            warn!(error = %e, "Unparseable SAML response");
            AuthError::AuthenticationFailed
        })?;
        if !response.is_success() {
            warn!(status = ?response.status_code, "SAML response carries a failure status");
            return Err(AuthError::AuthenticationFailed);
        }
        let assertion = response
            .assertion
            .as_ref()
            .ok_or_else(|| reject("SAML response carries no assertion"))?;
        let issuer = assertion
            .issuer
            .as_deref()
            .or(response.issuer.as_deref())
            .ok_or_else(|| reject("SAML assertion has no issuer"))?;

        let (name, provider) = self.provider_for_issuer(payload.provider.as_deref(), issuer).await?;
        if let Some(expected) = self.entity_id(name, provider).await? {
            if expected != issuer {
                warn!(provider = %name, issuer = %issuer, expected = %expected, "SAML issuer mismatch");
                return Err(AuthError::AuthenticationFailed);
            }
        }

        let Some(certificate) = self.idp_certificate(name, provider).await? else {
            warn!(provider = %name, "No IdP certificate available to verify the SAML response");
            return Err(AuthError::AuthenticationFailed);
        };
        let signed_id = self.signer()?.verify(&xml, &certificate).map_err(|e| {
            warn!(provider = %name, error = %e, "SAML signature verification failed");
            AuthError::AuthenticationFailed
        })?;
        let covers_assertion = [response.id.as_deref(), assertion.id.as_deref()]
            .into_iter()
            .flatten()
            .any(|id| !id.is_empty() && id == signed_id);
        if !covers_assertion {
            warn!(provider = %name, signed_id = %signed_id, "SAML signature does not cover the assertion");
            return Err(AuthError::AuthenticationFailed);
        }

        let now = Utc::now();
        let skew = chrono::Duration::from_std(Duration::from_secs(self.settings.clock_skew_seconds))
            .unwrap_or_else(|_| chrono::Duration::zero());
        if assertion.not_before.is_some_and(|not_before| now + skew < not_before) {
            return Err(reject("SAML assertion is not yet valid"));
        }
        if assertion.not_on_or_after.is_some_and(|not_on_or_after| now - skew >= not_on_or_after) {
            return Err(reject("SAML assertion has expired"));
        }

        let name_id = assertion
            .name_id
            .as_deref()
            .filter(|id| !id.is_empty())
            .ok_or_else(|| reject("SAML assertion has no NameID"))?;

        let mapped = AttributeMapper::for_provider(provider).map(&assertion.attributes);
        let email = if mapped.email.is_empty() { name_id } else { mapped.email.as_str() };
        let groups = if provider.group_sync {
            extract_groups(&assertion.attributes, &provider.group_attribute())
        } else {
            Vec::new()
        };

        let user = self
            .resolve_user(name, provider, email, &mapped.first_name, &mapped.last_name)
            .await?;
        if !user.active {
            warn!(provider = %name, user_id = %user.id, "SAML login for inactive account");
            return Err(AuthError::AuthenticationFailed);
        }
        let user = self.sync_groups(user, &groups).await;

        let duration = chrono::Duration::from_std(Duration::from_secs(self.settings.session_duration_seconds))
            .map_err(|e| AuthError::Configuration(format!("saml session duration out of range: {}", e)))?;
        let session = FederatedSession::new(
            &user.id,
            name,
            assertion.session_index.clone(),
            name_id,
            assertion.attributes.clone(),
            duration,
        )?;
        self.sessions.store_saml_session(session).await?;

        let identity = Identity::from_user(&user, Some(name.to_string()), groups);
        let tokens = self.tokens.issue_pair(&identity)?;
        info!(
            provider = %name,
            user_id = %user.id,
            email = %redact_email(&user.email),
            "SAML login succeeded"
        );
        Ok(AuthOutcome::Authenticated { tokens, identity })
    }

    async fn resolve_user(
        &self,
        name: &str,
        provider: &SamlProviderConfig,
        email: &str,
        first_name: &str,
        last_name: &str,
    ) -> Result<User> {
        if let Some(user) = self.users.get_user_by_email(email).await? {
            let first_changed = !first_name.is_empty() && first_name != user.first_name;
            let last_changed = !last_name.is_empty() && last_name != user.last_name;
            if !first_changed && !last_changed {
                return Ok(user);
            }

            let first = if first_changed { first_name } else { user.first_name.as_str() };
            let last = if last_changed { last_name } else { user.last_name.as_str() };
            let updated = self.users.update_profile(&user.id, first, last).await;
            return match updated {
                Ok(updated) => Ok(updated),
                Err(e) => {
                    warn!(user_id = %user.id, error = %e, "Failed to update profile from SAML attributes");
                    Ok(user)
                }
            };
        }

        if !provider.jit_provisioning {
            warn!(
                provider = %name,
                email = %redact_email(email),
                "SAML login for unknown user and JIT provisioning is disabled"
            );
            return Err(AuthError::AuthenticationFailed);
        }

        let user = self
            .users
            .create_user(NewUser {
                email: email.to_string(),
                first_name: first_name.to_string(),
                last_name: last_name.to_string(),
                roles: vec![DEFAULT_ROLE.to_string()],
            })
            .await?;
        info!(provider = %name, user_id = %user.id, "Provisioned user from SAML assertion");
        Ok(user)
    }

    /// Make the user's roles exactly the asserted groups.
    ///
    /// Nothing happens when no groups were asserted. Store failures are
    /// logged and leave the roles as they were.
    async fn sync_groups(&self, user: User, groups: &[String]) -> User {
        if groups.is_empty() {
            return user;
        }
        let current = match self.users.get_user_roles(&user.id).await {
            Ok(roles) => roles,
            Err(e) => {
                warn!(user_id = %user.id, error = %e, "Failed to read roles for group sync");
                return user;
            }
        };

        let mut target: Vec<String> = Vec::with_capacity(groups.len());
        for group in groups {
            if !target.contains(group) {
                target.push(group.clone());
            }
        }
        let added: Vec<&String> = target.iter().filter(|g| !current.contains(g)).collect();
        let removed: Vec<&String> = current.iter().filter(|r| !target.contains(r)).collect();
        if added.is_empty() && removed.is_empty() {
            return user;
        }
        info!(user_id = %user.id, added = ?added, removed = ?removed, "Groups synced from SAML attributes");

        match self.users.set_user_roles(&user.id, &target).await {
            Ok(updated) => updated,
            Err(e) => {
                warn!(user_id = %user.id, error = %e, "Failed to apply SAML group sync");
                user
            }
        }
    }
}

#[async_trait]
impl AuthenticationStrategy for SamlStrategy {
    fn auth_type(&self) -> AuthType {
        AuthType::Saml
    }

    fn validate_config(&self) -> Result<()> {
        let mut problems = self.settings.problems();
        if self.signer.is_none() {
            problems.push("saml requires an XML signature provider".to_string());
        }
        if self.settings.session_duration_seconds == 0 {
            problems.push("saml session duration must be positive".to_string());
        }
        if problems.is_empty() {
            Ok(())
        } else {
            Err(AuthError::Configuration(problems.join("; ")))
        }
    }

    async fn authenticate(&self, _ctx: &RequestContext, payload: &AuthPayload) -> Result<AuthOutcome> {
        let AuthPayload::Saml(saml) = payload else {
            return Err(payload_mismatch(AuthType::Saml, payload));
        };
        match saml.saml_response.as_deref() {
            None => self.start(saml).await,
            Some(encoded) => self.consume(saml, encoded).await,
        }
    }
}

async fn load_pem<'a>(cell: &'a OnceCell<String>, path: Option<&Path>, what: &str) -> Result<Option<&'a str>> {
    let Some(path) = path else {
        return Ok(None);
    };
    let pem = cell
        .get_or_try_init(|| async {
            tokio::fs::read_to_string(path).await.map_err(|e| {
                AuthError::Configuration(format!("cannot read saml {} {}: {}", what, path.display(), e))
            })
        })
        .await?;
    Ok(Some(pem.as_str()))
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

fn reject(reason: &str) -> AuthError {
    warn!(reason, "SAML response rejected");
    AuthError::AuthenticationFailed
}
