//! Shared fixtures for the auth-core integration tests

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use chrono::{DateTime, SecondsFormat, Utc};
use identity_auth_core::config::{AuthConfig, SamlProviderConfig, SamlProviderType};
use identity_auth_core::error::{AuthError, Result};
use identity_auth_core::saml::{normalize_certificate, XmlSignatureProvider};
use identity_auth_core::store::{FederatedSessionStore, InMemorySharedCache, SharedCache};
use identity_auth_core::types::{AuthType, FederatedSession};

pub const STRONG_SECRET: &str = "Xk9#mP2$vL7!qR4@wT8%nB3^hJ6&zC1*";
pub const IDP_CERTIFICATE: &str = "MIICmzCCAYMCBgGQ4bWtbjANBgkqhkiG9w0BAQsFADARMQ8wDQYDVQQDDAZtYXN0ZXI";
pub const SIGNATURE_MARKER: &str = "<ds:SignatureValue>stub</ds:SignatureValue>";

/// Config with a production-grade secret and nothing else enabled
pub fn base_config() -> AuthConfig {
    let mut config = AuthConfig::default();
    config.jwt.secret = STRONG_SECRET.to_string();
    config
}

/// SAML config with one Okta provider resolved through `metadata_url`
pub fn okta_config(metadata_url: &str) -> AuthConfig {
    let mut config = base_config();
    config.auth_type = AuthType::Saml;
    config.saml.sp_entity_id = "https://lms.example.com/saml".to_string();
    config.saml.acs_url = "https://lms.example.com/saml/acs".to_string();
    config.saml.providers.insert(
        "okta".to_string(),
        SamlProviderConfig {
            provider_type: SamlProviderType::Okta,
            metadata_url: Some(metadata_url.to_string()),
            jit_provisioning: true,
            ..Default::default()
        },
    );
    config
}

/// Shared cache that can be taken offline
#[derive(Default)]
pub struct FlakyCache {
    inner: InMemorySharedCache,
    down: AtomicBool,
    calls: AtomicUsize,
}

impl FlakyCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn offline() -> Self {
        let cache = Self::default();
        cache.set_down(true);
        cache
    }

    pub fn set_down(&self, down: bool) {
        self.down.store(down, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn check(&self) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.down.load(Ordering::SeqCst) {
            Err(AuthError::Cache("connection refused".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl SharedCache for FlakyCache {
    async fn incr_with_expiry(&self, key: &str, window: Duration) -> Result<(u64, Duration)> {
        self.check()?;
        self.inner.incr_with_expiry(key, window).await
    }

    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<()> {
        self.check()?;
        self.inner.set(key, value, ttl).await
    }

    async fn set_if_absent(&self, key: &str, value: String, ttl: Duration) -> Result<bool> {
        self.check()?;
        self.inner.set_if_absent(key, value, ttl).await
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        self.check()?;
        self.inner.get(key).await
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.check()?;
        self.inner.delete(key).await
    }

    async fn ping(&self) -> Result<()> {
        self.check()
    }
}

/// Shared cache whose writes always fail but reads work
#[derive(Default)]
pub struct ReadOnlyCache {
    inner: InMemorySharedCache,
}

#[async_trait]
impl SharedCache for ReadOnlyCache {
    async fn incr_with_expiry(&self, key: &str, window: Duration) -> Result<(u64, Duration)> {
        self.inner.incr_with_expiry(key, window).await
    }

    async fn set(&self, _key: &str, _value: String, _ttl: Duration) -> Result<()> {
        Err(AuthError::Cache("READONLY replica".to_string()))
    }

    async fn set_if_absent(&self, _key: &str, _value: String, _ttl: Duration) -> Result<bool> {
        Err(AuthError::Cache("READONLY replica".to_string()))
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        self.inner.get(key).await
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.inner.delete(key).await
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}

/// Session store that refuses every write
pub struct BrokenSessionStore;

#[async_trait]
impl FederatedSessionStore for BrokenSessionStore {
    async fn insert_session(&self, _session: FederatedSession) -> Result<()> {
        Err(AuthError::Persistence("deadlock detected".to_string()))
    }

    async fn delete_expired_sessions(&self, _now: DateTime<Utc>) -> Result<u64> {
        Err(AuthError::Persistence("deadlock detected".to_string()))
    }

    async fn sessions_for_user(&self, _user_id: &str) -> Result<Vec<FederatedSession>> {
        Ok(Vec::new())
    }
}

/// Accepts documents carrying [`SIGNATURE_MARKER`] when checked against
/// [`IDP_CERTIFICATE`]; the signed element is the nearest one with an `ID`
/// opened before the marker
pub struct StubSigner;

impl XmlSignatureProvider for StubSigner {
    fn sign_authn_request(
        &self,
        xml: &str,
        _sp_private_key_pem: &str,
        sp_certificate_pem: Option<&str>,
    ) -> Result<String> {
        let key_info = sp_certificate_pem
            .map(|pem| format!("<ds:X509Certificate>{}</ds:X509Certificate>", normalize_certificate(pem)))
            .unwrap_or_default();
        Ok(xml.replacen(
            "</saml:Issuer>",
            &format!("</saml:Issuer>{}{}", SIGNATURE_MARKER, key_info),
            1,
        ))
    }

    fn verify(&self, xml: &str, idp_certificate: &str) -> Result<String> {
        if normalize_certificate(idp_certificate) != IDP_CERTIFICATE {
            return Err(AuthError::Validation("certificate mismatch".to_string()));
        }
        let marker = xml
            .find(SIGNATURE_MARKER)
            .ok_or_else(|| AuthError::Validation("signature missing".to_string()))?;
        let before = &xml[..marker];
        let start = before
            .rfind(" ID=\"")
            .ok_or_else(|| AuthError::Validation("signature references nothing".to_string()))?
            + 5;
        let end = before[start..]
            .find('"')
            .ok_or_else(|| AuthError::Validation("unterminated ID".to_string()))?;
        Ok(before[start..start + end].to_string())
    }
}

pub fn idp_metadata_xml(entity_id: &str, sso_url: &str) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<md:EntityDescriptor xmlns:md="urn:oasis:names:tc:SAML:2.0:metadata" entityID="{entity_id}">
  <md:IDPSSODescriptor protocolSupportEnumeration="urn:oasis:names:tc:SAML:2.0:protocol">
    <md:KeyDescriptor use="signing">
      <ds:KeyInfo xmlns:ds="http://www.w3.org/2000/09/xmldsig#">
        <ds:X509Data>
          <ds:X509Certificate>{IDP_CERTIFICATE}</ds:X509Certificate>
        </ds:X509Data>
      </ds:KeyInfo>
    </md:KeyDescriptor>
    <md:SingleSignOnService Binding="urn:oasis:names:tc:SAML:2.0:bindings:HTTP-POST" Location="{sso_url}/post"/>
    <md:SingleSignOnService Binding="urn:oasis:names:tc:SAML:2.0:bindings:HTTP-Redirect" Location="{sso_url}"/>
  </md:IDPSSODescriptor>
</md:EntityDescriptor>"#
    )
}

/// Builder for IdP responses
pub struct SamlResponseBuilder {
    issuer: String,
    name_id: Option<String>,
    attributes: Vec<(String, Vec<String>)>,
    not_before: DateTime<Utc>,
    not_on_or_after: DateTime<Utc>,
    session_index: String,
    status: String,
    signed: bool,
}

impl SamlResponseBuilder {
    pub fn new(issuer: &str) -> Self {
        let now = Utc::now();
        Self {
            issuer: issuer.to_string(),
            name_id: None,
            attributes: Vec::new(),
            not_before: now - chrono::Duration::minutes(1),
            not_on_or_after: now + chrono::Duration::minutes(5),
            session_index: "_session_1".to_string(),
            status: "urn:oasis:names:tc:SAML:2.0:status:Success".to_string(),
            signed: true,
        }
    }

    pub fn name_id(mut self, name_id: &str) -> Self {
        self.name_id = Some(name_id.to_string());
        self
    }

    pub fn attribute(mut self, name: &str, values: &[&str]) -> Self {
        self.attributes
            .push((name.to_string(), values.iter().map(|v| v.to_string()).collect()));
        self
    }

    pub fn validity(mut self, not_before: DateTime<Utc>, not_on_or_after: DateTime<Utc>) -> Self {
        self.not_before = not_before;
        self.not_on_or_after = not_on_or_after;
        self
    }

    pub fn status(mut self, status: &str) -> Self {
        self.status = status.to_string();
        self
    }

    pub fn unsigned(mut self) -> Self {
        self.signed = false;
        self
    }

    pub fn xml(&self) -> String {
        let instant = |t: DateTime<Utc>| t.to_rfc3339_opts(SecondsFormat::Secs, true);
        let signature = if self.signed { SIGNATURE_MARKER } else { "" };
        let subject = match &self.name_id {
            Some(id) => format!(
                r#"<saml:Subject><saml:NameID Format="urn:oasis:names:tc:SAML:1.1:nameid-format:emailAddress">{}</saml:NameID></saml:Subject>"#,
                id
            ),
            None => String::new(),
        };
        let attributes: String = self
            .attributes
            .iter()
            .map(|(name, values)| {
                let values: String = values
                    .iter()
                    .map(|v| format!("<saml:AttributeValue>{}</saml:AttributeValue>", v))
                    .collect();
                format!(r#"<saml:Attribute Name="{}">{}</saml:Attribute>"#, name, values)
            })
            .collect();

        format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<samlp:Response xmlns:samlp="urn:oasis:names:tc:SAML:2.0:protocol" xmlns:saml="urn:oasis:names:tc:SAML:2.0:assertion" ID="_resp1" Version="2.0" IssueInstant="{now}">
  <saml:Issuer>{issuer}</saml:Issuer>
  <samlp:Status><samlp:StatusCode Value="{status}"/></samlp:Status>
  <saml:Assertion ID="_a1" Version="2.0" IssueInstant="{now}">
    <saml:Issuer>{issuer}</saml:Issuer>
    {signature}
    {subject}
    <saml:Conditions NotBefore="{not_before}" NotOnOrAfter="{not_on_or_after}"/>
    <saml:AuthnStatement AuthnInstant="{now}" SessionIndex="{session_index}"/>
    <saml:AttributeStatement>{attributes}</saml:AttributeStatement>
  </saml:Assertion>
</samlp:Response>"#,
            now = instant(Utc::now()),
            issuer = self.issuer,
            status = self.status,
            signature = signature,
            subject = subject,
            not_before = instant(self.not_before),
            not_on_or_after = instant(self.not_on_or_after),
            session_index = self.session_index,
            attributes = attributes,
        )
    }

    pub fn encoded(&self) -> String {
        STANDARD.encode(self.xml())
    }
}

/// Shared cache handle typed for the builder
pub fn shared(cache: Arc<FlakyCache>) -> Arc<dyn SharedCache> {
    cache
}
