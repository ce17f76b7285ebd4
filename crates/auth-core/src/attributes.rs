//! Normalization of provider-asserted attributes
//!
//! Every identity provider names the same facts differently. The functions
//! here turn a raw attribute bag into [`CanonicalAttributes`]. They are pure:
//! no I/O, no errors. A missing source attribute becomes an empty string.

use std::collections::HashMap;

use serde_json::Value;
use tracing::warn;

use crate::config::{SamlProviderConfig, SamlProviderType, ADFS_GROUPS_CLAIM, SHIBBOLETH_GROUPS_OID};
use crate::error::{AuthError, Result};
use crate::types::{ProviderProfile, RawAttributes};

pub const EMAIL: &str = "email";
pub const FIRST_NAME: &str = "first_name";
pub const LAST_NAME: &str = "last_name";
pub const GROUPS: &str = "groups";

const CLAIM_EMAIL: &str = "http://schemas.xmlsoap.org/ws/2005/05/identity/claims/emailaddress";
const CLAIM_GIVEN_NAME: &str = "http://schemas.xmlsoap.org/ws/2005/05/identity/claims/givenname";
const CLAIM_SURNAME: &str = "http://schemas.xmlsoap.org/ws/2005/05/identity/claims/surname";
const CLAIM_GROUP: &str = "http://schemas.xmlsoap.org/claims/Group";

const OID_MAIL: &str = "urn:oid:0.9.2342.19200300.100.1.3";
const OID_GIVEN_NAME: &str = "urn:oid:2.5.4.42";
const OID_SURNAME: &str = "urn:oid:2.5.4.4";

/// The fixed four-key result of every mapping function
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CanonicalAttributes {
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    /// Comma-joined group names, empty when the provider asserted none
    pub groups: String,
}

impl CanonicalAttributes {
    /// Look up a canonical key by name
    pub fn get(&self, key: &str) -> Option<&str> {
        match key {
            EMAIL => Some(&self.email),
            FIRST_NAME => Some(&self.first_name),
            LAST_NAME => Some(&self.last_name),
            GROUPS => Some(&self.groups),
            _ => None,
        }
    }
}

/// Mapping table selected by a SAML provider's declared flavor
#[derive(Debug, Clone)]
pub struct AttributeMapper {
    provider_type: SamlProviderType,
    custom_mapping: HashMap<String, String>,
}

impl AttributeMapper {
    pub fn new(provider_type: SamlProviderType, custom_mapping: HashMap<String, String>) -> Self {
        Self { provider_type, custom_mapping }
    }

    pub fn for_provider(provider: &SamlProviderConfig) -> Self {
        Self::new(provider.provider_type, provider.attribute_mapping.clone())
    }

    pub fn map(&self, attributes: &RawAttributes) -> CanonicalAttributes {
        match self.provider_type {
            SamlProviderType::Okta => map_okta_attributes(attributes),
            SamlProviderType::Auth0 => map_auth0_attributes(attributes),
            SamlProviderType::Adfs => map_adfs_attributes(attributes),
            SamlProviderType::Shibboleth => map_shibboleth_attributes(attributes),
            SamlProviderType::Custom => map_custom_attributes(attributes, &self.custom_mapping),
        }
    }
}

/// Okta sends short names and falls back to the WS-Federation claim URIs
pub fn map_okta_attributes(attributes: &RawAttributes) -> CanonicalAttributes {
    CanonicalAttributes {
        email: first_present(attributes, &[EMAIL, CLAIM_EMAIL]),
        first_name: first_present(attributes, &["firstName", CLAIM_GIVEN_NAME]),
        last_name: first_present(attributes, &["lastName", CLAIM_SURNAME]),
        groups: group_text(attributes, GROUPS),
    }
}

pub fn map_auth0_attributes(attributes: &RawAttributes) -> CanonicalAttributes {
    CanonicalAttributes {
        email: first_present(attributes, &[CLAIM_EMAIL]),
        first_name: first_present(attributes, &[CLAIM_GIVEN_NAME]),
        last_name: first_present(attributes, &[CLAIM_SURNAME]),
        groups: group_text(attributes, CLAIM_GROUP),
    }
}

pub fn map_adfs_attributes(attributes: &RawAttributes) -> CanonicalAttributes {
    CanonicalAttributes {
        email: first_present(attributes, &[CLAIM_EMAIL]),
        first_name: first_present(attributes, &[CLAIM_GIVEN_NAME]),
        last_name: first_present(attributes, &[CLAIM_SURNAME]),
        groups: group_text(attributes, ADFS_GROUPS_CLAIM),
    }
}

/// Shibboleth asserts OID-named attributes
pub fn map_shibboleth_attributes(attributes: &RawAttributes) -> CanonicalAttributes {
    CanonicalAttributes {
        email: first_present(attributes, &[OID_MAIL]),
        first_name: first_present(attributes, &[OID_GIVEN_NAME]),
        last_name: first_present(attributes, &[OID_SURNAME]),
        groups: group_text(attributes, SHIBBOLETH_GROUPS_OID),
    }
}

/// Operator-driven mapping: `mapping` takes a canonical key to the
/// provider's attribute name. Unmapped keys resolve to the empty string.
pub fn map_custom_attributes(
    attributes: &RawAttributes,
    mapping: &HashMap<String, String>,
) -> CanonicalAttributes {
    let lookup = |key: &str| {
        mapping
            .get(key)
            .map(|source| first_present(attributes, &[source.as_str()]))
            .unwrap_or_default()
    };
    CanonicalAttributes {
        email: lookup(EMAIL),
        first_name: lookup(FIRST_NAME),
        last_name: lookup(LAST_NAME),
        groups: mapping
            .get(GROUPS)
            .map(|source| group_text(attributes, source))
            .unwrap_or_default(),
    }
}

/// Pull the group list out of `attributes[group_attribute]`.
///
/// Accepts a single string, a string array or a mixed array (non-string
/// items are skipped). Any other shape, or a missing key, logs a warning and
/// yields no groups. An empty attribute name yields no groups without
/// looking at the map.
pub fn extract_groups(attributes: &RawAttributes, group_attribute: &str) -> Vec<String> {
    if group_attribute.is_empty() {
        return Vec::new();
    }

    let Some(value) = attributes.get(group_attribute) else {
        warn!(
            group_attribute = %group_attribute,
            "Group attribute specified but not found in SAML attributes"
        );
        return Vec::new();
    };

    match value {
        Value::String(group) if group.is_empty() => Vec::new(),
        Value::String(group) => vec![group.clone()],
        Value::Array(items) => items
            .iter()
            .filter_map(|item| item.as_str().map(str::to_string))
            .collect(),
        other => {
            warn!(
                group_attribute = %group_attribute,
                kind = json_kind(other),
                "Unexpected group attribute format"
            );
            Vec::new()
        }
    }
}

/// Text form of a loosely typed attribute value.
///
/// Strings pass through, arrays contribute their first string, null is
/// empty, and anything else uses its JSON rendering.
pub fn attribute_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Array(items) => items
            .iter()
            .find_map(|item| item.as_str().map(str::to_string))
            .unwrap_or_default(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Normalize an OAuth user-info document into a [`ProviderProfile`].
///
/// Well-known providers use their documented field names; `overrides` maps a
/// canonical key (`id`, `email`, `first_name`, `last_name`, `avatar_url`) to a
/// different field and wins over the defaults.
pub fn map_oauth_profile(
    provider: &str,
    userinfo: &RawAttributes,
    overrides: &HashMap<String, String>,
) -> Result<ProviderProfile> {
    let field = |key: &str| -> String {
        match overrides.get(key) {
            Some(source) => first_present(userinfo, &[source.as_str()]),
            None => first_present(userinfo, default_profile_sources(provider, key)),
        }
    };

    let provider_user_id = field("id");
    if provider_user_id.is_empty() {
        return Err(AuthError::Upstream(format!(
            "{} user info carries no subject id",
            provider
        )));
    }
    let email = field(EMAIL);
    if email.is_empty() {
        return Err(AuthError::Upstream(format!("{} user info carries no email", provider)));
    }
    let avatar_url = Some(field("avatar_url")).filter(|s| !s.is_empty());

    Ok(ProviderProfile {
        provider: provider.to_string(),
        provider_user_id,
        email,
        first_name: field(FIRST_NAME),
        last_name: field(LAST_NAME),
        avatar_url,
    })
}

/// Documented user-info field names per provider, in preference order
fn default_profile_sources(provider: &str, key: &str) -> &'static [&'static str] {
    match (provider, key) {
        ("google", "id") => &["id", "sub"],
        ("microsoft", "id") => &["id"],
        (_, "id") => &["sub", "id"],
        ("microsoft", EMAIL) => &["mail", "userPrincipalName"],
        (_, EMAIL) => &["email"],
        ("microsoft", FIRST_NAME) => &["givenName"],
        (_, FIRST_NAME) => &["given_name"],
        ("microsoft", LAST_NAME) => &["surname"],
        (_, LAST_NAME) => &["family_name"],
        ("microsoft", "avatar_url") => &[],
        (_, "avatar_url") => &["picture"],
        _ => &[],
    }
}

/// Text of the first source attribute present with a non-empty value
fn first_present(attributes: &RawAttributes, sources: &[&str]) -> String {
    sources
        .iter()
        .filter_map(|name| attributes.get(*name))
        .map(attribute_text)
        .find(|text| !text.is_empty())
        .unwrap_or_default()
}

fn group_text(attributes: &RawAttributes, source: &str) -> String {
    match attributes.get(source) {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(Value::as_str)
            .collect::<Vec<_>>()
            .join(","),
        Some(value) => attribute_text(value),
        None => String::new(),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn attrs(pairs: &[(&str, Value)]) -> RawAttributes {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    #[test]
    fn test_missing_first_name_is_empty_for_every_flavor() {
        let raw = attrs(&[("unrelated", json!("x"))]);
        for flavor in [
            SamlProviderType::Okta,
            SamlProviderType::Auth0,
            SamlProviderType::Adfs,
            SamlProviderType::Shibboleth,
            SamlProviderType::Custom,
        ] {
            let mapped = AttributeMapper::new(flavor, HashMap::new()).map(&raw);
            assert_eq!(mapped.first_name, "", "{:?}", flavor);
            assert_eq!(mapped.get(FIRST_NAME), Some(""));
        }
    }

    #[test]
    fn test_okta_prefers_short_names() {
        let raw = attrs(&[
            ("email", json!("alice@example.com")),
            (CLAIM_EMAIL, json!("other@example.com")),
            (CLAIM_GIVEN_NAME, json!("Alice")),
            ("lastName", json!("Smith")),
        ]);
        let mapped = map_okta_attributes(&raw);
        assert_eq!(mapped.email, "alice@example.com");
        assert_eq!(mapped.first_name, "Alice");
        assert_eq!(mapped.last_name, "Smith");
        assert_eq!(mapped.groups, "");
    }

    #[test]
    fn test_shibboleth_uses_oids() {
        let raw = attrs(&[
            (OID_MAIL, json!("carol@uni.edu")),
            (OID_GIVEN_NAME, json!("Carol")),
            (SHIBBOLETH_GROUPS_OID, json!(["staff", "faculty"])),
        ]);
        let mapped = map_shibboleth_attributes(&raw);
        assert_eq!(mapped.email, "carol@uni.edu");
        assert_eq!(mapped.last_name, "");
        assert_eq!(mapped.groups, "staff,faculty");
    }

    #[test]
    fn test_custom_mapping_table() {
        let raw = attrs(&[("mail", json!("dan@corp.io")), ("fn", json!(["Dan", "Daniel"]))]);
        let mapping = HashMap::from([
            ("email".to_string(), "mail".to_string()),
            ("first_name".to_string(), "fn".to_string()),
            ("last_name".to_string(), "sn".to_string()),
        ]);
        let mapped = map_custom_attributes(&raw, &mapping);
        assert_eq!(mapped.email, "dan@corp.io");
        assert_eq!(mapped.first_name, "Dan");
        assert_eq!(mapped.last_name, "");
        assert_eq!(mapped.groups, "");
    }

    #[test]
    fn test_extract_groups_shapes() {
        let raw = attrs(&[("groups", json!(["admin", "users"]))]);
        assert_eq!(extract_groups(&raw, "groups"), vec!["admin", "users"]);
        assert!(extract_groups(&raw, "").is_empty());
        assert!(extract_groups(&raw, "memberOf").is_empty());

        let raw = attrs(&[("groups", json!("admin"))]);
        assert_eq!(extract_groups(&raw, "groups"), vec!["admin"]);

        let raw = attrs(&[("groups", json!(["admin", 7, null, "users"]))]);
        assert_eq!(extract_groups(&raw, "groups"), vec!["admin", "users"]);

        let raw = attrs(&[("groups", json!({"name": "admin"}))]);
        assert!(extract_groups(&raw, "groups").is_empty());
    }

    #[test]
    fn test_attribute_text() {
        assert_eq!(attribute_text(&json!("a")), "a");
        assert_eq!(attribute_text(&json!([1, "b", "c"])), "b");
        assert_eq!(attribute_text(&Value::Null), "");
        assert_eq!(attribute_text(&json!(42)), "42");
    }

    #[test]
    fn test_google_profile() {
        let info = attrs(&[
            ("id", json!("1234567890")),
            ("email", json!("erin@gmail.com")),
            ("given_name", json!("Erin")),
            ("family_name", json!("Lee")),
            ("picture", json!("https://lh3.example/p.jpg")),
        ]);
        let profile = map_oauth_profile("google", &info, &HashMap::new()).unwrap();
        assert_eq!(profile.provider_user_id, "1234567890");
        assert_eq!(profile.first_name, "Erin");
        assert_eq!(profile.avatar_url.as_deref(), Some("https://lh3.example/p.jpg"));
    }

    #[test]
    fn test_microsoft_profile_falls_back_to_upn() {
        let info = attrs(&[
            ("id", json!("ms-1")),
            ("mail", Value::Null),
            ("userPrincipalName", json!("frank@contoso.com")),
            ("givenName", json!("Frank")),
        ]);
        let profile = map_oauth_profile("microsoft", &info, &HashMap::new()).unwrap();
        assert_eq!(profile.email, "frank@contoso.com");
        assert_eq!(profile.last_name, "");
        assert_eq!(profile.avatar_url, None);
    }

    #[test]
    fn test_profile_without_subject_is_rejected() {
        let info = attrs(&[("email", json!("x@example.com"))]);
        assert!(matches!(
            map_oauth_profile("github", &info, &HashMap::new()),
            Err(AuthError::Upstream(_))
        ));

        let overrides = HashMap::from([("id".to_string(), "login".to_string())]);
        let info = attrs(&[("login", json!("octo")), ("email", json!("x@example.com"))]);
        let profile = map_oauth_profile("github", &info, &overrides).unwrap();
        assert_eq!(profile.provider_user_id, "octo");
    }
}
