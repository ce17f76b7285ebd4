//! SAML 2.0 document generation and parsing
//!
//! Only the elements the engine reads are extracted. Namespace prefixes vary
//! between identity providers, so matching is on local names.

use std::io::Cursor;

use chrono::{DateTime, SecondsFormat, Utc};
use quick_xml::events::{BytesDecl, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};
use serde_json::Value;
use uuid::Uuid;

use crate::error::{AuthError, Result};
use crate::types::RawAttributes;

pub const PROTOCOL_NS: &str = "urn:oasis:names:tc:SAML:2.0:protocol";
pub const ASSERTION_NS: &str = "urn:oasis:names:tc:SAML:2.0:assertion";
pub const HTTP_POST_BINDING: &str = "urn:oasis:names:tc:SAML:2.0:bindings:HTTP-POST";
pub const HTTP_REDIRECT_BINDING: &str = "urn:oasis:names:tc:SAML:2.0:bindings:HTTP-Redirect";
pub const NAMEID_FORMAT_EMAIL: &str = "urn:oasis:names:tc:SAML:1.1:nameid-format:emailAddress";
pub const STATUS_SUCCESS: &str = "urn:oasis:names:tc:SAML:2.0:status:Success";

/// Service-provider authentication request
#[derive(Debug, Clone)]
pub struct AuthnRequest {
    pub id: String,
    pub issue_instant: DateTime<Utc>,
    pub destination: String,
    pub acs_url: String,
    pub issuer: String,
}

impl AuthnRequest {
    pub fn new(destination: impl Into<String>, acs_url: impl Into<String>, issuer: impl Into<String>) -> Self {
        Self {
            id: format!("id-{}", Uuid::new_v4()),
            issue_instant: Utc::now(),
            destination: destination.into(),
            acs_url: acs_url.into(),
            issuer: issuer.into(),
        }
    }

    pub fn to_xml(&self) -> Result<String> {
        let mut writer = Writer::new(Cursor::new(Vec::new()));
        let issue_instant = self.issue_instant.to_rfc3339_opts(SecondsFormat::Secs, true);

        writer
            .write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))
            .map_err(xml_write_error)?;

        let mut request = BytesStart::new("samlp:AuthnRequest");
        request.push_attribute(("xmlns:samlp", PROTOCOL_NS));
        request.push_attribute(("xmlns:saml", ASSERTION_NS));
        request.push_attribute(("ID", self.id.as_str()));
        request.push_attribute(("Version", "2.0"));
        request.push_attribute(("IssueInstant", issue_instant.as_str()));
        request.push_attribute(("Destination", self.destination.as_str()));
        request.push_attribute(("AssertionConsumerServiceURL", self.acs_url.as_str()));
        request.push_attribute(("ProtocolBinding", HTTP_POST_BINDING));
        writer.write_event(Event::Start(request)).map_err(xml_write_error)?;

        writer
            .write_event(Event::Start(BytesStart::new("saml:Issuer")))
            .map_err(xml_write_error)?;
        writer
            .write_event(Event::Text(BytesText::new(&self.issuer)))
            .map_err(xml_write_error)?;
        writer
            .write_event(Event::End(BytesStart::new("saml:Issuer").to_end()))
            .map_err(xml_write_error)?;

        let mut policy = BytesStart::new("samlp:NameIDPolicy");
        policy.push_attribute(("Format", NAMEID_FORMAT_EMAIL));
        policy.push_attribute(("AllowCreate", "true"));
        writer.write_event(Event::Empty(policy)).map_err(xml_write_error)?;

        writer
            .write_event(Event::End(BytesStart::new("samlp:AuthnRequest").to_end()))
            .map_err(xml_write_error)?;

        String::from_utf8(writer.into_inner().into_inner())
            .map_err(|e| AuthError::Internal(format!("AuthnRequest is not UTF-8: {}", e)))
    }
}

/// Top-level view of a `samlp:Response`
#[derive(Debug, Clone, Default)]
pub struct ParsedResponse {
    pub id: Option<String>,
    pub issuer: Option<String>,
    /// First (top-level) status code
    pub status_code: Option<String>,
    pub assertion: Option<ParsedAssertion>,
}

impl ParsedResponse {
    pub fn is_success(&self) -> bool {
        self.status_code
            .as_deref()
            .map(|code| code == STATUS_SUCCESS)
            .unwrap_or(true)
    }
}

/// The fields of an assertion the engine acts on
#[derive(Debug, Clone, Default)]
pub struct ParsedAssertion {
    pub id: Option<String>,
    pub issuer: Option<String>,
    pub name_id: Option<String>,
    pub not_before: Option<DateTime<Utc>>,
    pub not_on_or_after: Option<DateTime<Utc>>,
    pub session_index: Option<String>,
    /// One value becomes a string, several become an array
    pub attributes: RawAttributes,
}

/// Parse a decoded SAML response document.
///
/// A response must carry at most one assertion; anything else is rejected
/// so the assertion read here is the one a signature can be bound to.
pub fn parse_response(xml: &str) -> Result<ParsedResponse> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut response = ParsedResponse::default();
    let mut assertion: Option<ParsedAssertion> = None;
    let mut stack: Vec<String> = Vec::new();
    let mut attribute: Option<(String, Vec<String>)> = None;
    let mut buf = Vec::new();

    loop {
        let event = reader.read_event_into(&mut buf).map_err(xml_read_error)?;
        match event {
            Event::Start(ref e) | Event::Empty(ref e) => {
                let is_empty = matches!(event, Event::Empty(_));
                let name = local_name(e);
                match name.as_str() {
                    "Response" if stack.is_empty() => {
                        response.id = attr(e, "ID")?;
                    }
                    "Assertion" => {
                        if assertion.is_some() || response.assertion.is_some() {
                            return Err(AuthError::Validation(
                                "SAML response carries more than one assertion".to_string(),
                            ));
                        }
                        assertion = Some(ParsedAssertion {
                            id: attr(e, "ID")?,
                            ..Default::default()
                        });
                        if is_empty {
                            response.assertion = assertion.take();
                        }
                    }
                    "StatusCode" if response.status_code.is_none() => {
                        response.status_code = attr(e, "Value")?;
                    }
                    "Conditions" => {
                        if let Some(a) = assertion.as_mut() {
                            a.not_before = attr(e, "NotBefore")?.map(|v| parse_instant(&v)).transpose()?;
                            a.not_on_or_after =
                                attr(e, "NotOnOrAfter")?.map(|v| parse_instant(&v)).transpose()?;
                        }
                    }
                    "AuthnStatement" => {
                        if let Some(a) = assertion.as_mut() {
                            if a.session_index.is_none() {
                                a.session_index = attr(e, "SessionIndex")?;
                            }
                        }
                    }
                    "Attribute" if !is_empty => {
                        attribute = attr(e, "Name")?.map(|n| (n, Vec::new()));
                    }
                    "AttributeValue" if is_empty => {
                        if let Some((_, values)) = attribute.as_mut() {
                            values.push(String::new());
                        }
                    }
                    _ => {}
                }
                if !is_empty {
                    stack.push(name);
                }
            }
            Event::Text(ref e) => {
                let text = e.unescape().map_err(xml_read_error)?.into_owned();
                on_text(&stack, text, &mut response, assertion.as_mut(), attribute.as_mut());
            }
            Event::CData(e) => {
                let text = String::from_utf8_lossy(&e.into_inner()).into_owned();
                on_text(&stack, text, &mut response, assertion.as_mut(), attribute.as_mut());
            }
            Event::End(_) => {
                match stack.pop().as_deref() {
                    Some("Attribute") => {
                        if let (Some((name, values)), Some(a)) = (attribute.take(), assertion.as_mut()) {
                            insert_attribute(&mut a.attributes, name, values);
                        }
                    }
                    Some("Assertion") => response.assertion = assertion.take(),
                    _ => {}
                }
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    if !stack.is_empty() {
        return Err(AuthError::Validation("SAML response is truncated".to_string()));
    }
    Ok(response)
}

fn on_text(
    stack: &[String],
    text: String,
    response: &mut ParsedResponse,
    assertion: Option<&mut ParsedAssertion>,
    attribute: Option<&mut (String, Vec<String>)>,
) {
    let current = stack.last().map(String::as_str);
    let parent = stack.len().checked_sub(2).and_then(|i| stack.get(i)).map(String::as_str);
    match (current, parent) {
        (Some("Issuer"), Some("Response")) => response.issuer = Some(text),
        (Some("Issuer"), Some("Assertion")) => {
            if let Some(a) = assertion {
                a.issuer = Some(text);
            }
        }
        (Some("NameID"), Some("Subject")) => {
            if let Some(a) = assertion {
                a.name_id = Some(text);
            }
        }
        (Some("AttributeValue"), Some("Attribute")) => {
            if let Some((_, values)) = attribute {
                values.push(text);
            }
        }
        _ => {}
    }
}

fn insert_attribute(attributes: &mut RawAttributes, name: String, mut values: Vec<String>) {
    match values.len() {
        0 => {}
        1 => {
            attributes.insert(name, Value::String(values.remove(0)));
        }
        _ => {
            attributes.insert(name, Value::Array(values.into_iter().map(Value::String).collect()));
        }
    }
}

/// What the engine needs from an IdP metadata document
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IdpMetadata {
    pub entity_id: Option<String>,
    pub sso_redirect_url: Option<String>,
    pub sso_post_url: Option<String>,
    /// First signing certificate, bare base64 DER
    pub signing_certificate: Option<String>,
}

impl IdpMetadata {
    /// Redirect binding preferred over POST
    pub fn sso_url(&self) -> Option<&str> {
        self.sso_redirect_url
            .as_deref()
            .or(self.sso_post_url.as_deref())
    }
}

/// Extract the SSO endpoints and signing certificate from IdP metadata
pub fn parse_metadata(xml: &str) -> Result<IdpMetadata> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut metadata = IdpMetadata::default();
    let mut stack: Vec<String> = Vec::new();
    let mut in_idp_descriptor = false;
    let mut signing_key = false;
    let mut buf = Vec::new();

    loop {
        let event = reader.read_event_into(&mut buf).map_err(xml_read_error)?;
        match event {
            Event::Start(ref e) | Event::Empty(ref e) => {
                let is_empty = matches!(event, Event::Empty(_));
                let name = local_name(e);
                match name.as_str() {
                    "EntityDescriptor" if metadata.entity_id.is_none() => {
                        metadata.entity_id = attr(e, "entityID")?;
                    }
                    "IDPSSODescriptor" if !is_empty => in_idp_descriptor = true,
                    "KeyDescriptor" if in_idp_descriptor && !is_empty => {
                        signing_key = attr(e, "use")?
                            .map(|u| u == "signing")
                            .unwrap_or(true);
                    }
                    "SingleSignOnService" if in_idp_descriptor => {
                        let binding = attr(e, "Binding")?;
                        let location = attr(e, "Location")?;
                        match binding.as_deref() {
                            Some(HTTP_REDIRECT_BINDING) if metadata.sso_redirect_url.is_none() => {
                                metadata.sso_redirect_url = location;
                            }
                            Some(HTTP_POST_BINDING) if metadata.sso_post_url.is_none() => {
                                metadata.sso_post_url = location;
                            }
                            _ => {}
                        }
                    }
                    _ => {}
                }
                if !is_empty {
                    stack.push(name);
                }
            }
            Event::Text(ref e) => {
                if signing_key
                    && metadata.signing_certificate.is_none()
                    && stack.last().map(String::as_str) == Some("X509Certificate")
                {
                    let text = e.unescape().map_err(xml_read_error)?;
                    metadata.signing_certificate = Some(super::normalize_certificate(&text));
                }
            }
            Event::End(_) => match stack.pop().as_deref() {
                Some("IDPSSODescriptor") => in_idp_descriptor = false,
                Some("KeyDescriptor") => signing_key = false,
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    Ok(metadata)
}

/// Syntactic check only: one root element, balanced and properly nested
/// tags, nothing but whitespace, comments and declarations around the root
pub fn check_well_formed(xml: &str) -> Result<()> {
    let mut reader = Reader::from_str(xml);
    let mut depth: usize = 0;
    let mut roots = 0;
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf).map_err(xml_read_error)? {
            Event::Start(_) => {
                if depth == 0 {
                    roots += 1;
                }
                depth += 1;
            }
            Event::Empty(_) if depth == 0 => roots += 1,
            Event::Text(ref e) if depth == 0 && e.iter().any(|b| !b.is_ascii_whitespace()) => {
                return Err(AuthError::Validation("text outside the root element".to_string()));
            }
            Event::CData(_) if depth == 0 => {
                return Err(AuthError::Validation("CDATA outside the root element".to_string()));
            }
            Event::End(_) => {
                depth = depth
                    .checked_sub(1)
                    .ok_or_else(|| AuthError::Validation("unbalanced closing tag".to_string()))?;
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    match (roots, depth) {
        (1, 0) => Ok(()),
        (0, _) => Err(AuthError::Validation("document has no root element".to_string())),
        (_, 0) => Err(AuthError::Validation("document has more than one root element".to_string())),
        _ => Err(AuthError::Validation("document ends inside an element".to_string())),
    }
}

fn local_name(e: &BytesStart<'_>) -> String {
    String::from_utf8_lossy(e.local_name().as_ref()).into_owned()
}

fn attr(e: &BytesStart<'_>, name: &str) -> Result<Option<String>> {
    for attribute in e.attributes() {
        let attribute = attribute.map_err(|err| AuthError::Validation(err.to_string()))?;
        if attribute.key.local_name().as_ref() == name.as_bytes() {
            let value = attribute.unescape_value().map_err(xml_read_error)?;
            return Ok(Some(value.into_owned()));
        }
    }
    Ok(None)
}

fn parse_instant(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| AuthError::Validation(format!("invalid SAML instant '{}': {}", value, e)))
}

fn xml_read_error<E: std::fmt::Display>(e: E) -> AuthError {
    AuthError::Validation(format!("malformed XML: {}", e))
}

fn xml_write_error<E: std::fmt::Display>(e: E) -> AuthError {
    AuthError::Internal(format!("failed to write XML: {}", e))
}
