//! Redaction helpers for log payloads.
//!
//! Nothing that can authenticate a user (passwords, tokens, client secrets,
//! OAuth state) or identify them (email) should be written to logs verbatim.

use serde_json::{Map, Value};

/// Placeholder written in place of sensitive values
pub const REDACTED: &str = "[REDACTED]";

/// Keys whose values are always replaced by [`REDACTED`]
pub const SENSITIVE_KEYS: &[&str] = &[
    "password",
    "access_token",
    "refresh_token",
    "client_secret",
    "private_key",
    "state",
];

const MAX_LOGGED_STRING: usize = 100;
const TRUNCATED_PREFIX: usize = 20;
const TOKEN_PREFIX: usize = 6;

/// Mask the local part of an email, keeping its first character and the domain.
///
/// `bob@example.com` becomes `b***@example.com`. Input without an `@` is fully masked.
pub fn redact_email(email: &str) -> String {
    if email.is_empty() {
        return String::new();
    }
    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() => {
            let first: String = local.chars().take(1).collect();
            format!("{}***@{}", first, domain)
        }
        _ => "***".to_string(),
    }
}

/// Keep at most a short prefix of a bearer token
pub fn redact_token(token: &str) -> String {
    if token.chars().count() <= TOKEN_PREFIX * 2 {
        return REDACTED.to_string();
    }
    let prefix: String = token.chars().take(TOKEN_PREFIX).collect();
    format!("{}...{}", prefix, REDACTED)
}

/// Return a copy of `fields` that is safe to log.
///
/// Sensitive keys are replaced with [`REDACTED`]; any other string longer than
/// 100 characters is cut to its first 20 followed by `...`. Nested objects are
/// sanitized recursively.
pub fn sanitize_for_logging(fields: &Map<String, Value>) -> Map<String, Value> {
    fields
        .iter()
        .map(|(key, value)| {
            let clean = if SENSITIVE_KEYS.contains(&key.to_ascii_lowercase().as_str()) {
                Value::String(REDACTED.to_string())
            } else {
                sanitize_value(value)
            };
            (key.clone(), clean)
        })
        .collect()
}

fn sanitize_value(value: &Value) -> Value {
    match value {
        Value::String(s) if s.chars().count() > MAX_LOGGED_STRING => {
            let head: String = s.chars().take(TRUNCATED_PREFIX).collect();
            Value::String(format!("{}...", head))
        }
        Value::Object(inner) => Value::Object(sanitize_for_logging(inner)),
        Value::Array(items) => Value::Array(items.iter().map(sanitize_value).collect()),
        other => other.clone(),
    }
}
