//! Signing secret strength checks, run once at startup

use std::collections::HashMap;

use tracing::{info, warn};

use crate::config::RuntimeEnvironment;
use crate::error::{AuthError, Result};

pub const MIN_SECRET_LENGTH: usize = 32;
pub const SPECIAL_CHARACTERS: &str = "!@#$%^&*()_+-=[]{}|;:,.<>?/~`";

/// Outcome of a secret check that did not abort startup
#[derive(Debug, Clone, PartialEq)]
pub struct SecretReport {
    /// Shannon entropy estimate for the whole secret
    pub entropy_bits: f64,
    /// Failed requirements, downgraded because the deployment is not production
    pub warnings: Vec<String>,
}

impl SecretReport {
    pub fn is_clean(&self) -> bool {
        self.warnings.is_empty()
    }
}

/// Enforces minimum strength of the token signing secret
#[derive(Debug, Clone, Copy)]
pub struct SecretValidator {
    environment: RuntimeEnvironment,
}

impl SecretValidator {
    pub fn new(environment: RuntimeEnvironment) -> Self {
        Self { environment }
    }

    /// Check length, mixed case, digits and special characters.
    ///
    /// Failures are fatal in production and become warnings in development.
    pub fn validate_secret(&self, secret: &str) -> Result<SecretReport> {
        let failures = requirement_failures(secret);
        let entropy_bits = entropy_bits(secret);
        info!(entropy_bits, "JWT secret entropy estimate");

        if failures.is_empty() {
            return Ok(SecretReport { entropy_bits, warnings: Vec::new() });
        }

        if self.environment.is_production() {
            return Err(AuthError::Configuration(format!(
                "JWT secret is too weak: {}",
                failures.join("; ")
            )));
        }

        for failure in &failures {
            warn!("JWT secret is weak ({}), allowed outside production", failure);
        }
        Ok(SecretReport { entropy_bits, warnings: failures })
    }
}

fn requirement_failures(secret: &str) -> Vec<String> {
    let mut failures = Vec::new();
    if secret.chars().count() < MIN_SECRET_LENGTH {
        failures.push(format!("must be at least {} characters", MIN_SECRET_LENGTH));
    }
    let has_upper = secret.chars().any(|c| c.is_uppercase());
    let has_lower = secret.chars().any(|c| c.is_lowercase());
    if !(has_upper && has_lower) {
        failures.push("must mix upper and lower case letters".to_string());
    }
    if !secret.chars().any(|c| c.is_ascii_digit()) {
        failures.push("must contain a digit".to_string());
    }
    if !secret.chars().any(|c| SPECIAL_CHARACTERS.contains(c)) {
        failures.push("must contain a special character".to_string());
    }
    failures
}

/// Per-character Shannon entropy times length
fn entropy_bits(secret: &str) -> f64 {
    let len = secret.chars().count();
    if len == 0 {
        return 0.0;
    }
    let mut freq: HashMap<char, usize> = HashMap::new();
    for c in secret.chars() {
        *freq.entry(c).or_default() += 1;
    }
    let per_char: f64 = freq
        .values()
        .map(|&n| {
            let p = n as f64 / len as f64;
            -p * p.log2()
        })
        .sum();
    per_char * len as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    const STRONG: &str = "Xk9#mP2$vL7!qR4@wT8%nB3^hJ6&zC1*";

    #[test]
    fn test_short_secret_is_fatal_in_production() {
        let validator = SecretValidator::new(RuntimeEnvironment::Production);
        assert!(matches!(
            validator.validate_secret("short"),
            Err(AuthError::Configuration(_))
        ));
    }

    #[test]
    fn test_short_secret_warns_in_development() {
        let validator = SecretValidator::new(RuntimeEnvironment::Development);
        let report = validator.validate_secret("short").unwrap();
        assert!(!report.is_clean());
        assert!(report.warnings[0].contains("at least 32"));
    }

    #[test]
    fn test_strong_secret_passes_everywhere() {
        for env in [RuntimeEnvironment::Development, RuntimeEnvironment::Production] {
            let report = SecretValidator::new(env).validate_secret(STRONG).unwrap();
            assert!(report.is_clean());
            assert!(report.entropy_bits > 100.0);
        }
    }

    #[test]
    fn test_each_requirement_is_checked() {
        let failures = requirement_failures(&"a".repeat(40));
        assert_eq!(failures.len(), 3);
        assert_eq!(entropy_bits("aaaa"), 0.0);
    }
}
