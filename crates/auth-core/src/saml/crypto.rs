//! XML signature seam
//!
//! Signing AuthnRequests and verifying assertion signatures need XML
//! canonicalization and XML-DSig, which belong to a dedicated SAML library.
//! The strategy only talks to [`XmlSignatureProvider`].

use crate::error::Result;

pub trait XmlSignatureProvider: Send + Sync {
    /// Sign an AuthnRequest document with the service provider's private key
    /// (PEM), returning the signed document. When present, the SP certificate
    /// (PEM) goes into the signature's `KeyInfo`.
    fn sign_authn_request(
        &self,
        xml: &str,
        sp_private_key_pem: &str,
        sp_certificate_pem: Option<&str>,
    ) -> Result<String>;

    /// Verify the enveloped signature of a SAML response or its assertion
    /// against the identity provider certificate (bare base64 DER).
    ///
    /// Returns the `ID` attribute of the element the verified signature
    /// references. Any failure, including a missing signature, is an error.
    fn verify(&self, xml: &str, idp_certificate: &str) -> Result<String>;
}

/// Reduce a PEM or whitespace-wrapped certificate to bare base64 DER
pub fn normalize_certificate(certificate: &str) -> String {
    certificate
        .lines()
        .map(str::trim)
        .filter(|line| !line.starts_with("-----"))
        .flat_map(|line| line.chars())
        .filter(|c| !c.is_whitespace())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_pem_and_bare_forms() {
        let pem = "-----BEGIN CERTIFICATE-----\nMIIB\n  Ab Cd\n-----END CERTIFICATE-----\n";
        assert_eq!(normalize_certificate(pem), "MIIBAbCd");
        assert_eq!(normalize_certificate(" MIIB AbCd "), "MIIBAbCd");
    }
}
