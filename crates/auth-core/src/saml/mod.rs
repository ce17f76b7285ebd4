//! SAML 2.0 support: documents, metadata and the signature seam

pub mod crypto;
pub mod metadata;
pub mod xml;

pub use crypto::{normalize_certificate, XmlSignatureProvider};
pub use metadata::{MetadataCacheEntry, SamlMetadataCache, DEFAULT_METADATA_TTL};
pub use xml::{AuthnRequest, IdpMetadata, ParsedAssertion, ParsedResponse};
