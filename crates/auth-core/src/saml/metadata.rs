//! Identity-provider metadata fetching and caching
//!
//! Two levels: an in-process `moka` cache in front of the shared cache
//! cluster. An entry is served only while `now < expires_at`; a miss or an
//! expired entry costs exactly one HTTP fetch, shared by every caller that
//! misses on the same key at the same time.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use moka::future::Cache;
use moka::Expiry;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::xml::{check_well_formed, parse_metadata, IdpMetadata};
use crate::error::{AuthError, Result};
use crate::metrics::AuthMetrics;
use crate::store::SharedCache;

pub const DEFAULT_METADATA_TTL: Duration = Duration::from_secs(24 * 3600);
const MAX_CACHED_DOCUMENTS: u64 = 1_000;

/// A fetched metadata document and its validity window
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataCacheEntry {
    pub config_key: String,
    pub metadata_xml: String,
    pub fetched_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl MetadataCacheEntry {
    pub fn is_valid(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }

    fn time_to_live(&self) -> Duration {
        (self.expires_at - Utc::now()).to_std().unwrap_or(Duration::ZERO)
    }

    /// SSO endpoints and signing certificate from the document
    pub fn parse(&self) -> Result<IdpMetadata> {
        parse_metadata(&self.metadata_xml)
    }
}

struct EntryExpiry;

impl Expiry<String, Arc<MetadataCacheEntry>> for EntryExpiry {
    fn expire_after_create(
        &self,
        _key: &String,
        value: &Arc<MetadataCacheEntry>,
        _created_at: Instant,
    ) -> Option<Duration> {
        Some(value.time_to_live())
    }
}

/// Time-bounded cache of IdP metadata, keyed by SAML configuration name
#[derive(Clone)]
pub struct SamlMetadataCache {
    local: Cache<String, Arc<MetadataCacheEntry>>,
    shared: Option<Arc<dyn SharedCache>>,
    http: reqwest::Client,
    ttl: Duration,
    metrics: Arc<AuthMetrics>,
}

impl SamlMetadataCache {
    pub fn new(http: reqwest::Client, ttl: Duration, metrics: Arc<AuthMetrics>) -> Self {
        let local = Cache::builder()
            .max_capacity(MAX_CACHED_DOCUMENTS)
            .expire_after(EntryExpiry)
            .build();
        Self {
            local,
            shared: None,
            http,
            ttl,
            metrics,
        }
    }

    /// Write fetched documents through to the shared cache cluster and
    /// consult it on local misses
    pub fn with_shared_cache(mut self, shared: Arc<dyn SharedCache>) -> Self {
        self.shared = Some(shared);
        self
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Metadata XML for `config_key`, fetched from `url` on a miss
    pub async fn fetch_metadata(&self, url: &str, config_key: &str) -> Result<String> {
        self.fetch_entry(url, config_key)
            .await
            .map(|entry| entry.metadata_xml.clone())
    }

    /// Like [`Self::fetch_metadata`] but returns the whole entry
    pub async fn fetch_entry(&self, url: &str, config_key: &str) -> Result<Arc<MetadataCacheEntry>> {
        if let Some(entry) = self.local.get(config_key).await {
            if entry.is_valid(Utc::now()) {
                debug!(saml_config_id = %config_key, cache_status = "hit", "SAML metadata retrieved from cache");
                return Ok(entry);
            }
            self.local.invalidate(config_key).await;
        }

        self.local
            .try_get_with(config_key.to_string(), self.load(url, config_key))
            .await
            .map_err(|e| (*e).clone())
    }

    /// Drop the cached document for `config_key` from both levels
    pub async fn invalidate(&self, config_key: &str) {
        self.local.invalidate(config_key).await;
        if let Some(shared) = &self.shared {
            if let Err(e) = shared.delete(&shared_key(config_key)).await {
                warn!(saml_config_id = %config_key, error = %e, "Failed to evict shared SAML metadata");
            }
        }
    }

    async fn load(&self, url: &str, config_key: &str) -> Result<Arc<MetadataCacheEntry>> {
        if let Some(entry) = self.read_shared(config_key).await {
            debug!(saml_config_id = %config_key, cache_status = "shared-hit", "SAML metadata retrieved from shared cache");
            return Ok(Arc::new(entry));
        }

        info!(metadata_url = %url, saml_config_id = %config_key, cache_status = "miss", "Fetching SAML metadata");
        let metadata_xml = self.download(url).await?;

        let fetched_at = Utc::now();
        let ttl = chrono::Duration::from_std(self.ttl)
            .map_err(|e| AuthError::Configuration(format!("metadata TTL out of range: {}", e)))?;
        let entry = MetadataCacheEntry {
            config_key: config_key.to_string(),
            metadata_xml,
            fetched_at,
            expires_at: fetched_at + ttl,
        };

        self.write_shared(&entry).await;
        Ok(Arc::new(entry))
    }

    async fn download(&self, url: &str) -> Result<String> {
        self.metrics.record_metadata_fetch();

        let response = self.http.get(url).send().await.map_err(|e| {
            warn!(metadata_url = %url, error = %e, "Failed to fetch SAML metadata");
            AuthError::Upstream(format!("failed to fetch metadata: {}", e))
        })?;

        let status = response.status();
        if !status.is_success() {
            warn!(metadata_url = %url, status_code = status.as_u16(), "SAML metadata endpoint returned an error");
            return Err(AuthError::Upstream(format!(
                "metadata endpoint returned {}",
                status.as_u16()
            )));
        }

        let body = response
            .text()
            .await
            .map_err(|e| AuthError::Upstream(format!("failed to read metadata body: {}", e)))?;

        check_well_formed(&body).map_err(|e| {
            warn!(metadata_url = %url, error = %e, "Invalid SAML metadata XML format");
            AuthError::Upstream(format!("invalid metadata XML: {}", e))
        })?;
        Ok(body)
    }

    async fn read_shared(&self, config_key: &str) -> Option<MetadataCacheEntry> {
        let shared = self.shared.as_ref()?;
        let raw = match shared.get(&shared_key(config_key)).await {
            Ok(raw) => raw?,
            Err(e) => {
                warn!(saml_config_id = %config_key, error = %e, "Shared SAML metadata lookup failed");
                return None;
            }
        };
        match serde_json::from_str::<MetadataCacheEntry>(&raw) {
            Ok(entry) if entry.is_valid(Utc::now()) => Some(entry),
            Ok(_) => None,
            Err(e) => {
                warn!(saml_config_id = %config_key, error = %e, "Discarding unreadable shared SAML metadata");
                None
            }
        }
    }

    /// Cache-store failures never fail the caller; they are counted
    async fn write_shared(&self, entry: &MetadataCacheEntry) {
        let Some(shared) = &self.shared else {
            return;
        };
        let stored = match serde_json::to_string(entry) {
            Ok(json) => shared
                .set(&shared_key(&entry.config_key), json, entry.time_to_live())
                .await,
            Err(e) => Err(AuthError::Internal(e.to_string())),
        };
        if let Err(e) = stored {
            self.metrics.record_metadata_cache_store_failure();
            warn!(saml_config_id = %entry.config_key, error = %e, "Failed to cache SAML metadata");
        }
    }
}

fn shared_key(config_key: &str) -> String {
    format!("saml:metadata:{}", config_key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_validity_is_strict() {
        let now = Utc::now();
        let entry = MetadataCacheEntry {
            config_key: "okta".into(),
            metadata_xml: "<x/>".into(),
            fetched_at: now - chrono::Duration::hours(24),
            expires_at: now,
        };
        assert!(!entry.is_valid(now));
        assert!(entry.is_valid(now - chrono::Duration::seconds(1)));
    }

    #[test]
    fn test_shared_key_layout() {
        assert_eq!(shared_key("okta"), "saml:metadata:okta");
    }
}
