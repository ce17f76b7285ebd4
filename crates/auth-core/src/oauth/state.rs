//! Single-use CSRF state for the authorization-code flow

use std::time::Duration;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use chrono::{DateTime, Utc};
use moka::future::Cache;
use rand::rngs::OsRng;
use rand::RngCore;
use tracing::warn;

use crate::error::{AuthError, Result};

const STATE_BYTES: usize = 32;
const MAX_PENDING_STATES: u64 = 100_000;

#[derive(Debug, Clone)]
struct PendingAuthorization {
    provider: String,
    issued_at: DateTime<Utc>,
}

/// Issued states, each redeemable once for the provider it was issued to
#[derive(Clone)]
pub struct OAuthStateStore {
    pending: Cache<String, PendingAuthorization>,
    ttl: Duration,
}

impl OAuthStateStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            pending: Cache::builder()
                .max_capacity(MAX_PENDING_STATES)
                .time_to_live(ttl)
                .build(),
            ttl,
        }
    }

    /// Mint a fresh state bound to `provider`
    pub async fn issue(&self, provider: &str) -> String {
        let mut bytes = [0u8; STATE_BYTES];
        OsRng.fill_bytes(&mut bytes);
        let state = URL_SAFE_NO_PAD.encode(bytes);

        self.pending
            .insert(
                state.clone(),
                PendingAuthorization {
                    provider: provider.to_string(),
                    issued_at: Utc::now(),
                },
            )
            .await;
        state
    }

    /// Redeem `state` for `provider`.
    ///
    /// Unknown, expired, reused and cross-provider states all fail the same way.
    pub async fn consume(&self, state: &str, provider: &str) -> Result<()> {
        let Some(pending) = self.pending.remove(state).await else {
            warn!(provider = %provider, "OAuth state unknown, expired or already used");
            return Err(AuthError::AuthenticationFailed);
        };
        if pending.provider != provider {
            warn!(
                provider = %provider,
                issued_for = %pending.provider,
                issued_at = %pending.issued_at,
                "OAuth state presented to the wrong provider"
            );
            return Err(AuthError::AuthenticationFailed);
        }
        let age = (Utc::now() - pending.issued_at).to_std().unwrap_or(Duration::ZERO);
        if age >= self.ttl {
            warn!(provider = %provider, "OAuth state expired");
            return Err(AuthError::AuthenticationFailed);
        }
        Ok(())
    }
}
