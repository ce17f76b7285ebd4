//! Token revocation list backed by the shared cache cluster
//!
//! Entries carry a TTL equal to the token's remaining natural lifetime, so the
//! list never outgrows the set of tokens that could still validate.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::error::{AuthError, Result};
use crate::store::SharedCache;

const TOKEN_KEY_PREFIX: &str = "blacklist:token:";
const USER_KEY_PREFIX: &str = "blacklist:user:";

/// Revoked tokens and per-user revocation cut-offs
#[derive(Clone)]
pub struct TokenBlacklist {
    cache: Arc<dyn SharedCache>,
}

impl TokenBlacklist {
    pub fn new(cache: Arc<dyn SharedCache>) -> Self {
        Self { cache }
    }

    /// Signature segment of a compact JWS, used as the blacklist key
    pub fn signature_of(token: &str) -> Option<&str> {
        let mut parts = token.split('.');
        match (parts.next(), parts.next(), parts.next(), parts.next()) {
            (Some(_), Some(_), Some(sig), None) if !sig.is_empty() => Some(sig),
            _ => None,
        }
    }

    /// Record a revoked token for `ttl`.
    ///
    /// A zero TTL means the token is already dead and nothing is stored.
    pub async fn add(&self, token_signature: &str, ttl: Duration) -> Result<()> {
        if ttl.is_zero() {
            debug!("Token already expired, not blacklisting");
            return Ok(());
        }
        self.cache
            .set(&token_key(token_signature), "revoked".to_string(), ttl)
            .await
            .map_err(|e| AuthError::Cache(format!("failed to blacklist token: {}", e)))
    }

    /// Record a revoked token until its natural expiry
    pub async fn add_until(&self, token_signature: &str, expires_at: DateTime<Utc>) -> Result<()> {
        self.add(token_signature, remaining(expires_at)).await
    }

    /// Atomically blacklist a token unless another caller already did.
    ///
    /// Returns `false` when the token was already revoked, which makes
    /// single-use redemption safe across nodes.
    pub async fn claim_until(&self, token_signature: &str, expires_at: DateTime<Utc>) -> Result<bool> {
        let ttl = remaining(expires_at);
        if ttl.is_zero() {
            return Ok(false);
        }
        self.cache
            .set_if_absent(&token_key(token_signature), "revoked".to_string(), ttl)
            .await
            .map_err(|e| AuthError::Cache(format!("failed to blacklist token: {}", e)))
    }

    pub async fn is_blacklisted(&self, token_signature: &str) -> Result<bool> {
        self.cache
            .get(&token_key(token_signature))
            .await
            .map(|hit| hit.is_some())
            .map_err(|e| AuthError::Cache(format!("failed to check blacklist: {}", e)))
    }

    /// Invalidate every token of `user_id` issued at or before `revoked_at`.
    ///
    /// `ttl` should cover the longest token lifetime.
    pub async fn blacklist_user(
        &self,
        user_id: &str,
        revoked_at: DateTime<Utc>,
        ttl: Duration,
    ) -> Result<()> {
        self.cache
            .set(&user_key(user_id), unix_nanos(revoked_at).to_string(), ttl)
            .await
            .map_err(|e| AuthError::Cache(format!("failed to blacklist user tokens: {}", e)))
    }

    /// Revocation cut-off for `user_id` in Unix nanoseconds
    pub async fn user_revoked_at(&self, user_id: &str) -> Result<Option<i64>> {
        let raw = self
            .cache
            .get(&user_key(user_id))
            .await
            .map_err(|e| AuthError::Cache(format!("failed to check user blacklist: {}", e)))?;
        raw.map(|v| {
            v.parse::<i64>()
                .map_err(|_| AuthError::Cache(format!("corrupt user revocation entry: {}", v)))
        })
        .transpose()
    }
}

fn token_key(signature: &str) -> String {
    format!("{}{}", TOKEN_KEY_PREFIX, signature)
}

fn user_key(user_id: &str) -> String {
    format!("{}{}", USER_KEY_PREFIX, user_id)
}

/// Nanoseconds since the epoch, saturating past 2262
pub(crate) fn unix_nanos(at: DateTime<Utc>) -> i64 {
    at.timestamp_nanos_opt().unwrap_or(i64::MAX)
}

fn remaining(expires_at: DateTime<Utc>) -> Duration {
    (expires_at - Utc::now()).to_std().unwrap_or(Duration::ZERO)
}
