//! Cluster-wide limiter over the shared cache

use std::sync::Arc;

use async_trait::async_trait;

use super::{limiter_key, ActionKind, RateLimitConfig, RateLimitDecision, RateLimiter};
use crate::error::Result;
use crate::store::SharedCache;

/// Fixed window per `(kind, identifier)`, opened by the first attempt.
///
/// The counter and its expiry are set in one atomic cache operation, so
/// concurrent attempts from every node see a single count.
#[derive(Clone)]
pub struct SharedRateLimiter {
    cache: Arc<dyn SharedCache>,
    config: RateLimitConfig,
}

impl SharedRateLimiter {
    pub fn new(cache: Arc<dyn SharedCache>, config: RateLimitConfig) -> Self {
        Self { cache, config }
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// Reachability probe for the backing cluster
    pub async fn ping(&self) -> Result<()> {
        self.cache.ping().await
    }
}

#[async_trait]
impl RateLimiter for SharedRateLimiter {
    async fn allow(&self, identifier: &str, kind: ActionKind) -> Result<RateLimitDecision> {
        let rule = self.config.rule(kind);
        let (count, resets_in) = self
            .cache
            .incr_with_expiry(&limiter_key(kind, identifier), rule.window())
            .await?;

        let max = u64::from(rule.max_attempts);
        let remaining = max.saturating_sub(count) as u32;
        Ok(RateLimitDecision::new(count <= max, remaining, resets_in))
    }

    async fn remaining(&self, identifier: &str, kind: ActionKind) -> Result<u32> {
        let rule = self.config.rule(kind);
        let used = self
            .cache
            .get(&limiter_key(kind, identifier))
            .await?
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(0);
        Ok(u64::from(rule.max_attempts).saturating_sub(used) as u32)
    }

    async fn reset(&self, identifier: &str, kind: ActionKind) -> Result<()> {
        self.cache.delete(&limiter_key(kind, identifier)).await
    }
}
