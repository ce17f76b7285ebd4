//! Limiter that survives a shared cache outage
//!
//! While the cluster answers, every decision comes from it. The first failed
//! call flips the limiter into degraded mode, logged once, and decisions move
//! to the in-process limiter. Health is re-probed on a fixed interval and the
//! limiter switches back as soon as a probe succeeds.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::{info, warn};

use super::{ActionKind, LocalRateLimiter, RateLimitDecision, RateLimiter, SharedRateLimiter};
use crate::error::Result;
use crate::metrics::AuthMetrics;

pub struct FallbackRateLimiter {
    primary: SharedRateLimiter,
    local: LocalRateLimiter,
    degraded: AtomicBool,
    last_probe: Mutex<Instant>,
    health_check_interval: Duration,
    metrics: Arc<AuthMetrics>,
}

impl FallbackRateLimiter {
    /// Wrap `primary`, probing it once so an outage at startup is detected
    /// before the first request
    pub async fn new(primary: SharedRateLimiter, metrics: Arc<AuthMetrics>) -> Self {
        let config = primary.config().clone();
        let limiter = Self {
            local: LocalRateLimiter::new(config.clone()),
            primary,
            degraded: AtomicBool::new(false),
            last_probe: Mutex::new(Instant::now()),
            health_check_interval: config.health_check_interval(),
            metrics,
        };

        if let Err(e) = limiter.primary.ping().await {
            limiter.enter_degraded(&e.to_string());
        }
        limiter
    }

    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::SeqCst)
    }

    /// Count one attempt.
    ///
    /// Never fails: shared backend errors are absorbed by switching to the
    /// local limiter.
    pub async fn check(&self, identifier: &str, kind: ActionKind) -> RateLimitDecision {
        if self.is_degraded() {
            self.maybe_recover().await;
        }

        if !self.is_degraded() {
            match self.primary.allow(identifier, kind).await {
                Ok(decision) => return decision,
                Err(e) => self.enter_degraded(&e.to_string()),
            }
        }

        self.local.check(identifier, kind)
    }

    /// Local limiter housekeeping
    pub fn cleanup(&self) -> usize {
        self.local.cleanup()
    }

    fn enter_degraded(&self, reason: &str) {
        if self
            .degraded
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            *self.last_probe.lock() = Instant::now();
            self.metrics.set_rate_limiter_degraded(true);
            warn!(
                error = %reason,
                "Shared rate limiter unavailable, falling back to in-memory limiting"
            );
        }
    }

    async fn maybe_recover(&self) {
        {
            let mut last_probe = self.last_probe.lock();
            let now = Instant::now();
            if now.duration_since(*last_probe) < self.health_check_interval {
                return;
            }
            *last_probe = now;
        }

        if self.primary.ping().await.is_ok()
            && self
                .degraded
                .compare_exchange(true, false, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
        {
            self.metrics.set_rate_limiter_degraded(false);
            info!("Shared rate limiter recovered, leaving fallback mode");
        }
    }
}

#[async_trait]
impl RateLimiter for FallbackRateLimiter {
    async fn allow(&self, identifier: &str, kind: ActionKind) -> Result<RateLimitDecision> {
        Ok(self.check(identifier, kind).await)
    }

    async fn remaining(&self, identifier: &str, kind: ActionKind) -> Result<u32> {
        if !self.is_degraded() {
            if let Ok(remaining) = self.primary.remaining(identifier, kind).await {
                return Ok(remaining);
            }
        }
        Ok(self.local.remaining_now(identifier, kind))
    }

    async fn reset(&self, identifier: &str, kind: ActionKind) -> Result<()> {
        self.local.reset_now(identifier, kind);
        if !self.is_degraded() {
            if let Err(e) = self.primary.reset(identifier, kind).await {
                self.enter_degraded(&e.to_string());
            }
        }
        Ok(())
    }
}
