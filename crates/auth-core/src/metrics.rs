//! Counters exported by the engine
//!
//! Exporters are outside this crate; they read [`AuthMetrics::snapshot`].

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use serde::Serialize;

#[derive(Debug, Default)]
pub struct AuthMetrics {
    metadata_fetches: AtomicU64,
    metadata_cache_store_failures: AtomicU64,
    rate_limiter_fallback_transitions: AtomicU64,
    rate_limiter_degraded: AtomicBool,
    authentications_succeeded: AtomicU64,
    authentications_failed: AtomicU64,
}

/// Point-in-time copy of every counter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub metadata_fetches: u64,
    pub metadata_cache_store_failures: u64,
    pub rate_limiter_fallback_transitions: u64,
    pub rate_limiter_degraded: bool,
    pub authentications_succeeded: u64,
    pub authentications_failed: u64,
}

impl AuthMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_metadata_fetch(&self) {
        self.metadata_fetches.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_metadata_cache_store_failure(&self) {
        self.metadata_cache_store_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Flip the limiter mode flag; entering degraded mode counts a transition
    pub fn set_rate_limiter_degraded(&self, degraded: bool) {
        let was = self.rate_limiter_degraded.swap(degraded, Ordering::Relaxed);
        if degraded && !was {
            self.rate_limiter_fallback_transitions.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_authentication(&self, succeeded: bool) {
        let counter = if succeeded {
            &self.authentications_succeeded
        } else {
            &self.authentications_failed
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            metadata_fetches: self.metadata_fetches.load(Ordering::Relaxed),
            metadata_cache_store_failures: self.metadata_cache_store_failures.load(Ordering::Relaxed),
            rate_limiter_fallback_transitions: self
                .rate_limiter_fallback_transitions
                .load(Ordering::Relaxed),
            rate_limiter_degraded: self.rate_limiter_degraded.load(Ordering::Relaxed),
            authentications_succeeded: self.authentications_succeeded.load(Ordering::Relaxed),
            authentications_failed: self.authentications_failed.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_degraded_transitions_counted_once() {
        let metrics = AuthMetrics::new();
        metrics.set_rate_limiter_degraded(true);
        metrics.set_rate_limiter_degraded(true);
        metrics.set_rate_limiter_degraded(false);
        metrics.set_rate_limiter_degraded(true);

        let snap = metrics.snapshot();
        assert!(snap.rate_limiter_degraded);
        assert_eq!(snap.rate_limiter_fallback_transitions, 2);
    }
}
