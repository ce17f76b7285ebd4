//! In-process limiter used while the shared cache is unreachable

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::debug;

use super::{limiter_key, ActionKind, RateLimitConfig, RateLimitDecision, RateLimiter};
use crate::error::Result;

/// Attempt count since the window opened
#[derive(Debug, Clone, Copy)]
struct RateLimitWindow {
    count: u32,
    window_start: Instant,
}

impl RateLimitWindow {
    fn open(now: Instant) -> Self {
        Self { count: 0, window_start: now }
    }

    fn elapsed(&self, now: Instant, window: Duration) -> bool {
        now.duration_since(self.window_start) >= window
    }

    fn resets_in(&self, now: Instant, window: Duration) -> Duration {
        (self.window_start + window).saturating_duration_since(now)
    }
}

/// Same fixed-window rules as [`super::SharedRateLimiter`], kept per node.
///
/// Check-and-increment happens under one lock so concurrent callers never
/// overshoot the limit.
pub struct LocalRateLimiter {
    config: RateLimitConfig,
    windows: Mutex<HashMap<String, RateLimitWindow>>,
}

impl LocalRateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            windows: Mutex::new(HashMap::new()),
        }
    }

    /// Synchronous form of [`RateLimiter::allow`]
    pub fn check(&self, identifier: &str, kind: ActionKind) -> RateLimitDecision {
        let rule = self.config.rule(kind);
        let window = rule.window();
        let now = Instant::now();

        let mut windows = self.windows.lock();
        let entry = windows
            .entry(limiter_key(kind, identifier))
            .or_insert_with(|| RateLimitWindow::open(now));
        if entry.elapsed(now, window) {
            *entry = RateLimitWindow::open(now);
        }

        let allowed = entry.count < rule.max_attempts;
        if allowed {
            entry.count += 1;
        }
        RateLimitDecision::new(
            allowed,
            rule.max_attempts.saturating_sub(entry.count),
            entry.resets_in(now, window),
        )
    }

    pub fn remaining_now(&self, identifier: &str, kind: ActionKind) -> u32 {
        let rule = self.config.rule(kind);
        let now = Instant::now();
        let used = self
            .windows
            .lock()
            .get(&limiter_key(kind, identifier))
            .filter(|w| !w.elapsed(now, rule.window()))
            .map(|w| w.count)
            .unwrap_or(0);
        rule.max_attempts.saturating_sub(used)
    }

    pub fn reset_now(&self, identifier: &str, kind: ActionKind) {
        self.windows.lock().remove(&limiter_key(kind, identifier));
    }

    /// Drop windows that have run their course
    pub fn cleanup(&self) -> usize {
        let now = Instant::now();
        let mut windows = self.windows.lock();
        let before = windows.len();
        windows.retain(|key, w| {
            let kind = if key.starts_with("ratelimit:register:") {
                ActionKind::Register
            } else {
                ActionKind::Login
            };
            !w.elapsed(now, self.config.rule(kind).window())
        });
        let removed = before - windows.len();
        if removed > 0 {
            debug!(removed, "Cleaned up expired rate limit windows");
        }
        removed
    }

    pub fn tracked_keys(&self) -> usize {
        self.windows.lock().len()
    }
}

#[async_trait]
impl RateLimiter for LocalRateLimiter {
    async fn allow(&self, identifier: &str, kind: ActionKind) -> Result<RateLimitDecision> {
        Ok(self.check(identifier, kind))
    }

    async fn remaining(&self, identifier: &str, kind: ActionKind) -> Result<u32> {
        Ok(self.remaining_now(identifier, kind))
    }

    async fn reset(&self, identifier: &str, kind: ActionKind) -> Result<()> {
        self.reset_now(identifier, kind);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rate_limit::RateLimitRule;

    fn limiter(max: u32, window_secs: u64) -> LocalRateLimiter {
        LocalRateLimiter::new(RateLimitConfig {
            login: RateLimitRule::new(max, Duration::from_secs(window_secs)),
            ..Default::default()
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_window_reopens_after_elapsing() {
        let limiter = limiter(2, 60);
        assert!(limiter.check("ip", ActionKind::Login).allowed);
        assert!(limiter.check("ip", ActionKind::Login).allowed);
        assert!(!limiter.check("ip", ActionKind::Login).allowed);

        tokio::time::advance(Duration::from_secs(61)).await;
        let decision = limiter.check("ip", ActionKind::Login);
        assert!(decision.allowed);
        assert_eq!(decision.remaining, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cleanup_drops_stale_windows() {
        let limiter = limiter(2, 60);
        limiter.check("a", ActionKind::Login);
        limiter.check("b", ActionKind::Register);
        tokio::time::advance(Duration::from_secs(61)).await;

        // login window elapsed, register window (1h) still open
        assert_eq!(limiter.cleanup(), 1);
        assert_eq!(limiter.tracked_keys(), 1);
    }

    #[tokio::test]
    async fn test_denied_attempts_do_not_consume() {
        let limiter = limiter(1, 60);
        assert!(limiter.check("ip", ActionKind::Login).allowed);
        for _ in 0..5 {
            assert!(!limiter.check("ip", ActionKind::Login).allowed);
        }
        limiter.reset_now("ip", ActionKind::Login);
        assert_eq!(limiter.remaining_now("ip", ActionKind::Login), 1);
    }
}
