//! Login and registration throttling
//!
//! [`SharedRateLimiter`] counts in the shared cache cluster so every node sees
//! the same window. [`LocalRateLimiter`] keeps the same window semantics in
//! process memory. [`FallbackRateLimiter`] fronts both and keeps the gate
//! available when the cluster is not.

pub mod fallback;
pub mod local;
pub mod shared;

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;

pub use fallback::FallbackRateLimiter;
pub use local::LocalRateLimiter;
pub use shared::SharedRateLimiter;

/// Throttled action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionKind {
    Login,
    Register,
}

impl ActionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::Login => "login",
            ActionKind::Register => "register",
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Attempts allowed per window for one action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct RateLimitRule {
    pub max_attempts: u32,
    pub window_seconds: u64,
}

impl RateLimitRule {
    pub fn new(max_attempts: u32, window: Duration) -> Self {
        Self {
            max_attempts,
            window_seconds: window.as_secs(),
        }
    }

    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_seconds)
    }
}

/// Rate limiting configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub login: RateLimitRule,
    pub register: RateLimitRule,
    /// How often a degraded fallback limiter re-probes the shared backend
    pub health_check_interval_seconds: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            login: RateLimitRule { max_attempts: 5, window_seconds: 15 * 60 },
            register: RateLimitRule { max_attempts: 3, window_seconds: 3600 },
            health_check_interval_seconds: 30,
        }
    }
}

impl RateLimitConfig {
    pub fn rule(&self, kind: ActionKind) -> RateLimitRule {
        match kind {
            ActionKind::Login => self.login,
            ActionKind::Register => self.register,
        }
    }

    pub fn health_check_interval(&self) -> Duration {
        Duration::from_secs(self.health_check_interval_seconds)
    }
}

/// Result of one `allow` call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitDecision {
    pub allowed: bool,
    /// Attempts left in the current window
    pub remaining: u32,
    /// When the current window ends
    pub reset_at: DateTime<Utc>,
}

impl RateLimitDecision {
    pub(crate) fn new(allowed: bool, remaining: u32, resets_in: Duration) -> Self {
        let resets_in = chrono::Duration::from_std(resets_in).unwrap_or_else(|_| chrono::Duration::zero());
        Self {
            allowed,
            remaining,
            reset_at: Utc::now() + resets_in,
        }
    }
}

/// Common limiter surface
#[async_trait]
pub trait RateLimiter: Send + Sync {
    /// Count one attempt and report whether it is within the limit
    async fn allow(&self, identifier: &str, kind: ActionKind) -> Result<RateLimitDecision>;

    async fn remaining(&self, identifier: &str, kind: ActionKind) -> Result<u32>;

    async fn reset(&self, identifier: &str, kind: ActionKind) -> Result<()>;
}

pub(crate) fn limiter_key(kind: ActionKind, identifier: &str) -> String {
    format!("ratelimit:{}:{}", kind, identifier)
}
