//! Collaborator interfaces consumed by the engine.
//!
//! The user/role store, the grant and session persistence and the shared
//! cache cluster all live outside this crate. The traits below are the only
//! surface the engine relies on; [`memory`] ships in-process implementations
//! for development and tests.

pub mod memory;

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::types::{FederatedSession, NewUser, ProviderGrant, ProviderProfile, User};

pub use memory::{InMemoryGrantStore, InMemorySessionStore, InMemorySharedCache, InMemoryUserStore};

/// Relational user/role store
#[async_trait]
pub trait UserStore: Send + Sync {
    async fn get_user(&self, user_id: &str) -> Result<Option<User>>;

    async fn get_user_by_email(&self, email: &str) -> Result<Option<User>>;

    /// Resolve the user linked to `(provider, provider_user_id)`, linking an
    /// existing account with the same email or creating one as needed
    async fn get_or_create_user_by_provider_identity(&self, profile: &ProviderProfile) -> Result<User>;

    /// Constant-time credential check.
    ///
    /// Returns `None` for both unknown emails and wrong passwords.
    async fn verify_password(&self, email: &str, password: &str) -> Result<Option<User>>;

    async fn get_user_roles(&self, user_id: &str) -> Result<Vec<String>>;

    async fn create_user(&self, user: NewUser) -> Result<User>;

    async fn update_profile(&self, user_id: &str, first_name: &str, last_name: &str) -> Result<User>;

    async fn set_user_roles(&self, user_id: &str, roles: &[String]) -> Result<User>;
}

/// Persistence for OAuth provider grants, keyed by (user, provider)
#[async_trait]
pub trait GrantStore: Send + Sync {
    async fn upsert_grant(&self, grant: ProviderGrant) -> Result<ProviderGrant>;

    async fn get_grant(&self, user_id: &str, provider: &str) -> Result<Option<ProviderGrant>>;
}

/// Persistence for SAML federated sessions
#[async_trait]
pub trait FederatedSessionStore: Send + Sync {
    async fn insert_session(&self, session: FederatedSession) -> Result<()>;

    /// Delete sessions whose expiry is at or before `now`, returning how many went
    async fn delete_expired_sessions(&self, now: DateTime<Utc>) -> Result<u64>;

    async fn sessions_for_user(&self, user_id: &str) -> Result<Vec<FederatedSession>>;
}

/// Shared cache cluster backing the token blacklist, the primary rate
/// limiter and the second level of the SAML metadata cache
#[async_trait]
pub trait SharedCache: Send + Sync {
    /// Atomically increment `key`, starting a fresh `window` when absent.
    ///
    /// Returns the new count and the time left before the key expires.
    async fn incr_with_expiry(&self, key: &str, window: Duration) -> Result<(u64, Duration)>;

    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<()>;

    /// Store `value` only when `key` is absent or expired (SET NX).
    ///
    /// Returns whether this call wrote the key.
    async fn set_if_absent(&self, key: &str, value: String, ttl: Duration) -> Result<bool>;

    async fn get(&self, key: &str) -> Result<Option<String>>;

    async fn delete(&self, key: &str) -> Result<()>;

    /// Cheap reachability probe
    async fn ping(&self) -> Result<()>;
}
