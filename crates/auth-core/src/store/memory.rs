//! In-process collaborator implementations

use std::sync::Arc;
use std::time::Duration;

use argon2::Argon2;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use once_cell::sync::OnceCell;
use password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use rand::rngs::OsRng;
use tokio::time::Instant;

use super::{FederatedSessionStore, GrantStore, SharedCache, UserStore};
use crate::error::{AuthError, Result};
use crate::types::{FederatedSession, NewUser, ProviderGrant, ProviderProfile, User, DEFAULT_ROLE};

#[derive(Debug, Clone)]
struct StoredUser {
    user: User,
    password_hash: Option<String>,
}

/// In-memory user store with argon2 password hashes
#[derive(Clone, Default)]
pub struct InMemoryUserStore {
    users: Arc<DashMap<String, StoredUser>>,
    /// Normalized email -> user id
    by_email: Arc<DashMap<String, String>>,
    /// (provider, provider user id) -> user id
    links: Arc<DashMap<(String, String), String>>,
    dummy_hash: Arc<OnceCell<String>>,
}

fn normalize_email(email: &str) -> String {
    email.trim().to_ascii_lowercase()
}

fn hash_password(password: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| AuthError::Internal(format!("password hashing failed: {}", e)))
}

fn password_matches(password: &str, hash: &str) -> bool {
    match PasswordHash::new(hash) {
        Ok(parsed) => Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok(),
        Err(_) => false,
    }
}

impl InMemoryUserStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a password account
    pub async fn add_user(
        &self,
        email: &str,
        password: &str,
        first_name: &str,
        last_name: &str,
        roles: &[&str],
    ) -> Result<User> {
        let user = self
            .create_user(NewUser {
                email: email.to_string(),
                first_name: first_name.to_string(),
                last_name: last_name.to_string(),
                roles: roles.iter().map(|r| r.to_string()).collect(),
            })
            .await?;
        let hash = hash_password(password)?;
        if let Some(mut stored) = self.users.get_mut(&user.id) {
            stored.password_hash = Some(hash);
        }
        Ok(user)
    }

    /// Activate or deactivate an account
    pub fn set_active(&self, user_id: &str, active: bool) -> Result<()> {
        let mut stored = self
            .users
            .get_mut(user_id)
            .ok_or_else(|| AuthError::Persistence(format!("user {} not found", user_id)))?;
        stored.user.active = active;
        stored.user.updated_at = Utc::now();
        Ok(())
    }

    pub fn user_count(&self) -> usize {
        self.users.len()
    }

    fn dummy_hash(&self) -> Option<&str> {
        self.dummy_hash
            .get_or_try_init(|| hash_password("not-a-real-password"))
            .ok()
            .map(String::as_str)
    }

    fn update<F>(&self, user_id: &str, apply: F) -> Result<User>
    where
        F: FnOnce(&mut User),
    {
        let mut stored = self
            .users
            .get_mut(user_id)
            .ok_or_else(|| AuthError::Persistence(format!("user {} not found", user_id)))?;
        apply(&mut stored.user);
        stored.user.updated_at = Utc::now();
        Ok(stored.user.clone())
    }
}

#[async_trait]
impl UserStore for InMemoryUserStore {
    async fn get_user(&self, user_id: &str) -> Result<Option<User>> {
        Ok(self.users.get(user_id).map(|s| s.user.clone()))
    }

    async fn get_user_by_email(&self, email: &str) -> Result<Option<User>> {
        let Some(id) = self.by_email.get(&normalize_email(email)).map(|id| id.clone()) else {
            return Ok(None);
        };
        self.get_user(&id).await
    }

    async fn get_or_create_user_by_provider_identity(&self, profile: &ProviderProfile) -> Result<User> {
        let link = (profile.provider.clone(), profile.provider_user_id.clone());
        let linked = self.links.get(&link).map(|id| id.clone());
        if let Some(id) = linked {
            if let Some(user) = self.get_user(&id).await? {
                return Ok(user);
            }
        }

        let user = match self.get_user_by_email(&profile.email).await? {
            Some(existing) => existing,
            None => {
                self.create_user(NewUser {
                    email: profile.email.clone(),
                    first_name: profile.first_name.clone(),
                    last_name: profile.last_name.clone(),
                    roles: vec![DEFAULT_ROLE.to_string()],
                })
                .await?
            }
        };
        self.links.insert(link, user.id.clone());
        Ok(user)
    }

    async fn verify_password(&self, email: &str, password: &str) -> Result<Option<User>> {
        let stored = self
            .by_email
            .get(&normalize_email(email))
            .and_then(|id| self.users.get(id.value()).map(|s| s.clone()));

        match stored {
            Some(StoredUser { user, password_hash: Some(hash) }) => {
                Ok(password_matches(password, &hash).then_some(user))
            }
            _ => {
                // Burn the same work as a real comparison
                if let Some(dummy) = self.dummy_hash() {
                    let _ = password_matches(password, dummy);
                }
                Ok(None)
            }
        }
    }

    async fn get_user_roles(&self, user_id: &str) -> Result<Vec<String>> {
        Ok(self
            .users
            .get(user_id)
            .map(|s| s.user.roles.clone())
            .unwrap_or_default())
    }

    async fn create_user(&self, new_user: NewUser) -> Result<User> {
        let email = normalize_email(&new_user.email);
        if email.is_empty() {
            return Err(AuthError::Validation("email is required".to_string()));
        }

        let now = Utc::now();
        let user = User {
            id: User::new_id(),
            email: email.clone(),
            first_name: new_user.first_name,
            last_name: new_user.last_name,
            roles: new_user.roles,
            active: true,
            created_at: now,
            updated_at: now,
        };

        match self.by_email.entry(email) {
            Entry::Occupied(_) => {
                return Err(AuthError::Persistence(
                    "user with this email already exists".to_string(),
                ));
            }
            Entry::Vacant(slot) => {
                slot.insert(user.id.clone());
            }
        }
        self.users.insert(
            user.id.clone(),
            StoredUser {
                user: user.clone(),
                password_hash: None,
            },
        );
        Ok(user)
    }

    async fn update_profile(&self, user_id: &str, first_name: &str, last_name: &str) -> Result<User> {
        self.update(user_id, |user| {
            user.first_name = first_name.to_string();
            user.last_name = last_name.to_string();
        })
    }

    async fn set_user_roles(&self, user_id: &str, roles: &[String]) -> Result<User> {
        self.update(user_id, |user| user.roles = roles.to_vec())
    }
}

/// In-memory provider grant store
#[derive(Clone, Default)]
pub struct InMemoryGrantStore {
    grants: Arc<DashMap<(String, String), ProviderGrant>>,
}

impl InMemoryGrantStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.grants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.grants.is_empty()
    }
}

#[async_trait]
impl GrantStore for InMemoryGrantStore {
    async fn upsert_grant(&self, grant: ProviderGrant) -> Result<ProviderGrant> {
        let key = (grant.user_id.clone(), grant.provider.clone());
        let stored = self
            .grants
            .entry(key)
            .and_modify(|existing| {
                existing.provider_user_id = grant.provider_user_id.clone();
                existing.access_token = grant.access_token.clone();
                existing.refresh_token = grant.refresh_token.clone();
                existing.expires_at = grant.expires_at;
                existing.updated_at = Utc::now();
            })
            .or_insert_with(|| grant.clone())
            .clone();
        Ok(stored)
    }

    async fn get_grant(&self, user_id: &str, provider: &str) -> Result<Option<ProviderGrant>> {
        Ok(self
            .grants
            .get(&(user_id.to_string(), provider.to_string()))
            .map(|g| g.clone()))
    }
}

/// In-memory federated session store
#[derive(Clone, Default)]
pub struct InMemorySessionStore {
    sessions: Arc<DashMap<String, FederatedSession>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[async_trait]
impl FederatedSessionStore for InMemorySessionStore {
    async fn insert_session(&self, session: FederatedSession) -> Result<()> {
        self.sessions.insert(session.id.clone(), session);
        Ok(())
    }

    async fn delete_expired_sessions(&self, now: DateTime<Utc>) -> Result<u64> {
        let before = self.sessions.len();
        self.sessions.retain(|_, session| !session.is_expired(now));
        Ok(before.saturating_sub(self.sessions.len()) as u64)
    }

    async fn sessions_for_user(&self, user_id: &str) -> Result<Vec<FederatedSession>> {
        Ok(self
            .sessions
            .iter()
            .filter(|entry| entry.user_id == user_id)
            .map(|entry| entry.value().clone())
            .collect())
    }
}

#[derive(Debug, Clone)]
struct CacheSlot {
    value: String,
    expires_at: Instant,
}

impl CacheSlot {
    fn is_live(&self, now: Instant) -> bool {
        now < self.expires_at
    }
}

/// Single-node stand-in for the shared cache cluster.
///
/// Per-key atomicity comes from the `DashMap` entry lock, mirroring the
/// atomic increment a real cluster provides.
#[derive(Clone, Default)]
pub struct InMemorySharedCache {
    entries: Arc<DashMap<String, CacheSlot>>,
}

impl InMemorySharedCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop expired keys, returning how many were removed
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, slot| slot.is_live(now));
        before.saturating_sub(self.entries.len())
    }
}

#[async_trait]
impl SharedCache for InMemorySharedCache {
    async fn incr_with_expiry(&self, key: &str, window: Duration) -> Result<(u64, Duration)> {
        let now = Instant::now();
        let mut slot = self
            .entries
            .entry(key.to_string())
            .or_insert_with(|| CacheSlot {
                value: "0".to_string(),
                expires_at: now + window,
            });

        if !slot.is_live(now) {
            slot.value = "0".to_string();
            slot.expires_at = now + window;
        }

        let count = slot
            .value
            .parse::<u64>()
            .map_err(|_| AuthError::Cache(format!("value at {} is not a counter", key)))?
            + 1;
        slot.value = count.to_string();
        Ok((count, slot.expires_at.saturating_duration_since(now)))
    }

    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<()> {
        self.entries.insert(
            key.to_string(),
            CacheSlot {
                value,
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }

    async fn set_if_absent(&self, key: &str, value: String, ttl: Duration) -> Result<bool> {
        let now = Instant::now();
        let slot = CacheSlot {
            value,
            expires_at: now + ttl,
        };
        match self.entries.entry(key.to_string()) {
            Entry::Occupied(mut existing) => {
                if existing.get().is_live(now) {
                    return Ok(false);
                }
                existing.insert(slot);
            }
            Entry::Vacant(vacant) => {
                vacant.insert(slot);
            }
        }
        Ok(true)
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let now = Instant::now();
        let value = self
            .entries
            .get(key)
            .filter(|slot| slot.is_live(now))
            .map(|slot| slot.value.clone());
        if value.is_none() {
            self.entries.remove_if(key, |_, slot| !slot.is_live(now));
        }
        Ok(value)
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.entries.remove(key);
        Ok(())
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}
