//! Durable records of federated logins
//!
//! OAuth grants and SAML sessions are written through the collaborator stores.
//! A failed write fails the login that produced it.

pub mod sweeper;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use identity_infra_common::{ErrorContext, ErrorExt};
use tracing::{debug, info, instrument};

use crate::error::{AuthError, Result};
use crate::store::{FederatedSessionStore, GrantStore};
use crate::types::{FederatedSession, ProviderGrant};

pub use sweeper::spawn_session_sweeper;

const COMPONENT: &str = "session_manager";

/// Persists OAuth grants and SAML sessions
#[derive(Clone)]
pub struct SessionManager {
    grants: Arc<dyn GrantStore>,
    sessions: Arc<dyn FederatedSessionStore>,
}

impl SessionManager {
    pub fn new(grants: Arc<dyn GrantStore>, sessions: Arc<dyn FederatedSessionStore>) -> Self {
        Self { grants, sessions }
    }

    /// Record `grant` for `user_id`, replacing any earlier grant from the
    /// same provider
    #[instrument(skip(self, grant), fields(provider = %grant.provider))]
    pub async fn store_oauth_tokens(&self, user_id: &str, mut grant: ProviderGrant) -> Result<ProviderGrant> {
        grant.user_id = user_id.to_string();
        grant.updated_at = Utc::now();

        let stored = self.grants.upsert_grant(grant).await.context_with(
            ErrorContext::new(COMPONENT, "store_oauth_tokens").with_details(format!("user_id={}", user_id)),
            AuthError::Persistence,
        )?;
        debug!(user_id = %user_id, grant_id = %stored.id, "Stored OAuth provider grant");
        Ok(stored)
    }

    #[instrument(skip(self, session), fields(saml_config_id = %session.saml_config_id))]
    pub async fn store_saml_session(&self, session: FederatedSession) -> Result<()> {
        let session_id = session.id.clone();
        let user_id = session.user_id.clone();
        self.sessions.insert_session(session).await.context_with(
            ErrorContext::new(COMPONENT, "store_saml_session").with_details(format!("user_id={}", user_id)),
            AuthError::Persistence,
        )?;
        info!(user_id = %user_id, session_id = %session_id, "Stored SAML session");
        Ok(())
    }

    pub async fn oauth_grant(&self, user_id: &str, provider: &str) -> Result<Option<ProviderGrant>> {
        self.grants
            .get_grant(user_id, provider)
            .await
            .context_with(ErrorContext::new(COMPONENT, "oauth_grant"), AuthError::Persistence)
    }

    pub async fn saml_sessions(&self, user_id: &str) -> Result<Vec<FederatedSession>> {
        self.sessions
            .sessions_for_user(user_id)
            .await
            .context_with(ErrorContext::new(COMPONENT, "saml_sessions"), AuthError::Persistence)
    }

    /// Delete SAML sessions that expired at or before `now`
    pub async fn delete_expired_sessions(&self, now: DateTime<Utc>) -> Result<u64> {
        self.sessions
            .delete_expired_sessions(now)
            .await
            .context_with(
                ErrorContext::new(COMPONENT, "delete_expired_sessions"),
                AuthError::Persistence,
            )
    }
}
