//! Periodic removal of expired SAML sessions

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::SessionManager;

/// Spawn the sweep loop. Abort the returned handle to stop it.
pub fn spawn_session_sweeper(manager: Arc<SessionManager>, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        // first tick fires immediately
        ticker.tick().await;

        loop {
            ticker.tick().await;

            match manager.delete_expired_sessions(Utc::now()).await {
                Ok(0) => debug!("Session sweep: no expired sessions"),
                Ok(deleted) => info!(deleted, "Expired SAML sessions deleted"),
                Err(e) => warn!(error = %e, "Session sweep failed"),
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{InMemoryGrantStore, InMemorySessionStore};
    use crate::types::{FederatedSession, RawAttributes};

    #[tokio::test]
    async fn test_sweeper_deletes_expired_sessions() {
        let sessions = Arc::new(InMemorySessionStore::new());
        let manager = Arc::new(SessionManager::new(
            Arc::new(InMemoryGrantStore::new()),
            sessions.clone(),
        ));

        let mut session = FederatedSession::new(
            "u1",
            "okta",
            None,
            "bob@example.com",
            RawAttributes::new(),
            chrono::Duration::hours(8),
        )
        .unwrap();
        session.expires_at = Utc::now() - chrono::Duration::seconds(1);
        manager.store_saml_session(session).await.unwrap();
        assert_eq!(sessions.len(), 1);

        let handle = spawn_session_sweeper(manager, Duration::from_millis(20));
        tokio::time::sleep(Duration::from_millis(100)).await;
        handle.abort();

        assert!(sessions.is_empty());
    }
}
