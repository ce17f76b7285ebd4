//! Email and password login

use std::sync::Arc;

use async_trait::async_trait;
use identity_infra_common::logging::redact_email;
use tracing::{debug, warn};

use super::{payload_mismatch, AuthenticationStrategy};
use crate::context::RequestContext;
use crate::error::{AuthError, Result};
use crate::jwt::TokenService;
use crate::store::UserStore;
use crate::types::{AuthOutcome, AuthPayload, AuthType, Identity};

pub struct NormalStrategy {
    users: Arc<dyn UserStore>,
    tokens: Arc<TokenService>,
}

impl NormalStrategy {
    pub fn new(users: Arc<dyn UserStore>, tokens: Arc<TokenService>) -> Self {
        Self { users, tokens }
    }
}

#[async_trait]
impl AuthenticationStrategy for NormalStrategy {
    fn auth_type(&self) -> AuthType {
        AuthType::Normal
    }

    fn validate_config(&self) -> Result<()> {
        Ok(())
    }

    async fn authenticate(&self, _ctx: &RequestContext, payload: &AuthPayload) -> Result<AuthOutcome> {
        let AuthPayload::Credentials(credentials) = payload else {
            return Err(payload_mismatch(AuthType::Normal, payload));
        };

        // Unknown email and wrong password look the same from here on
        let Some(user) = self
            .users
            .verify_password(&credentials.email, &credentials.password)
            .await?
        else {
            warn!(email = %redact_email(&credentials.email), "Password login rejected");
            return Err(AuthError::AuthenticationFailed);
        };

        if !user.active {
            warn!(user_id = %user.id, "Password login for inactive account");
            return Err(AuthError::AuthenticationFailed);
        }

        let identity = Identity::from_user(&user, None, Vec::new());
        let tokens = self.tokens.issue_pair(&identity)?;
        debug!(user_id = %user.id, "Password login succeeded");
        Ok(AuthOutcome::Authenticated { tokens, identity })
    }
}
