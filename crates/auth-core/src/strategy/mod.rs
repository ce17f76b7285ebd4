//! Authentication strategies
//!
//! One variant per protocol behind a single capability trait. Each variant
//! owns its protocol state and its provider clients.

pub mod normal;
pub mod oauth;
pub mod saml;

use async_trait::async_trait;

use crate::context::RequestContext;
use crate::error::{AuthError, Result};
use crate::types::{AuthOutcome, AuthPayload, AuthType};

pub use normal::NormalStrategy;
pub use oauth::OAuthStrategy;
pub use saml::SamlStrategy;

/// What every protocol must provide to the strategy manager
#[async_trait]
pub trait AuthenticationStrategy: Send + Sync {
    /// Protocol this strategy serves
    fn auth_type(&self) -> AuthType;

    /// Check the strategy's own configuration, once, before registration
    fn validate_config(&self) -> Result<()>;

    /// Run one authentication step for `payload`
    async fn authenticate(&self, ctx: &RequestContext, payload: &AuthPayload) -> Result<AuthOutcome>;
}

/// The closed set of supported protocols
pub enum Strategy {
    Normal(NormalStrategy),
    OAuth(OAuthStrategy),
    Saml(SamlStrategy),
}

impl Strategy {
    fn inner(&self) -> &dyn AuthenticationStrategy {
        match self {
            Strategy::Normal(s) => s,
            Strategy::OAuth(s) => s,
            Strategy::Saml(s) => s,
        }
    }
}

#[async_trait]
impl AuthenticationStrategy for Strategy {
    fn auth_type(&self) -> AuthType {
        self.inner().auth_type()
    }

    fn validate_config(&self) -> Result<()> {
        self.inner().validate_config()
    }

    async fn authenticate(&self, ctx: &RequestContext, payload: &AuthPayload) -> Result<AuthOutcome> {
        self.inner().authenticate(ctx, payload).await
    }
}

impl From<NormalStrategy> for Strategy {
    fn from(strategy: NormalStrategy) -> Self {
        Strategy::Normal(strategy)
    }
}

impl From<OAuthStrategy> for Strategy {
    fn from(strategy: OAuthStrategy) -> Self {
        Strategy::OAuth(strategy)
    }
}

impl From<SamlStrategy> for Strategy {
    fn from(strategy: SamlStrategy) -> Self {
        Strategy::Saml(strategy)
    }
}

pub(crate) fn payload_mismatch(expected: AuthType, payload: &AuthPayload) -> AuthError {
    AuthError::Validation(format!(
        "{} strategy cannot handle a {} payload",
        expected,
        payload.auth_type()
    ))
}
