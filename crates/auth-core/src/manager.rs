//! Registry of authentication strategies, one per auth type
//!
//! Strategies are registered on a [`StrategyManagerBuilder`] at startup. The
//! built [`StrategyManager`] is immutable and shared without locking.

use std::collections::HashMap;

use tracing::{error, info};

use crate::error::{AuthError, Result};
use crate::strategy::{AuthenticationStrategy, Strategy};
use crate::types::AuthType;

/// Startup-time registration
pub struct StrategyManagerBuilder {
    active: AuthType,
    strategies: HashMap<AuthType, Strategy>,
}

impl StrategyManagerBuilder {
    pub fn new(active: AuthType) -> Self {
        Self {
            active,
            strategies: HashMap::new(),
        }
    }

    /// Validate `strategy` and register it under its auth type.
    ///
    /// An invalid strategy or a second strategy for a registered type is a
    /// configuration error; the registry is left unchanged.
    pub fn register(&mut self, strategy: impl Into<Strategy>) -> Result<()> {
        let strategy = strategy.into();
        let auth_type = strategy.auth_type();

        if let Err(e) = strategy.validate_config() {
            error!(auth_type = %auth_type, error = %e, "Strategy validation failed");
            return Err(AuthError::Configuration(format!(
                "strategy validation failed for type {}: {}",
                auth_type, e
            )));
        }
        if self.strategies.contains_key(&auth_type) {
            return Err(AuthError::Configuration(format!(
                "strategy already registered for type {}",
                auth_type
            )));
        }

        self.strategies.insert(auth_type, strategy);
        info!(auth_type = %auth_type, "Registered authentication strategy");
        Ok(())
    }

    pub fn is_registered(&self, auth_type: AuthType) -> bool {
        self.strategies.contains_key(&auth_type)
    }

    pub fn build(self) -> StrategyManager {
        StrategyManager {
            active: self.active,
            strategies: self.strategies,
        }
    }
}

/// Read-only strategy lookup
pub struct StrategyManager {
    active: AuthType,
    strategies: HashMap<AuthType, Strategy>,
}

impl StrategyManager {
    pub fn builder(active: AuthType) -> StrategyManagerBuilder {
        StrategyManagerBuilder::new(active)
    }

    pub fn get_strategy(&self, auth_type: AuthType) -> Result<&Strategy> {
        self.strategies
            .get(&auth_type)
            .ok_or(AuthError::NotRegistered(auth_type))
    }

    /// Auth type used when a request does not name one
    pub fn active_auth_type(&self) -> AuthType {
        self.active
    }

    pub fn registered_types(&self) -> Vec<AuthType> {
        AuthType::ALL
            .into_iter()
            .filter(|t| self.strategies.contains_key(t))
            .collect()
    }
}
