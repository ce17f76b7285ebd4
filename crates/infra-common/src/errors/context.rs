use crate::errors::types::Error;
use std::fmt;

/// Context information for an error
#[derive(Debug, Clone)]
pub struct ErrorContext {
    /// Component where the error occurred
    pub component: String,
    /// Operation that was being performed
    pub operation: String,
    /// Additional context information
    pub details: Option<String>,
}

impl ErrorContext {
    /// Create a new error context
    pub fn new<S: Into<String>, T: Into<String>>(component: S, operation: T) -> Self {
        ErrorContext {
            component: component.into(),
            operation: operation.into(),
            details: None,
        }
    }

    /// Add details to the context
    pub fn with_details<S: Into<String>>(mut self, details: S) -> Self {
        self.details = Some(details.into());
        self
    }
}

impl fmt::Display for ErrorContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "in component '{}' during operation '{}'", self.component, self.operation)?;
        if let Some(details) = &self.details {
            write!(f, " ({})", details)?;
        }
        Ok(())
    }
}

/// Extension trait for decorating a failed result with its context.
///
/// The decorated message is handed to `wrap`, so each crate can fold it into
/// its own error enum without depending on [`Error`].
pub trait ErrorExt<T> {
    /// Map the error through `wrap` after appending the context
    fn context_with<E, F>(self, ctx: ErrorContext, wrap: F) -> std::result::Result<T, E>
    where
        F: FnOnce(String) -> E;

    /// Convert into an infra [`Error::Custom`] carrying the context
    fn with_context<S: Into<String>, U: Into<String>>(
        self,
        component: S,
        operation: U,
    ) -> std::result::Result<T, Error>;
}

impl<T, E: fmt::Display> ErrorExt<T> for std::result::Result<T, E> {
    fn context_with<E2, F>(self, ctx: ErrorContext, wrap: F) -> std::result::Result<T, E2>
    where
        F: FnOnce(String) -> E2,
    {
        self.map_err(|e| wrap(format!("{} [{}]", e, ctx)))
    }

    fn with_context<S: Into<String>, U: Into<String>>(
        self,
        component: S,
        operation: U,
    ) -> std::result::Result<T, Error> {
        self.context_with(ErrorContext::new(component, operation), Error::Custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_display_with_details() {
        let ctx = ErrorContext::new("session_manager", "store_saml_session")
            .with_details("user_id=42");
        assert_eq!(
            ctx.to_string(),
            "in component 'session_manager' during operation 'store_saml_session' (user_id=42)"
        );
    }

    #[test]
    fn test_context_with_wraps_message() {
        let failed: std::result::Result<(), &str> = Err("connection reset");
        let wrapped = failed
            .context_with(ErrorContext::new("grants", "upsert"), |msg| msg)
            .unwrap_err();
        assert_eq!(
            wrapped,
            "connection reset [in component 'grants' during operation 'upsert']"
        );

        let ok: std::result::Result<u8, &str> = Ok(7);
        assert_eq!(ok.with_context("grants", "upsert").unwrap(), 7);
    }
}
