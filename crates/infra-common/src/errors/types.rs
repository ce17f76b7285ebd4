use thiserror::Error;

/// Errors raised by the shared infrastructure
#[derive(Debug, Error)]
pub enum Error {
    /// Invalid logging or runtime configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// The global subscriber could not be installed
    #[error("Logging setup failed: {0}")]
    Logging(String),

    /// An error that already carries its context
    #[error("{0}")]
    Custom(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, Error>;
