//! Crate-wide error taxonomy.
//!
//! Mirrors the propagation policy in the design doc: `Network`, `RateLimited`,
//! `Validation`, `NotFound` and `Cancelled` are recovered from locally by the
//! component that raised them. `Configuration`, `Authentication` and
//! `StoreIntegrity` bubble up to the runtime.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("authentication failed: {0}")]
    Authentication(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("store integrity error: {0}")]
    StoreIntegrity(String),

    #[error("cancelled")]
    Cancelled,

    #[error("unexpected error: {0}")]
    Unknown(String),
}

impl From<sqlx::Error> for CoreError {
    fn from(e: sqlx::Error) -> Self {
        CoreError::Unknown(e.to_string())
    }
}

impl From<std::io::Error> for CoreError {
    fn from(e: std::io::Error) -> Self {
        CoreError::Unknown(e.to_string())
    }
}

impl From<crate::provider::ProviderError> for CoreError {
    fn from(e: crate::provider::ProviderError) -> Self {
        use crate::provider::ProviderError as P;
        match e {
            P::Authentication(m) => CoreError::Authentication(m),
            P::Network(m) => CoreError::Network(m),
            P::RateLimited(m) => CoreError::RateLimited(m),
            P::NotFound(m) => CoreError::NotFound(m),
            P::Timeout(m) => CoreError::Network(m),
            P::Provider(m) => CoreError::Unknown(m),
        }
    }
}

pub type CoreResult<T> = Result<T, CoreError>;
