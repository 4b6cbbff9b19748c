//! Error types for the gateway.

use thiserror::Error;

use crate::generator::GeneratorError;
use crate::ratelimit::{BackendError, RateLimitError};

/// Main error type for gateway operations.
#[derive(Error, Debug)]
pub enum GatewayError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Rate limiting errors
    #[error("Rate limit error: {0}")]
    RateLimit(#[from] RateLimitError),

    /// Counter store setup errors
    #[error("Counter store error: {0}")]
    Store(#[from] BackendError),

    /// Response generator errors
    #[error("Generator error: {0}")]
    Generator(#[from] GeneratorError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for gateway operations.
pub type Result<T> = std::result::Result<T, GatewayError>;
