//! Provider error types.

use genflow_models::JobKind;
use genflow_registry::RegistryError;
use thiserror::Error;

/// Errors surfaced by provider adapters.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// Caller-supplied parameters are unusable for this kind
    #[error("Invalid request: {0}")]
    Validation(String),

    /// The adapter is missing credentials or endpoint configuration
    #[error("Provider not configured: {0}")]
    Configuration(String),

    /// The provider answered with a non-success status
    #[error("Provider returned {status}: {message}")]
    Upstream { status: u16, message: String },

    /// The provider could not be reached
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    /// The provider answered with a shape we cannot interpret
    #[error("Unexpected provider response: {0}")]
    InvalidResponse(String),

    /// No adapter is registered for the requested kind
    #[error("No provider registered for kind: {0}")]
    UnsupportedKind(JobKind),

    /// The registry refused the freshly submitted job
    #[error(transparent)]
    Registry(#[from] RegistryError),
}

pub type ProviderResult<T> = Result<T, ProviderError>;

impl ProviderError {
    /// Create a validation error.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Create a configuration error.
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// Create an invalid-response error.
    pub fn invalid_response(msg: impl Into<String>) -> Self {
        Self::InvalidResponse(msg.into())
    }

    /// Whether retrying the same call later could succeed.
    ///
    /// Transient transport failures and provider-side overload are
    /// retryable; everything else (bad input, bad configuration,
    /// definitive provider rejection) is not.
    pub fn is_retryable(&self) -> bool {
        match self {
            ProviderError::Network(_) => true,
            ProviderError::Upstream { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }
}
