//! Reconciler error types.

use genflow_providers::ProviderError;
use thiserror::Error;

/// Errors surfaced by reconciliation operations.
#[derive(Debug, Error)]
pub enum ReconcilerError {
    /// No tracked job matches the given id or provider reference
    #[error("Job not found: {0}")]
    JobNotFound(String),

    /// The provider layer failed underneath us
    #[error(transparent)]
    Provider(#[from] ProviderError),
}

pub type ReconcilerResult<T> = Result<T, ReconcilerError>;
