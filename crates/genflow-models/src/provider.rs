//! Normalized provider status reports.
//!
//! Every adapter translates its provider's wire shape into
//! [`ProviderStatus`] so the reconciler only ever sees one vocabulary.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Status of a provider-side job, normalized across providers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ProviderStatus {
    /// Accepted but not started
    Queued,
    /// Work in progress, optionally with a completion percentage
    Processing {
        #[serde(skip_serializing_if = "Option::is_none")]
        progress: Option<u8>,
    },
    /// Finished; `urls` may legitimately be empty for broken providers
    Completed { urls: Vec<String> },
    /// Finished unsuccessfully
    Failed { reason: String },
}

impl ProviderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderStatus::Queued => "queued",
            ProviderStatus::Processing { .. } => "processing",
            ProviderStatus::Completed { .. } => "completed",
            ProviderStatus::Failed { .. } => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ProviderStatus::Completed { .. } | ProviderStatus::Failed { .. }
        )
    }
}

/// A status report tied to a provider-side job reference.
///
/// Produced by webhook parsing, where the payload itself names the job.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderUpdate {
    /// The provider's own reference for the job
    pub provider_job_id: String,
    /// Normalized status carried by the payload
    pub status: ProviderStatus,
}

impl ProviderUpdate {
    pub fn new(provider_job_id: impl Into<String>, status: ProviderStatus) -> Self {
        Self {
            provider_job_id: provider_job_id.into(),
            status,
        }
    }
}
