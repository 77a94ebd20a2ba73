//! Job lifecycle events published by the registry.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use genflow_models::{Job, JobId, JobKind, JobStatus, OwnerScope};

/// Snapshot of a job emitted after every accepted registry mutation.
///
/// Carries everything a notification needs so subscribers never have
/// to read the registry back.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobEvent {
    /// The job that changed
    pub job_id: JobId,

    /// Owning tenant and user
    pub owner: OwnerScope,

    /// Kind of media being generated
    pub kind: JobKind,

    /// Lifecycle state after the mutation
    pub status: JobStatus,

    /// Progress after the mutation
    pub progress: u8,

    /// Output URLs, present once the job succeeded
    pub result_urls: Option<Vec<String>>,

    /// Failure description, present once the job failed
    pub error: Option<String>,

    /// When the mutation was applied (UTC)
    pub updated_at: DateTime<Utc>,
}

impl JobEvent {
    /// Build an event from the job's post-mutation state.
    pub fn from_job(job: &Job) -> Self {
        Self {
            job_id: job.id.clone(),
            owner: job.owner.clone(),
            kind: job.kind,
            status: job.status,
            progress: job.progress,
            result_urls: job.result.as_ref().map(|r| r.urls.clone()),
            error: job.error.clone(),
            updated_at: job.updated_at,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}
