//! Job records for generative media requests.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::wire;

/// Unique identifier for a generation job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct JobId(pub String);

impl JobId {
    /// Generate a new random job ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Create from an existing string.
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Get the inner string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The kind of media a job produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    /// Still image generation
    #[serde(rename = "image_generation")]
    Image,
    /// Short-form video generation
    #[serde(rename = "video_generation")]
    Video,
    /// Text-to-speech voiceover
    Voiceover,
    /// Background music composition
    Music,
    /// Subtitle extraction for existing media
    Subtitles,
}

impl JobKind {
    /// All kinds, in adapter registration order.
    pub const ALL: [JobKind; 5] = [
        JobKind::Image,
        JobKind::Video,
        JobKind::Voiceover,
        JobKind::Music,
        JobKind::Subtitles,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::Image => "image_generation",
            JobKind::Video => "video_generation",
            JobKind::Voiceover => "voiceover",
            JobKind::Music => "music",
            JobKind::Subtitles => "subtitles",
        }
    }

    /// Parse a kind from its wire name.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "image_generation" => Some(JobKind::Image),
            "video_generation" => Some(JobKind::Video),
            "voiceover" => Some(JobKind::Voiceover),
            "music" => Some(JobKind::Music),
            "subtitles" => Some(JobKind::Subtitles),
            _ => None,
        }
    }
}

impl FromStr for JobKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s).ok_or_else(|| format!("unknown job kind: {s}"))
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Lifecycle state of a generation job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Accepted by a provider, not yet started
    #[default]
    Pending,
    /// Provider reported work in progress
    Processing,
    /// Finished with at least one output asset
    Succeeded,
    /// Finished without usable output
    Failed,
    /// Explicitly cancelled by the owner
    Cancelled,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Succeeded => "succeeded",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }

    /// Terminal states never transition again.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Succeeded | JobStatus::Failed | JobStatus::Cancelled
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The tenant and user a job belongs to.
///
/// Every job is scoped to exactly one owner; reads and realtime
/// notifications never cross this boundary.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct OwnerScope {
    /// Tenant (client application) identifier
    pub client_id: String,
    /// End-user identifier within the tenant
    pub user_id: String,
}

impl OwnerScope {
    pub fn new(client_id: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            user_id: user_id.into(),
        }
    }

    /// Notification room that receives updates for this owner's jobs.
    pub fn room(&self) -> String {
        wire::client_room(&self.client_id)
    }
}

/// Output assets of a successfully finished job.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct JobResult {
    /// Provider-hosted URLs for the generated media
    pub urls: Vec<String>,
    /// Identifiers assigned by the asset store, when one is configured
    #[serde(default)]
    pub asset_ids: Vec<String>,
}

impl JobResult {
    pub fn new(urls: Vec<String>, asset_ids: Vec<String>) -> Self {
        Self { urls, asset_ids }
    }

    /// Whether the result carries at least one usable output URL.
    pub fn has_output(&self) -> bool {
        !self.urls.is_empty()
    }
}

/// A tracked generation job.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    /// Unique job ID
    pub id: JobId,

    /// Owning tenant and user
    pub owner: OwnerScope,

    /// Kind of media being generated
    pub kind: JobKind,

    /// Opaque reference assigned by the upstream provider
    pub provider_job_id: String,

    /// Current lifecycle state
    pub status: JobStatus,

    /// Estimated completion percentage (0-100, non-decreasing)
    pub progress: u8,

    /// Output assets, present only once the job succeeded
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<JobResult>,

    /// Failure description, present only once the job failed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Number of status poll attempts made so far
    #[serde(default)]
    pub attempts: u32,

    /// When the job was accepted
    pub created_at: DateTime<Utc>,

    /// When the job last changed
    pub updated_at: DateTime<Utc>,
}

impl Job {
    /// Create a fresh pending job for an accepted provider submission.
    pub fn new(owner: OwnerScope, kind: JobKind, provider_job_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: JobId::new(),
            owner,
            kind,
            provider_job_id: provider_job_id.into(),
            status: JobStatus::Pending,
            progress: 0,
            result: None,
            error: None,
            attempts: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Whether a cached reference to this job may still be served.
    ///
    /// Jobs that failed or were cancelled must never satisfy a
    /// deduplicated submission.
    pub fn is_reusable(&self) -> bool {
        match self.status {
            JobStatus::Pending | JobStatus::Processing => true,
            JobStatus::Succeeded => self.result.as_ref().is_some_and(JobResult::has_output),
            JobStatus::Failed | JobStatus::Cancelled => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_job_starts_pending() {
        let job = Job::new(OwnerScope::new("acme", "user-1"), JobKind::Image, "prov-1");
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.progress, 0);
        assert_eq!(job.attempts, 0);
        assert!(job.result.is_none());
        assert!(job.error.is_none());
        assert!(!job.is_terminal());
    }

    #[test]
    fn job_ids_are_unique() {
        assert_ne!(JobId::new(), JobId::new());
    }

    #[test]
    fn terminal_states() {
        assert!(!JobStatus::Pending.is_terminal());
        assert!(!JobStatus::Processing.is_terminal());
        assert!(JobStatus::Succeeded.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
        assert!(JobStatus::Cancelled.is_terminal());
    }

    #[test]
    fn kind_round_trips_through_wire_name() {
        for kind in JobKind::ALL {
            assert_eq!(JobKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(JobKind::parse("hologram"), None);
        // short aliases never existed on the wire
        assert_eq!(JobKind::parse("image"), None);
    }

    #[test]
    fn kind_serde_names_match_as_str() {
        for kind in JobKind::ALL {
            assert_eq!(serde_json::to_value(kind).unwrap(), kind.as_str());
        }
        assert_eq!(
            serde_json::to_value(JobKind::Image).unwrap(),
            "image_generation"
        );
    }

    #[test]
    fn job_serializes_camel_case() {
        let job = Job::new(OwnerScope::new("acme", "user-1"), JobKind::Video, "prov-9");
        let value = serde_json::to_value(&job).unwrap();
        assert!(value.get("providerJobId").is_some());
        assert!(value.get("createdAt").is_some());
        assert_eq!(value["owner"]["clientId"], "acme");
        assert_eq!(value["status"], "pending");
        // absent optionals are omitted entirely
        assert!(value.get("result").is_none());
        assert!(value.get("error").is_none());
    }

    #[test]
    fn owner_room_uses_client_prefix() {
        let owner = OwnerScope::new("acme", "user-1");
        assert_eq!(owner.room(), "client_acme");
    }

    #[test]
    fn reusable_covers_live_and_successful_jobs() {
        let mut job = Job::new(OwnerScope::new("acme", "u"), JobKind::Image, "p");
        assert!(job.is_reusable());

        job.status = JobStatus::Succeeded;
        job.result = Some(JobResult::new(vec!["https://cdn/img.png".into()], vec![]));
        assert!(job.is_reusable());

        job.result = Some(JobResult::default());
        assert!(!job.is_reusable());

        job.status = JobStatus::Failed;
        assert!(!job.is_reusable());
    }
}
