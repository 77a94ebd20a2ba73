//! The job registry proper.
//!
//! A `RwLock`-guarded map of job records plus a reverse index from
//! provider references back to job ids (webhooks only know the
//! provider's reference). Mutations are serialized by the write lock,
//! which is what makes the terminal-state lock race-free: whichever
//! source reaches a terminal state first wins, and every later update
//! is ignored.

use std::collections::HashMap;
use std::time::Duration;

use chrono::Utc;
use thiserror::Error;
use tokio::sync::{broadcast, watch, RwLock};
use tracing::{debug, info};

use genflow_models::{Job, JobId, JobKind, JobResult, JobStatus, OwnerScope};

use crate::event::JobEvent;

/// Default retention for terminal job records (24 hours).
const DEFAULT_RETENTION_SECS: u64 = 86_400;

/// Default interval between retention sweeps.
const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 3_600;

/// Default capacity of the job event broadcast channel.
const DEFAULT_EVENT_CAPACITY: usize = 1_024;

/// Registry tuning knobs.
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// How long terminal records stay before the sweep removes them
    pub retention: Duration,
    /// How often the retention sweep runs
    pub sweep_interval: Duration,
    /// Broadcast channel capacity for job events
    pub event_capacity: usize,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            retention: Duration::from_secs(DEFAULT_RETENTION_SECS),
            sweep_interval: Duration::from_secs(DEFAULT_SWEEP_INTERVAL_SECS),
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

impl RegistryConfig {
    /// Load configuration from environment variables, with defaults.
    pub fn from_env() -> Self {
        let retention_secs = std::env::var("JOB_RETENTION_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_RETENTION_SECS);
        let sweep_interval_secs = std::env::var("JOB_SWEEP_INTERVAL_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_SWEEP_INTERVAL_SECS);
        let event_capacity = std::env::var("JOB_EVENT_CAPACITY")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_EVENT_CAPACITY);

        Self {
            retention: Duration::from_secs(retention_secs),
            sweep_interval: Duration::from_secs(sweep_interval_secs),
            event_capacity,
        }
    }
}

/// Registry operation errors.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("duplicate job id: {0}")]
    DuplicateJob(JobId),
}

/// Outcome of an attempted job mutation.
#[derive(Debug, Clone)]
pub enum UpdateOutcome {
    /// Accepted; carries the record after the mutation
    Applied(Job),
    /// The job already reached a terminal state; nothing changed
    IgnoredTerminal,
    /// No record with that id
    NotFound,
}

impl UpdateOutcome {
    pub fn applied(&self) -> bool {
        matches!(self, UpdateOutcome::Applied(_))
    }
}

/// A partial mutation of a job record.
///
/// Unset fields are left untouched. Status changes on terminal records
/// are rejected wholesale by [`JobRegistry::update`].
#[derive(Debug, Clone, Default)]
pub struct JobUpdate {
    pub status: Option<JobStatus>,
    pub progress: Option<u8>,
    pub result: Option<JobResult>,
    pub error: Option<String>,
}

impl JobUpdate {
    /// Mark the job as actively processing, optionally with progress.
    pub fn processing(progress: Option<u8>) -> Self {
        Self {
            status: Some(JobStatus::Processing),
            progress,
            ..Default::default()
        }
    }

    /// Mark the job as succeeded with its outputs. Progress is forced
    /// to 100 by the registry.
    pub fn succeeded(result: JobResult) -> Self {
        Self {
            status: Some(JobStatus::Succeeded),
            result: Some(result),
            ..Default::default()
        }
    }

    /// Mark the job as failed with a reason. Progress stays where it was.
    pub fn failed(reason: impl Into<String>) -> Self {
        Self {
            status: Some(JobStatus::Failed),
            error: Some(reason.into()),
            ..Default::default()
        }
    }

    /// Mark the job as cancelled by its owner.
    pub fn cancelled() -> Self {
        Self {
            status: Some(JobStatus::Cancelled),
            ..Default::default()
        }
    }
}

#[derive(Default)]
struct RegistryState {
    jobs: HashMap<JobId, Job>,
    /// (kind, provider_job_id) -> job id, for webhook resolution
    provider_refs: HashMap<(JobKind, String), JobId>,
}

/// Shared in-memory store of all tracked jobs.
pub struct JobRegistry {
    state: RwLock<RegistryState>,
    events: broadcast::Sender<JobEvent>,
    config: RegistryConfig,
}

impl JobRegistry {
    pub fn new(config: RegistryConfig) -> Self {
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        Self {
            state: RwLock::new(RegistryState::default()),
            events,
            config,
        }
    }

    /// Subscribe to the job event stream.
    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.events.subscribe()
    }

    /// Insert a freshly created job and publish its initial event.
    pub async fn insert(&self, job: Job) -> Result<(), RegistryError> {
        {
            let mut state = self.state.write().await;
            if state.jobs.contains_key(&job.id) {
                return Err(RegistryError::DuplicateJob(job.id.clone()));
            }
            state
                .provider_refs
                .insert((job.kind, job.provider_job_id.clone()), job.id.clone());
            state.jobs.insert(job.id.clone(), job.clone());
        }
        debug!(job_id = %job.id, kind = %job.kind, "job registered");
        self.publish(JobEvent::from_job(&job));
        Ok(())
    }

    /// Fetch a job by id.
    pub async fn get(&self, id: &JobId) -> Option<Job> {
        self.state.read().await.jobs.get(id).cloned()
    }

    /// Resolve a provider's own job reference to our job id.
    pub async fn get_by_provider_ref(&self, kind: JobKind, provider_job_id: &str) -> Option<JobId> {
        self.state
            .read()
            .await
            .provider_refs
            .get(&(kind, provider_job_id.to_string()))
            .cloned()
    }

    /// Apply a partial mutation behind the terminal-state lock.
    ///
    /// Progress never decreases and is capped at 100; a transition to
    /// succeeded forces it to 100. An accepted mutation bumps
    /// `updated_at` and publishes an event.
    pub async fn update(&self, id: &JobId, update: JobUpdate) -> UpdateOutcome {
        let snapshot = {
            let mut state = self.state.write().await;
            let Some(job) = state.jobs.get_mut(id) else {
                return UpdateOutcome::NotFound;
            };
            if job.status.is_terminal() {
                debug!(job_id = %id, status = %job.status, "ignoring update for terminal job");
                return UpdateOutcome::IgnoredTerminal;
            }

            if let Some(status) = update.status {
                job.status = status;
            }
            if let Some(progress) = update.progress {
                job.progress = job.progress.max(progress.min(100));
            }
            if let Some(result) = update.result {
                job.result = Some(result);
            }
            if let Some(error) = update.error {
                job.error = Some(error);
            }
            if job.status == JobStatus::Succeeded {
                job.progress = 100;
            }
            job.updated_at = Utc::now();
            job.clone()
        };

        self.publish(JobEvent::from_job(&snapshot));
        UpdateOutcome::Applied(snapshot)
    }

    /// Count one poll attempt against a live job.
    ///
    /// Returns the new attempt count, or `None` when the job is gone
    /// or already terminal (no more polling needed either way).
    pub async fn record_attempt(&self, id: &JobId) -> Option<u32> {
        let mut state = self.state.write().await;
        let job = state.jobs.get_mut(id)?;
        if job.status.is_terminal() {
            return None;
        }
        job.attempts += 1;
        Some(job.attempts)
    }

    /// All jobs belonging to one owner, newest first.
    pub async fn list_by_owner(&self, owner: &OwnerScope) -> Vec<Job> {
        let state = self.state.read().await;
        let mut jobs: Vec<Job> = state
            .jobs
            .values()
            .filter(|j| j.owner == *owner)
            .cloned()
            .collect();
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        jobs
    }

    /// Snapshot of every non-terminal job, for the polling scheduler.
    pub async fn list_active(&self) -> Vec<Job> {
        self.state
            .read()
            .await
            .jobs
            .values()
            .filter(|j| !j.is_terminal())
            .cloned()
            .collect()
    }

    /// Remove a record outright (cancellation acknowledged upstream).
    pub async fn remove(&self, id: &JobId) -> Option<Job> {
        let mut state = self.state.write().await;
        let job = state.jobs.remove(id)?;
        state
            .provider_refs
            .remove(&(job.kind, job.provider_job_id.clone()));
        Some(job)
    }

    /// Number of tracked jobs.
    pub async fn len(&self) -> usize {
        self.state.read().await.jobs.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Drop terminal records older than the retention window.
    pub async fn sweep(&self) -> usize {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(self.config.retention)
                .unwrap_or_else(|_| chrono::Duration::seconds(DEFAULT_RETENTION_SECS as i64));

        let mut state = self.state.write().await;
        let expired: Vec<JobId> = state
            .jobs
            .values()
            .filter(|j| j.is_terminal() && j.updated_at < cutoff)
            .map(|j| j.id.clone())
            .collect();

        for id in &expired {
            if let Some(job) = state.jobs.remove(id) {
                state
                    .provider_refs
                    .remove(&(job.kind, job.provider_job_id.clone()));
            }
        }
        expired.len()
    }

    /// Run the retention sweep until shutdown is signalled.
    pub async fn run_sweeper(&self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.config.sweep_interval);
        info!(
            interval_secs = self.config.sweep_interval.as_secs(),
            retention_secs = self.config.retention.as_secs(),
            "job registry sweeper started"
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let removed = self.sweep().await;
                    if removed > 0 {
                        info!(removed, "swept expired job records");
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("job registry sweeper shutting down");
                        break;
                    }
                }
            }
        }
    }

    fn publish(&self, event: JobEvent) {
        // No receivers is fine; delivery is best-effort by design of
        // the broadcast channel.
        let _ = self.events.send(event);
    }
}

impl Default for JobRegistry {
    fn default() -> Self {
        Self::new(RegistryConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::broadcast::error::TryRecvError;

    fn test_job(kind: JobKind, provider_ref: &str) -> Job {
        Job::new(OwnerScope::new("acme", "user-1"), kind, provider_ref)
    }

    #[tokio::test]
    async fn insert_and_get() {
        let registry = JobRegistry::default();
        let job = test_job(JobKind::Image, "prov-1");
        let id = job.id.clone();

        registry.insert(job).await.unwrap();
        let fetched = registry.get(&id).await.unwrap();
        assert_eq!(fetched.status, JobStatus::Pending);
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn duplicate_insert_rejected() {
        let registry = JobRegistry::default();
        let job = test_job(JobKind::Image, "prov-1");

        registry.insert(job.clone()).await.unwrap();
        assert!(matches!(
            registry.insert(job).await,
            Err(RegistryError::DuplicateJob(_))
        ));
    }

    #[tokio::test]
    async fn provider_ref_resolution() {
        let registry = JobRegistry::default();
        let job = test_job(JobKind::Video, "fal-123");
        let id = job.id.clone();
        registry.insert(job).await.unwrap();

        assert_eq!(
            registry.get_by_provider_ref(JobKind::Video, "fal-123").await,
            Some(id.clone())
        );
        // same reference under another kind does not resolve
        assert_eq!(
            registry.get_by_provider_ref(JobKind::Image, "fal-123").await,
            None
        );

        registry.remove(&id).await;
        assert_eq!(
            registry.get_by_provider_ref(JobKind::Video, "fal-123").await,
            None
        );
    }

    #[tokio::test]
    async fn terminal_state_locks_out_later_updates() {
        let registry = JobRegistry::default();
        let job = test_job(JobKind::Image, "prov-1");
        let id = job.id.clone();
        registry.insert(job).await.unwrap();

        let mut events = registry.subscribe();

        let outcome = registry
            .update(
                &id,
                JobUpdate::succeeded(JobResult::new(vec!["https://cdn/a.png".into()], vec![])),
            )
            .await;
        assert!(outcome.applied());

        // late poll result must be swallowed
        let late = registry
            .update(&id, JobUpdate::processing(Some(50)))
            .await;
        assert!(matches!(late, UpdateOutcome::IgnoredTerminal));

        // and a conflicting failure report as well
        let conflicting = registry.update(&id, JobUpdate::failed("too late")).await;
        assert!(matches!(conflicting, UpdateOutcome::IgnoredTerminal));

        let job = registry.get(&id).await.unwrap();
        assert_eq!(job.status, JobStatus::Succeeded);
        assert_eq!(job.progress, 100);
        assert!(job.error.is_none());

        // exactly one event came out of all that
        assert!(events.try_recv().is_ok());
        assert!(matches!(events.try_recv(), Err(TryRecvError::Empty)));
    }

    #[tokio::test]
    async fn progress_never_decreases() {
        let registry = JobRegistry::default();
        let job = test_job(JobKind::Video, "prov-1");
        let id = job.id.clone();
        registry.insert(job).await.unwrap();

        registry.update(&id, JobUpdate::processing(Some(60))).await;
        registry.update(&id, JobUpdate::processing(Some(30))).await;

        assert_eq!(registry.get(&id).await.unwrap().progress, 60);

        registry.update(&id, JobUpdate::processing(Some(250))).await;
        assert_eq!(registry.get(&id).await.unwrap().progress, 100);
    }

    #[tokio::test]
    async fn success_forces_full_progress() {
        let registry = JobRegistry::default();
        let job = test_job(JobKind::Image, "prov-1");
        let id = job.id.clone();
        registry.insert(job).await.unwrap();

        registry.update(&id, JobUpdate::processing(Some(40))).await;
        registry
            .update(
                &id,
                JobUpdate::succeeded(JobResult::new(vec!["https://cdn/a.png".into()], vec![])),
            )
            .await;

        assert_eq!(registry.get(&id).await.unwrap().progress, 100);
    }

    #[tokio::test]
    async fn failure_keeps_progress_in_place() {
        let registry = JobRegistry::default();
        let job = test_job(JobKind::Music, "prov-1");
        let id = job.id.clone();
        registry.insert(job).await.unwrap();

        registry.update(&id, JobUpdate::processing(Some(70))).await;
        registry.update(&id, JobUpdate::failed("render crashed")).await;

        let job = registry.get(&id).await.unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.progress, 70);
        assert_eq!(job.error.as_deref(), Some("render crashed"));
    }

    #[tokio::test]
    async fn attempts_only_count_against_live_jobs() {
        let registry = JobRegistry::default();
        let job = test_job(JobKind::Image, "prov-1");
        let id = job.id.clone();
        registry.insert(job).await.unwrap();

        assert_eq!(registry.record_attempt(&id).await, Some(1));
        assert_eq!(registry.record_attempt(&id).await, Some(2));

        registry.update(&id, JobUpdate::failed("gone")).await;
        assert_eq!(registry.record_attempt(&id).await, None);
        assert_eq!(
            registry.record_attempt(&JobId::from_string("missing")).await,
            None
        );
    }

    #[tokio::test]
    async fn list_is_scoped_to_owner() {
        let registry = JobRegistry::default();
        let mine = test_job(JobKind::Image, "prov-1");
        let theirs = Job::new(OwnerScope::new("acme", "user-2"), JobKind::Image, "prov-2");
        registry.insert(mine.clone()).await.unwrap();
        registry.insert(theirs).await.unwrap();

        let listed = registry.list_by_owner(&mine.owner).await;
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, mine.id);
    }

    #[tokio::test]
    async fn active_snapshot_excludes_terminal_jobs() {
        let registry = JobRegistry::default();
        let live = test_job(JobKind::Image, "prov-1");
        let done = test_job(JobKind::Video, "prov-2");
        let done_id = done.id.clone();
        registry.insert(live.clone()).await.unwrap();
        registry.insert(done).await.unwrap();
        registry.update(&done_id, JobUpdate::cancelled()).await;

        let active = registry.list_active().await;
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, live.id);
    }

    #[tokio::test]
    async fn sweep_drops_only_expired_terminal_records() {
        let registry = JobRegistry::new(RegistryConfig {
            retention: Duration::from_secs(3600),
            ..Default::default()
        });

        let mut old_terminal = test_job(JobKind::Image, "prov-1");
        old_terminal.status = JobStatus::Failed;
        old_terminal.updated_at = Utc::now() - chrono::Duration::hours(2);

        let mut fresh_terminal = test_job(JobKind::Image, "prov-2");
        fresh_terminal.status = JobStatus::Succeeded;

        let mut old_live = test_job(JobKind::Image, "prov-3");
        old_live.updated_at = Utc::now() - chrono::Duration::hours(2);

        registry.insert(old_terminal).await.unwrap();
        registry.insert(fresh_terminal).await.unwrap();
        registry.insert(old_live.clone()).await.unwrap();

        assert_eq!(registry.sweep().await, 1);
        assert_eq!(registry.len().await, 2);
        assert!(registry.get(&old_live.id).await.is_some());
    }

    #[tokio::test]
    async fn events_flow_for_insert_and_update() {
        let registry = JobRegistry::default();
        let mut events = registry.subscribe();

        let job = test_job(JobKind::Voiceover, "prov-1");
        let id = job.id.clone();
        registry.insert(job).await.unwrap();
        registry.update(&id, JobUpdate::processing(Some(10))).await;

        let first = events.try_recv().unwrap();
        assert_eq!(first.status, JobStatus::Pending);
        let second = events.try_recv().unwrap();
        assert_eq!(second.status, JobStatus::Processing);
        assert_eq!(second.progress, 10);
    }
}
