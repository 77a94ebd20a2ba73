//! The reconciler proper.

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use genflow_models::{Job, JobId, JobKind, JobResult, ProviderStatus};
use genflow_providers::AdapterSet;
use genflow_registry::{JobRegistry, JobUpdate, UpdateOutcome};

use crate::error::{ReconcilerError, ReconcilerResult};

/// Default seconds between polling passes.
const DEFAULT_POLL_INTERVAL_SECS: u64 = 5;

/// Default poll attempts before a job is timed out (5s x 60 = 5 min).
const DEFAULT_MAX_POLL_ATTEMPTS: u32 = 60;

/// Synthetic progress bump per poll when the provider reports none.
const PROGRESS_ESTIMATE_STEP: u8 = 3;

/// Estimated progress never claims completion.
const PROGRESS_ESTIMATE_CEILING: u8 = 95;

/// Reconciler tuning knobs.
#[derive(Debug, Clone)]
pub struct ReconcilerConfig {
    /// Interval between polling passes over live jobs
    pub poll_interval: Duration,
    /// Attempts before a still-unfinished job is failed as timed out
    pub max_poll_attempts: u32,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(DEFAULT_POLL_INTERVAL_SECS),
            max_poll_attempts: DEFAULT_MAX_POLL_ATTEMPTS,
        }
    }
}

impl ReconcilerConfig {
    /// Load configuration from environment variables, with defaults.
    pub fn from_env() -> Self {
        let poll_interval_secs = std::env::var("POLL_INTERVAL_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_POLL_INTERVAL_SECS);
        let max_poll_attempts = std::env::var("POLL_MAX_ATTEMPTS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_MAX_POLL_ATTEMPTS);

        Self {
            poll_interval: Duration::from_secs(poll_interval_secs),
            max_poll_attempts,
        }
    }
}

/// Where a status report came from, for logging and diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusSource {
    Poll,
    Webhook,
}

impl StatusSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            StatusSource::Poll => "poll",
            StatusSource::Webhook => "webhook",
        }
    }
}

/// Merges provider status reports into the registry.
pub struct Reconciler {
    registry: Arc<JobRegistry>,
    adapters: Arc<AdapterSet>,
    config: ReconcilerConfig,
}

impl Reconciler {
    pub fn new(
        registry: Arc<JobRegistry>,
        adapters: Arc<AdapterSet>,
        config: ReconcilerConfig,
    ) -> Self {
        Self {
            registry,
            adapters,
            config,
        }
    }

    /// Run the polling scheduler until shutdown is signalled.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.config.poll_interval);
        info!(
            interval_secs = self.config.poll_interval.as_secs(),
            max_attempts = self.config.max_poll_attempts,
            "status reconciler started"
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.tick().await;
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("status reconciler shutting down");
                        break;
                    }
                }
            }
        }
    }

    /// One scheduler pass: poll every live job concurrently.
    pub async fn tick(&self) {
        let active = self.registry.list_active().await;
        if active.is_empty() {
            return;
        }
        debug!(jobs = active.len(), "polling live jobs");
        join_all(active.iter().map(|job| self.poll_job(job))).await;
    }

    async fn poll_job(&self, job: &Job) {
        // A job that went terminal since the snapshot no longer counts
        // attempts and is skipped outright.
        let Some(attempts) = self.registry.record_attempt(&job.id).await else {
            return;
        };

        let adapter = match self.adapters.get(job.kind) {
            Ok(adapter) => adapter,
            Err(e) => {
                warn!(job_id = %job.id, "cannot poll job: {e}");
                self.registry
                    .update(&job.id, JobUpdate::failed(e.to_string()))
                    .await;
                return;
            }
        };

        match adapter.poll(&job.provider_job_id).await {
            Ok(status) => {
                if let Err(e) = self
                    .apply_status(&job.id, status, StatusSource::Poll)
                    .await
                {
                    warn!(job_id = %job.id, "failed to apply poll result: {e}");
                }
                self.enforce_attempt_ceiling(&job.id, attempts).await;
            }
            Err(e) if e.is_retryable() => {
                debug!(job_id = %job.id, attempts, "transient poll failure: {e}");
                self.enforce_attempt_ceiling(&job.id, attempts).await;
            }
            Err(e) => {
                warn!(job_id = %job.id, "poll failed permanently: {e}");
                self.registry
                    .update(&job.id, JobUpdate::failed(e.to_string()))
                    .await;
            }
        }
    }

    /// Fail a job that has exhausted its polling budget. The terminal
    /// lock makes this a no-op when the final poll already settled it.
    async fn enforce_attempt_ceiling(&self, job_id: &JobId, attempts: u32) {
        if attempts < self.config.max_poll_attempts {
            return;
        }
        let outcome = self
            .registry
            .update(
                job_id,
                JobUpdate::failed(format!(
                    "timed out waiting for provider after {attempts} poll attempts"
                )),
            )
            .await;
        if outcome.applied() {
            warn!(job_id = %job_id, attempts, "job timed out");
        }
    }

    /// The single funnel every status report goes through.
    ///
    /// Translates a normalized provider status into a registry update:
    /// - queued: nothing new to record
    /// - processing: progress from the provider, or a bounded estimate
    /// - completed with outputs: persist, then succeed
    /// - completed without outputs: fail (success requires output)
    /// - failed: fail with the provider's reason
    pub async fn apply_status(
        &self,
        job_id: &JobId,
        status: ProviderStatus,
        source: StatusSource,
    ) -> ReconcilerResult<UpdateOutcome> {
        let Some(job) = self.registry.get(job_id).await else {
            return Err(ReconcilerError::JobNotFound(job_id.to_string()));
        };
        if job.is_terminal() {
            debug!(
                job_id = %job_id,
                source = source.as_str(),
                "status report for terminal job ignored"
            );
            return Ok(UpdateOutcome::IgnoredTerminal);
        }

        let update = match status {
            ProviderStatus::Queued => return Ok(UpdateOutcome::Applied(job)),
            ProviderStatus::Processing { progress } => {
                let progress = progress.unwrap_or_else(|| estimate_progress(job.progress));
                JobUpdate::processing(Some(progress))
            }
            ProviderStatus::Completed { urls } => {
                if urls.is_empty() {
                    warn!(job_id = %job_id, source = source.as_str(), "provider completed without output");
                    JobUpdate::failed("provider reported completion without any output")
                } else {
                    let asset_ids = self.persist_outputs(&job, &urls).await;
                    JobUpdate::succeeded(JobResult::new(urls, asset_ids))
                }
            }
            ProviderStatus::Failed { reason } => JobUpdate::failed(reason),
        };

        let outcome = self.registry.update(job_id, update).await;
        if matches!(outcome, UpdateOutcome::IgnoredTerminal) {
            debug!(
                job_id = %job_id,
                source = source.as_str(),
                "late status report lost the race"
            );
        }
        Ok(outcome)
    }

    /// Resolve and apply a webhook payload for one provider kind.
    pub async fn apply_webhook(
        &self,
        kind: JobKind,
        payload: &serde_json::Value,
    ) -> ReconcilerResult<UpdateOutcome> {
        let adapter = self.adapters.get(kind)?;
        let update = adapter.parse_webhook(payload)?;

        let Some(job_id) = self
            .registry
            .get_by_provider_ref(kind, &update.provider_job_id)
            .await
        else {
            debug!(
                kind = %kind,
                provider_job_id = %update.provider_job_id,
                "webhook for unknown provider reference"
            );
            return Err(ReconcilerError::JobNotFound(update.provider_job_id));
        };

        self.apply_status(&job_id, update.status, StatusSource::Webhook)
            .await
    }

    /// Cancel a job: flip the local record first, then tell the provider.
    ///
    /// Returns `Ok(true)` when this call performed the cancellation,
    /// `Ok(false)` when the job was already terminal. An acknowledged
    /// cancel also removes the record; an unacknowledged one leaves the
    /// cancelled record for the retention sweep.
    pub async fn cancel(&self, job_id: &JobId) -> ReconcilerResult<bool> {
        let Some(job) = self.registry.get(job_id).await else {
            return Err(ReconcilerError::JobNotFound(job_id.to_string()));
        };
        if job.is_terminal() {
            return Ok(false);
        }

        let outcome = self.registry.update(job_id, JobUpdate::cancelled()).await;
        if !outcome.applied() {
            // someone else settled the job between the read and the write
            return Ok(false);
        }

        let acked = match self.adapters.get(job.kind) {
            Ok(adapter) => adapter
                .cancel(&job.provider_job_id)
                .await
                .unwrap_or_else(|e| {
                    warn!(job_id = %job_id, "provider cancel failed: {e}");
                    false
                }),
            Err(_) => false,
        };

        if acked {
            self.registry.remove(job_id).await;
            info!(job_id = %job_id, "job cancelled and acknowledged upstream");
        } else {
            info!(job_id = %job_id, "job cancelled locally; provider did not acknowledge");
        }
        Ok(true)
    }

    /// Hand finished outputs to the adapter for durable persistence.
    ///
    /// Persistence is best effort: a job with unsaved assets still
    /// succeeds with its provider URLs, so failures are logged and the
    /// record carries no asset ids.
    async fn persist_outputs(&self, job: &Job, urls: &[String]) -> Vec<String> {
        let adapter = match self.adapters.get(job.kind) {
            Ok(adapter) => adapter,
            Err(e) => {
                warn!(job_id = %job.id, "no adapter to persist outputs: {e}");
                return Vec::new();
            }
        };
        match adapter.persist_result(&job.owner, urls).await {
            Ok(asset_ids) => asset_ids,
            Err(e) => {
                warn!(job_id = %job.id, "output persistence failed: {e}");
                Vec::new()
            }
        }
    }
}

fn estimate_progress(current: u8) -> u8 {
    current
        .saturating_add(PROGRESS_ESTIMATE_STEP)
        .min(PROGRESS_ESTIMATE_CEILING)
}
