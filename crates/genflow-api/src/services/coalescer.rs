//! Submission coalescing and result caching.
//!
//! Identical requests (same owner, kind, and normalized parameters)
//! that arrive while a submission is in flight join the original
//! submission instead of reaching the provider again. Successful
//! submissions are remembered for a TTL so a repeat request is handed
//! the same job rather than a duplicate.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::future::{BoxFuture, FutureExt, Shared};
use genflow_models::{GenerationRequest, Job, JobId, JobKind, OwnerScope, RequestFingerprint};
use genflow_providers::{AdapterSet, ProviderError};
use genflow_registry::JobRegistry;
use thiserror::Error;
use tokio::sync::{watch, Mutex};
use tracing::{debug, error, info, warn};

use crate::metrics;

const DEFAULT_CACHE_TTL_SECS: u64 = 7200;
const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 300;
const DEFAULT_MAX_ATTEMPTS: u32 = 3;
const DEFAULT_RETRY_DELAY_MS: u64 = 500;

/// Linear backoff for provider submission attempts.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: Duration::from_millis(DEFAULT_RETRY_DELAY_MS),
        }
    }
}

impl RetryPolicy {
    /// Delay before the next attempt, after `attempt` failures.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay * attempt
    }
}

/// Coalescer configuration.
#[derive(Debug, Clone)]
pub struct CoalescerConfig {
    /// How long a successful submission stays reusable
    pub cache_ttl: Duration,
    /// Interval between cache sweeps
    pub sweep_interval: Duration,
    pub retry: RetryPolicy,
}

impl Default for CoalescerConfig {
    fn default() -> Self {
        Self {
            cache_ttl: Duration::from_secs(DEFAULT_CACHE_TTL_SECS),
            sweep_interval: Duration::from_secs(DEFAULT_SWEEP_INTERVAL_SECS),
            retry: RetryPolicy::default(),
        }
    }
}

impl CoalescerConfig {
    pub fn from_env() -> Self {
        Self {
            cache_ttl: Duration::from_secs(env_u64("CACHE_TTL_SECS", DEFAULT_CACHE_TTL_SECS)),
            sweep_interval: Duration::from_secs(env_u64(
                "CACHE_SWEEP_INTERVAL_SECS",
                DEFAULT_SWEEP_INTERVAL_SECS,
            )),
            retry: RetryPolicy {
                max_attempts: env_u64("SUBMIT_MAX_ATTEMPTS", DEFAULT_MAX_ATTEMPTS as u64) as u32,
                base_delay: Duration::from_millis(env_u64(
                    "SUBMIT_RETRY_DELAY_MS",
                    DEFAULT_RETRY_DELAY_MS,
                )),
            },
        }
    }
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

/// Error surfaced to submitters.
///
/// `Clone` so every caller joined onto one shared submission receives
/// the same failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SubmitError {
    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("Provider not configured: {0}")]
    Configuration(String),

    #[error("Provider rejected the request ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("Provider unavailable: {0}")]
    Unavailable(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<&ProviderError> for SubmitError {
    fn from(err: &ProviderError) -> Self {
        match err {
            ProviderError::Validation(m) => Self::Validation(m.clone()),
            ProviderError::Configuration(m) => Self::Configuration(m.clone()),
            ProviderError::UnsupportedKind(kind) => {
                Self::Validation(format!("no provider registered for {kind}"))
            }
            ProviderError::Upstream { status, message } if *status < 500 && *status != 429 => {
                Self::Rejected {
                    status: *status,
                    message: message.clone(),
                }
            }
            ProviderError::Upstream { status, message } => {
                Self::Unavailable(format!("provider returned {status}: {message}"))
            }
            ProviderError::Network(e) => Self::Unavailable(e.to_string()),
            ProviderError::InvalidResponse(m) => {
                Self::Unavailable(format!("unexpected provider response: {m}"))
            }
            ProviderError::Registry(e) => Self::Internal(e.to_string()),
        }
    }
}

/// Outcome of a submit call.
#[derive(Debug, Clone)]
pub struct SubmitReceipt {
    /// The tracked job, freshly created or joined
    pub job: Job,
    /// Whether this call was satisfied by existing work instead of a
    /// new provider submission
    pub deduplicated: bool,
}

type SharedSubmit = Shared<BoxFuture<'static, Result<JobId, SubmitError>>>;

struct InFlight {
    future: SharedSubmit,
    /// Guards marker removal against a newer submission reusing the key.
    generation: u64,
}

struct CachedResult {
    job_id: JobId,
    cached_at: Instant,
}

#[derive(Default)]
struct CoalescerState {
    in_flight: HashMap<String, InFlight>,
    cache: HashMap<String, CachedResult>,
}

/// Deduplicates identical submissions and caches successful ones.
pub struct SubmitService {
    registry: Arc<JobRegistry>,
    adapters: Arc<AdapterSet>,
    config: CoalescerConfig,
    state: Arc<Mutex<CoalescerState>>,
    generation: AtomicU64,
}

impl SubmitService {
    pub fn new(
        registry: Arc<JobRegistry>,
        adapters: Arc<AdapterSet>,
        config: CoalescerConfig,
    ) -> Self {
        Self {
            registry,
            adapters,
            config,
            state: Arc::new(Mutex::new(CoalescerState::default())),
            generation: AtomicU64::new(0),
        }
    }

    /// Submit a generation request, deduplicating against in-flight
    /// and recently successful identical requests.
    pub async fn submit(
        &self,
        owner: &OwnerScope,
        kind: JobKind,
        params: &GenerationRequest,
    ) -> Result<SubmitReceipt, SubmitError> {
        let fingerprint = params.fingerprint(owner, kind);

        if fingerprint.cacheable {
            if let Some(job) = self.cached_job(&fingerprint.key).await {
                debug!(job_id = %job.id, kind = %kind, "serving cached submission");
                metrics::record_cache_hit(kind.as_str());
                return Ok(SubmitReceipt {
                    job,
                    deduplicated: true,
                });
            }
            metrics::record_cache_miss(kind.as_str());
        }

        let (future, joined) = self.join_or_begin(&fingerprint, owner, kind, params).await;
        if joined {
            debug!(key = %fingerprint.key, "joining in-flight submission");
            metrics::record_submission_coalesced(kind.as_str());
        }

        let job_id = future.await?;
        let job = self
            .registry
            .get(&job_id)
            .await
            .ok_or_else(|| SubmitError::Internal(format!("job {job_id} missing after submit")))?;

        Ok(SubmitReceipt {
            job,
            deduplicated: joined,
        })
    }

    /// Look up a still-fresh cached submission, dropping stale entries.
    async fn cached_job(&self, key: &str) -> Option<Job> {
        let job_id = {
            let state = self.state.lock().await;
            match state.cache.get(key) {
                Some(entry) if entry.cached_at.elapsed() < self.config.cache_ttl => {
                    entry.job_id.clone()
                }
                _ => return None,
            }
        };

        if let Some(job) = self.registry.get(&job_id).await {
            if job.is_reusable() {
                return Some(job);
            }
        }

        // Swept from the registry, failed, or cancelled since it was
        // cached; the entry must not satisfy another request.
        let mut state = self.state.lock().await;
        if state.cache.get(key).map_or(false, |e| e.job_id == job_id) {
            state.cache.remove(key);
        }
        None
    }

    /// Join an in-flight submission for this key, or start a new one.
    ///
    /// The lock is held from lookup through marker insertion, so the
    /// spawned submission task cannot settle and try to clear its
    /// marker before the marker exists.
    async fn join_or_begin(
        &self,
        fingerprint: &RequestFingerprint,
        owner: &OwnerScope,
        kind: JobKind,
        params: &GenerationRequest,
    ) -> (SharedSubmit, bool) {
        let mut state = self.state.lock().await;
        if let Some(entry) = state.in_flight.get(&fingerprint.key) {
            return (entry.future.clone(), true);
        }

        let generation = self.generation.fetch_add(1, Ordering::Relaxed);
        let future = self.begin_submit(fingerprint, owner, kind, params, generation);
        state.in_flight.insert(
            fingerprint.key.clone(),
            InFlight {
                future: future.clone(),
                generation,
            },
        );
        (future, false)
    }

    fn begin_submit(
        &self,
        fingerprint: &RequestFingerprint,
        owner: &OwnerScope,
        kind: JobKind,
        params: &GenerationRequest,
        generation: u64,
    ) -> SharedSubmit {
        let adapters = Arc::clone(&self.adapters);
        let state = Arc::clone(&self.state);
        let retry = self.config.retry.clone();
        let key = fingerprint.key.clone();
        let cacheable = fingerprint.cacheable;
        let owner = owner.clone();
        let params = params.clone();

        // The submission runs in its own task: a caller that drops
        // mid-await must not strand the in-flight marker.
        let handle = tokio::spawn(async move {
            let result = submit_with_retry(&adapters, &owner, kind, &params, &retry).await;

            // Marker removal and the cache write share one lock scope
            // so no concurrent submit can observe the gap between them.
            let mut guard = state.lock().await;
            if guard
                .in_flight
                .get(&key)
                .map_or(false, |entry| entry.generation == generation)
            {
                guard.in_flight.remove(&key);
            }
            if cacheable {
                if let Ok(job_id) = &result {
                    guard.cache.insert(
                        key,
                        CachedResult {
                            job_id: job_id.clone(),
                            cached_at: Instant::now(),
                        },
                    );
                }
            }
            result
        });

        async move {
            match handle.await {
                Ok(result) => result,
                Err(e) => Err(SubmitError::Internal(format!("submission task failed: {e}"))),
            }
        }
        .boxed()
        .shared()
    }

    /// Drop expired cache entries and settled in-flight markers.
    pub async fn sweep(&self) -> usize {
        let mut state = self.state.lock().await;
        let before = state.cache.len();
        let ttl = self.config.cache_ttl;
        state.cache.retain(|_, entry| entry.cached_at.elapsed() < ttl);

        // A submission task that died between settling and clearing
        // its marker would otherwise pin the key forever.
        state.in_flight.retain(|_, entry| entry.future.peek().is_none());

        before - state.cache.len()
    }

    /// Run the cache sweep until shutdown is signalled.
    pub async fn run_sweeper(&self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.config.sweep_interval);
        info!(
            interval_secs = self.config.sweep_interval.as_secs(),
            ttl_secs = self.config.cache_ttl.as_secs(),
            "submission cache sweeper started"
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let removed = self.sweep().await;
                    if removed > 0 {
                        debug!(removed, "swept expired cached submissions");
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("submission cache sweeper shutting down");
                        break;
                    }
                }
            }
        }
    }
}

async fn submit_with_retry(
    adapters: &AdapterSet,
    owner: &OwnerScope,
    kind: JobKind,
    params: &GenerationRequest,
    retry: &RetryPolicy,
) -> Result<JobId, SubmitError> {
    let adapter = match adapters.get(kind) {
        Ok(adapter) => adapter,
        Err(e) => return Err(SubmitError::from(&e)),
    };

    let mut attempt = 1u32;
    loop {
        match adapter.submit(owner, params).await {
            Ok(job) => {
                info!(job_id = %job.id, kind = %kind, attempt, "job submitted");
                return Ok(job.id);
            }
            Err(err) if err.is_retryable() && attempt < retry.max_attempts => {
                let delay = retry.delay_for(attempt);
                warn!(
                    kind = %kind,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "provider submit failed, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(err) => {
                error!(kind = %kind, attempt, error = %err, "provider submit failed");
                return Err(SubmitError::from(&err));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use genflow_models::{JobStatus, ProviderStatus, ProviderUpdate};
    use genflow_providers::{ProviderAdapter, ProviderResult};
    use genflow_registry::JobUpdate;
    use std::collections::VecDeque;
    use std::sync::atomic::AtomicU32;
    use std::sync::Mutex as StdMutex;

    struct CountingAdapter {
        kind: JobKind,
        registry: Arc<JobRegistry>,
        submits: AtomicU32,
        delay: Duration,
        failures: StdMutex<VecDeque<ProviderError>>,
    }

    impl CountingAdapter {
        fn new(kind: JobKind, registry: Arc<JobRegistry>) -> Self {
            Self {
                kind,
                registry,
                submits: AtomicU32::new(0),
                delay: Duration::ZERO,
                failures: StdMutex::new(VecDeque::new()),
            }
        }

        fn with_delay(mut self, delay: Duration) -> Self {
            self.delay = delay;
            self
        }

        fn queue_failure(&self, err: ProviderError) {
            self.failures.lock().unwrap().push_back(err);
        }

        fn submit_count(&self) -> u32 {
            self.submits.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ProviderAdapter for CountingAdapter {
        fn kind(&self) -> JobKind {
            self.kind
        }

        async fn submit(
            &self,
            owner: &OwnerScope,
            _params: &GenerationRequest,
        ) -> ProviderResult<Job> {
            let n = self.submits.fetch_add(1, Ordering::SeqCst) + 1;
            if let Some(err) = self.failures.lock().unwrap().pop_front() {
                return Err(err);
            }
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            let job = Job::new(owner.clone(), self.kind, format!("prov-{n}"));
            self.registry.insert(job.clone()).await?;
            Ok(job)
        }

        async fn poll(&self, _provider_job_id: &str) -> ProviderResult<ProviderStatus> {
            Ok(ProviderStatus::Processing { progress: None })
        }

        async fn cancel(&self, _provider_job_id: &str) -> ProviderResult<bool> {
            Ok(true)
        }

        fn parse_webhook(&self, _payload: &serde_json::Value) -> ProviderResult<ProviderUpdate> {
            Err(ProviderError::invalid_response("not exercised"))
        }

        async fn persist_result(
            &self,
            _owner: &OwnerScope,
            _urls: &[String],
        ) -> ProviderResult<Vec<String>> {
            Ok(Vec::new())
        }
    }

    fn harness(
        config: CoalescerConfig,
        delay: Duration,
    ) -> (Arc<JobRegistry>, Arc<CountingAdapter>, SubmitService) {
        let registry = Arc::new(JobRegistry::default());
        let adapter = Arc::new(CountingAdapter::new(JobKind::Image, Arc::clone(&registry)).with_delay(delay));
        let adapters = Arc::new(AdapterSet::new([
            Arc::clone(&adapter) as Arc<dyn ProviderAdapter>
        ]));
        let service = SubmitService::new(Arc::clone(&registry), adapters, config);
        (registry, adapter, service)
    }

    fn owner() -> OwnerScope {
        OwnerScope::new("acme", "user-1")
    }

    fn prompt(text: &str) -> GenerationRequest {
        GenerationRequest {
            prompt: Some(text.to_string()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn concurrent_identical_submits_share_one_submission() {
        let (_registry, adapter, service) =
            harness(CoalescerConfig::default(), Duration::from_millis(50));
        let params = prompt("a cat in space");
        let owner = owner();

        let (a, b) = tokio::join!(
            service.submit(&owner, JobKind::Image, &params),
            service.submit(&owner, JobKind::Image, &params),
        );
        let a = a.unwrap();
        let b = b.unwrap();

        assert_eq!(adapter.submit_count(), 1);
        assert_eq!(a.job.id, b.job.id);
        assert_ne!(a.deduplicated, b.deduplicated);
    }

    #[tokio::test]
    async fn repeat_submit_is_served_from_cache() {
        let (_registry, adapter, service) = harness(CoalescerConfig::default(), Duration::ZERO);
        let params = prompt("sunset over mountains");

        let first = service.submit(&owner(), JobKind::Image, &params).await.unwrap();
        let second = service.submit(&owner(), JobKind::Image, &params).await.unwrap();

        assert!(!first.deduplicated);
        assert!(second.deduplicated);
        assert_eq!(first.job.id, second.job.id);
        assert_eq!(adapter.submit_count(), 1);
    }

    #[tokio::test]
    async fn different_params_do_not_coalesce() {
        let (_registry, adapter, service) = harness(CoalescerConfig::default(), Duration::ZERO);

        let a = service
            .submit(&owner(), JobKind::Image, &prompt("a cat"))
            .await
            .unwrap();
        let b = service
            .submit(&owner(), JobKind::Image, &prompt("a dog"))
            .await
            .unwrap();

        assert_ne!(a.job.id, b.job.id);
        assert_eq!(adapter.submit_count(), 2);
    }

    #[tokio::test]
    async fn binary_reference_requests_are_never_cached() {
        let (_registry, adapter, service) = harness(CoalescerConfig::default(), Duration::ZERO);
        let params = GenerationRequest {
            prompt: Some("animate this".to_string()),
            reference_image_url: Some("https://cdn.example.com/ref.png".to_string()),
            ..Default::default()
        };

        let first = service.submit(&owner(), JobKind::Image, &params).await.unwrap();
        let second = service.submit(&owner(), JobKind::Image, &params).await.unwrap();

        // The bytes behind the URL can change between calls.
        assert!(!first.deduplicated);
        assert!(!second.deduplicated);
        assert_eq!(adapter.submit_count(), 2);
    }

    #[tokio::test]
    async fn transient_failures_are_retried() {
        let config = CoalescerConfig {
            retry: RetryPolicy {
                max_attempts: 3,
                base_delay: Duration::from_millis(1),
            },
            ..Default::default()
        };
        let (_registry, adapter, service) = harness(config, Duration::ZERO);
        adapter.queue_failure(ProviderError::Upstream {
            status: 503,
            message: "overloaded".into(),
        });
        adapter.queue_failure(ProviderError::Upstream {
            status: 429,
            message: "slow down".into(),
        });

        let receipt = service
            .submit(&owner(), JobKind::Image, &prompt("sunset"))
            .await
            .unwrap();

        assert_eq!(adapter.submit_count(), 3);
        assert!(!receipt.deduplicated);
        assert_eq!(receipt.job.status, JobStatus::Pending);
    }

    #[tokio::test]
    async fn non_retryable_failures_short_circuit() {
        let config = CoalescerConfig {
            retry: RetryPolicy {
                max_attempts: 3,
                base_delay: Duration::from_millis(1),
            },
            ..Default::default()
        };
        let (_registry, adapter, service) = harness(config, Duration::ZERO);
        adapter.queue_failure(ProviderError::validation("missing prompt"));

        let err = service
            .submit(&owner(), JobKind::Image, &prompt("sunset"))
            .await
            .unwrap_err();

        assert_eq!(err, SubmitError::Validation("missing prompt".into()));
        assert_eq!(adapter.submit_count(), 1);
    }

    #[tokio::test]
    async fn failed_submission_is_not_cached() {
        let config = CoalescerConfig {
            retry: RetryPolicy {
                max_attempts: 1,
                base_delay: Duration::from_millis(1),
            },
            ..Default::default()
        };
        let (_registry, adapter, service) = harness(config, Duration::ZERO);
        adapter.queue_failure(ProviderError::Upstream {
            status: 400,
            message: "bad prompt".into(),
        });

        let err = service
            .submit(&owner(), JobKind::Image, &prompt("sunset"))
            .await
            .unwrap_err();
        assert!(matches!(err, SubmitError::Rejected { status: 400, .. }));

        let receipt = service
            .submit(&owner(), JobKind::Image, &prompt("sunset"))
            .await
            .unwrap();
        assert!(!receipt.deduplicated);
        assert_eq!(adapter.submit_count(), 2);
    }

    #[tokio::test]
    async fn cache_entry_expires_after_ttl() {
        let config = CoalescerConfig {
            cache_ttl: Duration::from_millis(20),
            ..Default::default()
        };
        let (_registry, adapter, service) = harness(config, Duration::ZERO);
        let params = prompt("sunset");

        service.submit(&owner(), JobKind::Image, &params).await.unwrap();
        tokio::time::sleep(Duration::from_millis(40)).await;
        let second = service.submit(&owner(), JobKind::Image, &params).await.unwrap();

        assert!(!second.deduplicated);
        assert_eq!(adapter.submit_count(), 2);
    }

    #[tokio::test]
    async fn sweep_drops_expired_entries() {
        let config = CoalescerConfig {
            cache_ttl: Duration::from_millis(10),
            ..Default::default()
        };
        let (_registry, _adapter, service) = harness(config, Duration::ZERO);

        service
            .submit(&owner(), JobKind::Image, &prompt("sunset"))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;

        assert_eq!(service.sweep().await, 1);
        assert_eq!(service.sweep().await, 0);
    }

    #[tokio::test]
    async fn cached_entry_is_dropped_when_job_is_gone() {
        let (registry, adapter, service) = harness(CoalescerConfig::default(), Duration::ZERO);
        let params = prompt("sunset");

        let first = service.submit(&owner(), JobKind::Image, &params).await.unwrap();
        registry.remove(&first.job.id).await;

        let second = service.submit(&owner(), JobKind::Image, &params).await.unwrap();
        assert!(!second.deduplicated);
        assert_ne!(first.job.id, second.job.id);
        assert_eq!(adapter.submit_count(), 2);
    }

    #[tokio::test]
    async fn cached_entry_is_dropped_when_job_failed() {
        let (registry, adapter, service) = harness(CoalescerConfig::default(), Duration::ZERO);
        let params = prompt("sunset");

        let first = service.submit(&owner(), JobKind::Image, &params).await.unwrap();
        registry
            .update(&first.job.id, JobUpdate::failed("provider burned down"))
            .await;

        let second = service.submit(&owner(), JobKind::Image, &params).await.unwrap();
        assert!(!second.deduplicated);
        assert_ne!(first.job.id, second.job.id);
        assert_eq!(adapter.submit_count(), 2);
    }
}
