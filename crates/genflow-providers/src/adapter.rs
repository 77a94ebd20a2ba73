//! The provider adapter trait and the adapter set.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;

use genflow_models::{
    GenerationRequest, Job, JobKind, OwnerScope, ProviderStatus, ProviderUpdate,
};
use genflow_registry::JobRegistry;

use crate::asset_store::AssetStore;
use crate::client::ProviderSettings;
use crate::error::{ProviderError, ProviderResult};
use crate::image::ImageAdapter;
use crate::music::MusicAdapter;
use crate::subtitles::SubtitlesAdapter;
use crate::video::VideoAdapter;
use crate::voiceover::VoiceoverAdapter;

/// One provider integration, normalized.
///
/// Implementations own their provider's wire shapes end to end;
/// nothing provider-specific leaks past this trait.
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    /// The job kind this adapter produces.
    fn kind(&self) -> JobKind;

    /// Validate parameters, submit the work upstream, and register the
    /// resulting pending job in the registry.
    async fn submit(&self, owner: &OwnerScope, params: &GenerationRequest) -> ProviderResult<Job>;

    /// Ask the provider for the current status of a submitted job.
    async fn poll(&self, provider_job_id: &str) -> ProviderResult<ProviderStatus>;

    /// Best-effort cancellation upstream; `true` when acknowledged.
    async fn cancel(&self, provider_job_id: &str) -> ProviderResult<bool>;

    /// Translate a webhook payload into a normalized update.
    fn parse_webhook(&self, payload: &serde_json::Value) -> ProviderResult<ProviderUpdate>;

    /// Hand finished outputs to the asset store, returning assigned ids.
    ///
    /// With no asset store configured this returns an empty list.
    async fn persist_result(&self, owner: &OwnerScope, urls: &[String])
        -> ProviderResult<Vec<String>>;
}

/// The full set of configured adapters, keyed by job kind.
pub struct AdapterSet {
    adapters: HashMap<JobKind, Arc<dyn ProviderAdapter>>,
}

impl AdapterSet {
    pub fn new(adapters: impl IntoIterator<Item = Arc<dyn ProviderAdapter>>) -> Self {
        Self {
            adapters: adapters.into_iter().map(|a| (a.kind(), a)).collect(),
        }
    }

    /// Build all five adapters from environment configuration.
    ///
    /// Missing credentials are not fatal: the adapter is still
    /// registered and every call against it fails with a
    /// configuration error until the credential appears.
    pub fn from_env(
        registry: Arc<JobRegistry>,
        assets: Option<Arc<dyn AssetStore>>,
    ) -> ProviderResult<Self> {
        let mut adapters: Vec<Arc<dyn ProviderAdapter>> = Vec::with_capacity(JobKind::ALL.len());

        for kind in JobKind::ALL {
            let settings = ProviderSettings::for_kind(kind);
            if settings.api_key.is_none() {
                warn!(
                    kind = %kind,
                    base_url = %settings.base_url,
                    "provider has no API key configured; submissions will fail until one is set"
                );
            }

            let adapter: Arc<dyn ProviderAdapter> = match kind {
                JobKind::Image => {
                    Arc::new(ImageAdapter::new(settings, registry.clone(), assets.clone())?)
                }
                JobKind::Video => {
                    Arc::new(VideoAdapter::new(settings, registry.clone(), assets.clone())?)
                }
                JobKind::Voiceover => {
                    Arc::new(VoiceoverAdapter::new(settings, registry.clone(), assets.clone())?)
                }
                JobKind::Music => {
                    Arc::new(MusicAdapter::new(settings, registry.clone(), assets.clone())?)
                }
                JobKind::Subtitles => {
                    Arc::new(SubtitlesAdapter::new(settings, registry.clone(), assets.clone())?)
                }
            };
            adapters.push(adapter);
        }

        Ok(Self::new(adapters))
    }

    /// Look up the adapter for a kind.
    pub fn get(&self, kind: JobKind) -> ProviderResult<Arc<dyn ProviderAdapter>> {
        self.adapters
            .get(&kind)
            .cloned()
            .ok_or(ProviderError::UnsupportedKind(kind))
    }

    /// Kinds with a registered adapter.
    pub fn kinds(&self) -> Vec<JobKind> {
        self.adapters.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.adapters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.adapters.is_empty()
    }
}
