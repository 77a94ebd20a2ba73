//! Music composition provider adapter.
//!
//! The composition provider tracks "tasks" that report a
//! `percent_complete` while generating and can return several track
//! variations for one prompt.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use genflow_models::request::DEFAULT_MUSIC_DURATION_SECS;
use genflow_models::{
    GenerationRequest, Job, JobKind, OwnerScope, ProviderStatus, ProviderUpdate,
};
use genflow_registry::JobRegistry;

use crate::adapter::ProviderAdapter;
use crate::asset_store::{persist_urls, AssetStore};
use crate::client::{ProviderClient, ProviderSettings};
use crate::error::{ProviderError, ProviderResult};

#[derive(Debug, Serialize)]
struct SubmitCompositionRequest<'a> {
    prompt: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    genre: Option<&'a str>,
    duration_secs: u32,
}

#[derive(Debug, Deserialize)]
struct SubmitCompositionResponse {
    task_id: String,
}

#[derive(Debug, Deserialize)]
struct CompositionTaskState {
    task_status: String,
    #[serde(default)]
    percent_complete: Option<u8>,
    #[serde(default)]
    tracks: Vec<ComposedTrack>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ComposedTrack {
    audio_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CompositionWebhook {
    task_id: String,
    #[serde(flatten)]
    state: CompositionTaskState,
}

/// Adapter for the music composition provider.
pub struct MusicAdapter {
    client: ProviderClient,
    registry: Arc<JobRegistry>,
    assets: Option<Arc<dyn AssetStore>>,
}

impl MusicAdapter {
    pub fn new(
        settings: ProviderSettings,
        registry: Arc<JobRegistry>,
        assets: Option<Arc<dyn AssetStore>>,
    ) -> ProviderResult<Self> {
        Ok(Self {
            client: ProviderClient::new(settings)?,
            registry,
            assets,
        })
    }

    fn normalize(&self, state: CompositionTaskState) -> ProviderResult<ProviderStatus> {
        match state.task_status.as_str() {
            "submitted" | "waiting" => Ok(ProviderStatus::Queued),
            "generating" => Ok(ProviderStatus::Processing {
                progress: state.percent_complete.map(|p| p.min(100)),
            }),
            "complete" => Ok(ProviderStatus::Completed {
                urls: state
                    .tracks
                    .into_iter()
                    .filter_map(|t| t.audio_url)
                    .collect(),
            }),
            "error" => Ok(ProviderStatus::Failed {
                reason: state
                    .message
                    .unwrap_or_else(|| "music composition failed".to_string()),
            }),
            other => Err(ProviderError::invalid_response(format!(
                "unknown composition task status: {other}"
            ))),
        }
    }
}

#[async_trait]
impl ProviderAdapter for MusicAdapter {
    fn kind(&self) -> JobKind {
        JobKind::Music
    }

    async fn submit(&self, owner: &OwnerScope, params: &GenerationRequest) -> ProviderResult<Job> {
        let prompt = params
            .prompt
            .as_deref()
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .ok_or_else(|| ProviderError::validation("music composition requires a prompt"))?;

        let body = SubmitCompositionRequest {
            prompt,
            genre: params.genre.as_deref(),
            duration_secs: params.duration_secs.unwrap_or(DEFAULT_MUSIC_DURATION_SECS),
        };
        let accepted: SubmitCompositionResponse =
            self.client.post_json("/v1/compositions", &body).await?;

        let job = Job::new(owner.clone(), JobKind::Music, accepted.task_id);
        self.registry.insert(job.clone()).await?;
        debug!(job_id = %job.id, provider_job_id = %job.provider_job_id, "music job submitted");
        Ok(job)
    }

    async fn poll(&self, provider_job_id: &str) -> ProviderResult<ProviderStatus> {
        let state: CompositionTaskState = self
            .client
            .get_json(&format!("/v1/compositions/{provider_job_id}"))
            .await?;
        self.normalize(state)
    }

    async fn cancel(&self, provider_job_id: &str) -> ProviderResult<bool> {
        let status = self
            .client
            .post_ack(&format!("/v1/compositions/{provider_job_id}/cancel"))
            .await?;
        Ok((200..300).contains(&status))
    }

    fn parse_webhook(&self, payload: &serde_json::Value) -> ProviderResult<ProviderUpdate> {
        let hook: CompositionWebhook = serde_json::from_value(payload.clone())
            .map_err(|e| ProviderError::invalid_response(format!("bad composition webhook: {e}")))?;
        let status = self.normalize(hook.state)?;
        Ok(ProviderUpdate::new(hook.task_id, status))
    }

    async fn persist_result(
        &self,
        owner: &OwnerScope,
        urls: &[String],
    ) -> ProviderResult<Vec<String>> {
        Ok(persist_urls(self.assets.as_ref(), owner, JobKind::Music, urls).await)
    }
}
