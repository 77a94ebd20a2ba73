//! Voiceover (text-to-speech) provider adapter.
//!
//! The TTS provider exposes conversion jobs that move through
//! `created -> converting -> done` and produce exactly one audio URL.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use genflow_models::request::DEFAULT_VOICE;
use genflow_models::{
    GenerationRequest, Job, JobKind, OwnerScope, ProviderStatus, ProviderUpdate,
};
use genflow_registry::JobRegistry;

use crate::adapter::ProviderAdapter;
use crate::asset_store::{persist_urls, AssetStore};
use crate::client::{ProviderClient, ProviderSettings};
use crate::error::{ProviderError, ProviderResult};

#[derive(Debug, Serialize)]
struct SubmitSpeechRequest<'a> {
    text: &'a str,
    voice: &'a str,
}

#[derive(Debug, Deserialize)]
struct SubmitSpeechResponse {
    job_id: String,
}

#[derive(Debug, Deserialize)]
struct SpeechJobState {
    status: String,
    #[serde(default)]
    audio_url: Option<String>,
    #[serde(default)]
    detail: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SpeechWebhook {
    job_id: String,
    #[serde(flatten)]
    state: SpeechJobState,
}

/// Adapter for the text-to-speech provider.
pub struct VoiceoverAdapter {
    client: ProviderClient,
    registry: Arc<JobRegistry>,
    assets: Option<Arc<dyn AssetStore>>,
}

impl VoiceoverAdapter {
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

    fn normalize(&self, state: SpeechJobState) -> ProviderResult<ProviderStatus> {
        match state.status.as_str() {
            "created" | "queued" => Ok(ProviderStatus::Queued),
            "converting" => Ok(ProviderStatus::Processing { progress: None }),
            "done" => Ok(ProviderStatus::Completed {
                urls: state.audio_url.into_iter().collect(),
            }),
            "failed" => Ok(ProviderStatus::Failed {
                reason: state
                    .detail
                    .unwrap_or_else(|| "speech synthesis failed".to_string()),
            }),
            other => Err(ProviderError::invalid_response(format!(
                "unknown speech job status: {other}"
            ))),
        }
    }
}

#[async_trait]
impl ProviderAdapter for VoiceoverAdapter {
    fn kind(&self) -> JobKind {
        JobKind::Voiceover
    }

    async fn submit(&self, owner: &OwnerScope, params: &GenerationRequest) -> ProviderResult<Job> {
        let text = params
            .text
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| ProviderError::validation("voiceover requires source text"))?;

        let body = SubmitSpeechRequest {
            text,
            voice: params.voice.as_deref().unwrap_or(DEFAULT_VOICE),
        };
        let accepted: SubmitSpeechResponse = self.client.post_json("/v1/tts/jobs", &body).await?;

        let job = Job::new(owner.clone(), JobKind::Voiceover, accepted.job_id);
        self.registry.insert(job.clone()).await?;
        debug!(job_id = %job.id, provider_job_id = %job.provider_job_id, "voiceover job submitted");
        Ok(job)
    }

    async fn poll(&self, provider_job_id: &str) -> ProviderResult<ProviderStatus> {
        let state: SpeechJobState = self
            .client
            .get_json(&format!("/v1/tts/jobs/{provider_job_id}"))
            .await?;
        self.normalize(state)
    }

    async fn cancel(&self, provider_job_id: &str) -> ProviderResult<bool> {
        let status = self
            .client
            .post_ack(&format!("/v1/tts/jobs/{provider_job_id}/cancel"))
            .await?;
        Ok((200..300).contains(&status))
    }

    fn parse_webhook(&self, payload: &serde_json::Value) -> ProviderResult<ProviderUpdate> {
        let hook: SpeechWebhook = serde_json::from_value(payload.clone())
            .map_err(|e| ProviderError::invalid_response(format!("bad speech webhook: {e}")))?;
        let status = self.normalize(hook.state)?;
        Ok(ProviderUpdate::new(hook.job_id, status))
    }

    async fn persist_result(
        &self,
        owner: &OwnerScope,
        urls: &[String],
    ) -> ProviderResult<Vec<String>> {
        Ok(persist_urls(self.assets.as_ref(), owner, JobKind::Voiceover, urls).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn adapter(server: &MockServer) -> VoiceoverAdapter {
        let registry = Arc::new(JobRegistry::default());
        let settings = ProviderSettings::new(server.uri(), Some("key".into()));
        VoiceoverAdapter::new(settings, registry, None).unwrap()
    }

    fn owner() -> OwnerScope {
        OwnerScope::new("acme", "user-1")
    }

    #[tokio::test]
    async fn submit_falls_back_to_default_voice() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/tts/jobs"))
            .and(body_partial_json(serde_json::json!({
                "text": "hello world",
                "voice": DEFAULT_VOICE,
            })))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"job_id": "tts-3"})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let adapter = adapter(&server).await;
        let req = GenerationRequest {
            text: Some("hello world".into()),
            ..Default::default()
        };
        let job = adapter.submit(&owner(), &req).await.unwrap();
        assert_eq!(job.provider_job_id, "tts-3");
    }

    #[tokio::test]
    async fn missing_text_is_a_validation_error() {
        let server = MockServer::start().await;
        let adapter = adapter(&server).await;
        let err = adapter
            .submit(&owner(), &GenerationRequest::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::Validation(_)));
    }

    #[tokio::test]
    async fn done_maps_to_single_audio_url() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/tts/jobs/tts-3"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "status": "done",
                "audio_url": "https://cdn.provider.com/speech.mp3",
            })))
            .mount(&server)
            .await;

        let adapter = adapter(&server).await;
        assert_eq!(
            adapter.poll("tts-3").await.unwrap(),
            ProviderStatus::Completed {
                urls: vec!["https://cdn.provider.com/speech.mp3".into()],
            }
        );
    }

    #[tokio::test]
    async fn done_without_audio_is_an_empty_completion() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"status": "done"})),
            )
            .mount(&server)
            .await;

        let adapter = adapter(&server).await;
        assert_eq!(
            adapter.poll("tts-3").await.unwrap(),
            ProviderStatus::Completed { urls: vec![] }
        );
    }
}
