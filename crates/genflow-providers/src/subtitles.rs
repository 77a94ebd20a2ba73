//! Subtitle extraction provider adapter.
//!
//! The transcription provider takes a media URL and produces one or
//! more subtitle files (per requested format) once transcription
//! finishes. This is the one kind whose input is caller-hosted media
//! rather than a prompt.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use genflow_models::request::DEFAULT_LANGUAGE;
use genflow_models::{
    GenerationRequest, Job, JobKind, OwnerScope, ProviderStatus, ProviderUpdate,
};
use genflow_registry::JobRegistry;

use crate::adapter::ProviderAdapter;
use crate::asset_store::{persist_urls, AssetStore};
use crate::client::{ProviderClient, ProviderSettings};
use crate::error::{ProviderError, ProviderResult};

#[derive(Debug, Serialize)]
struct SubmitTranscriptionRequest<'a> {
    media_url: &'a str,
    language: &'a str,
}

#[derive(Debug, Deserialize)]
struct SubmitTranscriptionResponse {
    id: String,
}

#[derive(Debug, Deserialize)]
struct TranscriptionState {
    status: String,
    #[serde(default)]
    files: Vec<SubtitleFile>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SubtitleFile {
    url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TranscriptionWebhook {
    id: String,
    #[serde(flatten)]
    state: TranscriptionState,
}

/// Adapter for the subtitle extraction provider.
pub struct SubtitlesAdapter {
    client: ProviderClient,
    registry: Arc<JobRegistry>,
    assets: Option<Arc<dyn AssetStore>>,
}

impl SubtitlesAdapter {
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

    fn normalize(&self, state: TranscriptionState) -> ProviderResult<ProviderStatus> {
        match state.status.as_str() {
            "queued" => Ok(ProviderStatus::Queued),
            "transcribing" => Ok(ProviderStatus::Processing { progress: None }),
            "completed" => Ok(ProviderStatus::Completed {
                urls: state.files.into_iter().filter_map(|f| f.url).collect(),
            }),
            "failed" => Ok(ProviderStatus::Failed {
                reason: state
                    .error
                    .unwrap_or_else(|| "transcription failed".to_string()),
            }),
            other => Err(ProviderError::invalid_response(format!(
                "unknown transcription status: {other}"
            ))),
        }
    }
}

#[async_trait]
impl ProviderAdapter for SubtitlesAdapter {
    fn kind(&self) -> JobKind {
        JobKind::Subtitles
    }

    async fn submit(&self, owner: &OwnerScope, params: &GenerationRequest) -> ProviderResult<Job> {
        let media_url = params
            .media_url
            .as_deref()
            .map(str::trim)
            .filter(|u| !u.is_empty())
            .ok_or_else(|| {
                ProviderError::validation("subtitle extraction requires a media URL")
            })?;

        let body = SubmitTranscriptionRequest {
            media_url,
            language: params.language.as_deref().unwrap_or(DEFAULT_LANGUAGE),
        };
        let accepted: SubmitTranscriptionResponse =
            self.client.post_json("/v1/transcriptions", &body).await?;

        let job = Job::new(owner.clone(), JobKind::Subtitles, accepted.id);
        self.registry.insert(job.clone()).await?;
        debug!(job_id = %job.id, provider_job_id = %job.provider_job_id, "subtitles job submitted");
        Ok(job)
    }

    async fn poll(&self, provider_job_id: &str) -> ProviderResult<ProviderStatus> {
        let state: TranscriptionState = self
            .client
            .get_json(&format!("/v1/transcriptions/{provider_job_id}"))
            .await?;
        self.normalize(state)
    }

    async fn cancel(&self, provider_job_id: &str) -> ProviderResult<bool> {
        let status = self
            .client
            .post_ack(&format!("/v1/transcriptions/{provider_job_id}/cancel"))
            .await?;
        Ok((200..300).contains(&status))
    }

    fn parse_webhook(&self, payload: &serde_json::Value) -> ProviderResult<ProviderUpdate> {
        let hook: TranscriptionWebhook = serde_json::from_value(payload.clone()).map_err(|e| {
            ProviderError::invalid_response(format!("bad transcription webhook: {e}"))
        })?;
        let status = self.normalize(hook.state)?;
        Ok(ProviderUpdate::new(hook.id, status))
    }

    async fn persist_result(
        &self,
        owner: &OwnerScope,
        urls: &[String],
    ) -> ProviderResult<Vec<String>> {
        Ok(persist_urls(self.assets.as_ref(), owner, JobKind::Subtitles, urls).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn adapter(server: &MockServer) -> SubtitlesAdapter {
        let registry = Arc::new(JobRegistry::default());
        let settings = ProviderSettings::new(server.uri(), Some("key".into()));
        SubtitlesAdapter::new(settings, registry, None).unwrap()
    }

    fn owner() -> OwnerScope {
        OwnerScope::new("acme", "user-1")
    }

    #[tokio::test]
    async fn submit_requires_media_url() {
        let server = MockServer::start().await;
        let adapter = adapter(&server).await;

        let err = adapter
            .submit(&owner(), &GenerationRequest::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::Validation(_)));
    }

    #[tokio::test]
    async fn submit_defaults_language() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/transcriptions"))
            .and(body_partial_json(serde_json::json!({
                "media_url": "https://cdn.example.com/talk.mp4",
                "language": DEFAULT_LANGUAGE,
            })))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"id": "tr-1"})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let adapter = adapter(&server).await;
        let req = GenerationRequest {
            media_url: Some("https://cdn.example.com/talk.mp4".into()),
            ..Default::default()
        };
        let job = adapter.submit(&owner(), &req).await.unwrap();
        assert_eq!(job.provider_job_id, "tr-1");
    }

    #[tokio::test]
    async fn completed_collects_subtitle_files() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/transcriptions/tr-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "status": "completed",
                "files": [
                    {"url": "https://cdn.provider.com/talk.srt", "format": "srt"},
                    {"url": "https://cdn.provider.com/talk.vtt", "format": "vtt"},
                ],
            })))
            .mount(&server)
            .await;

        let adapter = adapter(&server).await;
        assert_eq!(
            adapter.poll("tr-1").await.unwrap(),
            ProviderStatus::Completed {
                urls: vec![
                    "https://cdn.provider.com/talk.srt".into(),
                    "https://cdn.provider.com/talk.vtt".into(),
                ],
            }
        );
    }
}
