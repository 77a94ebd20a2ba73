//! Video generation provider adapter.
//!
//! The video provider runs a request queue with SCREAMING_CASE states
//! and reports a single output URL plus a numeric progress while
//! rendering. Submissions may be conditioned on a reference image.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use genflow_models::request::DEFAULT_VIDEO_DURATION_SECS;
use genflow_models::{
    GenerationRequest, Job, JobKind, OwnerScope, ProviderStatus, ProviderUpdate,
};
use genflow_registry::JobRegistry;

use crate::adapter::ProviderAdapter;
use crate::asset_store::{persist_urls, AssetStore};
use crate::client::{ProviderClient, ProviderSettings};
use crate::error::{ProviderError, ProviderResult};

#[derive(Debug, Serialize)]
struct SubmitVideoRequest<'a> {
    prompt: &'a str,
    duration_secs: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    image_url: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct SubmitVideoResponse {
    request_id: String,
}

#[derive(Debug, Deserialize)]
struct VideoRequestState {
    state: String,
    #[serde(default)]
    progress: Option<u8>,
    #[serde(default)]
    video: Option<VideoOutput>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct VideoOutput {
    url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct VideoWebhook {
    request_id: String,
    #[serde(flatten)]
    state: VideoRequestState,
}

/// Adapter for the video generation provider.
pub struct VideoAdapter {
    client: ProviderClient,
    registry: Arc<JobRegistry>,
    assets: Option<Arc<dyn AssetStore>>,
}

impl VideoAdapter {
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

    fn normalize(&self, state: VideoRequestState) -> ProviderResult<ProviderStatus> {
        match state.state.as_str() {
            "IN_QUEUE" => Ok(ProviderStatus::Queued),
            "IN_PROGRESS" => Ok(ProviderStatus::Processing {
                progress: state.progress.map(|p| p.min(100)),
            }),
            "COMPLETED" => Ok(ProviderStatus::Completed {
                // a completed request without a URL is normalized to an
                // empty output and handled downstream
                urls: state
                    .video
                    .and_then(|v| v.url)
                    .into_iter()
                    .collect(),
            }),
            "FAILED" | "CANCELLED" => Ok(ProviderStatus::Failed {
                reason: state
                    .error
                    .unwrap_or_else(|| "video generation failed".to_string()),
            }),
            other => Err(ProviderError::invalid_response(format!(
                "unknown video request state: {other}"
            ))),
        }
    }
}

#[async_trait]
impl ProviderAdapter for VideoAdapter {
    fn kind(&self) -> JobKind {
        JobKind::Video
    }

    async fn submit(&self, owner: &OwnerScope, params: &GenerationRequest) -> ProviderResult<Job> {
        let prompt = params
            .prompt
            .as_deref()
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .ok_or_else(|| ProviderError::validation("video generation requires a prompt"))?;

        let body = SubmitVideoRequest {
            prompt,
            duration_secs: params.duration_secs.unwrap_or(DEFAULT_VIDEO_DURATION_SECS),
            image_url: params.reference_image_url.as_deref(),
        };
        let accepted: SubmitVideoResponse =
            self.client.post_json("/v1/videos/generate", &body).await?;

        let job = Job::new(owner.clone(), JobKind::Video, accepted.request_id);
        self.registry.insert(job.clone()).await?;
        debug!(job_id = %job.id, provider_job_id = %job.provider_job_id, "video job submitted");
        Ok(job)
    }

    async fn poll(&self, provider_job_id: &str) -> ProviderResult<ProviderStatus> {
        let state: VideoRequestState = self
            .client
            .get_json(&format!("/v1/videos/requests/{provider_job_id}"))
            .await?;
        self.normalize(state)
    }

    async fn cancel(&self, provider_job_id: &str) -> ProviderResult<bool> {
        let status = self
            .client
            .post_ack(&format!("/v1/videos/requests/{provider_job_id}/cancel"))
            .await?;
        Ok((200..300).contains(&status))
    }

    fn parse_webhook(&self, payload: &serde_json::Value) -> ProviderResult<ProviderUpdate> {
        let hook: VideoWebhook = serde_json::from_value(payload.clone())
            .map_err(|e| ProviderError::invalid_response(format!("bad video webhook: {e}")))?;
        let status = self.normalize(hook.state)?;
        Ok(ProviderUpdate::new(hook.request_id, status))
    }

    async fn persist_result(
        &self,
        owner: &OwnerScope,
        urls: &[String],
    ) -> ProviderResult<Vec<String>> {
        Ok(persist_urls(self.assets.as_ref(), owner, JobKind::Video, urls).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn adapter(server: &MockServer) -> VideoAdapter {
        let registry = Arc::new(JobRegistry::default());
        let settings = ProviderSettings::new(server.uri(), Some("key".into()));
        VideoAdapter::new(settings, registry, None).unwrap()
    }

    fn owner() -> OwnerScope {
        OwnerScope::new("acme", "user-1")
    }

    #[tokio::test]
    async fn submit_applies_default_duration_and_reference_image() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/videos/generate"))
            .and(body_partial_json(serde_json::json!({
                "prompt": "waves at dawn",
                "duration_secs": DEFAULT_VIDEO_DURATION_SECS,
                "image_url": "https://cdn.example.com/ref.png",
            })))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"request_id": "req-7"})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let adapter = adapter(&server).await;
        let req = GenerationRequest {
            prompt: Some("waves at dawn".into()),
            reference_image_url: Some("https://cdn.example.com/ref.png".into()),
            ..Default::default()
        };
        let job = adapter.submit(&owner(), &req).await.unwrap();
        assert_eq!(job.provider_job_id, "req-7");
    }

    #[tokio::test]
    async fn poll_carries_provider_progress() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/videos/requests/req-7"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "state": "IN_PROGRESS",
                "progress": 64,
            })))
            .mount(&server)
            .await;

        let adapter = adapter(&server).await;
        assert_eq!(
            adapter.poll("req-7").await.unwrap(),
            ProviderStatus::Processing { progress: Some(64) }
        );
    }

    #[tokio::test]
    async fn completed_without_url_normalizes_to_empty_output() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"state": "COMPLETED"})),
            )
            .mount(&server)
            .await;

        let adapter = adapter(&server).await;
        assert_eq!(
            adapter.poll("req-7").await.unwrap(),
            ProviderStatus::Completed { urls: vec![] }
        );
    }

    #[tokio::test]
    async fn webhook_resolves_single_output_url() {
        let server = MockServer::start().await;
        let adapter = adapter(&server).await;

        let payload = serde_json::json!({
            "request_id": "req-7",
            "state": "COMPLETED",
            "video": {"url": "https://cdn.provider.com/clip.mp4"},
        });
        let update = adapter.parse_webhook(&payload).unwrap();
        assert_eq!(update.provider_job_id, "req-7");
        assert_eq!(
            update.status,
            ProviderStatus::Completed {
                urls: vec!["https://cdn.provider.com/clip.mp4".into()],
            }
        );
    }
}
