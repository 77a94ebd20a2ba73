//! Image generation provider adapter.
//!
//! Speaks an OpenAI-style asynchronous images API: a submission
//! returns a generation id, and polling that id eventually yields an
//! `images` array of hosted URLs.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use genflow_models::request::{DEFAULT_IMAGE_COUNT, MAX_IMAGE_COUNT};
use genflow_models::{
    GenerationRequest, Job, JobKind, OwnerScope, ProviderStatus, ProviderUpdate,
};
use genflow_registry::JobRegistry;

use crate::adapter::ProviderAdapter;
use crate::asset_store::{persist_urls, AssetStore};
use crate::client::{ProviderClient, ProviderSettings};
use crate::error::{ProviderError, ProviderResult};

#[derive(Debug, Serialize)]
struct SubmitGenerationRequest<'a> {
    prompt: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    style: Option<&'a str>,
    n: u32,
}

#[derive(Debug, Deserialize)]
struct SubmitGenerationResponse {
    id: String,
}

#[derive(Debug, Deserialize)]
struct GenerationState {
    status: String,
    #[serde(default)]
    images: Vec<GeneratedImage>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GeneratedImage {
    url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GenerationWebhook {
    id: String,
    #[serde(flatten)]
    state: GenerationState,
}

/// Adapter for the image generation provider.
pub struct ImageAdapter {
    client: ProviderClient,
    registry: Arc<JobRegistry>,
    assets: Option<Arc<dyn AssetStore>>,
}

impl ImageAdapter {
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

    fn normalize(&self, state: GenerationState) -> ProviderResult<ProviderStatus> {
        match state.status.as_str() {
            "queued" | "pending" => Ok(ProviderStatus::Queued),
            "running" | "processing" => Ok(ProviderStatus::Processing { progress: None }),
            "succeeded" | "completed" => Ok(ProviderStatus::Completed {
                urls: state.images.into_iter().filter_map(|i| i.url).collect(),
            }),
            "failed" | "error" => Ok(ProviderStatus::Failed {
                reason: state
                    .error
                    .unwrap_or_else(|| "image generation failed".to_string()),
            }),
            other => Err(ProviderError::invalid_response(format!(
                "unknown image generation status: {other}"
            ))),
        }
    }
}

#[async_trait]
impl ProviderAdapter for ImageAdapter {
    fn kind(&self) -> JobKind {
        JobKind::Image
    }

    async fn submit(&self, owner: &OwnerScope, params: &GenerationRequest) -> ProviderResult<Job> {
        let prompt = params
            .prompt
            .as_deref()
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .ok_or_else(|| ProviderError::validation("image generation requires a prompt"))?;

        let body = SubmitGenerationRequest {
            prompt,
            style: params.style.as_deref(),
            n: params.count.unwrap_or(DEFAULT_IMAGE_COUNT).min(MAX_IMAGE_COUNT),
        };
        let accepted: SubmitGenerationResponse =
            self.client.post_json("/v1/images/generations", &body).await?;

        let job = Job::new(owner.clone(), JobKind::Image, accepted.id);
        self.registry.insert(job.clone()).await?;
        debug!(job_id = %job.id, provider_job_id = %job.provider_job_id, "image job submitted");
        Ok(job)
    }

    async fn poll(&self, provider_job_id: &str) -> ProviderResult<ProviderStatus> {
        let state: GenerationState = self
            .client
            .get_json(&format!("/v1/images/generations/{provider_job_id}"))
            .await?;
        self.normalize(state)
    }

    async fn cancel(&self, provider_job_id: &str) -> ProviderResult<bool> {
        let status = self
            .client
            .post_ack(&format!("/v1/images/generations/{provider_job_id}/cancel"))
            .await?;
        Ok((200..300).contains(&status))
    }

    fn parse_webhook(&self, payload: &serde_json::Value) -> ProviderResult<ProviderUpdate> {
        let hook: GenerationWebhook = serde_json::from_value(payload.clone())
            .map_err(|e| ProviderError::invalid_response(format!("bad image webhook: {e}")))?;
        let status = self.normalize(hook.state)?;
        Ok(ProviderUpdate::new(hook.id, status))
    }

    async fn persist_result(
        &self,
        owner: &OwnerScope,
        urls: &[String],
    ) -> ProviderResult<Vec<String>> {
        Ok(persist_urls(self.assets.as_ref(), owner, JobKind::Image, urls).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use genflow_models::JobStatus;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn adapter(server: &MockServer) -> (ImageAdapter, Arc<JobRegistry>) {
        let registry = Arc::new(JobRegistry::default());
        let settings = ProviderSettings::new(server.uri(), Some("key".into()));
        let adapter = ImageAdapter::new(settings, registry.clone(), None).unwrap();
        (adapter, registry)
    }

    fn owner() -> OwnerScope {
        OwnerScope::new("acme", "user-1")
    }

    #[tokio::test]
    async fn submit_registers_pending_job() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/images/generations"))
            .and(body_partial_json(serde_json::json!({"prompt": "a cat", "n": 1})))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"id": "gen-1"})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let (adapter, registry) = adapter(&server).await;
        let req = GenerationRequest {
            prompt: Some("a cat".into()),
            ..Default::default()
        };

        let job = adapter.submit(&owner(), &req).await.unwrap();
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.provider_job_id, "gen-1");
        assert_eq!(registry.len().await, 1);
        assert_eq!(
            registry.get_by_provider_ref(JobKind::Image, "gen-1").await,
            Some(job.id)
        );
    }

    #[tokio::test]
    async fn missing_prompt_is_rejected_before_any_call() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let (adapter, registry) = adapter(&server).await;
        let err = adapter
            .submit(&owner(), &GenerationRequest::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::Validation(_)));
        assert!(registry.is_empty().await);

        // whitespace-only prompts count as missing
        let blank = GenerationRequest {
            prompt: Some("   ".into()),
            ..Default::default()
        };
        assert!(matches!(
            adapter.submit(&owner(), &blank).await,
            Err(ProviderError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn poll_normalizes_provider_states() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/images/generations/gen-run"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"status": "running"})),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v1/images/generations/gen-done"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "status": "succeeded",
                "images": [
                    {"url": "https://cdn.provider.com/a.png"},
                    {"url": "https://cdn.provider.com/b.png"},
                ],
            })))
            .mount(&server)
            .await;

        let (adapter, _) = adapter(&server).await;
        assert_eq!(
            adapter.poll("gen-run").await.unwrap(),
            ProviderStatus::Processing { progress: None }
        );
        assert_eq!(
            adapter.poll("gen-done").await.unwrap(),
            ProviderStatus::Completed {
                urls: vec![
                    "https://cdn.provider.com/a.png".into(),
                    "https://cdn.provider.com/b.png".into(),
                ],
            }
        );
    }

    #[tokio::test]
    async fn unknown_status_is_an_invalid_response() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"status": "doodling"})),
            )
            .mount(&server)
            .await;

        let (adapter, _) = adapter(&server).await;
        assert!(matches!(
            adapter.poll("gen-1").await,
            Err(ProviderError::InvalidResponse(_))
        ));
    }

    #[tokio::test]
    async fn cancel_reports_acknowledgement() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/images/generations/gen-1/cancel"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/v1/images/generations/gen-2/cancel"))
            .respond_with(ResponseTemplate::new(409))
            .mount(&server)
            .await;

        let (adapter, _) = adapter(&server).await;
        assert!(adapter.cancel("gen-1").await.unwrap());
        assert!(!adapter.cancel("gen-2").await.unwrap());
    }

    #[tokio::test]
    async fn webhook_parses_into_normalized_update() {
        let server = MockServer::start().await;
        let (adapter, _) = adapter(&server).await;

        let payload = serde_json::json!({
            "id": "gen-1",
            "status": "failed",
            "error": "nsfw content rejected",
        });
        let update = adapter.parse_webhook(&payload).unwrap();
        assert_eq!(update.provider_job_id, "gen-1");
        assert_eq!(
            update.status,
            ProviderStatus::Failed {
                reason: "nsfw content rejected".into()
            }
        );

        let garbage = serde_json::json!({"unexpected": true});
        assert!(matches!(
            adapter.parse_webhook(&garbage),
            Err(ProviderError::InvalidResponse(_))
        ));
    }
}
