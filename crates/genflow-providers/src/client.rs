//! Shared HTTP plumbing for provider adapters.
//!
//! All adapters go through [`ProviderClient`] so authentication,
//! timeouts, and the status-to-error mapping live in one place.

use std::time::Duration;

use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use genflow_models::JobKind;

use crate::error::{ProviderError, ProviderResult};

/// Upstream response bodies quoted in errors are capped at this length.
const MAX_ERROR_BODY_LEN: usize = 512;

/// Default provider request timeout.
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Connection settings for one provider endpoint.
#[derive(Debug, Clone)]
pub struct ProviderSettings {
    /// Base URL of the provider API
    pub base_url: String,
    /// Bearer credential; calls fail with a configuration error while unset
    pub api_key: Option<String>,
    /// Request timeout
    pub timeout: Duration,
}

impl ProviderSettings {
    pub fn new(base_url: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_key,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }

    /// Load settings for one job kind from environment variables.
    ///
    /// Reads `<KIND>_PROVIDER_URL`, `<KIND>_PROVIDER_API_KEY`, and
    /// `<KIND>_PROVIDER_TIMEOUT_SECS`, e.g. `IMAGE_PROVIDER_URL`.
    pub fn for_kind(kind: JobKind) -> Self {
        let prefix = match kind {
            JobKind::Image => "IMAGE",
            JobKind::Video => "VIDEO",
            JobKind::Voiceover => "VOICEOVER",
            JobKind::Music => "MUSIC",
            JobKind::Subtitles => "SUBTITLES",
        };
        let default_url = match kind {
            JobKind::Image => "http://localhost:8101",
            JobKind::Video => "http://localhost:8102",
            JobKind::Voiceover => "http://localhost:8103",
            JobKind::Music => "http://localhost:8104",
            JobKind::Subtitles => "http://localhost:8105",
        };

        let base_url = std::env::var(format!("{prefix}_PROVIDER_URL"))
            .unwrap_or_else(|_| default_url.to_string());
        let api_key = std::env::var(format!("{prefix}_PROVIDER_API_KEY")).ok();
        let timeout = Duration::from_secs(
            std::env::var(format!("{prefix}_PROVIDER_TIMEOUT_SECS"))
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_TIMEOUT_SECS),
        );

        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            timeout,
        }
    }
}

/// HTTP client bound to one provider endpoint.
pub struct ProviderClient {
    http: Client,
    settings: ProviderSettings,
}

impl ProviderClient {
    pub fn new(settings: ProviderSettings) -> ProviderResult<Self> {
        let http = Client::builder()
            .timeout(settings.timeout)
            .build()
            .map_err(ProviderError::Network)?;

        Ok(Self { http, settings })
    }

    pub fn base_url(&self) -> &str {
        &self.settings.base_url
    }

    fn api_key(&self) -> ProviderResult<&str> {
        self.settings.api_key.as_deref().ok_or_else(|| {
            ProviderError::configuration(format!(
                "no API key configured for {}",
                self.settings.base_url
            ))
        })
    }

    /// POST a JSON body and decode a JSON response.
    pub async fn post_json<B, T>(&self, path: &str, body: &B) -> ProviderResult<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let url = format!("{}{}", self.settings.base_url, path);
        let key = self.api_key()?;
        debug!(%url, "provider POST");

        let response = self
            .http
            .post(&url)
            .bearer_auth(key)
            .json(body)
            .send()
            .await
            .map_err(ProviderError::Network)?;

        Self::decode(response).await
    }

    /// GET and decode a JSON response.
    pub async fn get_json<T>(&self, path: &str) -> ProviderResult<T>
    where
        T: DeserializeOwned,
    {
        let url = format!("{}{}", self.settings.base_url, path);
        let key = self.api_key()?;
        debug!(%url, "provider GET");

        let response = self
            .http
            .get(&url)
            .bearer_auth(key)
            .send()
            .await
            .map_err(ProviderError::Network)?;

        Self::decode(response).await
    }

    /// POST without a body, returning the raw status code.
    ///
    /// Used for cancellation, where a non-success answer is an
    /// unacknowledged cancel rather than an error.
    pub async fn post_ack(&self, path: &str) -> ProviderResult<u16> {
        let url = format!("{}{}", self.settings.base_url, path);
        let key = self.api_key()?;
        debug!(%url, "provider POST (ack)");

        let response = self
            .http
            .post(&url)
            .bearer_auth(key)
            .send()
            .await
            .map_err(ProviderError::Network)?;

        Ok(response.status().as_u16())
    }

    async fn decode<T: DeserializeOwned>(response: reqwest::Response) -> ProviderResult<T> {
        let status = response.status();
        if !status.is_success() {
            let message = truncate(response.text().await.unwrap_or_default());
            return Err(ProviderError::Upstream {
                status: status.as_u16(),
                message,
            });
        }

        response
            .json::<T>()
            .await
            .map_err(|e| ProviderError::invalid_response(e.to_string()))
    }
}

fn truncate(mut body: String) -> String {
    if body.len() > MAX_ERROR_BODY_LEN {
        let mut end = MAX_ERROR_BODY_LEN;
        while !body.is_char_boundary(end) {
            end -= 1;
        }
        body.truncate(end);
        body.push_str("...");
    }
    body
}
