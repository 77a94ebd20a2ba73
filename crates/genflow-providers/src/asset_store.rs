//! Durable asset persistence for finished generation outputs.
//!
//! Providers host results on their own (often expiring) URLs. When an
//! asset store is configured, every finished output is registered with
//! it so the platform owns a durable copy. Persistence failures never
//! fail the job; the provider URLs still reach the caller.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use genflow_models::{JobKind, OwnerScope};

/// Default asset store request timeout.
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Asset store errors.
#[derive(Debug, Error)]
pub enum AssetStoreError {
    #[error("Asset store request failed: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Asset store returned {status}: {message}")]
    Upstream { status: u16, message: String },

    #[error("Unexpected asset store response: {0}")]
    InvalidResponse(String),
}

/// Something that can take ownership of a provider-hosted output.
#[async_trait]
pub trait AssetStore: Send + Sync {
    /// Register one output URL, returning the assigned asset id.
    async fn store(
        &self,
        owner: &OwnerScope,
        kind: JobKind,
        url: &str,
    ) -> Result<String, AssetStoreError>;
}

#[derive(Serialize)]
struct StoreAssetRequest<'a> {
    #[serde(rename = "clientId")]
    client_id: &'a str,
    #[serde(rename = "userId")]
    user_id: &'a str,
    kind: &'a str,
    #[serde(rename = "sourceUrl")]
    source_url: &'a str,
}

#[derive(Deserialize)]
struct StoreAssetResponse {
    #[serde(rename = "assetId")]
    asset_id: String,
}

/// HTTP-backed asset store client.
pub struct HttpAssetStore {
    http: Client,
    base_url: String,
    api_key: Option<String>,
}

impl HttpAssetStore {
    pub fn new(base_url: impl Into<String>, api_key: Option<String>) -> Result<Self, AssetStoreError> {
        let http = Client::builder()
            .timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
            .build()
            .map_err(AssetStoreError::Network)?;

        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.filter(|k| !k.is_empty()),
        })
    }

    /// Build from `ASSET_STORE_URL` / `ASSET_STORE_API_KEY`.
    ///
    /// Returns `None` when no store is configured, which is a fully
    /// supported mode: results then carry provider URLs only.
    pub fn from_env() -> Option<Self> {
        let base_url = std::env::var("ASSET_STORE_URL").ok()?;
        if base_url.trim().is_empty() {
            return None;
        }
        let api_key = std::env::var("ASSET_STORE_API_KEY").ok();

        match Self::new(base_url, api_key) {
            Ok(store) => Some(store),
            Err(e) => {
                warn!("failed to build asset store client: {e}");
                None
            }
        }
    }
}

#[async_trait]
impl AssetStore for HttpAssetStore {
    async fn store(
        &self,
        owner: &OwnerScope,
        kind: JobKind,
        url: &str,
    ) -> Result<String, AssetStoreError> {
        let endpoint = format!("{}/assets", self.base_url);
        let body = StoreAssetRequest {
            client_id: &owner.client_id,
            user_id: &owner.user_id,
            kind: kind.as_str(),
            source_url: url,
        };

        let mut request = self.http.post(&endpoint).json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.map_err(AssetStoreError::Network)?;
        let status = response.status();
        if !status.is_success() {
            return Err(AssetStoreError::Upstream {
                status: status.as_u16(),
                message: response.text().await.unwrap_or_default(),
            });
        }

        let accepted: StoreAssetResponse = response
            .json()
            .await
            .map_err(|e| AssetStoreError::InvalidResponse(e.to_string()))?;

        debug!(asset_id = %accepted.asset_id, kind = %kind, "asset registered");
        Ok(accepted.asset_id)
    }
}

/// Persist every URL that can be persisted, logging the rest.
///
/// Shared by all adapters; a missing store yields an empty id list.
pub async fn persist_urls(
    store: Option<&Arc<dyn AssetStore>>,
    owner: &OwnerScope,
    kind: JobKind,
    urls: &[String],
) -> Vec<String> {
    let Some(store) = store else {
        return Vec::new();
    };

    let mut asset_ids = Vec::with_capacity(urls.len());
    for url in urls {
        match store.store(owner, kind, url).await {
            Ok(id) => asset_ids.push(id),
            Err(e) => {
                warn!(kind = %kind, %url, "asset persistence failed: {e}");
            }
        }
    }
    asset_ids
}
