//! Application state.

use std::sync::Arc;

use genflow_notify::{HubConfig, NotificationHub};
use genflow_providers::{AdapterSet, AssetStore, HttpAssetStore};
use genflow_reconciler::{Reconciler, ReconcilerConfig};
use genflow_registry::{JobRegistry, RegistryConfig};

use crate::auth::TokenVerifier;
use crate::config::ApiConfig;
use crate::services::{CoalescerConfig, SubmitService};

/// Shared application state.
///
/// Everything is constructed once here and handed to the router and
/// the background loops; no component reaches for a global.
#[derive(Clone)]
pub struct AppState {
    pub config: ApiConfig,
    pub tokens: Arc<TokenVerifier>,
    pub registry: Arc<JobRegistry>,
    pub adapters: Arc<AdapterSet>,
    pub reconciler: Arc<Reconciler>,
    pub hub: Arc<NotificationHub>,
    pub submit: Arc<SubmitService>,
}

impl AppState {
    /// Create new application state from environment configuration.
    pub fn new(config: ApiConfig) -> anyhow::Result<Self> {
        let tokens = Arc::new(TokenVerifier::from_env()?);
        let registry = Arc::new(JobRegistry::new(RegistryConfig::from_env()));

        let assets: Option<Arc<dyn AssetStore>> = HttpAssetStore::from_env()
            .map(|store| Arc::new(store) as Arc<dyn AssetStore>);

        let adapters = Arc::new(AdapterSet::from_env(
            Arc::clone(&registry),
            assets,
        )?);
        let reconciler = Arc::new(Reconciler::new(
            Arc::clone(&registry),
            Arc::clone(&adapters),
            ReconcilerConfig::from_env(),
        ));
        let hub = Arc::new(NotificationHub::new(HubConfig::from_env()));
        let submit = Arc::new(SubmitService::new(
            Arc::clone(&registry),
            Arc::clone(&adapters),
            CoalescerConfig::from_env(),
        ));

        Ok(Self {
            config,
            tokens,
            registry,
            adapters,
            reconciler,
            hub,
            submit,
        })
    }
}
