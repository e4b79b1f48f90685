use crate::api::{ChatBackend, EchoBackend, ProviderBackend};
use crate::config::{AppConfig, BackendKind};
use crate::exchange::{ChatController, SendError};
use crate::settings::SettingsStore;
use crate::storage::KeyValueStore;
use crate::threads::ThreadStore;
use anyhow::Result;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Everything a host needs for one session: both stores and the controller.
///
/// Constructed once at start-up; cloning shares the same stores.
#[derive(Clone)]
pub struct AppState {
    pub threads: Arc<Mutex<ThreadStore>>,
    pub settings: Arc<Mutex<SettingsStore>>,
    pub controller: Arc<ChatController>,
}

impl AppState {
    /// Loads both stores from `kv` and wires the controller to `backend`.
    pub async fn new(kv: Arc<dyn KeyValueStore>, backend: Arc<dyn ChatBackend>) -> Result<Self> {
        let settings = Arc::new(Mutex::new(SettingsStore::load(kv.clone()).await));
        Self::with_settings(kv, settings, backend).await
    }

    /// Like [`AppState::new`], choosing the backend from `config`.
    pub async fn from_config(kv: Arc<dyn KeyValueStore>, config: &AppConfig) -> Result<Self> {
        let settings = Arc::new(Mutex::new(SettingsStore::load(kv.clone()).await));
        let backend: Arc<dyn ChatBackend> = match config.backend {
            BackendKind::Echo => {
                Arc::new(EchoBackend::new(config.echo_delay).with_settings(settings.clone()))
            }
            BackendKind::Provider => Arc::new(ProviderBackend::new(settings.clone())),
        };
        log::info!("Using {:?} chat backend", config.backend);
        Self::with_settings(kv, settings, backend).await
    }

    async fn with_settings(
        kv: Arc<dyn KeyValueStore>,
        settings: Arc<Mutex<SettingsStore>>,
        backend: Arc<dyn ChatBackend>,
    ) -> Result<Self> {
        let threads = Arc::new(Mutex::new(ThreadStore::load(kv).await));
        let controller = Arc::new(ChatController::new(threads.clone(), backend));
        Ok(Self {
            threads,
            settings,
            controller,
        })
    }

    /// Sends `content` with the agent and URL from the saved settings.
    pub async fn send(&self, content: &str) -> Result<Option<String>, SendError> {
        let (agent, url) = {
            let store = self.settings.lock().await;
            let settings = store.settings();
            (settings.agent, settings.url().map(str::to_string))
        };
        self.controller
            .send_message(content, agent, url.as_deref())
            .await
    }
}
