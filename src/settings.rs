//! Agent/provider/model selection and per-provider credentials.

use crate::models::{Agent, Provider};
use crate::storage::{self, KeyValueStore, SETTINGS_KEY};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;

/// Reasons a settings draft cannot be saved, in the order they are checked.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Missing URL: the {} agent requires a URL.", .0.display_name())]
    MissingUrl(Agent),

    #[error("Missing API key: {} requires an API key.", .0.display_name())]
    MissingApiKey(Provider),

    #[error("Missing endpoint: {} requires an endpoint URL.", .0.display_name())]
    MissingEndpoint(Provider),

    #[error("Unknown model '{}' for {}.", .model, .provider.display_name())]
    UnknownModel { provider: Provider, model: String },
}

/// User preferences and credentials.
///
/// `provider` and `model` are only reachable through setters so the model
/// always belongs to the selected provider.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    pub agent: Agent,
    provider: Provider,
    model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default)]
    api_keys: BTreeMap<Provider, String>,
    #[serde(default)]
    endpoints: BTreeMap<Provider, String>,
}

impl Default for Settings {
    fn default() -> Self {
        let provider = Provider::default();
        Self {
            agent: Agent::default(),
            provider,
            model: provider.default_model().to_string(),
            url: None,
            api_keys: BTreeMap::new(),
            endpoints: BTreeMap::new(),
        }
    }
}

fn non_blank(value: Option<&String>) -> Option<&str> {
    value.map(|v| v.trim()).filter(|v| !v.is_empty())
}

impl Settings {
    pub fn provider(&self) -> Provider {
        self.provider
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Switches provider and resets the model to the provider's default.
    pub fn set_provider(&mut self, provider: Provider) {
        self.provider = provider;
        self.model = provider.default_model().to_string();
    }

    pub fn set_model(&mut self, model: &str) -> Result<(), ValidationError> {
        if !self.provider.supports_model(model) {
            return Err(ValidationError::UnknownModel {
                provider: self.provider,
                model: model.to_string(),
            });
        }
        self.model = model.to_string();
        Ok(())
    }

    /// The context URL, if one is set and not blank.
    pub fn url(&self) -> Option<&str> {
        self.url
            .as_deref()
            .map(str::trim)
            .filter(|u| !u.is_empty())
    }

    pub fn api_key(&self, provider: Provider) -> Option<&str> {
        non_blank(self.api_keys.get(&provider))
    }

    /// Records a key for `provider`; a blank key removes it.
    pub fn set_api_key(&mut self, provider: Provider, key: &str) {
        if key.trim().is_empty() {
            self.api_keys.remove(&provider);
        } else {
            self.api_keys.insert(provider, key.trim().to_string());
        }
    }

    pub fn endpoint(&self, provider: Provider) -> Option<&str> {
        non_blank(self.endpoints.get(&provider))
    }

    pub fn set_endpoint(&mut self, provider: Provider, endpoint: &str) {
        if endpoint.trim().is_empty() {
            self.endpoints.remove(&provider);
        } else {
            self.endpoints.insert(provider, endpoint.trim().to_string());
        }
    }

    /// Providers that currently have a key recorded.
    pub fn providers_with_keys(&self) -> impl Iterator<Item = Provider> + '_ {
        self.api_keys.keys().copied()
    }

    /// First missing requirement wins: URL, then API key, then endpoint.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.agent.requires_url() && self.url().is_none() {
            return Err(ValidationError::MissingUrl(self.agent));
        }
        if self.provider.requires_api_key() && self.api_key(self.provider).is_none() {
            return Err(ValidationError::MissingApiKey(self.provider));
        }
        if self.provider.requires_endpoint() && self.endpoint(self.provider).is_none() {
            return Err(ValidationError::MissingEndpoint(self.provider));
        }
        if !self.provider.supports_model(&self.model) {
            return Err(ValidationError::UnknownModel {
                provider: self.provider,
                model: self.model.clone(),
            });
        }
        Ok(())
    }

    // Stored data may name a model the provider no longer offers
    fn repair_model(&mut self) -> bool {
        if self.provider.supports_model(&self.model) {
            return false;
        }
        self.model = self.provider.default_model().to_string();
        true
    }
}

pub struct SettingsStore {
    kv: Arc<dyn KeyValueStore>,
    current: Settings,
}

impl SettingsStore {
    /// Loads persisted settings. A missing or unreadable record yields the defaults.
    pub async fn load(kv: Arc<dyn KeyValueStore>) -> Self {
        let current = match storage::load_record::<Settings>(kv.as_ref(), SETTINGS_KEY).await {
            Some(mut settings) => {
                if settings.repair_model() {
                    log::warn!(
                        "Stored model is not offered by {}, reset to {}",
                        settings.provider,
                        settings.model
                    );
                }
                settings
            }
            None => {
                log::info!("No usable stored settings, using defaults");
                Settings::default()
            }
        };
        Self { kv, current }
    }

    pub fn settings(&self) -> &Settings {
        &self.current
    }

    /// Validates and persists `settings`. On failure the current settings stay as they were.
    pub async fn save(&mut self, settings: Settings) -> Result<(), ValidationError> {
        if let Err(e) = settings.validate() {
            log::warn!("Rejected settings: {}", e);
            return Err(e);
        }
        log::info!(
            "Saving settings (agent: {}, provider: {}, model: {})",
            settings.agent,
            settings.provider,
            settings.model
        );
        self.current = settings;
        storage::persist_json(self.kv.as_ref(), SETTINGS_KEY, &self.current).await;
        Ok(())
    }

    /// Restores the defaults and drops every stored credential.
    pub async fn clear(&mut self) {
        log::warn!("Clearing settings and stored API keys");
        self.current = Settings::default();
        storage::persist_json(self.kv.as_ref(), SETTINGS_KEY, &self.current).await;
    }
}
