use crate::config;
use crate::models::Agent;
use crate::settings::{Settings, SettingsStore};
use anyhow::{Context, Result};
use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures::{Stream, StreamExt};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

// Alias for the stream of content deltas a provider returns
pub type DeltaStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

/// Produces the reply for one user message.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    async fn send(&self, message: &str, agent: Agent, url: Option<&str>) -> Result<String>;
}

// --- Simulated backend ---

/// Offline backend that describes how the request would have been handled.
pub struct EchoBackend {
    delay: Duration,
    settings: Option<Arc<Mutex<SettingsStore>>>,
}

impl EchoBackend {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            settings: None,
        }
    }

    /// Mention the selected provider and model in replies.
    pub fn with_settings(mut self, settings: Arc<Mutex<SettingsStore>>) -> Self {
        self.settings = Some(settings);
        self
    }
}

#[async_trait]
impl ChatBackend for EchoBackend {
    async fn send(&self, message: &str, agent: Agent, url: Option<&str>) -> Result<String> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let model = match &self.settings {
            Some(settings) => {
                let store = settings.lock().await;
                let settings = store.settings();
                format!("{} {}", settings.provider(), settings.model())
            }
            None => "default".to_string(),
        };
        let source = url.map(|u| format!(" using {}", u)).unwrap_or_default();
        Ok(format!(
            "I understand you're asking about \"{}\". This would normally be processed by the {} agent{} and return a comprehensive response based on the {} model.",
            message, agent, source, model
        ))
    }
}

// --- OpenAI compatible provider backend ---

#[derive(Serialize, Debug)]
struct OpenAIRequestBody {
    model: String,
    messages: Vec<OpenAIMessage>,
    stream: bool,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
struct OpenAIMessage {
    role: String,
    content: String,
}

// Response structure for streaming chunks
#[derive(Deserialize, Debug)]
struct OpenAIStreamChunk {
    choices: Vec<OpenAIStreamChoice>,
}

#[derive(Deserialize, Debug)]
struct OpenAIStreamChoice {
    delta: OpenAIStreamDelta,
}

#[derive(Deserialize, Debug, Clone)]
struct OpenAIStreamDelta {
    content: Option<String>,
}

/// Calls the provider selected in the current settings through its
/// OpenAI-compatible chat completions endpoint.
pub struct ProviderBackend {
    client: Client,
    settings: Arc<Mutex<SettingsStore>>,
}

impl ProviderBackend {
    pub fn new(settings: Arc<Mutex<SettingsStore>>) -> Self {
        Self {
            client: Client::new(),
            settings,
        }
    }

    async fn stream_reply(
        &self,
        settings: &Settings,
        message: &str,
        agent: Agent,
        url: Option<&str>,
    ) -> Result<DeltaStream> {
        let provider = settings.provider();
        let base_url = settings
            .endpoint(provider)
            .or_else(|| provider.default_base_url())
            .with_context(|| format!("No endpoint configured for {}", provider.display_name()))?;
        let api_key = config::resolve_api_key(settings, provider)?;

        log::info!(
            "Sending STREAM request to {} using model: {}",
            base_url,
            settings.model()
        );

        let request_body = OpenAIRequestBody {
            model: settings.model().to_string(),
            messages: vec![
                OpenAIMessage {
                    role: "system".to_string(),
                    content: system_prompt(agent, url),
                },
                OpenAIMessage {
                    role: "user".to_string(),
                    content: message.to_string(),
                },
            ],
            stream: true,
        };

        let request_url = format!("{}/chat/completions", base_url.trim_end_matches('/'));
        let mut request = self.client.post(&request_url).json(&request_body);
        if let Some(key) = api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .context("Failed to send stream request to provider")?;

        if !response.status().is_success() {
            let status = response.status();
            let error_body = response
                .text()
                .await
                .unwrap_or_else(|_| "<Failed to read error body>".to_string());
            log::error!("Provider stream request failed with status {}: {}", status, error_body);
            return Err(anyhow::anyhow!(
                "API stream request failed with status {}: {}",
                status,
                error_body
            ));
        }

        let delta_stream = response
            .bytes_stream()
            .eventsource()
            .map(|event_result| -> Result<Option<String>> {
                let event = event_result.context("Error reading stream event")?;
                parse_stream_event(&event.data)
            })
            .filter_map(|result| async move {
                match result {
                    Ok(Some(content)) => Some(Ok(content)),
                    Ok(None) => None,
                    Err(e) => {
                        log::error!("Error processing stream chunk: {:?}", e);
                        Some(Err(e))
                    }
                }
            });

        Ok(Box::pin(delta_stream))
    }
}

#[async_trait]
impl ChatBackend for ProviderBackend {
    async fn send(&self, message: &str, agent: Agent, url: Option<&str>) -> Result<String> {
        // Snapshot so the settings lock is not held across the request
        let settings = self.settings.lock().await.settings().clone();
        let mut deltas = self.stream_reply(&settings, message, agent, url).await?;

        let mut reply = String::new();
        while let Some(delta) = deltas.next().await {
            reply.push_str(&delta?);
        }
        if reply.is_empty() {
            return Err(anyhow::anyhow!("Provider returned an empty reply"));
        }
        Ok(reply)
    }
}

fn system_prompt(agent: Agent, url: Option<&str>) -> String {
    let mut prompt = format!("You are the FindexAI {} assistant.", agent.display_name());
    if let Some(url) = url {
        prompt.push_str(&format!(" Answer using the content at {}.", url));
    }
    prompt
}

/// Extracts the content delta from one SSE data payload. `[DONE]`, pings and
/// role-only chunks yield `None`.
fn parse_stream_event(data: &str) -> Result<Option<String>> {
    let data = data.trim();
    if data == "[DONE]" {
        log::info!("Stream finished with [DONE]");
        return Ok(None);
    }

    match serde_json::from_str::<OpenAIStreamChunk>(data) {
        Ok(chunk) => Ok(chunk
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.delta.content)),
        Err(e) => match serde_json::from_str::<serde_json::Value>(data) {
            Ok(json_value) if json_value.get("type").and_then(|t| t.as_str()) == Some("ping") => {
                log::debug!("Received stream ping event, skipping.");
                Ok(None)
            }
            Ok(_) => Err(anyhow::Error::from(e)
                .context(format!("Parsed as JSON but not a valid stream chunk: {}", data))),
            Err(_) => Err(anyhow::Error::from(e)
                .context(format!("Failed to parse stream chunk as JSON: {}", data))),
        },
    }
}
