use crate::models::Provider;
use crate::settings::Settings;
use anyhow::{Context, Result};
use directories::ProjectDirs;
use keyring::Entry;
use std::path::PathBuf;
use std::time::Duration;

const DB_FILE_NAME: &str = "findex-chat.sqlite";

/// Which chat backend the host wires into the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    /// Simulated replies, no network.
    Echo,
    /// OpenAI-compatible HTTP call to the provider in the saved settings.
    Provider,
}

impl BackendKind {
    fn parse(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "echo" => Ok(BackendKind::Echo),
            "provider" => Ok(BackendKind::Provider),
            other => Err(anyhow::anyhow!(
                "Unsupported FINDEX_BACKEND '{}', expected 'echo' or 'provider'",
                other
            )),
        }
    }
}

/// Process-level configuration, read from the environment.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub data_dir: PathBuf,
    pub backend: BackendKind,
    pub echo_delay: Duration,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let data_dir = match lookup("FINDEX_DATA_DIR") {
            Some(dir) => PathBuf::from(dir),
            None => default_data_dir(),
        };
        let backend = match lookup("FINDEX_BACKEND") {
            Some(value) => BackendKind::parse(&value)?,
            None => BackendKind::Echo,
        };
        let echo_delay = match lookup("FINDEX_ECHO_DELAY_MS") {
            Some(ms) => Duration::from_millis(
                ms.trim()
                    .parse()
                    .with_context(|| format!("Invalid FINDEX_ECHO_DELAY_MS '{}'", ms))?,
            ),
            None => Duration::ZERO,
        };
        Ok(Self {
            data_dir,
            backend,
            echo_delay,
        })
    }

    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join(DB_FILE_NAME)
    }
}

fn default_data_dir() -> PathBuf {
    ProjectDirs::from("ai", "Findex", "findex-chat")
        .map(|dirs| dirs.data_local_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from("."))
}

// --- API Key Retrieval ---

const KEYRING_SERVICE: &str = "findex_api_key";

/// Resolves the API key recorded for `provider`.
///
/// The stored value is either the secret itself, `env:NAME` to read an
/// environment variable, or `keyring` to read the OS keyring. Providers that
/// run without credentials resolve to `None` when nothing is recorded.
pub fn resolve_api_key(settings: &Settings, provider: Provider) -> Result<Option<String>> {
    resolve_api_key_in(KEYRING_SERVICE, settings, provider)
}

fn resolve_api_key_in(service: &str, settings: &Settings, provider: Provider) -> Result<Option<String>> {
    let Some(stored) = settings.api_key(provider) else {
        if provider.requires_api_key() {
            return Err(anyhow::anyhow!(
                "API key not set for {}. Please set it in settings.",
                provider.display_name()
            ));
        }
        return Ok(None);
    };

    match stored {
        ref_str if ref_str.starts_with("env:") => {
            let env_var_name = ref_str.trim_start_matches("env:");
            log::debug!("Retrieving API key from environment variable: {}", env_var_name);
            std::env::var(env_var_name).map(Some).context(format!(
                "Failed to get API key from environment variable '{}'",
                env_var_name
            ))
        }
        "keyring" => {
            let entry = Entry::new(service, provider.as_str())
                .context("Failed to create keyring entry")?;
            log::debug!("Retrieving API key from keyring for {}", provider);
            entry.get_password().map(Some).context(format!(
                "Failed to get API key from keyring for '{}'. Please set it in settings.",
                provider.display_name()
            ))
        }
        literal => Ok(Some(literal.to_string())),
    }
}

/// Stores an API key in the OS keyring; record `keyring` as the provider's key to use it.
pub fn store_api_key_in_keyring(provider: Provider, api_key: &str) -> Result<()> {
    store_api_key_in(KEYRING_SERVICE, provider, api_key)
}

fn store_api_key_in(service: &str, provider: Provider, api_key: &str) -> Result<()> {
    let entry = Entry::new(service, provider.as_str())
        .context("Failed to create keyring entry for setting password")?;
    log::info!("Setting API key in keyring for {}", provider);
    entry.set_password(api_key).context(format!(
        "Failed to set API key in keyring for '{}'",
        provider.display_name()
    ))
}
