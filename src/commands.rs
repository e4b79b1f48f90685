// Commands exposed to the terminal host

use crate::config;
use crate::models::{Agent, ChatThread, Provider, Sender};
use crate::settings::Settings;
use crate::state::AppState;
use anyhow::{anyhow, Context, Result};

pub const HELP: &str = "\
Commands:
  /new                      start a new thread
  /threads                  list threads (newest first)
  /switch <n|id>            make a thread active
  /delete <n|id>            delete a thread
  /clear                    clear the active thread
  /settings                 show the settings draft
  /agent <id>               set the agent (react, youtube, github, website, web-scroller, docs)
  /url [url]                set or unset the context URL
  /use <id> [url]           switch agent (and URL) and save right away
  /provider <id>            set the provider (resets the model)
  /model <id>               set the model
  /key <provider> <key>     record an API key (or env:NAME, or keyring)
  /keyring <provider> <key> store a key in the OS keyring and reference it
  /endpoint <provider> <url> record a custom endpoint
  /save                     validate and save the draft
  /reset                    restore default settings and drop all keys
  /help                     show this help
  /quit                     exit
Anything else is sent as a message.";

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Send(String),
    NewThread,
    ListThreads,
    Switch(String),
    Delete(String),
    Clear,
    ShowSettings,
    SetAgent(Agent),
    SetUrl(Option<String>),
    UseAgent(Agent, Option<String>),
    SetProvider(Provider),
    SetModel(String),
    SetKey(Provider, String),
    StoreKeyInKeyring(Provider, String),
    SetEndpoint(Provider, String),
    Save,
    Reset,
    Help,
    Quit,
}

/// What the host should do after a command ran.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Continue(String),
    Quit,
}

/// Parses one input line. Blank lines yield `None`.
pub fn parse_command(line: &str) -> Result<Option<Command>> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    let Some(rest) = line.strip_prefix('/') else {
        return Ok(Some(Command::Send(line.to_string())));
    };

    let mut parts = rest.split_whitespace();
    let name = parts.next().unwrap_or_default();
    let args: Vec<&str> = parts.collect();

    let command = match (name, args.as_slice()) {
        ("new", []) => Command::NewThread,
        ("threads", []) => Command::ListThreads,
        ("switch", [target]) => Command::Switch(target.to_string()),
        ("delete", [target]) => Command::Delete(target.to_string()),
        ("clear", []) => Command::Clear,
        ("settings", []) => Command::ShowSettings,
        ("agent", [agent]) => Command::SetAgent(agent.parse()?),
        ("url", []) => Command::SetUrl(None),
        ("url", [url]) => Command::SetUrl(Some(url.to_string())),
        ("use", [agent]) => Command::UseAgent(agent.parse()?, None),
        ("use", [agent, url]) => Command::UseAgent(agent.parse()?, Some(url.to_string())),
        ("provider", [provider]) => Command::SetProvider(provider.parse()?),
        ("model", [model]) => Command::SetModel(model.to_string()),
        ("key", [provider, key]) => Command::SetKey(provider.parse()?, key.to_string()),
        ("keyring", [provider, key]) => {
            Command::StoreKeyInKeyring(provider.parse()?, key.to_string())
        }
        ("endpoint", [provider, url]) => Command::SetEndpoint(provider.parse()?, url.to_string()),
        ("save", []) => Command::Save,
        ("reset", []) => Command::Reset,
        ("help", []) => Command::Help,
        ("quit" | "exit", []) => Command::Quit,
        _ => return Err(anyhow!("Unknown command or wrong arguments: /{}. Try /help.", rest)),
    };
    Ok(Some(command))
}

/// Runs commands against an [`AppState`], keeping an unsaved settings draft.
pub struct CommandHost {
    state: AppState,
    draft: Settings,
}

impl CommandHost {
    pub async fn new(state: AppState) -> Self {
        let draft = state.settings.lock().await.settings().clone();
        Self { state, draft }
    }

    pub fn draft(&self) -> &Settings {
        &self.draft
    }

    /// Executes `command`. Failures become messages for the user; nothing here is fatal.
    pub async fn execute(&mut self, command: Command) -> Outcome {
        match self.run(command).await {
            Ok(outcome) => outcome,
            Err(e) => {
                log::error!("Command failed: {:?}", e);
                Outcome::Continue(format!("Error: {:#}", e))
            }
        }
    }

    async fn run(&mut self, command: Command) -> Result<Outcome> {
        let text = match command {
            Command::Quit => return Ok(Outcome::Quit),
            Command::Help => HELP.to_string(),
            Command::Send(content) => match self.state.send(&content).await {
                Ok(Some(reply)) => format!("ai> {}", reply),
                Ok(None) => "(still waiting for the previous reply)".to_string(),
                Err(e) => format!("Error: {}. Please try again.", e),
            },
            Command::NewThread => {
                let id = self.state.threads.lock().await.create_thread().await;
                format!("Started thread {}", id)
            }
            Command::ListThreads => {
                let threads = self.state.threads.lock().await;
                format_thread_list(threads.threads(), threads.active_thread_id())
            }
            Command::Switch(target) => {
                let mut threads = self.state.threads.lock().await;
                let id = resolve_thread(threads.threads(), &target)?;
                threads.select_thread(&id).await;
                let thread = threads
                    .active_thread()
                    .context("Selected thread disappeared")?;
                format_transcript(thread)
            }
            Command::Delete(target) => {
                let mut threads = self.state.threads.lock().await;
                let id = resolve_thread(threads.threads(), &target)?;
                threads.delete_thread(&id).await;
                format!("Deleted thread {}", id)
            }
            Command::Clear => {
                self.state.threads.lock().await.clear_current_thread().await;
                "Cleared the active thread".to_string()
            }
            Command::ShowSettings => format_settings(&self.draft),
            Command::SetAgent(agent) => {
                self.draft.agent = agent;
                let hint = if agent.requires_url() { " (needs /url)" } else { "" };
                format!("Agent set to {}{}", agent.display_name(), hint)
            }
            Command::SetUrl(url) => {
                self.draft.url = url;
                match self.draft.url() {
                    Some(url) => format!("URL set to {}", url),
                    None => "URL cleared".to_string(),
                }
            }
            Command::UseAgent(agent, url) => {
                // Starts from the saved settings so other draft edits stay unsaved
                let mut store = self.state.settings.lock().await;
                let mut next = store.settings().clone();
                next.agent = agent;
                next.url = url;
                match store.save(next).await {
                    Ok(()) => {
                        self.draft.agent = agent;
                        self.draft.url = store.settings().url.clone();
                        format!("Now using {}", agent.display_name())
                    }
                    Err(e) => format!("{} Agent unchanged.", e),
                }
            }
            Command::SetProvider(provider) => {
                self.draft.set_provider(provider);
                format!(
                    "Provider set to {}, model reset to {}",
                    provider.display_name(),
                    self.draft.model()
                )
            }
            Command::SetModel(model) => {
                self.draft.set_model(&model)?;
                format!("Model set to {}", model)
            }
            Command::SetKey(provider, key) => {
                self.draft.set_api_key(provider, &key);
                format!("API key recorded for {}", provider.display_name())
            }
            Command::StoreKeyInKeyring(provider, key) => {
                config::store_api_key_in_keyring(provider, &key)?;
                self.draft.set_api_key(provider, "keyring");
                format!("API key for {} stored in the keyring", provider.display_name())
            }
            Command::SetEndpoint(provider, url) => {
                self.draft.set_endpoint(provider, &url);
                format!("Endpoint for {} set to {}", provider.display_name(), url)
            }
            Command::Save => {
                let mut store = self.state.settings.lock().await;
                match store.save(self.draft.clone()).await {
                    Ok(()) => "Settings saved".to_string(),
                    Err(e) => format!("{} Fix it and /save again.", e),
                }
            }
            Command::Reset => {
                let mut store = self.state.settings.lock().await;
                store.clear().await;
                self.draft = store.settings().clone();
                "All settings and API keys have been cleared".to_string()
            }
        };
        Ok(Outcome::Continue(text))
    }
}

// Accepts a 1-based position from /threads or a thread id
fn resolve_thread(threads: &[ChatThread], target: &str) -> Result<String> {
    if let Ok(position) = target.parse::<usize>() {
        return position
            .checked_sub(1)
            .and_then(|index| threads.get(index))
            .map(|t| t.id().to_string())
            .with_context(|| format!("No thread at position {}", position));
    }
    threads
        .iter()
        .find(|t| t.id() == target)
        .map(|t| t.id().to_string())
        .with_context(|| format!("No thread with id {}", target))
}

fn format_thread_list(threads: &[ChatThread], active: Option<&str>) -> String {
    if threads.is_empty() {
        return "No threads yet".to_string();
    }
    threads
        .iter()
        .enumerate()
        .map(|(index, thread)| {
            let marker = if Some(thread.id()) == active { "*" } else { " " };
            format!(
                "{}{:>3}. {} ({} messages, {}) {}",
                marker,
                index + 1,
                thread.title(),
                thread.message_count(),
                thread.timestamp().format("%Y-%m-%d"),
                thread.last_message()
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn format_transcript(thread: &ChatThread) -> String {
    let mut out = format!("== {} ==", thread.title());
    for message in thread.messages() {
        let who = match message.sender {
            Sender::User => "you",
            Sender::Ai => "ai",
        };
        out.push_str(&format!("\n{}> {}", who, message.content));
    }
    out
}

fn format_settings(settings: &Settings) -> String {
    let keys = settings
        .providers_with_keys()
        .map(|p| p.as_str())
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "agent: {}\nurl: {}\nprovider: {}\nmodel: {} (available: {})\nendpoint: {}\nkeys for: {}",
        settings.agent,
        settings.url().unwrap_or("-"),
        settings.provider(),
        settings.model(),
        settings.provider().models().join(", "),
        settings.endpoint(settings.provider()).unwrap_or("-"),
        if keys.is_empty() { "-" } else { keys.as_str() },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::EchoBackend;
    use crate::storage::MemoryStore;
    use std::sync::Arc;
    use std::time::Duration;

    async fn host() -> CommandHost {
        let state = AppState::new(
            Arc::new(MemoryStore::new()),
            Arc::new(EchoBackend::new(Duration::ZERO)),
        )
        .await
        .unwrap();
        CommandHost::new(state).await
    }

    fn text(outcome: Outcome) -> String {
        match outcome {
            Outcome::Continue(text) => text,
            Outcome::Quit => panic!("unexpected quit"),
        }
    }

    #[test]
    fn parses_plain_text_as_message() {
        assert_eq!(
            parse_command("  hello there ").unwrap(),
            Some(Command::Send("hello there".to_string()))
        );
        assert_eq!(parse_command("   ").unwrap(), None);
    }

    #[test]
    fn parses_slash_commands() {
        assert_eq!(parse_command("/new").unwrap(), Some(Command::NewThread));
        assert_eq!(
            parse_command("/agent web-scroller").unwrap(),
            Some(Command::SetAgent(Agent::WebScroller))
        );
        assert_eq!(
            parse_command("/key gemini env:GEMINI_KEY").unwrap(),
            Some(Command::SetKey(Provider::Gemini, "env:GEMINI_KEY".to_string()))
        );
        assert_eq!(parse_command("/url").unwrap(), Some(Command::SetUrl(None)));
        assert_eq!(
            parse_command("/use github https://github.com/findex").unwrap(),
            Some(Command::UseAgent(
                Agent::Github,
                Some("https://github.com/findex".to_string())
            ))
        );
        assert_eq!(parse_command("/exit").unwrap(), Some(Command::Quit));
    }

    #[test]
    fn rejects_bad_commands() {
        assert!(parse_command("/agent bing").is_err());
        assert!(parse_command("/switch").is_err());
        assert!(parse_command("/frobnicate").is_err());
    }

    #[tokio::test]
    async fn save_reports_missing_key_and_keeps_stored_settings() {
        let mut host = host().await;
        host.execute(Command::SetProvider(Provider::Gemini)).await;
        let reply = text(host.execute(Command::Save).await);
        assert!(reply.contains("Gemini requires an API key"));
        assert_eq!(host.state.settings.lock().await.settings().provider(), Provider::OpenAi);

        host.execute(Command::SetKey(Provider::Gemini, "AI-key".into())).await;
        assert_eq!(text(host.execute(Command::Save).await), "Settings saved");
        assert_eq!(host.state.settings.lock().await.settings().provider(), Provider::Gemini);
    }

    #[tokio::test]
    async fn unknown_model_is_reported_not_fatal() {
        let mut host = host().await;
        let reply = text(host.execute(Command::SetModel("gemini-2.5-pro".into())).await);
        assert!(reply.starts_with("Error:"));
        assert_eq!(host.draft().model(), "gpt-4.1");
    }

    #[tokio::test]
    async fn conversation_flow_through_commands() {
        let mut host = host().await;
        let reply = text(host.execute(Command::Send("what is findex".into())).await);
        assert!(reply.starts_with("ai> "));

        host.execute(Command::NewThread).await;
        let listing = text(host.execute(Command::ListThreads).await);
        assert!(listing.contains("New Chat"));
        assert!(listing.contains("what is findex"));

        let transcript = text(host.execute(Command::Switch("2".into())).await);
        assert!(transcript.contains("you> what is findex"));

        host.execute(Command::Delete("1".into())).await;
        assert_eq!(host.state.threads.lock().await.threads().len(), 1);
        assert!(text(host.execute(Command::Switch("9".into())).await).starts_with("Error:"));
    }

    #[tokio::test]
    async fn use_switches_the_saved_agent_immediately() {
        let mut host = host().await;
        host.execute(Command::SetKey(Provider::OpenAi, "sk-1".into())).await;
        host.execute(Command::Save).await;

        let reply = text(host.execute(Command::UseAgent(Agent::Youtube, None)).await);
        assert!(reply.contains("YouTube agent requires a URL"));
        assert_eq!(host.state.settings.lock().await.settings().agent, Agent::React);

        host.execute(Command::SetModel("gpt-4o".into())).await;
        let url = "https://youtu.be/abc".to_string();
        let reply = text(host.execute(Command::UseAgent(Agent::Youtube, Some(url.clone()))).await);
        assert_eq!(reply, "Now using YouTube");
        {
            let store = host.state.settings.lock().await;
            assert_eq!(store.settings().agent, Agent::Youtube);
            assert_eq!(store.settings().url(), Some(url.as_str()));
            assert_eq!(store.settings().model(), "gpt-4.1");
        }
        assert_eq!(host.draft().agent, Agent::Youtube);
        assert_eq!(host.draft().model(), "gpt-4o");

        let reply = text(host.execute(Command::Send("summarise".into())).await);
        assert!(reply.contains(&url));
    }

    #[tokio::test]
    async fn reset_restores_defaults_in_draft() {
        let mut host = host().await;
        host.execute(Command::SetKey(Provider::OpenAi, "sk-1".into())).await;
        host.execute(Command::Save).await;
        host.execute(Command::Reset).await;
        assert_eq!(host.draft(), &Settings::default());
        assert_eq!(host.execute(Command::Quit).await, Outcome::Quit);
    }
}
