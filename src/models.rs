use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

/// Title given to a thread before its first message arrives.
pub const DEFAULT_TITLE: &str = "New Chat";

/// Maximum number of characters kept in a thread's `last_message` preview.
pub const PREVIEW_CHARS: usize = 100;

const TITLE_WORDS: usize = 4;
const TITLE_MARKER: &str = "...";

#[derive(Debug, Error, PartialEq, Eq)]
#[error("Unknown {kind} '{value}'")]
pub struct UnknownId {
    pub kind: &'static str,
    pub value: String,
}

// Who wrote a message
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Sender {
    User,
    Ai,
}

impl Sender {
    pub fn as_str(&self) -> &'static str {
        match self {
            Sender::User => "user",
            Sender::Ai => "ai",
        }
    }
}

/// Context source a conversation is routed through.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum Agent {
    /// Generic reasoning agent, no external context.
    #[default]
    #[serde(alias = "generic")]
    React,
    Youtube,
    Github,
    Website,
    WebScroller,
    /// Answers from uploaded documents.
    Docs,
}

impl Agent {
    pub const ALL: [Agent; 6] = [
        Agent::React,
        Agent::Youtube,
        Agent::Github,
        Agent::Website,
        Agent::WebScroller,
        Agent::Docs,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Agent::React => "react",
            Agent::Youtube => "youtube",
            Agent::Github => "github",
            Agent::Website => "website",
            Agent::WebScroller => "web-scroller",
            Agent::Docs => "docs",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Agent::React => "React Agent",
            Agent::Youtube => "YouTube",
            Agent::Github => "GitHub",
            Agent::Website => "Website",
            Agent::WebScroller => "Web Scroller",
            Agent::Docs => "Docs",
        }
    }

    /// Scraper-style agents need a URL to read their context from.
    pub fn requires_url(&self) -> bool {
        matches!(
            self,
            Agent::Youtube | Agent::Github | Agent::Website | Agent::WebScroller
        )
    }
}

impl fmt::Display for Agent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Agent {
    type Err = UnknownId;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let id = match s.trim() {
            "generic" => "react",
            other => other,
        };
        Agent::ALL
            .into_iter()
            .find(|agent| agent.as_str() == id)
            .ok_or_else(|| UnknownId {
                kind: "agent",
                value: s.to_string(),
            })
    }
}

/// AI vendor the user picks, each with its own models and credential needs.
#[derive(
    Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash,
)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    #[default]
    OpenAi,
    Gemini,
    Claude,
    Ollama,
    DeepSeek,
    OpenRouter,
}

impl Provider {
    pub const ALL: [Provider; 6] = [
        Provider::OpenAi,
        Provider::Gemini,
        Provider::Claude,
        Provider::Ollama,
        Provider::DeepSeek,
        Provider::OpenRouter,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::OpenAi => "openai",
            Provider::Gemini => "gemini",
            Provider::Claude => "claude",
            Provider::Ollama => "ollama",
            Provider::DeepSeek => "deepseek",
            Provider::OpenRouter => "openrouter",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Provider::OpenAi => "OpenAI",
            Provider::Gemini => "Gemini",
            Provider::Claude => "Claude",
            Provider::Ollama => "Ollama",
            Provider::DeepSeek => "DeepSeek",
            Provider::OpenRouter => "OpenRouter",
        }
    }

    /// Models offered for this provider. The first entry is the default.
    pub fn models(&self) -> &'static [&'static str] {
        match self {
            Provider::OpenAi => &["gpt-4.1", "gpt-4.1-mini", "gpt-4o", "o4-mini"],
            Provider::Gemini => &["gemini-2.5-pro", "gemini-2.5-flash"],
            Provider::Claude => &["claude-sonnet-4-0", "claude-3-5-haiku-latest"],
            Provider::Ollama => &["llama3.1", "mistral", "qwen2.5"],
            Provider::DeepSeek => &["deepseek-chat", "deepseek-reasoner"],
            Provider::OpenRouter => &["openrouter/auto", "meta-llama/llama-3.1-70b-instruct"],
        }
    }

    pub fn default_model(&self) -> &'static str {
        match self {
            Provider::OpenAi => "gpt-4.1",
            Provider::Gemini => "gemini-2.5-pro",
            Provider::Claude => "claude-sonnet-4-0",
            Provider::Ollama => "llama3.1",
            Provider::DeepSeek => "deepseek-chat",
            Provider::OpenRouter => "openrouter/auto",
        }
    }

    pub fn supports_model(&self, model: &str) -> bool {
        self.models().contains(&model)
    }

    /// Locally hosted providers run without credentials.
    pub fn requires_api_key(&self) -> bool {
        !matches!(self, Provider::Ollama)
    }

    pub fn requires_endpoint(&self) -> bool {
        matches!(self, Provider::Ollama | Provider::OpenRouter)
    }

    /// OpenAI-compatible base URL used when no custom endpoint is recorded.
    pub fn default_base_url(&self) -> Option<&'static str> {
        match self {
            Provider::OpenAi => Some("https://api.openai.com/v1"),
            Provider::Gemini => Some("https://generativelanguage.googleapis.com/v1beta/openai"),
            Provider::Claude => Some("https://api.anthropic.com/v1"),
            Provider::DeepSeek => Some("https://api.deepseek.com/v1"),
            Provider::OpenRouter => Some("https://openrouter.ai/api/v1"),
            Provider::Ollama => None,
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Provider {
    type Err = UnknownId;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Provider::ALL
            .into_iter()
            .find(|provider| provider.as_str() == s.trim())
            .ok_or_else(|| UnknownId {
                kind: "provider",
                value: s.to_string(),
            })
    }
}

// Represents a single message in a thread
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Message {
    pub id: String,
    pub sender: Sender,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    // Provenance tags: the agent and context URL the exchange ran with
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent: Option<Agent>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

impl Message {
    pub fn new(
        sender: Sender,
        content: impl Into<String>,
        agent: Option<Agent>,
        url: Option<String>,
    ) -> Self {
        Self {
            id: format!("msg-{}-{}", sender.as_str(), Uuid::new_v4().simple()),
            sender,
            content: content.into(),
            timestamp: Utc::now(),
            agent,
            url,
        }
    }

    pub fn user(content: impl Into<String>, agent: Agent, url: Option<String>) -> Self {
        Self::new(Sender::User, content, Some(agent), url)
    }

    pub fn ai(content: impl Into<String>, agent: Agent, url: Option<String>) -> Self {
        Self::new(Sender::Ai, content, Some(agent), url)
    }
}

/// One persisted conversation.
///
/// Fields are private so the derived values (`last_message`, `message_count`
/// and the one-time title) can only change together with `messages`.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ChatThread {
    id: String,
    title: String,
    messages: Vec<Message>,
    last_message: String,
    timestamp: DateTime<Utc>,
    message_count: usize,
}

impl ChatThread {
    pub fn new() -> Self {
        let now = Utc::now();
        Self {
            id: format!("thread-{}-{}", now.timestamp_millis(), Uuid::new_v4().simple()),
            title: DEFAULT_TITLE.to_string(),
            messages: Vec::new(),
            last_message: String::new(),
            timestamp: now,
            message_count: 0,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn last_message(&self) -> &str {
        &self.last_message
    }

    /// Time of the last mutation.
    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn message_count(&self) -> usize {
        self.message_count
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub(crate) fn push_message(&mut self, message: Message) {
        if self.messages.is_empty() {
            self.title = derive_title(&message.content);
        }
        self.last_message = preview(&message.content);
        self.messages.push(message);
        self.message_count = self.messages.len();
        self.timestamp = Utc::now();
    }

    pub(crate) fn reset(&mut self) {
        self.messages.clear();
        self.last_message.clear();
        self.message_count = 0;
        self.title = DEFAULT_TITLE.to_string();
    }

    /// Recomputes derived fields from `messages`. Returns true if anything was off.
    pub(crate) fn repair(&mut self) -> bool {
        let expected_preview = self
            .messages
            .last()
            .map(|m| preview(&m.content))
            .unwrap_or_default();
        let mut repaired = false;
        if self.message_count != self.messages.len() {
            self.message_count = self.messages.len();
            repaired = true;
        }
        if self.last_message != expected_preview {
            self.last_message = expected_preview;
            repaired = true;
        }
        if self.messages.is_empty() && self.title != DEFAULT_TITLE {
            self.title = DEFAULT_TITLE.to_string();
            repaired = true;
        }
        repaired
    }
}

impl Default for ChatThread {
    fn default() -> Self {
        Self::new()
    }
}

fn preview(content: &str) -> String {
    content.chars().take(PREVIEW_CHARS).collect()
}

/// Short thread title taken from the first message: up to four words, with
/// "..." appended when the text had more.
pub fn derive_title(text: &str) -> String {
    let words: Vec<&str> = text.split_whitespace().collect();
    if words.is_empty() {
        return DEFAULT_TITLE.to_string();
    }
    let mut title = words
        .iter()
        .take(TITLE_WORDS)
        .copied()
        .collect::<Vec<_>>()
        .join(" ");
    if words.len() > TITLE_WORDS {
        title.push_str(TITLE_MARKER);
    }
    title
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn title_keeps_short_text_intact() {
        assert_eq!(derive_title("Hello"), "Hello");
        assert_eq!(derive_title("  what is   rust ownership "), "what is rust ownership");
    }

    #[test]
    fn title_marks_truncation_past_four_words() {
        assert_eq!(
            derive_title("explain the borrow checker to me"),
            "explain the borrow checker..."
        );
        assert!(!derive_title("one two three four").ends_with("..."));
        assert!(derive_title("one two three four five").ends_with("..."));
    }

    #[test]
    fn title_is_deterministic() {
        let text = "summarise this repository for a new contributor";
        assert_eq!(derive_title(text), derive_title(text));
    }

    #[test]
    fn blank_text_falls_back_to_default_title() {
        assert_eq!(derive_title("   \n\t"), DEFAULT_TITLE);
    }

    #[test]
    fn push_keeps_count_and_preview_in_sync() {
        let mut thread = ChatThread::new();
        for i in 0..7 {
            thread.push_message(Message::user(format!("message {i}"), Agent::React, None));
            assert_eq!(thread.message_count(), thread.messages().len());
            assert_eq!(thread.last_message(), format!("message {i}"));
        }
    }

    #[test]
    fn title_is_set_only_by_first_message() {
        let mut thread = ChatThread::new();
        assert_eq!(thread.title(), DEFAULT_TITLE);
        thread.push_message(Message::user("How do lifetimes work", Agent::React, None));
        thread.push_message(Message::ai("Lifetimes describe scopes", Agent::React, None));
        assert_eq!(thread.title(), "How do lifetimes work");
    }

    #[test]
    fn preview_is_truncated_without_ellipsis() {
        let mut thread = ChatThread::new();
        let long = "é".repeat(150);
        thread.push_message(Message::user(long, Agent::React, None));
        assert_eq!(thread.last_message().chars().count(), PREVIEW_CHARS);
        assert!(!thread.last_message().ends_with("..."));
    }

    #[test]
    fn repair_fixes_inconsistent_derived_fields() {
        let mut thread = ChatThread::new();
        thread.push_message(Message::user("hi", Agent::React, None));
        thread.message_count = 5;
        thread.last_message = "stale".to_string();
        assert!(thread.repair());
        assert_eq!(thread.message_count(), 1);
        assert_eq!(thread.last_message(), "hi");
        assert!(!thread.repair());
    }

    #[test]
    fn ids_parse_back_from_their_string_form() {
        for agent in Agent::ALL {
            assert_eq!(agent.as_str().parse::<Agent>(), Ok(agent));
        }
        for provider in Provider::ALL {
            assert_eq!(provider.as_str().parse::<Provider>(), Ok(provider));
            assert_eq!(provider.models().first().copied(), Some(provider.default_model()));
        }
        assert!("bing".parse::<Agent>().is_err());
        assert_eq!("generic".parse::<Agent>(), Ok(Agent::React));
    }

    #[test]
    fn serde_ids_match_display_ids() {
        let json = serde_json::to_string(&Agent::WebScroller).unwrap();
        assert_eq!(json, "\"web-scroller\"");
        let json = serde_json::to_string(&Provider::OpenRouter).unwrap();
        assert_eq!(json, "\"openrouter\"");
    }

    #[test]
    fn thread_serializes_with_camel_case_fields() {
        let thread = ChatThread::new();
        let value = serde_json::to_value(&thread).unwrap();
        assert!(value.get("lastMessage").is_some());
        assert!(value.get("messageCount").is_some());
    }
}
