//! Inference backends.
//!
//! The run engine talks to a language model through the [`InferenceBackend`]
//! trait: a conversation history goes in, the assistant's reply text comes
//! out. Streaming, tool execution and provider quirks stay behind the trait.
//!
//! # Backends
//!
//! - [`ChatCompletionsBackend`]: `OpenAI`-compatible Chat Completions API
//!   (`/v1/chat/completions`)
//! - [`ScriptedBackend`]: replays canned replies, for tests and offline runs

pub mod chat_completions;
pub mod scripted;

pub use chat_completions::ChatCompletionsBackend;
pub use scripted::ScriptedBackend;

/// LLM connection and model settings.
#[derive(Clone)]
pub struct LlmSettings {
    /// Base URL for the LLM API (e.g., `https://api.openai.com`).
    pub base_url: String,
    /// Optional API key for authentication.
    pub api_key: Option<String>,
    /// Model identifier (e.g., `gpt-4o`).
    pub model: String,
    /// Sampling temperature, provider default when unset.
    pub temperature: Option<f32>,
}

impl std::fmt::Debug for LlmSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmSettings")
            .field("base_url", &self.base_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "***"))
            .field("model", &self.model)
            .field("temperature", &self.temperature)
            .finish()
    }
}

/// A message in a conversation.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Message {
    /// Role of the message author.
    pub role: MessageRole,
    /// Text content of the message.
    pub content: String,
}

impl Message {
    #[must_use]
    pub fn new(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    #[must_use]
    pub fn system(content: impl Into<String>) -> Self {
        Self::new(MessageRole::System, content)
    }

    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(MessageRole::User, content)
    }

    #[must_use]
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(MessageRole::Assistant, content)
    }
}

/// Role of a message author.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    /// System prompt.
    System,
    /// User message.
    User,
    /// Assistant response.
    Assistant,
    /// Tool response.
    Tool,
}

impl std::fmt::Display for MessageRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::Tool => "tool",
        };
        f.write_str(s)
    }
}

/// Produces assistant replies for a conversation history.
#[async_trait::async_trait]
pub trait InferenceBackend: Send + Sync + std::fmt::Debug {
    /// Complete the conversation and return the assistant's reply text.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the response carries no
    /// usable content.
    async fn complete(&self, history: &[Message]) -> anyhow::Result<String>;
}
