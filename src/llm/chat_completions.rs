//! `OpenAI` Chat Completions backend.
//!
//! Implements [`InferenceBackend`] against `/v1/chat/completions` with a
//! single non-streaming request per call. The run engine only needs the
//! final text, so no SSE framing is involved.

use anyhow::{Context, anyhow};
use serde::Deserialize;

use super::{InferenceBackend, LlmSettings, Message};

/// Backend for `OpenAI`-compatible Chat Completions endpoints.
#[derive(Clone)]
pub struct ChatCompletionsBackend {
    http: reqwest::Client,
    settings: LlmSettings,
}

impl std::fmt::Debug for ChatCompletionsBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatCompletionsBackend")
            .field("settings", &self.settings)
            .finish()
    }
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

impl ChatCompletionsBackend {
    /// Create a new Chat Completions backend with the given settings.
    #[must_use]
    pub fn new(settings: LlmSettings) -> Self {
        Self {
            http: reqwest::Client::new(),
            settings,
        }
    }

    fn url(&self) -> String {
        chat_url(&self.settings.base_url)
    }

    fn request_body(&self, history: &[Message]) -> serde_json::Value {
        let mut body = serde_json::json!({
            "model": self.settings.model,
            "stream": false,
            "messages": history,
        });
        if let Some(t) = self.settings.temperature {
            body["temperature"] = serde_json::json!(t);
        }
        body
    }
}

/// Build the chat completions URL, tolerating base URLs that already end in `/v1`.
fn chat_url(base_url: &str) -> String {
    let base = base_url.trim_end_matches('/');
    if base.ends_with("/v1") {
        format!("{base}/chat/completions")
    } else {
        format!("{base}/v1/chat/completions")
    }
}

#[async_trait::async_trait]
impl InferenceBackend for ChatCompletionsBackend {
    async fn complete(&self, history: &[Message]) -> anyhow::Result<String> {
        let mut rb = self.http.post(self.url()).json(&self.request_body(history));
        if let Some(k) = &self.settings.api_key {
            rb = rb.bearer_auth(k);
        }

        let resp: CompletionResponse = rb
            .send()
            .await
            .context("chat completions request failed")?
            .error_for_status()?
            .json()
            .await
            .context("chat completions response was not valid JSON")?;

        resp.choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| anyhow!("chat completions response had no message content"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::MessageRole;

    fn settings() -> LlmSettings {
        LlmSettings {
            base_url: "https://api.openai.com".to_string(),
            api_key: Some("sk-test".to_string()),
            model: "gpt-4o".to_string(),
            temperature: Some(0.2),
        }
    }

    #[test]
    fn test_chat_url() {
        assert_eq!(
            chat_url("https://api.openai.com/"),
            "https://api.openai.com/v1/chat/completions"
        );
        assert_eq!(
            chat_url("http://localhost:11434/v1"),
            "http://localhost:11434/v1/chat/completions"
        );
    }

    #[test]
    fn test_request_body_carries_history() {
        let backend = ChatCompletionsBackend::new(settings());
        let body = backend.request_body(&[
            Message::system("You are an underwriter."),
            Message::user("Review the file."),
        ]);

        assert_eq!(body["model"], "gpt-4o");
        assert_eq!(body["stream"], false);
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][1]["content"], "Review the file.");
        assert!(body["temperature"].is_number());
    }

    #[test]
    fn test_response_parsing() {
        let json = r#"{"choices":[{"message":{"role":"assistant","content":"Approved."}}]}"#;
        let resp: CompletionResponse = serde_json::from_str(json).unwrap();
        assert_eq!(resp.choices[0].message.content.as_deref(), Some("Approved."));
        assert_eq!(MessageRole::Assistant.to_string(), "assistant");
    }

    #[test]
    fn test_debug_redacts_key() {
        let backend = ChatCompletionsBackend::new(settings());
        let dbg = format!("{backend:?}");
        assert!(!dbg.contains("sk-test"));
    }
}
