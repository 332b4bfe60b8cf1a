pub mod extract;

use reqwest::Client as Http;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

pub use extract::{salvage_json, CONVERSATION_PROMPT, LAB_REPORT_PROMPT};

pub const DEFAULT_OPENROUTER_MODEL: &str = "meta-llama/llama-3.3-8b-instruct:free";

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("{0} not set")]
    MissingKey(&'static str),

    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("{provider} {status}: {body}")]
    Status { provider: &'static str, status: u16, body: String },

    #[error("unexpected response shape: {0}")]
    Shape(String),

    #[error("no JSON object in model output")]
    NoJson,

    #[error("model output is not the expected JSON: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Clone, Debug)]
pub enum Provider {
    OpenRouter,
}

impl Provider {
    fn name(&self) -> &'static str {
        match self {
            Provider::OpenRouter => "openrouter",
        }
    }

    fn default_base_url(&self) -> &'static str {
        match self {
            Provider::OpenRouter => "https://openrouter.ai/api/v1",
        }
    }
}

#[derive(Clone, Debug)]
pub struct Client {
    http: Http,
    provider: Provider,
    api_key: String,
    model: String,
    base_url: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

#[derive(Clone, Debug, Default)]
pub struct ChatOptions {
    pub temperature: Option<f32>,
    /// If true, request JSON-only output (`json_object`) when the model supports it.
    pub json_object: bool,
}

impl Client {
    pub fn new(provider: Provider, api_key: String, model: String) -> Result<Self, LlmError> {
        let base_url = provider.default_base_url().to_string();
        Ok(Self {
            http: Http::builder().pool_max_idle_per_host(8).timeout(Duration::from_secs(60)).build()?,
            provider,
            api_key,
            model,
            base_url,
        })
    }

    /// Convenience: `OPENROUTER_API_KEY`, and `OPENROUTER_MODEL` unless a
    /// model is given.
    pub fn from_env_openrouter(model: Option<&str>) -> Result<Self, LlmError> {
        let key = std::env::var("OPENROUTER_API_KEY").map_err(|_| LlmError::MissingKey("OPENROUTER_API_KEY"))?;
        let model = model
            .map(str::to_string)
            .or_else(|| std::env::var("OPENROUTER_MODEL").ok())
            .unwrap_or_else(|| DEFAULT_OPENROUTER_MODEL.to_string());
        Self::new(Provider::OpenRouter, key, model)
    }

    /// Point the client at another OpenAI-compatible endpoint.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub async fn chat(&self, messages: &[ChatMessage], opts: ChatOptions) -> Result<String, LlmError> {
        match self.provider {
            Provider::OpenRouter => self.chat_completions(messages, opts).await,
        }
    }

    async fn chat_completions(&self, messages: &[ChatMessage], opts: ChatOptions) -> Result<String, LlmError> {
        let url = format!("{}/chat/completions", self.base_url);

        // content goes out as an array of text parts
        let msgs: Vec<Value> = messages
            .iter()
            .map(|m| json!({ "role": m.role, "content": [{ "type": "text", "text": m.content }] }))
            .collect();

        let mut body = json!({
            "model": self.model,
            "messages": msgs,
        });
        if let Some(t) = opts.temperature {
            body["temperature"] = json!(t);
        }
        if opts.json_object {
            body["response_format"] = json!({ "type": "json_object" });
        }

        debug!(provider = self.provider.name(), model = %self.model, "chat completion request");
        let resp = self.http.post(url).bearer_auth(&self.api_key).json(&body).send().await?;

        let status = resp.status();
        if !status.is_success() {
            return Err(LlmError::Status {
                provider: self.provider.name(),
                status: status.as_u16(),
                body: resp.text().await.unwrap_or_default(),
            });
        }

        let v: Value = resp.json().await?;
        message_text(&v)
    }

    /// Simple helper for one-shot prompts.
    pub async fn simple(&self, prompt: &str) -> Result<String, LlmError> {
        let msgs = vec![ChatMessage { role: Role::User, content: prompt.to_string() }];
        self.chat(&msgs, ChatOptions::default()).await
    }
}

/// `choices[0].message.content` as a string, or its text parts joined by
/// newlines; some models only fill the legacy `text` field.
fn message_text(v: &Value) -> Result<String, LlmError> {
    let message = v
        .pointer("/choices/0/message")
        .ok_or_else(|| LlmError::Shape("missing choices[0].message".into()))?;

    match message.get("content") {
        Some(Value::String(s)) => Ok(s.clone()),
        Some(Value::Array(parts)) => Ok(parts
            .iter()
            .filter(|p| p.get("type").and_then(Value::as_str) == Some("text"))
            .filter_map(|p| p.get("text").and_then(Value::as_str))
            .collect::<Vec<_>>()
            .join("\n")),
        _ => message
            .get("text")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| LlmError::Shape("message has no text content".into())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_text_string_content() {
        let v = json!({"choices": [{"message": {"role": "assistant", "content": "{\"symptoms\": []}"}}]});
        assert_eq!(message_text(&v).unwrap(), "{\"symptoms\": []}");
    }

    #[test]
    fn test_message_text_joins_text_parts() {
        let v = json!({"choices": [{"message": {"content": [
            {"type": "text", "text": "first"},
            {"type": "image_url", "image_url": {"url": "x"}},
            {"type": "text", "text": "second"}
        ]}}]});
        assert_eq!(message_text(&v).unwrap(), "first\nsecond");
    }

    #[test]
    fn test_message_text_legacy_field() {
        let v = json!({"choices": [{"message": {"content": null, "text": "legacy"}}]});
        assert_eq!(message_text(&v).unwrap(), "legacy");

        let empty = json!({"choices": []});
        assert!(matches!(message_text(&empty), Err(LlmError::Shape(_))));
    }
}
