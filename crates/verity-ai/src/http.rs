//! HTTP client for OpenAI-compatible chat-completion endpoints.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use thiserror::Error;
use tracing::debug;

use crate::model::{LanguageModel, ModelError, Prompt, parse_json_reply, with_schema};

#[derive(Error, Debug)]
pub enum ChatError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("server returned {status}: {body}")]
    Server { status: u16, body: String },
    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("response has no message content")]
    Empty,
}

impl From<ChatError> for ModelError {
    fn from(e: ChatError) -> Self {
        match e {
            ChatError::Json(inner) => ModelError::Malformed {
                detail: inner.to_string(),
                raw: String::new(),
            },
            other => ModelError::Call(other.to_string()),
        }
    }
}

/// Client for `/v1/chat/completions` on any OpenAI-compatible server
/// (OpenAI, vLLM, llama.cpp, Ollama).
pub struct ChatClient {
    client: reqwest::Client,
    base_url: String,
    model: String,
    api_key: Option<String>,
    timeout: Duration,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 2],
    temperature: f32,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<Value>,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ReplyMessage,
}

#[derive(Deserialize)]
struct ReplyMessage {
    content: Option<String>,
}

impl ChatClient {
    /// `base_url` should be like `http://localhost:8000` (no trailing slash).
    ///
    /// `timeout` bounds each request end to end.
    pub fn new(base_url: String, model: String, timeout: Duration) -> Result<Self, ChatError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            model,
            api_key: None,
            timeout,
            temperature: 0.0,
            max_tokens: 2048,
        })
    }

    pub fn with_api_key(mut self, key: Option<String>) -> Self {
        self.api_key = key.filter(|k| !k.is_empty());
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    fn request<'a>(&'a self, system: &'a str, user: &'a str, json_mode: bool) -> ChatRequest<'a> {
        ChatRequest {
            model: &self.model,
            messages: [
                ChatMessage {
                    role: "system",
                    content: system,
                },
                ChatMessage {
                    role: "user",
                    content: user,
                },
            ],
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            response_format: json_mode.then(|| json!({"type": "json_object"})),
        }
    }

    async fn complete(&self, body: &ChatRequest<'_>) -> Result<String, ChatError> {
        let url = format!("{}/v1/chat/completions", self.base_url);

        debug!(url = %url, model = %self.model, "chat completion request");
        let mut req = self.client.post(&url).json(body);
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }
        let resp = req.send().await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ChatError::Server {
                status: status.as_u16(),
                body,
            });
        }

        let text = resp.text().await?;
        let parsed: ChatResponse = serde_json::from_str(&text)?;
        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or(ChatError::Empty)
    }

    async fn complete_model(&self, body: &ChatRequest<'_>) -> Result<String, ModelError> {
        match self.complete(body).await {
            Ok(text) => Ok(text),
            Err(ChatError::Http(e)) if e.is_timeout() => Err(ModelError::Timeout(self.timeout)),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl LanguageModel for ChatClient {
    fn name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, prompt: &Prompt) -> Result<String, ModelError> {
        let body = self.request(&prompt.system, &prompt.user, false);
        self.complete_model(&body).await
    }

    async fn generate_structured(
        &self,
        prompt: &Prompt,
        schema: &Value,
    ) -> Result<Value, ModelError> {
        let system = with_schema(&prompt.system, schema);
        let body = self.request(&system, &prompt.user, true);
        let raw = self.complete_model(&body).await?;
        parse_json_reply(&raw)
    }
}
