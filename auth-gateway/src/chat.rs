// auth-gateway/src/chat.rs
//! Forwards authorized chat turns to an OpenAI-compatible completion endpoint.

use async_trait::async_trait;
use common::{HistoryMessage, UpstreamConfig};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ChatError {
    #[error("chat backend is not configured")]
    NotConfigured,
    #[error("HTTP request failed: {0}")]
    Http(String),
    #[error("completion API returned {0}")]
    Api(String),
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

impl From<reqwest::Error> for ChatError {
    fn from(e: reqwest::Error) -> Self {
        ChatError::Http(e.to_string())
    }
}

/// One authorized turn to forward
#[derive(Debug, Clone, Copy)]
pub struct ChatTurn<'a> {
    pub text: &'a str,
    pub history: &'a [HistoryMessage],
    /// Caller passed the stake gate for an elevated mode (image)
    pub elevated: bool,
}

#[async_trait]
pub trait ChatBackend: Send + Sync {
    async fn complete(&self, turn: ChatTurn<'_>) -> Result<String, ChatError>;
}

/// Stand-in when no completion URL is configured; every turn fails
pub struct UnconfiguredBackend;

#[async_trait]
impl ChatBackend for UnconfiguredBackend {
    async fn complete(&self, _: ChatTurn<'_>) -> Result<String, ChatError> {
        Err(ChatError::NotConfigured)
    }
}

#[derive(Debug, Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: Vec<CompletionMessage<'a>>,
    max_tokens: u32,
}

#[derive(Debug, Serialize)]
struct CompletionMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

pub struct CompletionClient {
    url: String,
    api_key: Option<String>,
    model: String,
    elevated_model: Option<String>,
    max_tokens: u32,
    instructions: Option<String>,
    client: reqwest::Client,
}

impl CompletionClient {
    pub fn new(url: String, config: &UpstreamConfig) -> Result<Self, ChatError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            url,
            api_key: config.api_key.clone().filter(|k| !k.is_empty()),
            model: config.model_id.clone(),
            elevated_model: config.elevated_model_id.clone().filter(|m| !m.trim().is_empty()),
            max_tokens: config.max_tokens,
            instructions: config.instructions.clone().filter(|i| !i.trim().is_empty()),
            client,
        })
    }

    pub fn from_config(config: &UpstreamConfig) -> Result<Box<dyn ChatBackend>, ChatError> {
        match config.completion_url.as_deref().filter(|url| !url.trim().is_empty()) {
            Some(url) => Ok(Box::new(Self::new(url.to_string(), config)?)),
            None => {
                tracing::warn!("No completion URL configured; chat requests will fail");
                Ok(Box::new(UnconfiguredBackend))
            }
        }
    }

    fn model(&self, elevated: bool) -> &str {
        match (&self.elevated_model, elevated) {
            (Some(model), true) => model,
            _ => &self.model,
        }
    }

    fn messages<'a>(&'a self, text: &'a str, history: &'a [HistoryMessage]) -> Vec<CompletionMessage<'a>> {
        let mut messages = Vec::with_capacity(history.len() + 2);
        if let Some(instructions) = &self.instructions {
            messages.push(CompletionMessage {
                role: "system",
                content: instructions,
            });
        }
        messages.extend(history.iter().map(|turn| CompletionMessage {
            role: &turn.role,
            content: &turn.content,
        }));
        messages.push(CompletionMessage {
            role: "user",
            content: text,
        });
        messages
    }
}

#[async_trait]
impl ChatBackend for CompletionClient {
    async fn complete(&self, turn: ChatTurn<'_>) -> Result<String, ChatError> {
        let request = CompletionRequest {
            model: self.model(turn.elevated),
            messages: self.messages(turn.text, turn.history),
            max_tokens: self.max_tokens,
        };

        let mut builder = self.client.post(&self.url).json(&request);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ChatError::Api(status.to_string()));
        }

        let body: CompletionResponse = response
            .json()
            .await
            .map_err(|e| ChatError::InvalidResponse(e.to_string()))?;

        body.choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| ChatError::InvalidResponse("no completion choices".to_string()))
    }
}
