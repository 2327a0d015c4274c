//! Chat-completion client.
//!
//! [`CompletionClient`] is the seam between the pipeline and the hosted
//! LLM. [`OpenAiChatClient`] speaks the OpenAI-compatible
//! `/chat/completions` wire format:
//!
//! ```json
//! { "model": "gpt-4o", "messages": [{ "role": "system", "content": "..." }] }
//! ```
//!
//! The response text is `choices[0].message.content`, returned verbatim.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::{ApiKey, CompletionConfig};
use crate::error::{Error, Result};
use crate::http;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

/// Request body for `/chat/completions`.
#[derive(Debug, Serialize)]
pub struct CompletionRequest<'a> {
    pub model: &'a str,
    pub messages: &'a [ChatMessage],
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

/// Sends an assembled prompt to an LLM and returns the generated text.
#[async_trait]
pub trait CompletionClient: Send + Sync {
    fn model(&self) -> &str;

    /// One request, full text back; no streaming, no history.
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String>;
}

pub struct OpenAiChatClient {
    client: reqwest::Client,
    url: String,
    model: String,
    api_key: ApiKey,
    max_retries: u32,
}

impl OpenAiChatClient {
    pub fn new(config: &CompletionConfig, api_key: ApiKey) -> Result<Self> {
        let client = http::client_with_timeout(config.timeout_secs)
            .map_err(|e| Error::Completion(format!("{:#}", e)))?;
        Ok(Self {
            client,
            url: http::join_url(&config.base_url, "chat/completions"),
            model: config.model.clone(),
            api_key,
            max_retries: config.max_retries,
        })
    }
}

#[async_trait]
impl CompletionClient for OpenAiChatClient {
    fn model(&self) -> &str {
        &self.model
    }

    async fn complete(&self, messages: &[ChatMessage]) -> Result<String> {
        let request = CompletionRequest {
            model: &self.model,
            messages,
        };
        debug!(model = %self.model, messages = messages.len(), "sending completion request");

        let response: CompletionResponse = http::post_json(
            &self.client,
            &self.url,
            Some(self.api_key.expose()),
            &request,
            self.max_retries,
        )
        .await
        .map_err(|e| Error::Completion(format!("{:#}", e)))?;

        response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| Error::Completion("response contained no message content".to_string()))
    }
}
