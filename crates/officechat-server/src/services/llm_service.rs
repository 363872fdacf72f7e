use anyhow::{anyhow, Result};
use futures::StreamExt;
use reqwest::{Client, Proxy};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::LlmConfig;
use crate::models::chat::PromptMessage;
use crate::services::conversation::{LlmProvider, TextStream};
use crate::utils::error::ChatError;

#[derive(Debug, Serialize)]
pub struct ChatCompletionRequest<'a> {
    pub model: &'a str,
    pub messages: &'a [PromptMessage],
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<usize>,
    pub stream: bool,
}

#[derive(Debug, Deserialize)]
pub struct ChatCompletionChunk {
    #[serde(default)]
    pub choices: Vec<ChoiceChunk>,
}

#[derive(Debug, Deserialize)]
pub struct ChoiceChunk {
    #[serde(default)]
    pub delta: Delta,
}

#[derive(Debug, Default, Deserialize)]
pub struct Delta {
    pub content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: String,
}

/// OpenAI-compatible chat completions client.
#[derive(Clone)]
pub struct LlmService {
    client: Client,
    config: LlmConfig,
}

impl LlmService {
    pub fn new(config: LlmConfig) -> Result<Self, ChatError> {
        // No total timeout for streamed answers
        let mut builder = Client::builder()
            .connect_timeout(Duration::from_secs(config.timeout_seconds))
            .read_timeout(Duration::from_secs(config.timeout_seconds));
        if !config.proxy_url.is_empty() {
            let proxy = Proxy::all(&config.proxy_url)
                .map_err(|e| ChatError::InvalidParam(format!("proxy_url: {}", e)))?;
            builder = builder.proxy(proxy);
        }
        let client = builder
            .build()
            .map_err(|e| ChatError::Internal(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self { client, config })
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.config.base_url.trim_end_matches('/'))
    }

    async fn send(&self, messages: &[PromptMessage], stream: bool) -> Result<reqwest::Response, ChatError> {
        let request = ChatCompletionRequest {
            model: &self.config.text_model,
            messages,
            max_tokens: (self.config.output_max_token > 0).then_some(self.config.output_max_token),
            stream,
        };

        let mut builder = self.client.post(self.endpoint()).json(&request);
        if !self.config.token.is_empty() {
            builder = builder.bearer_auth(&self.config.token);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| ChatError::Llm(format!("Failed to call LLM API: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ChatError::Llm(format!("LLM API error: {} - {}", status, body)));
        }
        Ok(response)
    }

    /// Streams content deltas. SSE lines are reassembled across network
    /// chunks before parsing; `[DONE]` ends the stream.
    pub async fn chat_stream(&self, messages: &[PromptMessage]) -> Result<TextStream, ChatError> {
        debug!("Starting chat stream with {} messages", messages.len());
        let mut body = self.send(messages, true).await?.bytes_stream();

        let stream = async_stream::stream! {
            let mut pending: Vec<u8> = Vec::new();
            'read: while let Some(chunk) = body.next().await {
                let chunk = match chunk {
                    Ok(chunk) => chunk,
                    Err(e) => {
                        yield Err(anyhow!("Stream error: {}", e));
                        break;
                    }
                };
                pending.extend_from_slice(&chunk);

                while let Some(pos) = pending.iter().position(|b| *b == b'\n') {
                    let raw: Vec<u8> = pending.drain(..=pos).collect();
                    let line = String::from_utf8_lossy(&raw);
                    let Some(data) = line.trim().strip_prefix("data:") else {
                        continue;
                    };
                    let data = data.trim();
                    if data == "[DONE]" {
                        break 'read;
                    }
                    match serde_json::from_str::<ChatCompletionChunk>(data) {
                        Ok(chunk) => {
                            let content = chunk
                                .choices
                                .into_iter()
                                .next()
                                .and_then(|c| c.delta.content)
                                .unwrap_or_default();
                            if !content.is_empty() {
                                yield Ok(content);
                            }
                        }
                        Err(e) => warn!("Skipping malformed stream chunk: {}", e),
                    }
                }
            }
        };

        Ok(Box::pin(stream))
    }

    pub async fn generate_chat(&self, messages: &[PromptMessage]) -> Result<String, ChatError> {
        debug!("Starting chat generation with {} messages", messages.len());
        let response: ChatCompletionResponse = self
            .send(messages, false)
            .await?
            .json()
            .await
            .map_err(|e| ChatError::Llm(format!("Failed to parse LLM response: {}", e)))?;

        response
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| ChatError::Llm("No choices returned from LLM".to_string()))
    }
}

#[async_trait::async_trait]
impl LlmProvider for LlmService {
    async fn generate(&self, messages: &[PromptMessage]) -> Result<String> {
        Ok(self.generate_chat(messages).await?)
    }

    async fn generate_stream(&self, messages: &[PromptMessage]) -> Result<TextStream> {
        Ok(self.chat_stream(messages).await?)
    }
}
