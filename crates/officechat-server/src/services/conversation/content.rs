use anyhow::{bail, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::models::chat::{ChatMessage, ContentPart};
use crate::utils::error::ChatError;

/// Outcome of one handler for one content part.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HandleResult {
    pub need_ai_chat: bool,
    /// Parts stored on the user's message.
    pub request_contents: Vec<ContentPart>,
    /// Parts of the canned reply when no model call is needed.
    pub response_contents: Vec<ContentPart>,
    pub text: String,
    pub action: String,
}

/// Handles one content type. Implementations must not keep `history` past
/// the call. Returning a [`ChatError`] inside the `anyhow::Error` surfaces
/// it to the caller unchanged; anything else becomes a content handle error.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ContentHandler: Send + Sync {
    async fn handle(
        &self,
        user_id: &str,
        content: &ContentPart,
        history: &[ChatMessage],
    ) -> Result<HandleResult>;
}

/// Merged result of every part of one inbound message.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PipelineOutcome {
    pub need_ai_chat: bool,
    pub request_contents: Vec<ContentPart>,
    pub response_contents: Vec<ContentPart>,
    /// Handler texts joined with newlines.
    pub text: String,
    /// Last non-empty handler action.
    pub action: String,
}

/// Content-type tag to handler.
#[derive(Default, Clone)]
pub struct ContentRegistry {
    handlers: HashMap<String, Arc<dyn ContentHandler>>,
}

impl ContentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// `text` and `text_processor`. Images stay unregistered.
    pub fn with_defaults(ext_transform: HashMap<String, HashMap<String, String>>) -> Self {
        let mut registry = Self::new();
        registry
            .register("text", Arc::new(TextHandler))
            .register("text_processor", Arc::new(TextProcessorHandler::new(ext_transform)));
        registry
    }

    pub fn register(&mut self, kind: impl Into<String>, handler: Arc<dyn ContentHandler>) -> &mut Self {
        self.handlers.insert(kind.into(), handler);
        self
    }

    /// Runs every part through its handler. Any part declining the model
    /// call turns the whole message into a canned reply.
    pub async fn resolve(
        &self,
        user_id: &str,
        parts: &[ContentPart],
        history: &[ChatMessage],
    ) -> Result<PipelineOutcome, ChatError> {
        if parts.is_empty() {
            return Err(ChatError::InvalidParam("message has no content".to_string()));
        }

        let mut outcome = PipelineOutcome {
            need_ai_chat: true,
            ..PipelineOutcome::default()
        };
        let mut texts = Vec::with_capacity(parts.len());

        for part in parts {
            let Some(handler) = self.handlers.get(part.kind()) else {
                warn!("No content handler registered for {}", part.kind());
                return Err(ChatError::ContentHandle(format!(
                    "unsupported content type {}",
                    part.kind()
                )));
            };

            let result = handler
                .handle(user_id, part, history)
                .await
                .map_err(|err| match err.downcast::<ChatError>() {
                    Ok(api) => api,
                    Err(other) => ChatError::ContentHandle(other.to_string()),
                })?;

            outcome.need_ai_chat &= result.need_ai_chat;
            outcome.request_contents.extend(result.request_contents);
            outcome.response_contents.extend(result.response_contents);
            texts.push(result.text);
            if !result.action.is_empty() {
                outcome.action = result.action;
            }
        }

        outcome.text = texts.join("\n");
        debug!(
            "Resolved {} content part(s), need_ai_chat={}",
            parts.len(),
            outcome.need_ai_chat
        );
        Ok(outcome)
    }
}

/// Plain chat input.
pub struct TextHandler;

#[async_trait]
impl ContentHandler for TextHandler {
    async fn handle(&self, _user_id: &str, content: &ContentPart, _history: &[ChatMessage]) -> Result<HandleResult> {
        let ContentPart::Text { text } = content else {
            bail!("invalid content type {}", content.kind());
        };
        Ok(HandleResult {
            need_ai_chat: true,
            request_contents: vec![content.clone()],
            text: text.clone(),
            ..HandleResult::default()
        })
    }
}

/// Text selected in the document together with an editor action. `ext`
/// values are rewritten through the configured transform table first.
pub struct TextProcessorHandler {
    ext_transform: HashMap<String, HashMap<String, String>>,
}

impl TextProcessorHandler {
    pub fn new(ext_transform: HashMap<String, HashMap<String, String>>) -> Self {
        Self { ext_transform }
    }

    fn transform_ext(&self, ext: &mut serde_json::Map<String, Value>) {
        for (key, table) in &self.ext_transform {
            let Some(current) = ext.get(key) else {
                continue;
            };
            let lookup = match current {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            if let Some(replacement) = table.get(&lookup) {
                ext.insert(key.clone(), Value::String(replacement.clone()));
            }
        }
    }
}

#[async_trait]
impl ContentHandler for TextProcessorHandler {
    async fn handle(&self, _user_id: &str, content: &ContentPart, _history: &[ChatMessage]) -> Result<HandleResult> {
        let ContentPart::TextProcessor { text_processor } = content else {
            bail!("invalid content type {}", content.kind());
        };
        let mut processor = text_processor.clone();
        self.transform_ext(&mut processor.ext);

        Ok(HandleResult {
            need_ai_chat: true,
            text: processor.text.clone(),
            action: processor.action.clone(),
            request_contents: vec![ContentPart::TextProcessor {
                text_processor: processor,
            }],
            ..HandleResult::default()
        })
    }
}
