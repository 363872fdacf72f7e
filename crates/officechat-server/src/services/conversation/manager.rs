use anyhow::Result;
use async_trait::async_trait;
use futures::stream::{self, Stream, StreamExt};
use officechat_proto::{encode, encode_json, FinishMessage, FinishReason, StreamPartType, StreamUsage};
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::{ChatConfig, LlmConfig};
use crate::models::chat::{
    text_of, ChatMessage, ContentPart, Conversation, MessageRole, MessageType, PromptMessage, TokenUsage,
};
use crate::utils::error::ChatError;
use crate::utils::guid::new_guid;
use crate::utils::token_estimator::estimate_tokens;

use super::content::ContentRegistry;
use super::context_builder::ContextAssembler;
use super::store::ConversationStore;
use super::streamer::{FragmentStream, SentenceStreamer};

const ID_LEN: usize = 16;

/// Text deltas of one streamed completion.
pub type TextStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

/// Language model boundary.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    async fn generate(&self, messages: &[PromptMessage]) -> Result<String>;

    async fn generate_stream(&self, messages: &[PromptMessage]) -> Result<TextStream>;
}

/// One inbound user message, or a request to regenerate an earlier reply.
#[derive(Debug, Clone)]
pub struct TurnRequest {
    pub user_id: String,
    pub conversation_id: String,
    pub content: Vec<ContentPart>,
    pub regen_message_id: Option<String>,
}

/// Encoding of fragments pushed to the sink.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum WireFormat {
    /// One JSON-serialized fragment per push.
    #[default]
    Json,
    /// Data stream protocol lines.
    DataStream,
}

pub struct ConversationManager {
    store: Arc<ConversationStore>,
    registry: ContentRegistry,
    assembler: ContextAssembler,
    streamer: SentenceStreamer,
    chat: ChatConfig,
}

impl ConversationManager {
    pub fn new(
        store: Arc<ConversationStore>,
        registry: ContentRegistry,
        provider: Arc<dyn LlmProvider>,
        llm: &LlmConfig,
        chat: ChatConfig,
    ) -> Self {
        Self {
            store,
            registry,
            assembler: ContextAssembler::new(llm.input_max_token),
            streamer: SentenceStreamer::new(provider, chat.min_sentence_runes),
            chat,
        }
    }

    pub fn store(&self) -> &Arc<ConversationStore> {
        &self.store
    }

    /// Creates a conversation, falling back to the default system prompt and
    /// enforcing the per-user quota.
    pub async fn new_conversation(
        &self,
        user_id: &str,
        system: &str,
        file_guid: &str,
    ) -> Result<Conversation, ChatError> {
        if self.chat.conversation_limit > 0 {
            let count = self.store.count_conversation(user_id).await?;
            if count >= self.chat.conversation_limit {
                warn!("User {} reached conversation limit ({})", user_id, count);
                return Err(ChatError::ConversationLimitReached);
            }
        }

        let system = if system.trim().is_empty() {
            self.chat.default_system_message.clone()
        } else {
            system.to_string()
        };

        let conversation = Conversation {
            conversation_id: new_guid(ID_LEN),
            user_id: user_id.to_string(),
            file_guid: file_guid.to_string(),
            system,
            created_at: chrono::Utc::now().timestamp_millis(),
            messages: Vec::new(),
        };
        self.store.new_conversation(&conversation).await?;
        Ok(conversation)
    }

    pub async fn get_or_create_file_conversation(
        &self,
        user_id: &str,
        file_guid: &str,
    ) -> Result<Conversation, ChatError> {
        if file_guid.is_empty() {
            return Err(ChatError::InvalidParam("file guid is required".to_string()));
        }
        if let Some(existing) = self.store.get_file_conversation(user_id, file_guid).await? {
            return Ok(existing);
        }
        self.new_conversation(user_id, "", file_guid).await
    }

    pub async fn get_conversation(&self, user_id: &str, conversation_id: &str) -> Result<Conversation, ChatError> {
        self.store
            .get_conversation(user_id, conversation_id)
            .await?
            .ok_or(ChatError::ConversationNotFound)
    }

    pub async fn delete_conversation(&self, user_id: &str, conversation_id: &str) -> Result<(), ChatError> {
        self.store.delete_conversation(user_id, conversation_id).await
    }

    pub async fn break_conversation(&self, user_id: &str, conversation_id: &str) -> Result<(), ChatError> {
        self.store.break_conversation(user_id, conversation_id).await
    }

    /// Runs every step that can fail before output starts: content
    /// resolution or regen lookup, prompt checks, context assembly and
    /// opening the model stream. The returned turn is cancelled together
    /// with `parent`.
    pub async fn begin_turn(&self, req: TurnRequest, parent: &CancellationToken) -> Result<ActiveTurn, ChatError> {
        let TurnRequest {
            user_id,
            conversation_id,
            content,
            regen_message_id,
        } = req;
        let cancel = parent.child_token();

        if let Err(e) = self.store.resume_conversation(&user_id, &conversation_id).await {
            warn!("Failed to clear break flag of {}: {}", conversation_id, e);
        }

        let conversation = self.get_conversation(&user_id, &conversation_id).await?;
        let mut history: Vec<ChatMessage> = conversation
            .messages
            .into_iter()
            .filter(|m| m.need_ai_chat)
            .collect();

        let mut question = None;
        let mut regen_created_at = None;
        let mut canned = None;
        let reply_id;
        let need_ai_chat;

        match regen_message_id.filter(|id| !id.is_empty()) {
            Some(regen_id) => {
                let idx = history
                    .iter()
                    .rposition(|m| m.message_id == regen_id && m.role == MessageRole::Assistant)
                    .ok_or(ChatError::RegenMessageNotFound)?;
                regen_created_at = Some(history[idx].created_at);
                history.truncate(idx);
                info!("Regenerating reply {} in conversation {}", regen_id, conversation_id);
                reply_id = regen_id;
                need_ai_chat = true;
            }
            None => {
                let outcome = self.registry.resolve(&user_id, &content, &history).await?;
                reply_id = new_guid(ID_LEN);
                need_ai_chat = outcome.need_ai_chat;

                let mut ask = ChatMessage::new(new_guid(ID_LEN), MessageRole::User, MessageType::Question);
                ask.content = outcome.request_contents;
                ask.text = outcome.text;
                ask.need_ai_chat = need_ai_chat;

                if !need_ai_chat {
                    let mut reply = ChatMessage::new(reply_id.as_str(), MessageRole::Assistant, MessageType::Answer);
                    reply.text = text_of(&outcome.response_contents);
                    reply.content = outcome.response_contents;
                    reply.is_end = true;
                    reply.need_ai_chat = false;
                    debug!("Canned reply {} for action {:?}", reply_id, outcome.action);
                    canned = Some(reply);
                }

                history.push(ask.clone());
                question = Some(ask);
            }
        }

        let mut prompt_tokens = 0u64;
        let fragments: FragmentStream = if let Some(reply) = canned {
            Box::pin(stream::iter([reply]))
        } else {
            let newest = history.last().map(|m| estimate_tokens(&m.text)).unwrap_or(0);
            if self.chat.max_prompt_tokens > 0 && newest > self.chat.max_prompt_tokens {
                warn!(
                    "Prompt of {} runes exceeds limit {} in conversation {}",
                    newest, self.chat.max_prompt_tokens, conversation_id
                );
                return Err(ChatError::MaxTokenExceed);
            }
            prompt_tokens = newest as u64;

            let window = self.assembler.assemble(&conversation.system, &history)?;
            self.streamer
                .chat_stream(cancel.clone(), &window, reply_id.clone(), prompt_tokens)
                .await?
        };

        Ok(ActiveTurn {
            store: self.store.clone(),
            user_id,
            conversation_id,
            reply_id,
            question,
            regen_created_at,
            need_ai_chat,
            prompt_tokens,
            cancel,
            fragments,
        })
    }

    /// `begin_turn` followed by `stream_to`.
    pub async fn chat(
        &self,
        req: TurnRequest,
        parent: &CancellationToken,
        sink: UnboundedSender<String>,
        format: WireFormat,
    ) -> Result<JoinHandle<()>, ChatError> {
        Ok(self.begin_turn(req, parent).await?.stream_to(sink, format))
    }
}

/// A turn whose reply is being produced.
pub struct ActiveTurn {
    store: Arc<ConversationStore>,
    user_id: String,
    conversation_id: String,
    reply_id: String,
    question: Option<ChatMessage>,
    regen_created_at: Option<i64>,
    need_ai_chat: bool,
    prompt_tokens: u64,
    cancel: CancellationToken,
    fragments: FragmentStream,
}

impl ActiveTurn {
    pub fn reply_id(&self) -> &str {
        &self.reply_id
    }

    /// Forwards encoded fragments to `sink` until the terminal one, then
    /// persists the turn and closes the sink. Model output is pulled one
    /// fragment at a time, after the previous one was delivered and the
    /// break flag checked. Persistence runs on its own task, so a caller
    /// dropping the returned handle or the receiver does not abort the
    /// write.
    pub fn stream_to(self, sink: UnboundedSender<String>, format: WireFormat) -> JoinHandle<()> {
        tokio::spawn(self.forward(sink, format))
    }

    async fn forward(mut self, sink: UnboundedSender<String>, format: WireFormat) {
        let mut sink = Some(sink);
        let mut delivered: Vec<ChatMessage> = Vec::new();

        while let Some(fragment) = self.fragments.next().await {
            if let Some(out) = sink.as_ref() {
                let sent = encode_fragment(&fragment, format)
                    .into_iter()
                    .all(|line| out.send(line).is_ok());
                if !sent {
                    info!("Client left reply {}, stopping model reads", self.reply_id);
                    self.cancel.cancel();
                    sink = None;
                }
            }

            let is_end = fragment.is_end;
            delivered.push(fragment);
            if is_end {
                break;
            }

            if self.cancel.is_cancelled() {
                continue;
            }
            match self
                .store
                .is_conversation_break(&self.user_id, &self.conversation_id)
                .await
            {
                Ok(true) => {
                    info!("Conversation {} break requested", self.conversation_id);
                    self.cancel.cancel();
                }
                Ok(false) => {}
                Err(e) => warn!("Break check for {} failed: {}", self.conversation_id, e),
            }
        }
        let record = TurnRecord {
            store: self.store,
            user_id: self.user_id,
            conversation_id: self.conversation_id,
            question: self.question,
            regen_created_at: self.regen_created_at,
            need_ai_chat: self.need_ai_chat,
            prompt_tokens: self.prompt_tokens,
        };
        if let Err(e) = tokio::spawn(record.persist(delivered)).await {
            error!("Persist task for reply {} failed: {}", self.reply_id, e);
        }
        drop(sink);
    }
}

/// Everything the detached persistence step needs.
struct TurnRecord {
    store: Arc<ConversationStore>,
    user_id: String,
    conversation_id: String,
    question: Option<ChatMessage>,
    regen_created_at: Option<i64>,
    need_ai_chat: bool,
    prompt_tokens: u64,
}

impl TurnRecord {
    async fn persist(self, fragments: Vec<ChatMessage>) {
        let Some(reply) = assemble_reply(&fragments, self.need_ai_chat, self.regen_created_at) else {
            return;
        };

        if self.need_ai_chat && reply.text.is_empty() {
            // TODO: decide with product whether an empty model reply should surface as an error
            warn!(
                "Model produced no text for reply {}, turn not persisted",
                reply.message_id
            );
            return;
        }

        if let Some(mut question) = self.question {
            let prompt_tokens = reply.usage.map_or(self.prompt_tokens, |u| u.prompt_tokens);
            question.usage = Some(TokenUsage::new(prompt_tokens, 0));
            if let Err(e) = self
                .store
                .add_message(&self.user_id, &self.conversation_id, &question)
                .await
            {
                warn!("Failed to save question {}: {}", question.message_id, e);
            }
        }

        match self
            .store
            .add_message(&self.user_id, &self.conversation_id, &reply)
            .await
        {
            Ok(()) => debug!("Saved reply {} ({} runes)", reply.message_id, estimate_tokens(&reply.text)),
            Err(e) => error!("Failed to save reply {}: {}", reply.message_id, e),
        }
    }
}

/// Folds delivered fragments into the stored reply. `None` when there is
/// nothing to keep: no fragments, or a turn that ended in a model error.
fn assemble_reply(fragments: &[ChatMessage], need_ai_chat: bool, regen_created_at: Option<i64>) -> Option<ChatMessage> {
    let (first, last) = (fragments.first()?, fragments.last()?);
    if last.is_error() {
        warn!(
            "Reply {} ended with error {:?}, nothing persisted",
            last.message_id, last.error_msg
        );
        return None;
    }
    if !last.is_end {
        warn!("Reply {} closed without a terminal fragment", last.message_id);
    }

    let mut reply = first.clone();
    if need_ai_chat {
        let text: String = fragments
            .iter()
            .filter_map(|f| f.content.first().and_then(ContentPart::as_text))
            .collect();
        reply.content = vec![ContentPart::text(text.clone())];
        reply.text = text;
    } else {
        reply.text = text_of(&reply.content);
    }

    reply.sentence_id = 0;
    reply.is_end = true;
    reply.is_truncated = last.is_truncated;
    reply.usage = Some(last.usage.unwrap_or_default());
    reply.need_ai_chat = need_ai_chat;
    if let Some(created_at) = regen_created_at {
        reply.created_at = created_at;
    }
    Some(reply)
}

fn encode_fragment(fragment: &ChatMessage, format: WireFormat) -> Vec<String> {
    match format {
        WireFormat::Json => match serde_json::to_string(fragment) {
            Ok(line) => vec![line],
            Err(e) => {
                error!("Failed to serialize fragment {}: {}", fragment.message_id, e);
                Vec::new()
            }
        },
        WireFormat::DataStream => data_stream_lines(fragment),
    }
}

fn data_stream_lines(fragment: &ChatMessage) -> Vec<String> {
    let mut lines = Vec::new();
    let finish_reason = if fragment.is_error() {
        let msg = fragment.error_msg.as_deref().unwrap_or("model stream failed");
        lines.push(encode(StreamPartType::Error, msg));
        FinishReason::Error
    } else {
        for part in &fragment.content {
            match part {
                ContentPart::Text { text } if text.is_empty() => {}
                ContentPart::Text { text } => lines.push(encode(StreamPartType::Text, text)),
                other => match encode_json(StreamPartType::Data, &[other]) {
                    Ok(line) => lines.push(line),
                    Err(e) => warn!("Skipping {} part of {}: {}", other.kind(), fragment.message_id, e),
                },
            }
        }
        FinishReason::Stop
    };

    if fragment.is_end {
        let usage = fragment.usage.unwrap_or_default();
        let finish = FinishMessage {
            finish_reason,
            usage: StreamUsage {
                prompt_tokens: usage.prompt_tokens,
                completion_tokens: usage.completion_tokens,
            },
        };
        match encode_json(StreamPartType::FinishMessage, &finish) {
            Ok(line) => lines.push(line),
            Err(e) => error!("Failed to encode finish of {}: {}", fragment.message_id, e),
        }
    }
    lines
}
