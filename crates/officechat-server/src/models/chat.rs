use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
    System,
}

impl MessageRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
            MessageRole::System => "system",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    Question,
    Answer,
    System,
    Error,
}

/// Payload of a `text_processor` content part.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TextProcessor {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub text: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub action: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub guid: String,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub ext: Map<String, Value>,
}

/// One block of a message. Exactly one payload per variant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text {
        #[serde(default)]
        text: String,
    },
    TextProcessor {
        text_processor: TextProcessor,
    },
    Image {
        image_url: String,
    },
}

impl ContentPart {
    pub fn text(text: impl Into<String>) -> Self {
        ContentPart::Text { text: text.into() }
    }

    /// Registry key of this part.
    pub fn kind(&self) -> &'static str {
        match self {
            ContentPart::Text { .. } => "text",
            ContentPart::TextProcessor { .. } => "text_processor",
            ContentPart::Image { .. } => "image",
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            ContentPart::Text { text } => Some(text),
            _ => None,
        }
    }
}

/// Concatenation of every `text` part, in order.
pub fn text_of(parts: &[ContentPart]) -> String {
    parts.iter().filter_map(ContentPart::as_text).collect()
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    #[serde(default)]
    pub prompt_tokens: u64,
    #[serde(default)]
    pub completion_tokens: u64,
    #[serde(default)]
    pub total_tokens: u64,
}

impl TokenUsage {
    pub fn new(prompt_tokens: u64, completion_tokens: u64) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
        }
    }
}

/// A stored message or one streamed fragment of an assistant reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub message_id: String,
    pub role: MessageRole,
    #[serde(rename = "type")]
    pub message_type: MessageType,
    #[serde(default)]
    pub content: Vec<ContentPart>,
    #[serde(default)]
    pub text: String,
    /// Orders fragments of one streamed reply.
    #[serde(default)]
    pub sentence_id: u32,
    #[serde(default)]
    pub is_end: bool,
    #[serde(default)]
    pub is_truncated: bool,
    /// Unix milliseconds; sort key for history.
    #[serde(rename = "created", default)]
    pub created_at: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<TokenUsage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_msg: Option<String>,
    /// Whether the message took part in a model exchange. Only these are fed
    /// back as context.
    #[serde(default = "default_true")]
    pub need_ai_chat: bool,
}

fn default_true() -> bool {
    true
}

impl ChatMessage {
    pub fn new(message_id: impl Into<String>, role: MessageRole, message_type: MessageType) -> Self {
        Self {
            message_id: message_id.into(),
            role,
            message_type,
            content: Vec::new(),
            text: String::new(),
            sentence_id: 0,
            is_end: false,
            is_truncated: false,
            created_at: chrono::Utc::now().timestamp_millis(),
            usage: None,
            error_code: None,
            error_msg: None,
            need_ai_chat: true,
        }
    }

    pub fn is_error(&self) -> bool {
        self.message_type == MessageType::Error
    }

    pub fn is_dialogue(&self) -> bool {
        matches!(self.role, MessageRole::User | MessageRole::Assistant)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    pub conversation_id: String,
    pub user_id: String,
    #[serde(default)]
    pub file_guid: String,
    #[serde(default)]
    pub system: String,
    #[serde(rename = "created", default)]
    pub created_at: i64,
    /// Filled on read, never stored inside the conversation record.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub messages: Vec<ChatMessage>,
}

/// One entry of the model-facing context window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptMessage {
    pub role: String,
    pub content: String,
}

impl PromptMessage {
    pub fn new(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            role: role.as_str().to_string(),
            content: content.into(),
        }
    }
}

// ===== HTTP request/response bodies =====

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewConversationRequest {
    #[serde(default)]
    pub system: String,
    #[serde(default, alias = "guid")]
    pub file_guid: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct NewConversationResponse {
    pub conversation_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatRequest {
    pub content: Vec<ContentPart>,
    #[serde(default)]
    pub regen_message_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CompletionRequest {
    pub prompt: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct CompletionResponse {
    pub data: String,
}
