use async_trait::async_trait;
use officechat_kv::{ExpirySweeper, HashKv, KvError};
use std::cmp::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::models::chat::{ChatMessage, Conversation, MessageRole};
use crate::utils::error::ChatError;

pub const CONVERSATION_TTL: Duration = Duration::from_secs(7 * 24 * 60 * 60);
pub const MESSAGE_TTL: Duration = Duration::from_secs(7 * 24 * 60 * 60);
/// Lifetime of a break request.
pub const STOP_TTL: Duration = Duration::from_secs(10 * 60);

const KEY_PREFIX: &str = "ai:conversation";

fn conversation_key(user_id: &str, conversation_id: &str) -> String {
    format!("{KEY_PREFIX}:{user_id}:{conversation_id}")
}

fn messages_key(user_id: &str, conversation_id: &str) -> String {
    format!("{KEY_PREFIX}:{user_id}:{conversation_id}:msgs")
}

fn stop_key(user_id: &str, conversation_id: &str) -> String {
    format!("{KEY_PREFIX}:{user_id}:{conversation_id}:stop")
}

/// Ids become key segments, so they must be non-empty and free of `:`.
pub(crate) fn validate_id(name: &str, id: &str) -> Result<(), ChatError> {
    if id.is_empty() || id.contains(':') {
        return Err(ChatError::InvalidParam(format!("invalid {name}: {id:?}")));
    }
    Ok(())
}

fn role_rank(role: MessageRole) -> u8 {
    match role {
        MessageRole::System => 0,
        MessageRole::User => 1,
        MessageRole::Assistant => 2,
    }
}

/// Creation order, user before assistant on equal timestamps.
fn chronological(a: &ChatMessage, b: &ChatMessage) -> Ordering {
    a.created_at
        .cmp(&b.created_at)
        .then_with(|| role_rank(a.role).cmp(&role_rank(b.role)))
}

fn decode<T: serde::de::DeserializeOwned>(key: &str, raw: &[u8]) -> Result<T, ChatError> {
    serde_json::from_slice(raw).map_err(|source| {
        ChatError::Store(KvError::Corrupt {
            key: key.to_string(),
            source,
        })
    })
}

fn encode<T: serde::Serialize>(value: &T) -> Result<String, ChatError> {
    serde_json::to_string(value).map_err(|e| ChatError::Store(KvError::Encode(e)))
}

/// Conversations and their messages, keyed per user.
pub struct ConversationStore {
    kv: Arc<HashKv>,
}

impl ConversationStore {
    pub fn new(kv: Arc<HashKv>) -> Self {
        Self { kv }
    }

    pub fn kv(&self) -> &Arc<HashKv> {
        &self.kv
    }

    pub async fn new_conversation(&self, conversation: &Conversation) -> Result<(), ChatError> {
        validate_id("user_id", &conversation.user_id)?;
        validate_id("conversation_id", &conversation.conversation_id)?;

        let key = conversation_key(&conversation.user_id, &conversation.conversation_id);
        if self.kv.exists(&key).await? {
            return Err(ChatError::InvalidParam(format!(
                "conversation {} already exists",
                conversation.conversation_id
            )));
        }

        let record = Conversation {
            messages: Vec::new(),
            ..conversation.clone()
        };
        self.kv.put_raw(&key, encode(&record)?.as_bytes()).await?;
        self.kv.expire(&key, CONVERSATION_TTL).await?;

        info!(
            "Created conversation {} for user {}",
            conversation.conversation_id, conversation.user_id
        );
        Ok(())
    }

    /// Number of conversation records owned by `user_id`.
    pub async fn count_conversation(&self, user_id: &str) -> Result<usize, ChatError> {
        validate_id("user_id", user_id)?;
        let prefix = format!("{KEY_PREFIX}:{user_id}:");
        let rows = self.kv.scan_prefix(&prefix).await?;
        Ok(rows
            .iter()
            .filter(|(k, _)| !k[prefix.len()..].contains(':'))
            .count())
    }

    /// Conversation with its messages in creation order, `None` when absent.
    pub async fn get_conversation(
        &self,
        user_id: &str,
        conversation_id: &str,
    ) -> Result<Option<Conversation>, ChatError> {
        validate_id("user_id", user_id)?;
        validate_id("conversation_id", conversation_id)?;

        let key = conversation_key(user_id, conversation_id);
        let Some(raw) = self.kv.get_raw(&key).await? else {
            return Ok(None);
        };
        let mut conversation: Conversation = decode(&key, &raw)?;
        conversation.messages = self.load_messages(user_id, conversation_id).await?;
        Ok(Some(conversation))
    }

    async fn load_messages(
        &self,
        user_id: &str,
        conversation_id: &str,
    ) -> Result<Vec<ChatMessage>, ChatError> {
        let key = messages_key(user_id, conversation_id);
        let mut messages = self
            .kv
            .hget_all(&key)
            .await?
            .values()
            .map(|raw| decode::<ChatMessage>(&key, raw.as_bytes()))
            .collect::<Result<Vec<_>, _>>()?;
        messages.sort_by(chronological);
        Ok(messages)
    }

    /// Most recent conversation of `user_id` bound to `file_guid`.
    pub async fn get_file_conversation(
        &self,
        user_id: &str,
        file_guid: &str,
    ) -> Result<Option<Conversation>, ChatError> {
        validate_id("user_id", user_id)?;
        let prefix = format!("{KEY_PREFIX}:{user_id}:");

        let mut found: Option<Conversation> = None;
        for (key, raw) in self.kv.scan_prefix(&prefix).await? {
            if key[prefix.len()..].contains(':') {
                continue;
            }
            let conversation: Conversation = decode(&key, &raw)?;
            if conversation.file_guid != file_guid {
                continue;
            }
            if found
                .as_ref()
                .map_or(true, |f| conversation.created_at > f.created_at)
            {
                found = Some(conversation);
            }
        }

        match found {
            Some(mut conversation) => {
                conversation.messages = self
                    .load_messages(user_id, &conversation.conversation_id)
                    .await?;
                Ok(Some(conversation))
            }
            None => Ok(None),
        }
    }

    pub async fn add_message(
        &self,
        user_id: &str,
        conversation_id: &str,
        message: &ChatMessage,
    ) -> Result<(), ChatError> {
        self.add_messages(user_id, conversation_id, std::slice::from_ref(message))
            .await
    }

    /// Upserts by message id and slides both TTL windows.
    pub async fn add_messages(
        &self,
        user_id: &str,
        conversation_id: &str,
        messages: &[ChatMessage],
    ) -> Result<(), ChatError> {
        validate_id("user_id", user_id)?;
        validate_id("conversation_id", conversation_id)?;
        if messages.is_empty() {
            return Ok(());
        }

        let fields = messages
            .iter()
            .map(|m| -> Result<(String, String), ChatError> {
                Ok((m.message_id.clone(), encode(m)?))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let msgs_key = messages_key(user_id, conversation_id);
        self.kv.hset_many(&msgs_key, fields).await?;
        self.kv.expire(&msgs_key, MESSAGE_TTL).await?;
        self.kv
            .expire(&conversation_key(user_id, conversation_id), CONVERSATION_TTL)
            .await?;

        debug!(
            "Stored {} message(s) in conversation {}",
            messages.len(),
            conversation_id
        );
        Ok(())
    }

    pub async fn break_conversation(&self, user_id: &str, conversation_id: &str) -> Result<(), ChatError> {
        validate_id("user_id", user_id)?;
        validate_id("conversation_id", conversation_id)?;
        let key = stop_key(user_id, conversation_id);
        self.kv.put_raw(&key, b"1").await?;
        self.kv.expire(&key, STOP_TTL).await?;
        info!("Break requested for conversation {}", conversation_id);
        Ok(())
    }

    pub async fn is_conversation_break(&self, user_id: &str, conversation_id: &str) -> Result<bool, ChatError> {
        validate_id("user_id", user_id)?;
        validate_id("conversation_id", conversation_id)?;
        Ok(self.kv.exists(&stop_key(user_id, conversation_id)).await?)
    }

    pub async fn resume_conversation(&self, user_id: &str, conversation_id: &str) -> Result<(), ChatError> {
        validate_id("user_id", user_id)?;
        validate_id("conversation_id", conversation_id)?;
        Ok(self.kv.delete(&stop_key(user_id, conversation_id)).await?)
    }

    pub async fn delete_conversation(&self, user_id: &str, conversation_id: &str) -> Result<(), ChatError> {
        validate_id("user_id", user_id)?;
        validate_id("conversation_id", conversation_id)?;
        self.kv.delete(&conversation_key(user_id, conversation_id)).await?;
        self.kv.delete(&messages_key(user_id, conversation_id)).await?;
        self.kv.delete(&stop_key(user_id, conversation_id)).await?;
        info!("Deleted conversation {}", conversation_id);
        Ok(())
    }
}

#[async_trait]
impl ExpirySweeper for ConversationStore {
    async fn delete_expire_keys(&self) -> Result<usize, KvError> {
        self.kv.delete_expired().await
    }
}
