use dashmap::DashMap;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::manager::LlmProvider;
use crate::config::UserChatConfig;
use crate::models::chat::{MessageRole, PromptMessage};
use crate::utils::error::ChatError;

/// Context of one user's single-shot exchange.
#[derive(Debug, Clone)]
pub struct CacheItem {
    pub last_time: Instant,
    pub messages: Vec<PromptMessage>,
}

impl CacheItem {
    pub fn new() -> Self {
        Self {
            last_time: Instant::now(),
            messages: Vec::new(),
        }
    }
}

impl Default for CacheItem {
    fn default() -> Self {
        Self::new()
    }
}

/// Per-user in-memory context for the completion path.
/// Sharded map, so unrelated users never contend on one lock.
#[derive(Clone)]
pub struct UserContextCache {
    storage: Arc<DashMap<String, CacheItem>>,
    timeout: Duration,
    reset_words: Arc<HashSet<String>>,
}

impl UserContextCache {
    pub fn new(timeout: Duration, reset_words: impl IntoIterator<Item = String>) -> Self {
        Self {
            storage: Arc::new(DashMap::new()),
            timeout,
            reset_words: Arc::new(reset_words.into_iter().collect()),
        }
    }

    pub fn from_config(config: &UserChatConfig) -> Self {
        Self::new(Duration::from_millis(config.timeout_ms), config.reset.iter().cloned())
    }

    /// Returns None if absent or idle past the timeout. Timed-out entries are dropped.
    pub fn get(&self, user_id: &str) -> Option<CacheItem> {
        let entry = self.storage.get(user_id)?;
        let item = entry.value().clone();

        if item.last_time.elapsed() > self.timeout {
            drop(entry);
            self.remove(user_id);
            debug!("Context for {} timed out, starting over", user_id);
            return None;
        }
        Some(item)
    }

    pub fn set(&self, user_id: &str, item: CacheItem) {
        self.storage.insert(user_id.to_string(), item);
    }

    pub fn remove(&self, user_id: &str) -> Option<CacheItem> {
        self.storage.remove(user_id).map(|(_, item)| item)
    }

    pub fn is_reset_word(&self, prompt: &str) -> bool {
        self.reset_words.contains(prompt)
    }

    pub fn len(&self) -> usize {
        self.storage.len()
    }

    pub fn is_empty(&self) -> bool {
        self.storage.is_empty()
    }

    /// Returns number of entries removed
    pub fn cleanup_expired(&self) -> usize {
        let before = self.storage.len();
        let timeout = self.timeout;
        self.storage.retain(|_, item| item.last_time.elapsed() <= timeout);
        let count = before.saturating_sub(self.storage.len());
        if count > 0 {
            info!("Cleaned up {} idle user contexts", count);
        }
        count
    }

    /// Drops idle entries every `interval` until `cancel` fires.
    pub async fn run_cleanup(self, interval: Duration, cancel: CancellationToken) {
        info!("User context cleanup started, interval {:?}", interval);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = sleep(interval) => {}
            }
            self.cleanup_expired();
        }
        info!("User context cleanup stopped");
    }

    pub fn spawn_cleanup(&self, interval: Duration, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(self.clone().run_cleanup(interval, cancel))
    }
}

/// Stateless completion with an optional short-lived per-user context.
#[derive(Clone)]
pub struct CompletionService {
    cache: UserContextCache,
    provider: Arc<dyn LlmProvider>,
    support_context: bool,
}

impl CompletionService {
    pub fn new(provider: Arc<dyn LlmProvider>, cache: UserContextCache, support_context: bool) -> Self {
        Self {
            cache,
            provider,
            support_context,
        }
    }

    pub fn cache(&self) -> &UserContextCache {
        &self.cache
    }

    pub async fn complete(&self, user_id: &str, prompt: &str) -> Result<String, ChatError> {
        if !self.support_context {
            return self
                .provider
                .generate(&[PromptMessage::new(MessageRole::User, prompt)])
                .await
                .map_err(|e| ChatError::Llm(e.to_string()));
        }

        let item = self.cache.get(user_id);

        if self.cache.is_reset_word(prompt) {
            self.cache.remove(user_id);
            info!("Context reset by user {}", user_id);
            return Ok(String::new());
        }

        let mut item = item.unwrap_or_default();
        item.messages.push(PromptMessage::new(MessageRole::User, prompt));

        let reply = self
            .provider
            .generate(&item.messages)
            .await
            .map_err(|e| ChatError::Llm(e.to_string()))?;

        item.messages.push(PromptMessage::new(MessageRole::Assistant, reply.clone()));
        item.last_time = Instant::now();
        debug!("User {} context holds {} message(s)", user_id, item.messages.len());
        self.cache.set(user_id, item);

        Ok(reply)
    }
}
