#![allow(dead_code)]

use async_trait::async_trait;
use officechat_kv::{HashKv, MemoryBackend};
use officechat_server::config::{ChatConfig, LlmConfig};
use officechat_server::models::chat::{ChatMessage, PromptMessage};
use officechat_server::services::conversation::{
    ContentRegistry, ConversationManager, ConversationStore, LlmProvider, TextStream, TurnRequest,
    WireFormat,
};
use officechat_server::models::chat::ContentPart;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Streams a fixed script of deltas and records every window it is sent.
#[derive(Default)]
pub struct ScriptedLlm {
    pub chunks: Vec<String>,
    /// Pause before each delta.
    pub delay: Option<Duration>,
    /// Fail after the script is exhausted.
    pub fail_at_end: bool,
    pub reply: String,
    pub produced: Arc<AtomicUsize>,
    pub windows: Mutex<Vec<Vec<PromptMessage>>>,
}

impl ScriptedLlm {
    pub fn new(chunks: &[&str]) -> Self {
        Self {
            chunks: chunks.iter().map(|c| c.to_string()).collect(),
            ..Self::default()
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn failing(mut self) -> Self {
        self.fail_at_end = true;
        self
    }

    pub fn produced(&self) -> usize {
        self.produced.load(Ordering::SeqCst)
    }

    pub fn windows(&self) -> Vec<Vec<PromptMessage>> {
        self.windows.lock().unwrap().clone()
    }
}

#[async_trait]
impl LlmProvider for ScriptedLlm {
    async fn generate(&self, messages: &[PromptMessage]) -> anyhow::Result<String> {
        self.windows.lock().unwrap().push(messages.to_vec());
        Ok(self.reply.clone())
    }

    async fn generate_stream(&self, messages: &[PromptMessage]) -> anyhow::Result<TextStream> {
        self.windows.lock().unwrap().push(messages.to_vec());

        let chunks = self.chunks.clone();
        let delay = self.delay;
        let fail = self.fail_at_end;
        let produced = self.produced.clone();
        Ok(Box::pin(async_stream::stream! {
            for chunk in chunks {
                if let Some(d) = delay {
                    tokio::time::sleep(d).await;
                }
                produced.fetch_add(1, Ordering::SeqCst);
                yield Ok(chunk);
            }
            if fail {
                yield Err(anyhow::anyhow!("upstream closed"));
            }
        }))
    }
}

pub struct Harness {
    pub manager: Arc<ConversationManager>,
    pub store: Arc<ConversationStore>,
    pub llm: Arc<ScriptedLlm>,
}

pub fn harness(llm: ScriptedLlm) -> Harness {
    harness_with(llm, ContentRegistry::with_defaults(Default::default()), 4000, ChatConfig::default())
}

pub fn harness_with(llm: ScriptedLlm, registry: ContentRegistry, input_max_token: usize, chat: ChatConfig) -> Harness {
    let llm = Arc::new(llm);
    let store = Arc::new(ConversationStore::new(Arc::new(HashKv::new(Arc::new(
        MemoryBackend::new(),
    )))));
    let llm_cfg = LlmConfig {
        input_max_token,
        ..LlmConfig::default()
    };
    let manager = Arc::new(ConversationManager::new(
        store.clone(),
        registry,
        llm.clone(),
        &llm_cfg,
        chat,
    ));
    Harness { manager, store, llm }
}

pub fn ask(user_id: &str, conversation_id: &str, text: &str) -> TurnRequest {
    TurnRequest {
        user_id: user_id.to_string(),
        conversation_id: conversation_id.to_string(),
        content: vec![ContentPart::text(text)],
        regen_message_id: None,
    }
}

/// Runs a whole turn and returns what the client saw. Persistence has
/// finished when this returns.
pub async fn run_turn(manager: &ConversationManager, req: TurnRequest, format: WireFormat) -> Vec<String> {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let handle = manager
        .chat(req, &CancellationToken::new(), tx, format)
        .await
        .expect("turn should start");

    let mut lines = Vec::new();
    while let Some(line) = rx.recv().await {
        lines.push(line);
    }
    handle.await.unwrap();
    lines
}

pub fn parse(lines: &[String]) -> Vec<ChatMessage> {
    lines
        .iter()
        .map(|l| serde_json::from_str(l).expect("fragment json"))
        .collect()
}
