//! Conversation engine
//!
//! Turns one inbound user message into a streamed assistant reply:
//! - Durable conversations and messages on the hash/TTL key-value layer
//! - Pluggable content handlers deciding whether the model is called
//! - Budgeted context window assembly
//! - Sentence batching of model output with cooperative cancellation
//! - Per-user short-lived context for single-shot completions

mod cache;
mod content;
mod context_builder;
pub mod manager;
mod store;
mod streamer;

pub use cache::{CacheItem, CompletionService, UserContextCache};
pub use content::{
    ContentHandler, ContentRegistry, HandleResult, PipelineOutcome, TextHandler,
    TextProcessorHandler,
};
pub use context_builder::ContextAssembler;
pub use manager::{
    ActiveTurn, ConversationManager, LlmProvider, TextStream, TurnRequest, WireFormat,
};
pub use store::{ConversationStore, CONVERSATION_TTL, MESSAGE_TTL, STOP_TTL};
pub use streamer::{FragmentStream, SentenceStreamer};
