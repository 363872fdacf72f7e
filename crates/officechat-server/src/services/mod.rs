pub mod conversation;
pub mod llm_service;

pub use conversation::{
    CompletionService, ConversationManager, ConversationStore, LlmProvider, TextStream,
};
pub use llm_service::LlmService;
