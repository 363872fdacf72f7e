use axum::extract::FromRef;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::config::Settings;
use crate::services::{CompletionService, ConversationManager};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub conversation_manager: Arc<ConversationManager>,
    pub completion_service: Arc<CompletionService>,
    pub settings: Arc<Settings>,
    /// Parent of every turn's cancellation token; cancelled on shutdown.
    pub shutdown: CancellationToken,
}

impl FromRef<AppState> for Arc<ConversationManager> {
    fn from_ref(state: &AppState) -> Self {
        state.conversation_manager.clone()
    }
}

impl FromRef<AppState> for Arc<CompletionService> {
    fn from_ref(state: &AppState) -> Self {
        state.completion_service.clone()
    }
}

impl FromRef<AppState> for CancellationToken {
    fn from_ref(state: &AppState) -> Self {
        state.shutdown.clone()
    }
}
