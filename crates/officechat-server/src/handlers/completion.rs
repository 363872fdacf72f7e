use axum::{extract::State, Json};
use std::sync::Arc;
use tracing::info;

use super::UserId;
use crate::models::chat::{CompletionRequest, CompletionResponse};
use crate::services::CompletionService;
use crate::utils::error::ChatError;

pub async fn completion_handler(
    State(service): State<Arc<CompletionService>>,
    UserId(user_id): UserId,
    Json(request): Json<CompletionRequest>,
) -> Result<Json<CompletionResponse>, ChatError> {
    if request.prompt.trim().is_empty() {
        return Err(ChatError::InvalidParam("prompt is required".to_string()));
    }
    info!("Completion request: user={}, prompt_len={}", user_id, request.prompt.len());

    let data = service.complete(&user_id, &request.prompt).await?;
    Ok(Json(CompletionResponse { data }))
}
