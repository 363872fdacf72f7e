use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use officechat_kv::KvError;
use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ChatError {
    #[error("conversation limit reached")]
    ConversationLimitReached,

    #[error("conversation not found")]
    ConversationNotFound,

    #[error("regen message not found")]
    RegenMessageNotFound,

    #[error("content handle error: {0}")]
    ContentHandle(String),

    #[error("ai chat error: {0}")]
    AiChat(String),

    #[error("max token exceed")]
    MaxTokenExceed,

    #[error("invalid param: {0}")]
    InvalidParam(String),

    #[error("store error: {0}")]
    Store(#[from] KvError),

    #[error("LLM error: {0}")]
    Llm(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl ChatError {
    /// Stable code exposed to clients.
    pub fn code(&self) -> u32 {
        match self {
            ChatError::Internal(_) | ChatError::Store(_) => 10000,
            ChatError::InvalidParam(_) => 10001,
            ChatError::AiChat(_) | ChatError::Llm(_) => 10003,
            ChatError::ContentHandle(_) => 10004,
            ChatError::ConversationNotFound => 10005,
            ChatError::MaxTokenExceed => 10006,
            ChatError::RegenMessageNotFound => 10012,
            ChatError::ConversationLimitReached => 10016,
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ChatError::ConversationNotFound | ChatError::RegenMessageNotFound => StatusCode::NOT_FOUND,
            ChatError::ConversationLimitReached => StatusCode::TOO_MANY_REQUESTS,
            ChatError::InvalidParam(_) | ChatError::ContentHandle(_) => StatusCode::BAD_REQUEST,
            ChatError::MaxTokenExceed => StatusCode::PAYLOAD_TOO_LARGE,
            ChatError::AiChat(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ChatError::Llm(_) => StatusCode::SERVICE_UNAVAILABLE,
            ChatError::Store(_) | ChatError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    code: u32,
    message: String,
}

impl IntoResponse for ChatError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!("Request failed: {}", self);
        } else {
            tracing::warn!("Request rejected: {}", self);
        }

        let body = Json(ErrorResponse {
            code: self.code(),
            message: self.to_string(),
        });

        (status, body).into_response()
    }
}
