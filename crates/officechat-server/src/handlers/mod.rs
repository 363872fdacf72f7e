pub mod chat;
pub mod completion;
pub mod health;

use axum::{
    extract::FromRequestParts,
    http::request::Parts,
    routing::{get, post},
    Router,
};
use std::convert::Infallible;
use tower_http::{
    catch_panic::CatchPanicLayer,
    cors::CorsLayer,
    trace::{DefaultMakeSpan, TraceLayer},
};

use crate::state::AppState;

/// Header carrying the caller's identity, set by the fronting auth layer.
pub const USER_ID_HEADER: &str = "x-user-id";
pub const DEFAULT_USER_ID: &str = "demo_user";

/// Caller identity. Falls back to the demo user when the header is absent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserId(pub String);

impl<S: Send + Sync> FromRequestParts<S> for UserId {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let user_id = parts
            .headers
            .get(USER_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .unwrap_or(DEFAULT_USER_ID);
        Ok(UserId(user_id.to_string()))
    }
}

pub fn build_router(state: AppState) -> Router {
    let api = Router::new()
        .route("/api/chat", post(chat::new_conversation_handler))
        .route(
            "/api/chat/files/{file_guid}/conversation",
            get(chat::file_conversation_handler),
        )
        .route(
            "/api/chat/{conversation_id}",
            get(chat::get_conversation_handler).delete(chat::delete_conversation_handler),
        )
        .route("/api/chat/{conversation_id}/break", post(chat::break_conversation_handler))
        .route("/api/chat/{conversation_id}/chat", post(chat::chat_sse_handler))
        .route("/api/chat/{conversation_id}/stream", post(chat::chat_data_stream_handler))
        .route("/api/completions", post(completion::completion_handler));

    Router::new()
        .route("/health", get(health::health_check))
        .merge(api)
        .with_state(state)
        .layer(CatchPanicLayer::new())
        .layer(CorsLayer::permissive())
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::default().include_headers(true)),
        )
}
