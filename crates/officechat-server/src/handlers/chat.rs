use axum::{
    body::Body,
    extract::{Path, State},
    http::{header, HeaderName, StatusCode},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse,
    },
    Json,
};
use futures::stream::Stream;
use officechat_proto::{DATA_STREAM_HEADER, DATA_STREAM_VERSION};
use std::convert::Infallible;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::UserId;
use crate::models::chat::{ChatRequest, Conversation, NewConversationRequest, NewConversationResponse};
use crate::services::conversation::{ConversationManager, TurnRequest, WireFormat};
use crate::utils::error::ChatError;

pub async fn new_conversation_handler(
    State(manager): State<Arc<ConversationManager>>,
    UserId(user_id): UserId,
    Json(request): Json<NewConversationRequest>,
) -> Result<Json<NewConversationResponse>, ChatError> {
    let conversation = manager
        .new_conversation(&user_id, &request.system, &request.file_guid)
        .await?;
    Ok(Json(NewConversationResponse {
        conversation_id: conversation.conversation_id,
    }))
}

pub async fn file_conversation_handler(
    State(manager): State<Arc<ConversationManager>>,
    UserId(user_id): UserId,
    Path(file_guid): Path<String>,
) -> Result<Json<Conversation>, ChatError> {
    Ok(Json(
        manager
            .get_or_create_file_conversation(&user_id, &file_guid)
            .await?,
    ))
}

pub async fn get_conversation_handler(
    State(manager): State<Arc<ConversationManager>>,
    UserId(user_id): UserId,
    Path(conversation_id): Path<String>,
) -> Result<Json<Conversation>, ChatError> {
    Ok(Json(manager.get_conversation(&user_id, &conversation_id).await?))
}

pub async fn delete_conversation_handler(
    State(manager): State<Arc<ConversationManager>>,
    UserId(user_id): UserId,
    Path(conversation_id): Path<String>,
) -> Result<StatusCode, ChatError> {
    manager.delete_conversation(&user_id, &conversation_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn break_conversation_handler(
    State(manager): State<Arc<ConversationManager>>,
    UserId(user_id): UserId,
    Path(conversation_id): Path<String>,
) -> Result<StatusCode, ChatError> {
    manager.break_conversation(&user_id, &conversation_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Starts a turn and returns the receiving end of its sink. Errors before
/// the first fragment are still plain HTTP errors.
async fn start_turn(
    manager: &ConversationManager,
    shutdown: &CancellationToken,
    user_id: String,
    conversation_id: String,
    request: ChatRequest,
    format: WireFormat,
) -> Result<mpsc::UnboundedReceiver<String>, ChatError> {
    info!(
        "Chat request: user={}, conversation={}, parts={}, regen={:?}",
        user_id,
        conversation_id,
        request.content.len(),
        request.regen_message_id
    );

    let turn = manager
        .begin_turn(
            TurnRequest {
                user_id,
                conversation_id,
                content: request.content,
                regen_message_id: request.regen_message_id,
            },
            shutdown,
        )
        .await?;

    info!("Streaming reply {}", turn.reply_id());
    let (tx, rx) = mpsc::unbounded_channel();
    let _ = turn.stream_to(tx, format);
    Ok(rx)
}

/// Fragments as SSE events, one JSON message per event.
pub async fn chat_sse_handler(
    State(manager): State<Arc<ConversationManager>>,
    State(shutdown): State<CancellationToken>,
    UserId(user_id): UserId,
    Path(conversation_id): Path<String>,
    Json(request): Json<ChatRequest>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ChatError> {
    let mut rx = start_turn(&manager, &shutdown, user_id, conversation_id, request, WireFormat::Json).await?;

    let stream = async_stream::stream! {
        while let Some(line) = rx.recv().await {
            yield Ok(Event::default().data(line));
        }
    };
    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

/// Fragments as data stream protocol lines.
pub async fn chat_data_stream_handler(
    State(manager): State<Arc<ConversationManager>>,
    State(shutdown): State<CancellationToken>,
    UserId(user_id): UserId,
    Path(conversation_id): Path<String>,
    Json(request): Json<ChatRequest>,
) -> Result<impl IntoResponse, ChatError> {
    let mut rx = start_turn(&manager, &shutdown, user_id, conversation_id, request, WireFormat::DataStream).await?;

    let stream = async_stream::stream! {
        while let Some(line) = rx.recv().await {
            yield Ok::<_, Infallible>(line);
        }
    };
    Ok((
        [
            (header::CONTENT_TYPE, "text/plain; charset=utf-8"),
            (HeaderName::from_static(DATA_STREAM_HEADER), DATA_STREAM_VERSION),
        ],
        Body::from_stream(stream),
    ))
}
