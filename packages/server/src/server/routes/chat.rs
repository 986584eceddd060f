//! Chat endpoints. Replies stream back as Server-Sent Events, one
//! `StreamChunk` per event, ending with a chunk whose `done` is true.
//!
//! Closing the response (client disconnect) cancels the generation; whatever
//! was streamed so far is still saved and billed.

use std::convert::Infallible;

use axum::{
    extract::{Extension, Path, Query},
    http::StatusCode,
    response::sse::{Event, KeepAlive, Sse},
    Json,
};
use futures::{Stream, StreamExt};

use crate::common::{ChatId, ChatMessageId, PageParams};
use crate::domains::chat::{Chat, ChatMessage, CreateChat, SendChatMessage, UsageSummary};
use crate::generation::ChunkStream;
use crate::server::app::AxumAppState;
use crate::server::errors::ApiError;
use crate::server::middleware::AuthUser;

/// POST /api/chats
pub async fn create_chat(
    Extension(state): Extension<AxumAppState>,
    user: AuthUser,
    Json(request): Json<CreateChat>,
) -> Result<(StatusCode, Json<Chat>), ApiError> {
    let chat = state.deps.chat().create_chat(user.user_id, request).await?;
    Ok((StatusCode::CREATED, Json(chat)))
}

/// GET /api/chats?limit=&offset=
pub async fn list_chats(
    Extension(state): Extension<AxumAppState>,
    user: AuthUser,
    Query(page): Query<PageParams>,
) -> Result<Json<Vec<Chat>>, ApiError> {
    let chats = state
        .deps
        .chat()
        .list_chats(user.user_id, page.validate())
        .await?;
    Ok(Json(chats))
}

/// GET /api/chats/:chat_id/messages
pub async fn list_chat_messages(
    Extension(state): Extension<AxumAppState>,
    user: AuthUser,
    Path(chat_id): Path<ChatId>,
) -> Result<Json<Vec<ChatMessage>>, ApiError> {
    let messages = state
        .deps
        .chat()
        .chat_messages(user.user_id, chat_id)
        .await?;
    Ok(Json(messages))
}

/// POST /api/chats/:chat_id/messages
pub async fn send_chat_message(
    Extension(state): Extension<AxumAppState>,
    user: AuthUser,
    Path(chat_id): Path<ChatId>,
    Json(request): Json<SendChatMessage>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let chunks = state
        .deps
        .chat()
        .send_message(user.user_id, chat_id, request)
        .await?;
    Ok(into_sse(chunks))
}

/// POST /api/chats/:chat_id/messages/:message_id/regenerate
pub async fn regenerate_chat_message(
    Extension(state): Extension<AxumAppState>,
    user: AuthUser,
    Path((chat_id, message_id)): Path<(ChatId, ChatMessageId)>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let chunks = state
        .deps
        .chat()
        .regenerate(user.user_id, chat_id, message_id)
        .await?;
    Ok(into_sse(chunks))
}

/// GET /api/usage
pub async fn usage_handler(
    Extension(state): Extension<AxumAppState>,
    user: AuthUser,
) -> Result<Json<UsageSummary>, ApiError> {
    Ok(Json(state.deps.chat().usage(user.user_id).await?))
}

fn into_sse(chunks: ChunkStream) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let events = chunks.filter_map(|chunk| async move {
        Event::default().json_data(&chunk).ok().map(Ok)
    });
    Sse::new(events).keep_alive(KeepAlive::default())
}
