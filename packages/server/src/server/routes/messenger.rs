//! Messenger endpoints. Every change is also pushed to the conversation's
//! connected participants over `/ws`.

use axum::{
    extract::{Extension, Path, Query},
    http::StatusCode,
    Json,
};
use serde::Deserialize;

use crate::common::{ConversationId, MessageId, PageParams};
use crate::domains::messenger::{
    AddReaction, Conversation, ConversationMessage, CreateConversation, DeleteScope, Reaction,
    SendConversationMessage, UpdateConversationMessage,
};
use crate::server::app::AxumAppState;
use crate::server::errors::ApiError;
use crate::server::middleware::AuthUser;

#[derive(Debug, Deserialize)]
pub struct DeleteQuery {
    #[serde(rename = "for", default)]
    scope: DeleteScope,
}

/// POST /api/conversations
pub async fn create_conversation(
    Extension(state): Extension<AxumAppState>,
    user: AuthUser,
    Json(request): Json<CreateConversation>,
) -> Result<(StatusCode, Json<Conversation>), ApiError> {
    let conversation = state
        .deps
        .messenger()
        .create_conversation(user.user_id, request)
        .await?;
    Ok((StatusCode::CREATED, Json(conversation)))
}

/// GET /api/conversations
pub async fn list_conversations(
    Extension(state): Extension<AxumAppState>,
    user: AuthUser,
) -> Result<Json<Vec<Conversation>>, ApiError> {
    let conversations = state
        .deps
        .messenger()
        .list_conversations(user.user_id)
        .await?;
    Ok(Json(conversations))
}

/// GET /api/conversations/:conversation_id/messages?limit=&offset=
pub async fn list_messages(
    Extension(state): Extension<AxumAppState>,
    user: AuthUser,
    Path(conversation_id): Path<ConversationId>,
    Query(page): Query<PageParams>,
) -> Result<Json<Vec<ConversationMessage>>, ApiError> {
    let messages = state
        .deps
        .messenger()
        .list_messages(user.user_id, conversation_id, page.validate())
        .await?;
    Ok(Json(messages))
}

/// POST /api/conversations/:conversation_id/messages
pub async fn send_message(
    Extension(state): Extension<AxumAppState>,
    user: AuthUser,
    Path(conversation_id): Path<ConversationId>,
    Json(request): Json<SendConversationMessage>,
) -> Result<(StatusCode, Json<ConversationMessage>), ApiError> {
    let message = state
        .deps
        .messenger()
        .send_message(user.user_id, conversation_id, request)
        .await?;
    Ok((StatusCode::CREATED, Json(message)))
}

/// PUT /api/messages/:message_id
pub async fn update_message(
    Extension(state): Extension<AxumAppState>,
    user: AuthUser,
    Path(message_id): Path<MessageId>,
    Json(request): Json<UpdateConversationMessage>,
) -> Result<Json<ConversationMessage>, ApiError> {
    let message = state
        .deps
        .messenger()
        .update_message(user.user_id, message_id, request.content)
        .await?;
    Ok(Json(message))
}

/// DELETE /api/messages/:message_id?for=everyone|me
pub async fn delete_message(
    Extension(state): Extension<AxumAppState>,
    user: AuthUser,
    Path(message_id): Path<MessageId>,
    Query(query): Query<DeleteQuery>,
) -> Result<StatusCode, ApiError> {
    state
        .deps
        .messenger()
        .delete_message(user.user_id, message_id, query.scope)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /api/messages/:message_id/reactions
pub async fn add_reaction(
    Extension(state): Extension<AxumAppState>,
    user: AuthUser,
    Path(message_id): Path<MessageId>,
    Json(request): Json<AddReaction>,
) -> Result<(StatusCode, Json<Reaction>), ApiError> {
    let reaction = state
        .deps
        .messenger()
        .add_reaction(user.user_id, message_id, &request.emoji)
        .await?;
    Ok((StatusCode::CREATED, Json(reaction)))
}

/// DELETE /api/messages/:message_id/reactions/:emoji
pub async fn remove_reaction(
    Extension(state): Extension<AxumAppState>,
    user: AuthUser,
    Path((message_id, emoji)): Path<(MessageId, String)>,
) -> Result<StatusCode, ApiError> {
    state
        .deps
        .messenger()
        .remove_reaction(user.user_id, message_id, &emoji)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /api/messages/:message_id/read
pub async fn mark_as_read(
    Extension(state): Extension<AxumAppState>,
    user: AuthUser,
    Path(message_id): Path<MessageId>,
) -> Result<StatusCode, ApiError> {
    state
        .deps
        .messenger()
        .mark_as_read(user.user_id, message_id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}
