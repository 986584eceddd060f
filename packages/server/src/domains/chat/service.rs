//! Direct AI chat: the entry points that feed the streaming pipeline.

use std::sync::Arc;

use tracing::info;

use super::errors::ChatError;
use super::models::{
    Chat, ChatMessage, ChatRole, CreateChat, NewChat, NewChatMessage, SendChatMessage,
    UsageSummary, DEFAULT_CHAT_TITLE,
};
use crate::common::{ChatId, ChatMessageId, Page, UserId};
use crate::generation::{
    estimate_tokens, ChunkStream, ContextMessage, ContextRole, FinalizeTarget, GenerationContext,
    GenerationRequest, StreamingPipeline,
};
use crate::kernel::{ChatRepository, QuotaService};

#[derive(Clone)]
pub struct ChatService {
    repository: Arc<dyn ChatRepository>,
    quota: Arc<dyn QuotaService>,
    pipeline: StreamingPipeline,
    default_model: String,
}

impl ChatService {
    pub fn new(
        repository: Arc<dyn ChatRepository>,
        quota: Arc<dyn QuotaService>,
        pipeline: StreamingPipeline,
        default_model: impl Into<String>,
    ) -> Self {
        Self {
            repository,
            quota,
            pipeline,
            default_model: default_model.into(),
        }
    }

    pub async fn create_chat(
        &self,
        user_id: UserId,
        request: CreateChat,
    ) -> Result<Chat, ChatError> {
        let title = request
            .title
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| DEFAULT_CHAT_TITLE.to_string());
        let chat = self
            .repository
            .create_chat(NewChat {
                id: ChatId::new(),
                user_id,
                title,
                model: request.model.filter(|m| !m.trim().is_empty()),
            })
            .await?;

        info!(user_id = %user_id, chat_id = %chat.id, "Chat created");
        Ok(chat)
    }

    pub async fn list_chats(&self, user_id: UserId, page: Page) -> Result<Vec<Chat>, ChatError> {
        Ok(self.repository.list_chats(user_id, page).await?)
    }

    /// Full history of an owned chat, oldest first.
    pub async fn chat_messages(
        &self,
        user_id: UserId,
        chat_id: ChatId,
    ) -> Result<Vec<ChatMessage>, ChatError> {
        self.repository
            .find_chat(chat_id, user_id)
            .await?
            .ok_or(ChatError::NotFound)?;
        Ok(self.repository.list_messages(chat_id).await?)
    }

    /// Save the user's message and stream the assistant reply.
    ///
    /// The quota is checked before anything is written, so a rejected
    /// request leaves no trace.
    pub async fn send_message(
        &self,
        user_id: UserId,
        chat_id: ChatId,
        request: SendChatMessage,
    ) -> Result<ChunkStream, ChatError> {
        let chat = self
            .repository
            .find_chat(chat_id, user_id)
            .await?
            .ok_or(ChatError::NotFound)?;
        let admission = self.pipeline.admit(user_id).await?;
        let model = chat.model.unwrap_or_else(|| self.default_model.clone());

        let prompt_tokens = estimate_tokens(&request.content);
        self.repository
            .save_message(NewChatMessage {
                id: ChatMessageId::new(),
                chat_id,
                role: ChatRole::User,
                content: request.content,
                tokens: prompt_tokens,
                model: None,
            })
            .await?;

        let history = self.repository.list_messages(chat_id).await?;
        let mut messages = Vec::with_capacity(history.len() + 1);
        if let Some(system_prompt) = request.system_prompt.filter(|p| !p.trim().is_empty()) {
            messages.push(ContextMessage::new(ContextRole::System, system_prompt));
        }
        messages.extend(history.iter().map(ChatMessage::to_context));

        info!(user_id = %user_id, chat_id = %chat_id, turns = messages.len(), "Streaming chat reply");

        self.pipeline
            .start(
                admission,
                GenerationRequest {
                    chat_id,
                    target: FinalizeTarget::Insert {
                        message_id: ChatMessageId::new(),
                    },
                    context: GenerationContext { model, messages },
                    prompt_tokens,
                },
            )
            .await
    }

    /// Re-run an assistant reply, replacing its content in place.
    ///
    /// The model only sees the history strictly before the message.
    pub async fn regenerate(
        &self,
        user_id: UserId,
        chat_id: ChatId,
        message_id: ChatMessageId,
    ) -> Result<ChunkStream, ChatError> {
        let chat = self
            .repository
            .find_chat(chat_id, user_id)
            .await?
            .ok_or(ChatError::NotFound)?;

        let history = self.repository.list_messages(chat_id).await?;
        let position = history
            .iter()
            .position(|m| m.id == message_id)
            .ok_or(ChatError::NotFound)?;
        if !history[position].is_assistant() {
            return Err(ChatError::NotFound);
        }

        let admission = self.pipeline.admit(user_id).await?;
        let model = chat.model.unwrap_or_else(|| self.default_model.clone());
        let messages = history[..position].iter().map(ChatMessage::to_context).collect();

        info!(user_id = %user_id, chat_id = %chat_id, message_id = %message_id, "Regenerating reply");

        self.pipeline
            .start(
                admission,
                GenerationRequest {
                    chat_id,
                    target: FinalizeTarget::Update { message_id },
                    context: GenerationContext { model, messages },
                    prompt_tokens: 0,
                },
            )
            .await
    }

    pub async fn usage(&self, user_id: UserId) -> Result<UsageSummary, ChatError> {
        let capacity = self.quota.check_capacity(user_id).await?;
        Ok(UsageSummary {
            tokens_used: capacity.used,
            tokens_limit: capacity.limit,
            has_capacity: capacity.has_capacity(),
            is_unlimited: capacity.is_unlimited(),
        })
    }
}
