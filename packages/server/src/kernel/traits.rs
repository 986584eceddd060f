// Trait definitions for dependency injection
//
// These are INFRASTRUCTURE traits only - storage and accounting, no business rules.
// Authorization and broadcast decisions live in the domain services that use them.

use anyhow::Result;
use async_trait::async_trait;

use crate::common::{ChatId, ChatMessageId, ConversationId, MessageId, Page, UserId};
use crate::domains::billing::Capacity;
use crate::domains::chat::{Chat, ChatMessage, NewChat, NewChatMessage};
use crate::domains::messenger::{
    Conversation, ConversationMessage, NewConversation, NewConversationMessage, Reaction,
};

// =============================================================================
// Chat storage
// =============================================================================

#[async_trait]
pub trait ChatRepository: Send + Sync {
    async fn create_chat(&self, chat: NewChat) -> Result<Chat>;

    /// Owner's chats, most recently active first
    async fn list_chats(&self, owner: UserId, page: Page) -> Result<Vec<Chat>>;

    /// Chat by id, only if owned by `owner`
    async fn find_chat(&self, chat_id: ChatId, owner: UserId) -> Result<Option<Chat>>;

    /// All messages of a chat in creation order
    async fn list_messages(&self, chat_id: ChatId) -> Result<Vec<ChatMessage>>;

    async fn save_message(&self, message: NewChatMessage) -> Result<ChatMessageId>;

    /// Replace content and token count in place
    async fn update_message(&self, message_id: ChatMessageId, content: &str, tokens: i64)
        -> Result<()>;

    /// Bump the chat's activity timestamp
    async fn touch_chat(&self, chat_id: ChatId) -> Result<()>;
}

// =============================================================================
// Messenger storage
// =============================================================================

#[async_trait]
pub trait MessengerRepository: Send + Sync {
    /// Insert the conversation and all of its participants atomically
    async fn create_conversation(&self, conversation: NewConversation) -> Result<Conversation>;

    /// Conversations `user_id` takes part in, most recently active first
    async fn list_conversations(&self, user_id: UserId) -> Result<Vec<Conversation>>;

    /// Newest first
    async fn list_messages(
        &self,
        conversation_id: ConversationId,
        page: Page,
    ) -> Result<Vec<ConversationMessage>>;

    async fn participant_ids(&self, conversation_id: ConversationId) -> Result<Vec<UserId>>;

    async fn is_participant(&self, conversation_id: ConversationId, user_id: UserId)
        -> Result<bool>;

    async fn insert_message(&self, message: NewConversationMessage)
        -> Result<ConversationMessage>;

    async fn find_message(&self, message_id: MessageId) -> Result<Option<ConversationMessage>>;

    /// Set new content and mark edited
    async fn update_message_content(
        &self,
        message_id: MessageId,
        content: &str,
    ) -> Result<ConversationMessage>;

    async fn delete_message(&self, message_id: MessageId) -> Result<()>;

    async fn touch_conversation(&self, conversation_id: ConversationId) -> Result<()>;

    /// Insert a reaction. `None` when the same user already reacted with the same emoji.
    async fn add_reaction(
        &self,
        message_id: MessageId,
        user_id: UserId,
        emoji: &str,
    ) -> Result<Option<Reaction>>;

    /// Returns whether a reaction was removed
    async fn remove_reaction(&self, message_id: MessageId, user_id: UserId, emoji: &str)
        -> Result<bool>;

    async fn mark_read(&self, message_id: MessageId, user_id: UserId) -> Result<()>;
}

// =============================================================================
// Token quota
// =============================================================================

#[async_trait]
pub trait QuotaService: Send + Sync {
    /// Current allowance, applying any due reset first
    async fn check_capacity(&self, user_id: UserId) -> Result<Capacity>;

    async fn increment_usage(&self, user_id: UserId, amount: i64) -> Result<()>;
}
