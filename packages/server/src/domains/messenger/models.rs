use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::common::{ConversationId, MessageId, ReactionId, UserId};

/// Conversation - a direct or group thread and who takes part in it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Conversation {
    pub id: ConversationId,
    #[serde(rename = "type")]
    #[sqlx(rename = "type")]
    pub kind: String, // 'direct', 'group'
    pub name: Option<String>,
    pub created_by: Option<UserId>,
    pub participant_ids: Vec<UserId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationKind {
    Direct,
    Group,
}

impl ConversationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConversationKind::Direct => "direct",
            ConversationKind::Group => "group",
        }
    }
}

/// Rows to insert into `conversations` and `conversation_participants`.
/// The creator is stored as the conversation's admin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewConversation {
    pub id: ConversationId,
    pub kind: ConversationKind,
    pub name: Option<String>,
    pub created_by: UserId,
    /// Everyone but the creator, deduplicated
    pub members: Vec<UserId>,
}

/// ConversationMessage - a message in a direct or group conversation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct ConversationMessage {
    pub id: MessageId,
    pub conversation_id: ConversationId,
    pub sender_id: UserId,
    pub content: String,
    pub message_type: String, // 'text', 'image', 'video', 'audio', 'file'
    pub media_url: Option<String>,
    pub reply_to_id: Option<MessageId>,
    pub is_edited: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Reaction - one user's emoji on one message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Reaction {
    pub id: ReactionId,
    pub message_id: MessageId,
    pub user_id: UserId,
    pub emoji: String,
    pub created_at: DateTime<Utc>,
}

/// Row to insert into `conversation_messages`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewConversationMessage {
    pub conversation_id: ConversationId,
    pub sender_id: UserId,
    pub content: String,
    pub message_type: String,
    pub media_url: Option<String>,
    pub reply_to_id: Option<MessageId>,
}

fn default_message_type() -> String {
    "text".to_string()
}

/// Body of `POST /api/conversations`
#[derive(Debug, Clone, Deserialize)]
pub struct CreateConversation {
    #[serde(rename = "type")]
    pub kind: ConversationKind,
    #[serde(default)]
    pub name: Option<String>,
    pub participant_ids: Vec<UserId>,
}

/// Body of `POST /api/conversations/:conversation_id/messages`
#[derive(Debug, Clone, Deserialize)]
pub struct SendConversationMessage {
    pub content: String,
    #[serde(default = "default_message_type")]
    pub message_type: String,
    #[serde(default)]
    pub media_url: Option<String>,
    #[serde(default)]
    pub reply_to_id: Option<MessageId>,
}

impl SendConversationMessage {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            message_type: default_message_type(),
            media_url: None,
            reply_to_id: None,
        }
    }
}

/// Body of `PUT /api/messages/:message_id`
#[derive(Debug, Clone, Deserialize)]
pub struct UpdateConversationMessage {
    pub content: String,
}

/// Body of `POST /api/messages/:message_id/reactions`
#[derive(Debug, Clone, Deserialize)]
pub struct AddReaction {
    pub emoji: String,
}

/// Who a deletion applies to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeleteScope {
    #[default]
    Everyone,
    Me,
}
