use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::common::{ChatId, ChatMessageId, UserId};
use crate::generation::{ContextMessage, ContextRole};

/// Chat - one user's direct conversation with a model
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Chat {
    pub id: ChatId,
    pub user_id: UserId,
    pub title: String,
    pub model: Option<String>, // falls back to the configured default
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// ChatMessage - one turn of a chat
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ChatMessage {
    pub id: ChatMessageId,
    pub chat_id: ChatId,
    pub role: String, // 'system', 'user', 'assistant'
    pub content: String,
    pub tokens: i64,
    pub model: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl ChatMessage {
    pub fn is_assistant(&self) -> bool {
        self.role == ChatRole::Assistant.as_str()
    }

    /// Context entry for the provider. Unknown roles are sent as user turns.
    pub fn to_context(&self) -> ContextMessage {
        let role = match self.role.parse::<ChatRole>() {
            Ok(ChatRole::System) => ContextRole::System,
            Ok(ChatRole::Assistant) => ContextRole::Assistant,
            Ok(ChatRole::User) | Err(_) => ContextRole::User,
        };
        ContextMessage::new(role, self.content.clone())
    }
}

/// Message role enum
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

impl ChatRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChatRole::System => "system",
            ChatRole::User => "user",
            ChatRole::Assistant => "assistant",
        }
    }
}

impl std::fmt::Display for ChatRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ChatRole {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "system" => Ok(ChatRole::System),
            "user" => Ok(ChatRole::User),
            "assistant" => Ok(ChatRole::Assistant),
            _ => Err(anyhow::anyhow!("Invalid chat role: {}", s)),
        }
    }
}

/// Row to insert into `chat_messages`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewChatMessage {
    pub id: ChatMessageId,
    pub chat_id: ChatId,
    pub role: ChatRole,
    pub content: String,
    pub tokens: i64,
    pub model: Option<String>,
}

/// Title given to chats created without one
pub const DEFAULT_CHAT_TITLE: &str = "New Chat";

/// Row to insert into `chats`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewChat {
    pub id: ChatId,
    pub user_id: UserId,
    pub title: String,
    pub model: Option<String>,
}

/// Body of `POST /api/chats`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CreateChat {
    #[serde(default)]
    pub title: Option<String>,
    /// Stored as-is; unset chats use the configured default model
    #[serde(default)]
    pub model: Option<String>,
}

/// Body of `POST /api/chats/:chat_id/messages`
#[derive(Debug, Clone, Deserialize)]
pub struct SendChatMessage {
    pub content: String,
    #[serde(default)]
    pub system_prompt: Option<String>,
}

/// Response of `GET /api/usage`
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct UsageSummary {
    pub tokens_used: i64,
    pub tokens_limit: i64,
    pub has_capacity: bool,
    pub is_unlimited: bool,
}
