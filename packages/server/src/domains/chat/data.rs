//! Postgres-backed chat storage.

use anyhow::Result;
use async_trait::async_trait;
use sqlx::PgPool;

use super::models::{Chat, ChatMessage, NewChat, NewChatMessage};
use crate::common::{ChatId, ChatMessageId, Page, UserId};
use crate::kernel::ChatRepository;

pub struct PgChatRepository {
    pool: PgPool,
}

impl PgChatRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ChatRepository for PgChatRepository {
    async fn create_chat(&self, chat: NewChat) -> Result<Chat> {
        let created = sqlx::query_as::<_, Chat>(
            r#"
            INSERT INTO chats (id, user_id, title, model)
            VALUES ($1, $2, $3, $4)
            RETURNING id, user_id, title, model, created_at, updated_at
            "#,
        )
        .bind(chat.id)
        .bind(chat.user_id)
        .bind(chat.title)
        .bind(chat.model)
        .fetch_one(&self.pool)
        .await?;
        Ok(created)
    }

    async fn list_chats(&self, owner: UserId, page: Page) -> Result<Vec<Chat>> {
        let chats = sqlx::query_as::<_, Chat>(
            r#"
            SELECT id, user_id, title, model, created_at, updated_at
            FROM chats
            WHERE user_id = $1 AND deleted_at IS NULL
            ORDER BY updated_at DESC, id DESC
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(owner)
        .bind(page.limit)
        .bind(page.offset)
        .fetch_all(&self.pool)
        .await?;
        Ok(chats)
    }

    async fn find_chat(&self, chat_id: ChatId, owner: UserId) -> Result<Option<Chat>> {
        let chat = sqlx::query_as::<_, Chat>(
            r#"
            SELECT id, user_id, title, model, created_at, updated_at
            FROM chats
            WHERE id = $1 AND user_id = $2 AND deleted_at IS NULL
            "#,
        )
        .bind(chat_id)
        .bind(owner)
        .fetch_optional(&self.pool)
        .await?;
        Ok(chat)
    }

    async fn list_messages(&self, chat_id: ChatId) -> Result<Vec<ChatMessage>> {
        let messages = sqlx::query_as::<_, ChatMessage>(
            r#"
            SELECT id, chat_id, role, content, tokens, model, created_at
            FROM chat_messages
            WHERE chat_id = $1
            ORDER BY created_at ASC, id ASC
            "#,
        )
        .bind(chat_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(messages)
    }

    async fn save_message(&self, message: NewChatMessage) -> Result<ChatMessageId> {
        let id = sqlx::query_scalar::<_, ChatMessageId>(
            r#"
            INSERT INTO chat_messages (id, chat_id, role, content, tokens, model)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING id
            "#,
        )
        .bind(message.id)
        .bind(message.chat_id)
        .bind(message.role.as_str())
        .bind(message.content)
        .bind(message.tokens)
        .bind(message.model)
        .fetch_one(&self.pool)
        .await?;
        Ok(id)
    }

    async fn update_message(
        &self,
        message_id: ChatMessageId,
        content: &str,
        tokens: i64,
    ) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE chat_messages
            SET content = $2, tokens = $3
            WHERE id = $1
            "#,
        )
        .bind(message_id)
        .bind(content)
        .bind(tokens)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            anyhow::bail!("chat message {} no longer exists", message_id);
        }
        Ok(())
    }

    async fn touch_chat(&self, chat_id: ChatId) -> Result<()> {
        sqlx::query("UPDATE chats SET updated_at = NOW() WHERE id = $1")
            .bind(chat_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
