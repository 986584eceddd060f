//! Postgres-backed messenger storage.

use anyhow::Result;
use async_trait::async_trait;
use sqlx::PgPool;

use super::models::{
    Conversation, ConversationMessage, NewConversation, NewConversationMessage, Reaction,
};
use crate::common::{ConversationId, MessageId, Page, ReactionId, UserId};
use crate::kernel::MessengerRepository;

const MESSAGE_COLUMNS: &str = "id, conversation_id, sender_id, content, message_type, media_url, \
                               reply_to_id, is_edited, created_at, updated_at";

const CONVERSATION_COLUMNS: &str = "c.id, c.type, c.name, c.created_by, c.created_at, c.updated_at, \
    ARRAY(SELECT p.user_id FROM conversation_participants p \
          WHERE p.conversation_id = c.id ORDER BY p.joined_at, p.user_id) AS participant_ids";

pub struct PgMessengerRepository {
    pool: PgPool,
}

impl PgMessengerRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl MessengerRepository for PgMessengerRepository {
    async fn create_conversation(&self, conversation: NewConversation) -> Result<Conversation> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("INSERT INTO conversations (id, type, name, created_by) VALUES ($1, $2, $3, $4)")
            .bind(conversation.id)
            .bind(conversation.kind.as_str())
            .bind(&conversation.name)
            .bind(conversation.created_by)
            .execute(&mut *tx)
            .await?;

        sqlx::query(
            "INSERT INTO conversation_participants (conversation_id, user_id, role) \
             VALUES ($1, $2, 'admin')",
        )
        .bind(conversation.id)
        .bind(conversation.created_by)
        .execute(&mut *tx)
        .await?;

        for member in &conversation.members {
            sqlx::query(
                "INSERT INTO conversation_participants (conversation_id, user_id, role) \
                 VALUES ($1, $2, 'member') ON CONFLICT DO NOTHING",
            )
            .bind(conversation.id)
            .bind(*member)
            .execute(&mut *tx)
            .await?;
        }

        let sql = format!(
            "SELECT {} FROM conversations c WHERE c.id = $1",
            CONVERSATION_COLUMNS
        );
        let created = sqlx::query_as::<_, Conversation>(&sql)
            .bind(conversation.id)
            .fetch_one(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(created)
    }

    async fn list_conversations(&self, user_id: UserId) -> Result<Vec<Conversation>> {
        let sql = format!(
            r#"
            SELECT {}
            FROM conversations c
            JOIN conversation_participants me
              ON me.conversation_id = c.id AND me.user_id = $1
            ORDER BY c.updated_at DESC, c.id DESC
            "#,
            CONVERSATION_COLUMNS
        );
        let conversations = sqlx::query_as::<_, Conversation>(&sql)
            .bind(user_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(conversations)
    }

    async fn list_messages(
        &self,
        conversation_id: ConversationId,
        page: Page,
    ) -> Result<Vec<ConversationMessage>> {
        let sql = format!(
            r#"
            SELECT {}
            FROM conversation_messages
            WHERE conversation_id = $1
            ORDER BY created_at DESC, id DESC
            LIMIT $2 OFFSET $3
            "#,
            MESSAGE_COLUMNS
        );
        let messages = sqlx::query_as::<_, ConversationMessage>(&sql)
            .bind(conversation_id)
            .bind(page.limit)
            .bind(page.offset)
            .fetch_all(&self.pool)
            .await?;
        Ok(messages)
    }

    async fn participant_ids(&self, conversation_id: ConversationId) -> Result<Vec<UserId>> {
        let ids = sqlx::query_scalar::<_, UserId>(
            "SELECT user_id FROM conversation_participants WHERE conversation_id = $1",
        )
        .bind(conversation_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(ids)
    }

    async fn is_participant(
        &self,
        conversation_id: ConversationId,
        user_id: UserId,
    ) -> Result<bool> {
        let exists = sqlx::query_scalar::<_, bool>(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM conversation_participants
                WHERE conversation_id = $1 AND user_id = $2
            )
            "#,
        )
        .bind(conversation_id)
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(exists)
    }

    async fn insert_message(
        &self,
        message: NewConversationMessage,
    ) -> Result<ConversationMessage> {
        let sql = format!(
            r#"
            INSERT INTO conversation_messages
                (id, conversation_id, sender_id, content, message_type, media_url, reply_to_id)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING {}
            "#,
            MESSAGE_COLUMNS
        );
        let inserted = sqlx::query_as::<_, ConversationMessage>(&sql)
            .bind(MessageId::new())
            .bind(message.conversation_id)
            .bind(message.sender_id)
            .bind(message.content)
            .bind(message.message_type)
            .bind(message.media_url)
            .bind(message.reply_to_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(inserted)
    }

    async fn find_message(&self, message_id: MessageId) -> Result<Option<ConversationMessage>> {
        let sql = format!(
            "SELECT {} FROM conversation_messages WHERE id = $1",
            MESSAGE_COLUMNS
        );
        let message = sqlx::query_as::<_, ConversationMessage>(&sql)
            .bind(message_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(message)
    }

    async fn update_message_content(
        &self,
        message_id: MessageId,
        content: &str,
    ) -> Result<ConversationMessage> {
        let sql = format!(
            r#"
            UPDATE conversation_messages
            SET content = $2, is_edited = TRUE, updated_at = NOW()
            WHERE id = $1
            RETURNING {}
            "#,
            MESSAGE_COLUMNS
        );
        let message = sqlx::query_as::<_, ConversationMessage>(&sql)
            .bind(message_id)
            .bind(content)
            .fetch_one(&self.pool)
            .await?;
        Ok(message)
    }

    async fn delete_message(&self, message_id: MessageId) -> Result<()> {
        sqlx::query("DELETE FROM conversation_messages WHERE id = $1")
            .bind(message_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn touch_conversation(&self, conversation_id: ConversationId) -> Result<()> {
        sqlx::query("UPDATE conversations SET updated_at = NOW() WHERE id = $1")
            .bind(conversation_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn add_reaction(
        &self,
        message_id: MessageId,
        user_id: UserId,
        emoji: &str,
    ) -> Result<Option<Reaction>> {
        let reaction = sqlx::query_as::<_, Reaction>(
            r#"
            INSERT INTO message_reactions (id, message_id, user_id, emoji)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (message_id, user_id, emoji) DO NOTHING
            RETURNING id, message_id, user_id, emoji, created_at
            "#,
        )
        .bind(ReactionId::new())
        .bind(message_id)
        .bind(user_id)
        .bind(emoji)
        .fetch_optional(&self.pool)
        .await?;
        Ok(reaction)
    }

    async fn remove_reaction(
        &self,
        message_id: MessageId,
        user_id: UserId,
        emoji: &str,
    ) -> Result<bool> {
        let result = sqlx::query(
            "DELETE FROM message_reactions WHERE message_id = $1 AND user_id = $2 AND emoji = $3",
        )
        .bind(message_id)
        .bind(user_id)
        .bind(emoji)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn mark_read(&self, message_id: MessageId, user_id: UserId) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO read_receipts (message_id, user_id)
            VALUES ($1, $2)
            ON CONFLICT (message_id, user_id) DO UPDATE SET read_at = NOW()
            "#,
        )
        .bind(message_id)
        .bind(user_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
