//! Messenger operations. Each one authorises against conversation
//! membership, persists, then broadcasts to the conversation's participants.
//!
//! State changes are delivered to every participant, the actor included, so
//! all of a user's views converge on the same event stream. Typing indicators
//! skip the typist.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use super::errors::MessengerError;
use super::events::{MessageDeleted, MessengerEvent, ReactionRemoved, TypingIndicator};
use super::models::{
    Conversation, ConversationKind, ConversationMessage, CreateConversation, DeleteScope,
    NewConversation, NewConversationMessage, Reaction, SendConversationMessage,
};
use crate::common::{ConversationId, MessageId, Page, UserId};
use crate::kernel::MessengerRepository;
use crate::realtime::{BroadcastDispatcher, InboundFrame, InboundHandler};

#[derive(Clone)]
pub struct MessengerService {
    repository: Arc<dyn MessengerRepository>,
    dispatcher: BroadcastDispatcher,
}

impl MessengerService {
    pub fn new(repository: Arc<dyn MessengerRepository>, dispatcher: BroadcastDispatcher) -> Self {
        Self {
            repository,
            dispatcher,
        }
    }

    /// The creator becomes the conversation's admin. Duplicate ids and the
    /// creator's own id in `participant_ids` are ignored.
    pub async fn create_conversation(
        &self,
        creator: UserId,
        request: CreateConversation,
    ) -> Result<Conversation, MessengerError> {
        let mut members: Vec<UserId> = Vec::with_capacity(request.participant_ids.len());
        for id in request.participant_ids {
            if id != creator && !members.contains(&id) {
                members.push(id);
            }
        }
        if members.is_empty() {
            return Err(MessengerError::InvalidRequest(
                "at least one other participant is required",
            ));
        }
        if request.kind == ConversationKind::Direct && members.len() != 1 {
            return Err(MessengerError::InvalidRequest(
                "a direct conversation has exactly one other participant",
            ));
        }

        let conversation = self
            .repository
            .create_conversation(NewConversation {
                id: ConversationId::new(),
                kind: request.kind,
                name: request.name.filter(|n| !n.trim().is_empty()),
                created_by: creator,
                members,
            })
            .await?;

        info!(
            conversation_id = %conversation.id,
            created_by = %creator,
            participants = conversation.participant_ids.len(),
            "Conversation created"
        );
        Ok(conversation)
    }

    pub async fn list_conversations(
        &self,
        user_id: UserId,
    ) -> Result<Vec<Conversation>, MessengerError> {
        Ok(self.repository.list_conversations(user_id).await?)
    }

    /// Message history, newest first. The recovery path for missed pushes.
    pub async fn list_messages(
        &self,
        user_id: UserId,
        conversation_id: ConversationId,
        page: Page,
    ) -> Result<Vec<ConversationMessage>, MessengerError> {
        self.require_participant(conversation_id, user_id).await?;
        Ok(self.repository.list_messages(conversation_id, page).await?)
    }

    pub async fn send_message(
        &self,
        sender_id: UserId,
        conversation_id: ConversationId,
        request: SendConversationMessage,
    ) -> Result<ConversationMessage, MessengerError> {
        self.require_participant(conversation_id, sender_id).await?;

        let message = self
            .repository
            .insert_message(NewConversationMessage {
                conversation_id,
                sender_id,
                content: request.content,
                message_type: request.message_type,
                media_url: request.media_url,
                reply_to_id: request.reply_to_id,
            })
            .await?;

        if let Err(e) = self.repository.touch_conversation(conversation_id).await {
            warn!(conversation_id = %conversation_id, error = %e, "Failed to touch conversation");
        }

        info!(
            conversation_id = %conversation_id,
            message_id = %message.id,
            sender_id = %sender_id,
            "Message sent"
        );
        self.broadcast(conversation_id, &MessengerEvent::NewMessage(message.clone()))
            .await;
        Ok(message)
    }

    /// Only the sender may edit.
    pub async fn update_message(
        &self,
        user_id: UserId,
        message_id: MessageId,
        content: String,
    ) -> Result<ConversationMessage, MessengerError> {
        let message = self.find_message(message_id).await?;
        if message.sender_id != user_id {
            return Err(MessengerError::NotAuthorized);
        }

        let updated = self
            .repository
            .update_message_content(message_id, &content)
            .await?;

        self.broadcast(
            updated.conversation_id,
            &MessengerEvent::MessageUpdated(updated.clone()),
        )
        .await;
        Ok(updated)
    }

    /// `Everyone` removes the message for all participants (sender only).
    /// `Me` is notification-only: nothing is stored, and only the caller's
    /// own connections hear about it.
    pub async fn delete_message(
        &self,
        user_id: UserId,
        message_id: MessageId,
        scope: DeleteScope,
    ) -> Result<(), MessengerError> {
        let message = self.find_message(message_id).await?;

        match scope {
            DeleteScope::Everyone => {
                if message.sender_id != user_id {
                    return Err(MessengerError::NotAuthorized);
                }
                self.repository.delete_message(message_id).await?;
                self.broadcast(
                    message.conversation_id,
                    &MessengerEvent::MessageDeleted(MessageDeleted {
                        message_id,
                        conversation_id: message.conversation_id,
                        deleted_for: DeleteScope::Everyone,
                    }),
                )
                .await;
            }
            DeleteScope::Me => {
                self.require_participant(message.conversation_id, user_id)
                    .await?;
                self.dispatcher
                    .broadcast_to_identities(
                        [user_id],
                        &MessengerEvent::MessageDeleted(MessageDeleted {
                            message_id,
                            conversation_id: message.conversation_id,
                            deleted_for: DeleteScope::Me,
                        }),
                    )
                    .await;
            }
        }
        Ok(())
    }

    pub async fn add_reaction(
        &self,
        user_id: UserId,
        message_id: MessageId,
        emoji: &str,
    ) -> Result<Reaction, MessengerError> {
        let message = self.find_message(message_id).await?;
        self.require_participant(message.conversation_id, user_id)
            .await?;

        let reaction = self
            .repository
            .add_reaction(message_id, user_id, emoji)
            .await?
            .ok_or(MessengerError::DuplicateReaction)?;

        self.broadcast(
            message.conversation_id,
            &MessengerEvent::ReactionAdded(reaction.clone()),
        )
        .await;
        Ok(reaction)
    }

    pub async fn remove_reaction(
        &self,
        user_id: UserId,
        message_id: MessageId,
        emoji: &str,
    ) -> Result<(), MessengerError> {
        let message = self.find_message(message_id).await?;
        self.require_participant(message.conversation_id, user_id)
            .await?;

        if !self
            .repository
            .remove_reaction(message_id, user_id, emoji)
            .await?
        {
            debug!(message_id = %message_id, emoji = emoji, "No reaction to remove");
            return Ok(());
        }

        self.broadcast(
            message.conversation_id,
            &MessengerEvent::ReactionRemoved(ReactionRemoved {
                message_id,
                user_id,
                emoji: emoji.to_string(),
            }),
        )
        .await;
        Ok(())
    }

    pub async fn mark_as_read(
        &self,
        user_id: UserId,
        message_id: MessageId,
    ) -> Result<(), MessengerError> {
        let message = self.find_message(message_id).await?;
        self.require_participant(message.conversation_id, user_id)
            .await?;
        self.repository.mark_read(message_id, user_id).await?;
        Ok(())
    }

    /// Tell the other participants that `user_id` started or stopped typing.
    pub async fn typing(
        &self,
        user_id: UserId,
        conversation_id: ConversationId,
        is_typing: bool,
    ) -> Result<(), MessengerError> {
        let participants = self.repository.participant_ids(conversation_id).await?;
        if !participants.contains(&user_id) {
            return Err(MessengerError::NotParticipant);
        }

        let others = participants.into_iter().filter(|id| *id != user_id);
        self.dispatcher
            .broadcast_to_identities(
                others,
                &MessengerEvent::Typing(TypingIndicator {
                    conversation_id,
                    user_id,
                    is_typing,
                }),
            )
            .await;
        Ok(())
    }

    async fn find_message(&self, message_id: MessageId) -> Result<ConversationMessage, MessengerError> {
        self.repository
            .find_message(message_id)
            .await?
            .ok_or(MessengerError::NotFound)
    }

    async fn require_participant(
        &self,
        conversation_id: ConversationId,
        user_id: UserId,
    ) -> Result<(), MessengerError> {
        if self
            .repository
            .is_participant(conversation_id, user_id)
            .await?
        {
            Ok(())
        } else {
            Err(MessengerError::NotParticipant)
        }
    }

    /// Persisted changes stand even if the participant lookup fails; the
    /// push is simply skipped.
    async fn broadcast(&self, conversation_id: ConversationId, event: &MessengerEvent) {
        match self.repository.participant_ids(conversation_id).await {
            Ok(participants) => {
                self.dispatcher
                    .broadcast_to_identities(participants, event)
                    .await
            }
            Err(e) => warn!(
                conversation_id = %conversation_id,
                error = %e,
                "Failed to load participants; broadcast skipped"
            ),
        }
    }
}

/// Routes WebSocket client frames into messenger operations.
#[async_trait]
impl InboundHandler for MessengerService {
    async fn handle(&self, identity: UserId, frame: InboundFrame) {
        let result = match frame {
            InboundFrame::Typing(typing) => {
                self.typing(identity, typing.conversation_id, typing.is_typing)
                    .await
            }
            InboundFrame::Read(read) => self.mark_as_read(identity, read.message_id).await,
        };

        if let Err(e) = result {
            debug!(user_id = %identity, error = %e, "Inbound frame rejected");
        }
    }
}
