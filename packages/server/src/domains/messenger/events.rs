//! Events pushed to messenger clients over the WebSocket.
//!
//! Serialized as `{"type": "<variant>", "payload": {...}}`.

use serde::Serialize;

use super::models::{ConversationMessage, DeleteScope, Reaction};
use crate::common::{ConversationId, MessageId, UserId};
use crate::realtime::WireEvent;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum MessengerEvent {
    NewMessage(ConversationMessage),
    MessageUpdated(ConversationMessage),
    MessageDeleted(MessageDeleted),
    ReactionAdded(Reaction),
    ReactionRemoved(ReactionRemoved),
    Typing(TypingIndicator),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MessageDeleted {
    pub message_id: MessageId,
    pub conversation_id: ConversationId,
    pub deleted_for: DeleteScope,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReactionRemoved {
    pub message_id: MessageId,
    pub user_id: UserId,
    pub emoji: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TypingIndicator {
    pub conversation_id: ConversationId,
    pub user_id: UserId,
    pub is_typing: bool,
}

impl WireEvent for MessengerEvent {
    fn event_type(&self) -> &'static str {
        match self {
            MessengerEvent::NewMessage(_) => "new_message",
            MessengerEvent::MessageUpdated(_) => "message_updated",
            MessengerEvent::MessageDeleted(_) => "message_deleted",
            MessengerEvent::ReactionAdded(_) => "reaction_added",
            MessengerEvent::ReactionRemoved(_) => "reaction_removed",
            MessengerEvent::Typing(_) => "typing",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_tag_matches_event_type() {
        let events = vec![
            MessengerEvent::MessageDeleted(MessageDeleted {
                message_id: MessageId::new(),
                conversation_id: ConversationId::new(),
                deleted_for: DeleteScope::Me,
            }),
            MessengerEvent::ReactionRemoved(ReactionRemoved {
                message_id: MessageId::new(),
                user_id: UserId::new(),
                emoji: "👍".into(),
            }),
            MessengerEvent::Typing(TypingIndicator {
                conversation_id: ConversationId::new(),
                user_id: UserId::new(),
                is_typing: true,
            }),
        ];

        for event in events {
            let json = serde_json::to_value(&event).unwrap();
            assert_eq!(json["type"], event.event_type());
            assert!(json["payload"].is_object());
        }
    }

    #[test]
    fn test_delete_scope_wire_form() {
        let event = MessengerEvent::MessageDeleted(MessageDeleted {
            message_id: MessageId::new(),
            conversation_id: ConversationId::new(),
            deleted_for: DeleteScope::Everyone,
        });
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["payload"]["deleted_for"], "everyone");
    }
}
