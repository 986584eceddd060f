// TestDependencies - in-process doubles for testing
//
// InMemoryStore stands in for Postgres (chat storage, messenger storage, and
// quota) and records what was written. ScriptedGenerationSource replays a
// fixed list of deltas instead of calling a provider.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::Utc;

use super::{ChatRepository, MessengerRepository, QuotaService};
use crate::common::{ChatId, ChatMessageId, ConversationId, MessageId, Page, ReactionId, UserId};
use crate::domains::billing::{Capacity, UNLIMITED};
use crate::domains::chat::{Chat, ChatMessage, ChatRole, NewChat, NewChatMessage};
use crate::domains::messenger::{
    Conversation, ConversationKind, ConversationMessage, NewConversation, NewConversationMessage,
    Reaction,
};
use crate::generation::{
    GenerationContext, GenerationDelta, GenerationError, GenerationHandle, GenerationSource,
};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// =============================================================================
// In-memory store
// =============================================================================

#[derive(Debug, Clone, Copy)]
struct QuotaRecord {
    used: i64,
    limit: i64,
}

#[derive(Default)]
struct StoreState {
    chats: HashMap<ChatId, Chat>,
    chat_messages: Vec<ChatMessage>,
    quotas: HashMap<UserId, QuotaRecord>,
    usage_increments: Vec<(UserId, i64)>,
    touched_chats: Vec<ChatId>,
    conversations: HashMap<ConversationId, Conversation>,
    conversation_messages: Vec<ConversationMessage>,
    touched_conversations: Vec<ConversationId>,
    reactions: Vec<Reaction>,
    read_receipts: Vec<(MessageId, UserId)>,
    fail_message_writes: bool,
}

/// Shared in-memory backing for every storage trait. Clones share state.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    state: Arc<Mutex<StoreState>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a chat owned by `owner`
    pub fn create_chat(&self, owner: UserId, model: Option<&str>) -> ChatId {
        let now = Utc::now();
        let chat = Chat {
            id: ChatId::new(),
            user_id: owner,
            title: "New Chat".to_string(),
            model: model.map(str::to_string),
            created_at: now,
            updated_at: now,
        };
        let id = chat.id;
        lock(&self.state).chats.insert(id, chat);
        id
    }

    /// Append an existing turn to a chat's history
    pub fn seed_chat_message(&self, chat_id: ChatId, role: ChatRole, content: &str) -> ChatMessageId {
        let message = ChatMessage {
            id: ChatMessageId::new(),
            chat_id,
            role: role.as_str().to_string(),
            content: content.to_string(),
            tokens: crate::generation::estimate_tokens(content),
            model: None,
            created_at: Utc::now(),
        };
        let id = message.id;
        lock(&self.state).chat_messages.push(message);
        id
    }

    /// Give `user` a finite allowance (users without one are unlimited)
    pub fn set_quota(&self, user: UserId, used: i64, limit: i64) {
        lock(&self.state)
            .quotas
            .insert(user, QuotaRecord { used, limit });
    }

    /// Make every chat message insert/update fail
    pub fn fail_message_writes(&self, fail: bool) {
        lock(&self.state).fail_message_writes = fail;
    }

    /// Group conversation created by the first participant
    pub fn create_conversation(&self, participants: &[UserId]) -> ConversationId {
        let now = Utc::now();
        let conversation = Conversation {
            id: ConversationId::new(),
            kind: ConversationKind::Group.as_str().to_string(),
            name: None,
            created_by: participants.first().copied(),
            participant_ids: participants.to_vec(),
            created_at: now,
            updated_at: now,
        };
        let id = conversation.id;
        lock(&self.state).conversations.insert(id, conversation);
        id
    }

    pub fn seed_conversation_message(
        &self,
        conversation_id: ConversationId,
        sender_id: UserId,
        content: &str,
    ) -> MessageId {
        let now = Utc::now();
        let message = ConversationMessage {
            id: MessageId::new(),
            conversation_id,
            sender_id,
            content: content.to_string(),
            message_type: "text".to_string(),
            media_url: None,
            reply_to_id: None,
            is_edited: false,
            created_at: now,
            updated_at: now,
        };
        let id = message.id;
        lock(&self.state).conversation_messages.push(message);
        id
    }

    /// Chat messages in insertion order
    pub fn chat_messages(&self, chat_id: ChatId) -> Vec<ChatMessage> {
        lock(&self.state)
            .chat_messages
            .iter()
            .filter(|m| m.chat_id == chat_id)
            .cloned()
            .collect()
    }

    /// Every `increment_usage` call, in order
    pub fn usage_increments(&self) -> Vec<(UserId, i64)> {
        lock(&self.state).usage_increments.clone()
    }

    pub fn tokens_used(&self, user: UserId) -> i64 {
        lock(&self.state)
            .quotas
            .get(&user)
            .map(|q| q.used)
            .unwrap_or(0)
    }

    pub fn touched_chats(&self) -> Vec<ChatId> {
        lock(&self.state).touched_chats.clone()
    }

    pub fn conversation_messages(&self) -> Vec<ConversationMessage> {
        lock(&self.state).conversation_messages.clone()
    }

    pub fn touched_conversations(&self) -> Vec<ConversationId> {
        lock(&self.state).touched_conversations.clone()
    }

    pub fn reactions(&self) -> Vec<Reaction> {
        lock(&self.state).reactions.clone()
    }

    pub fn read_receipts(&self) -> Vec<(MessageId, UserId)> {
        lock(&self.state).read_receipts.clone()
    }
}

#[async_trait]
impl ChatRepository for InMemoryStore {
    async fn create_chat(&self, chat: NewChat) -> Result<Chat> {
        let now = Utc::now();
        let created = Chat {
            id: chat.id,
            user_id: chat.user_id,
            title: chat.title,
            model: chat.model,
            created_at: now,
            updated_at: now,
        };
        lock(&self.state).chats.insert(created.id, created.clone());
        Ok(created)
    }

    async fn list_chats(&self, owner: UserId, page: Page) -> Result<Vec<Chat>> {
        let mut chats: Vec<Chat> = lock(&self.state)
            .chats
            .values()
            .filter(|chat| chat.user_id == owner)
            .cloned()
            .collect();
        chats.sort_by(|a, b| (b.updated_at, b.id).cmp(&(a.updated_at, a.id)));
        Ok(page.apply(chats))
    }

    async fn find_chat(&self, chat_id: ChatId, owner: UserId) -> Result<Option<Chat>> {
        Ok(lock(&self.state)
            .chats
            .get(&chat_id)
            .filter(|chat| chat.user_id == owner)
            .cloned())
    }

    async fn list_messages(&self, chat_id: ChatId) -> Result<Vec<ChatMessage>> {
        Ok(self.chat_messages(chat_id))
    }

    async fn save_message(&self, message: NewChatMessage) -> Result<ChatMessageId> {
        let mut state = lock(&self.state);
        if state.fail_message_writes {
            bail!("simulated write failure");
        }
        state.chat_messages.push(ChatMessage {
            id: message.id,
            chat_id: message.chat_id,
            role: message.role.as_str().to_string(),
            content: message.content,
            tokens: message.tokens,
            model: message.model,
            created_at: Utc::now(),
        });
        Ok(message.id)
    }

    async fn update_message(
        &self,
        message_id: ChatMessageId,
        content: &str,
        tokens: i64,
    ) -> Result<()> {
        let mut state = lock(&self.state);
        if state.fail_message_writes {
            bail!("simulated write failure");
        }
        let Some(message) = state.chat_messages.iter_mut().find(|m| m.id == message_id) else {
            bail!("chat message {} no longer exists", message_id);
        };
        message.content = content.to_string();
        message.tokens = tokens;
        Ok(())
    }

    async fn touch_chat(&self, chat_id: ChatId) -> Result<()> {
        let mut state = lock(&self.state);
        if let Some(chat) = state.chats.get_mut(&chat_id) {
            chat.updated_at = Utc::now();
        }
        state.touched_chats.push(chat_id);
        Ok(())
    }
}

#[async_trait]
impl QuotaService for InMemoryStore {
    async fn check_capacity(&self, user_id: UserId) -> Result<Capacity> {
        let state = lock(&self.state);
        Ok(match state.quotas.get(&user_id) {
            Some(quota) => Capacity::limited(quota.used, quota.limit),
            None => Capacity::unlimited(0),
        })
    }

    async fn increment_usage(&self, user_id: UserId, amount: i64) -> Result<()> {
        let mut state = lock(&self.state);
        state.usage_increments.push((user_id, amount));
        state
            .quotas
            .entry(user_id)
            .or_insert(QuotaRecord {
                used: 0,
                limit: UNLIMITED,
            })
            .used += amount;
        Ok(())
    }
}

#[async_trait]
impl MessengerRepository for InMemoryStore {
    async fn create_conversation(&self, conversation: NewConversation) -> Result<Conversation> {
        let now = Utc::now();
        let mut participant_ids = vec![conversation.created_by];
        participant_ids.extend(conversation.members);
        let created = Conversation {
            id: conversation.id,
            kind: conversation.kind.as_str().to_string(),
            name: conversation.name,
            created_by: Some(conversation.created_by),
            participant_ids,
            created_at: now,
            updated_at: now,
        };
        lock(&self.state)
            .conversations
            .insert(created.id, created.clone());
        Ok(created)
    }

    async fn list_conversations(&self, user_id: UserId) -> Result<Vec<Conversation>> {
        let mut conversations: Vec<Conversation> = lock(&self.state)
            .conversations
            .values()
            .filter(|c| c.participant_ids.contains(&user_id))
            .cloned()
            .collect();
        conversations.sort_by(|a, b| (b.updated_at, b.id).cmp(&(a.updated_at, a.id)));
        Ok(conversations)
    }

    async fn list_messages(
        &self,
        conversation_id: ConversationId,
        page: Page,
    ) -> Result<Vec<ConversationMessage>> {
        let state = lock(&self.state);
        let newest_first = state
            .conversation_messages
            .iter()
            .rev()
            .filter(|m| m.conversation_id == conversation_id)
            .cloned();
        Ok(page.apply(newest_first))
    }

    async fn participant_ids(&self, conversation_id: ConversationId) -> Result<Vec<UserId>> {
        Ok(lock(&self.state)
            .conversations
            .get(&conversation_id)
            .map(|c| c.participant_ids.clone())
            .unwrap_or_default())
    }

    async fn is_participant(
        &self,
        conversation_id: ConversationId,
        user_id: UserId,
    ) -> Result<bool> {
        Ok(lock(&self.state)
            .conversations
            .get(&conversation_id)
            .is_some_and(|c| c.participant_ids.contains(&user_id)))
    }

    async fn insert_message(
        &self,
        message: NewConversationMessage,
    ) -> Result<ConversationMessage> {
        let now = Utc::now();
        let stored = ConversationMessage {
            id: MessageId::new(),
            conversation_id: message.conversation_id,
            sender_id: message.sender_id,
            content: message.content,
            message_type: message.message_type,
            media_url: message.media_url,
            reply_to_id: message.reply_to_id,
            is_edited: false,
            created_at: now,
            updated_at: now,
        };
        lock(&self.state).conversation_messages.push(stored.clone());
        Ok(stored)
    }

    async fn find_message(&self, message_id: MessageId) -> Result<Option<ConversationMessage>> {
        Ok(lock(&self.state)
            .conversation_messages
            .iter()
            .find(|m| m.id == message_id)
            .cloned())
    }

    async fn update_message_content(
        &self,
        message_id: MessageId,
        content: &str,
    ) -> Result<ConversationMessage> {
        let mut state = lock(&self.state);
        let Some(message) = state
            .conversation_messages
            .iter_mut()
            .find(|m| m.id == message_id)
        else {
            bail!("message {} not found", message_id);
        };
        message.content = content.to_string();
        message.is_edited = true;
        message.updated_at = Utc::now();
        Ok(message.clone())
    }

    async fn delete_message(&self, message_id: MessageId) -> Result<()> {
        lock(&self.state)
            .conversation_messages
            .retain(|m| m.id != message_id);
        Ok(())
    }

    async fn touch_conversation(&self, conversation_id: ConversationId) -> Result<()> {
        let mut state = lock(&self.state);
        if let Some(conversation) = state.conversations.get_mut(&conversation_id) {
            conversation.updated_at = Utc::now();
        }
        state.touched_conversations.push(conversation_id);
        Ok(())
    }

    async fn add_reaction(
        &self,
        message_id: MessageId,
        user_id: UserId,
        emoji: &str,
    ) -> Result<Option<Reaction>> {
        let mut state = lock(&self.state);
        let exists = state
            .reactions
            .iter()
            .any(|r| r.message_id == message_id && r.user_id == user_id && r.emoji == emoji);
        if exists {
            return Ok(None);
        }

        let reaction = Reaction {
            id: ReactionId::new(),
            message_id,
            user_id,
            emoji: emoji.to_string(),
            created_at: Utc::now(),
        };
        state.reactions.push(reaction.clone());
        Ok(Some(reaction))
    }

    async fn remove_reaction(
        &self,
        message_id: MessageId,
        user_id: UserId,
        emoji: &str,
    ) -> Result<bool> {
        let mut state = lock(&self.state);
        let before = state.reactions.len();
        state
            .reactions
            .retain(|r| !(r.message_id == message_id && r.user_id == user_id && r.emoji == emoji));
        Ok(state.reactions.len() < before)
    }

    async fn mark_read(&self, message_id: MessageId, user_id: UserId) -> Result<()> {
        lock(&self.state).read_receipts.push((message_id, user_id));
        Ok(())
    }
}

// =============================================================================
// Scripted generation
// =============================================================================

#[derive(Default)]
struct ScriptState {
    script: Vec<GenerationDelta>,
    hang_after_script: bool,
    open_error: Option<String>,
    opened: Vec<GenerationContext>,
    close_calls: usize,
}

/// Replays the same delta script for every `open`.
#[derive(Clone, Default)]
pub struct ScriptedGenerationSource {
    state: Arc<Mutex<ScriptState>>,
}

impl ScriptedGenerationSource {
    /// Replay `script` as-is, then report done
    pub fn new(script: Vec<GenerationDelta>) -> Self {
        Self {
            state: Arc::new(Mutex::new(ScriptState {
                script,
                ..Default::default()
            })),
        }
    }

    /// One text delta per fragment, then done
    pub fn from_text(fragments: &[&str]) -> Self {
        let mut script: Vec<GenerationDelta> =
            fragments.iter().map(|f| GenerationDelta::text(*f)).collect();
        script.push(GenerationDelta::done());
        Self::new(script)
    }

    /// Replay `fragments`, then never produce another delta until closed
    pub fn hanging(fragments: &[&str]) -> Self {
        let source = Self::new(fragments.iter().map(|f| GenerationDelta::text(*f)).collect());
        lock(&source.state).hang_after_script = true;
        source
    }

    /// Every `open` fails with `message`
    pub fn failing_open(message: &str) -> Self {
        let source = Self::default();
        lock(&source.state).open_error = Some(message.to_string());
        source
    }

    /// Contexts passed to `open`, in order
    pub fn opened_contexts(&self) -> Vec<GenerationContext> {
        lock(&self.state).opened.clone()
    }

    pub fn close_calls(&self) -> usize {
        lock(&self.state).close_calls
    }
}

#[async_trait]
impl GenerationSource for ScriptedGenerationSource {
    async fn open(
        &self,
        context: GenerationContext,
    ) -> Result<Box<dyn GenerationHandle>, GenerationError> {
        let mut state = lock(&self.state);
        state.opened.push(context);
        if let Some(message) = &state.open_error {
            return Err(GenerationError::Open(message.clone()));
        }

        Ok(Box::new(ScriptedHandle {
            remaining: state.script.iter().cloned().collect(),
            hang_after_script: state.hang_after_script,
            finished: false,
            shared: self.state.clone(),
        }))
    }
}

struct ScriptedHandle {
    remaining: VecDeque<GenerationDelta>,
    hang_after_script: bool,
    finished: bool,
    shared: Arc<Mutex<ScriptState>>,
}

#[async_trait]
impl GenerationHandle for ScriptedHandle {
    async fn next(&mut self) -> GenerationDelta {
        if self.finished {
            return GenerationDelta::done();
        }
        match self.remaining.pop_front() {
            Some(delta) => delta,
            None if self.hang_after_script => std::future::pending().await,
            None => {
                self.finished = true;
                GenerationDelta::done()
            }
        }
    }

    fn close(&mut self) {
        self.finished = true;
        self.remaining.clear();
        lock(&self.shared).close_calls += 1;
    }
}
