//! Regenerating an assistant reply.

mod common;

use common::{collect_chunks, TestHarness};
use relay_core::common::UserId;
use relay_core::domains::chat::{ChatError, ChatRole};
use relay_core::kernel::ScriptedGenerationSource;

#[tokio::test]
async fn test_regenerate_sees_only_prior_history_and_updates_in_place() {
    let harness = TestHarness::new(ScriptedGenerationSource::from_text(&["fresh"]));
    let user = UserId::new();
    let chat_id = harness.store.create_chat(user, None);
    harness.store.seed_chat_message(chat_id, ChatRole::User, "first");
    let target = harness
        .store
        .seed_chat_message(chat_id, ChatRole::Assistant, "stale");
    harness.store.seed_chat_message(chat_id, ChatRole::User, "second");
    harness
        .store
        .seed_chat_message(chat_id, ChatRole::Assistant, "later");

    let stream = harness
        .deps
        .chat()
        .regenerate(user, chat_id, target)
        .await
        .unwrap();
    assert_eq!(stream.message_id(), target);
    collect_chunks(stream).await;

    let opened = harness.source.opened_contexts();
    let contents: Vec<&str> = opened[0]
        .messages
        .iter()
        .map(|m| m.content.as_str())
        .collect();
    assert_eq!(contents, vec!["first"]);

    let stored = harness.store.chat_messages(chat_id);
    assert_eq!(stored.len(), 4);
    assert_eq!(stored[1].id, target);
    assert_eq!(stored[1].content, "fresh");
    assert_eq!(stored[3].content, "later");

    // Only completion tokens are billed for a regeneration
    assert_eq!(
        harness.store.usage_increments(),
        vec![(user, relay_core::generation::estimate_tokens("fresh"))]
    );
}

#[tokio::test]
async fn test_empty_regeneration_keeps_previous_content() {
    let harness = TestHarness::new(ScriptedGenerationSource::from_text(&[]));
    let user = UserId::new();
    let chat_id = harness.store.create_chat(user, None);
    harness.store.seed_chat_message(chat_id, ChatRole::User, "first");
    let target = harness
        .store
        .seed_chat_message(chat_id, ChatRole::Assistant, "keep me");

    let stream = harness
        .deps
        .chat()
        .regenerate(user, chat_id, target)
        .await
        .unwrap();
    let chunks = collect_chunks(stream).await;
    assert_eq!(chunks.len(), 1);
    assert!(chunks[0].done);

    let stored = harness.store.chat_messages(chat_id);
    assert_eq!(stored.len(), 2);
    assert_eq!(stored[1].content, "keep me");
    assert!(harness.store.touched_chats().is_empty());
}

#[tokio::test]
async fn test_regenerate_rejects_user_message() {
    let harness = TestHarness::new(ScriptedGenerationSource::from_text(&["never"]));
    let user = UserId::new();
    let chat_id = harness.store.create_chat(user, None);
    let question = harness.store.seed_chat_message(chat_id, ChatRole::User, "q");

    let result = harness.deps.chat().regenerate(user, chat_id, question).await;

    assert!(matches!(result, Err(ChatError::NotFound)));
    assert!(harness.source.opened_contexts().is_empty());
}

#[tokio::test]
async fn test_chat_of_another_user_is_not_found() {
    let harness = TestHarness::new(ScriptedGenerationSource::from_text(&["never"]));
    let chat_id = harness.store.create_chat(UserId::new(), None);

    let result = harness
        .deps
        .chat()
        .send_message(
            UserId::new(),
            chat_id,
            relay_core::domains::chat::SendChatMessage {
                content: "hi".to_string(),
                system_prompt: None,
            },
        )
        .await;

    assert!(matches!(result, Err(ChatError::NotFound)));
    assert!(harness.store.chat_messages(chat_id).is_empty());
}

#[tokio::test]
async fn test_usage_summary_reflects_allowance() {
    let harness = TestHarness::new(ScriptedGenerationSource::default());
    let user = UserId::new();
    harness.store.set_quota(user, 40, 100);

    let usage = harness.deps.chat().usage(user).await.unwrap();

    assert_eq!(usage.tokens_used, 40);
    assert_eq!(usage.tokens_limit, 100);
    assert!(usage.has_capacity);
    assert!(!usage.is_unlimited);
}
