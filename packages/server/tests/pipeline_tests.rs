//! Streamed chat replies end to end: quota, streaming, cancellation,
//! timeouts, persistence, and billing.

mod common;

use std::time::Duration;

use common::{collect_chunks, eventually, TestHarness};
use futures::StreamExt;
use relay_core::common::{ChatMessageId, UserId};
use relay_core::domains::billing::UNLIMITED;
use relay_core::domains::chat::{ChatError, ChatRole, SendChatMessage};
use relay_core::generation::{
    estimate_tokens, FinalizeTarget, GenerationContext, GenerationDelta, GenerationRequest,
    TIMEOUT_ERROR,
};
use relay_core::kernel::ScriptedGenerationSource;

fn ask(content: &str) -> SendChatMessage {
    SendChatMessage {
        content: content.to_string(),
        system_prompt: None,
    }
}

#[tokio::test]
async fn test_streams_deltas_then_persists_and_bills() {
    let harness = TestHarness::new(ScriptedGenerationSource::from_text(&["Hel", "lo", " world"]));
    let user = UserId::new();
    let chat_id = harness.store.create_chat(user, None);

    let stream = harness
        .deps
        .chat()
        .send_message(user, chat_id, ask("What's up?"))
        .await
        .unwrap();
    let message_id = stream.message_id();
    let chunks = collect_chunks(stream).await;

    let deltas: Vec<&str> = chunks
        .iter()
        .filter(|c| !c.done)
        .map(|c| c.delta.as_str())
        .collect();
    assert_eq!(deltas, vec!["Hel", "lo", " world"]);

    let last = chunks.last().unwrap();
    assert!(last.done);
    assert_eq!(last.delta, "");
    assert_eq!(last.total_tokens, Some(estimate_tokens("Hello world")));
    assert_eq!(last.error, None);
    assert!(chunks.iter().all(|c| c.message_id == message_id));

    let stored = harness.store.chat_messages(chat_id);
    assert_eq!(stored.len(), 2);
    assert_eq!(stored[0].role, "user");
    assert_eq!(stored[0].content, "What's up?");
    assert_eq!(stored[1].id, message_id);
    assert_eq!(stored[1].role, "assistant");
    assert_eq!(stored[1].content, "Hello world");
    assert_eq!(stored[1].tokens, estimate_tokens("Hello world"));
    assert_eq!(stored[1].model.as_deref(), Some("test-model"));

    assert_eq!(
        harness.store.usage_increments(),
        vec![(
            user,
            estimate_tokens("Hello world") + estimate_tokens("What's up?")
        )]
    );
    assert_eq!(harness.store.touched_chats(), vec![chat_id]);
    assert_eq!(harness.source.close_calls(), 1);
}

#[tokio::test]
async fn test_context_uses_chat_model_and_system_prompt() {
    let harness = TestHarness::new(ScriptedGenerationSource::from_text(&["ok"]));
    let user = UserId::new();
    let chat_id = harness.store.create_chat(user, Some("custom-model"));
    harness.store.seed_chat_message(chat_id, ChatRole::User, "earlier");
    harness
        .store
        .seed_chat_message(chat_id, ChatRole::Assistant, "reply");

    let stream = harness
        .deps
        .chat()
        .send_message(
            user,
            chat_id,
            SendChatMessage {
                content: "now".to_string(),
                system_prompt: Some("be brief".to_string()),
            },
        )
        .await
        .unwrap();
    let message_id = stream.message_id();
    collect_chunks(stream).await;

    let opened = harness.source.opened_contexts();
    assert_eq!(opened.len(), 1);
    let GenerationContext { model, messages } = &opened[0];
    assert_eq!(model, "custom-model");
    let contents: Vec<&str> = messages.iter().map(|m| m.content.as_str()).collect();
    assert_eq!(contents, vec!["be brief", "earlier", "reply", "now"]);

    let stored = harness.store.chat_messages(chat_id);
    let reply = stored.iter().find(|m| m.id == message_id).unwrap();
    assert_eq!(reply.model.as_deref(), Some("custom-model"));
}

#[tokio::test]
async fn test_duplicate_terminal_deltas_finalize_once() {
    let harness = TestHarness::new(ScriptedGenerationSource::new(vec![
        GenerationDelta::text("x"),
        GenerationDelta::done(),
        GenerationDelta::done(),
    ]));
    let user = UserId::new();
    let chat_id = harness.store.create_chat(user, None);

    let stream = harness
        .deps
        .chat()
        .send_message(user, chat_id, ask("hi"))
        .await
        .unwrap();
    let chunks = collect_chunks(stream).await;

    assert_eq!(chunks.iter().filter(|c| c.done).count(), 1);
    assert_eq!(harness.store.usage_increments().len(), 1);
    assert_eq!(harness.store.chat_messages(chat_id).len(), 2);
}

#[tokio::test]
async fn test_consumer_disconnect_keeps_partial_reply() {
    let harness = TestHarness::new(ScriptedGenerationSource::hanging(&["Hel", "lo"]));
    let user = UserId::new();
    let chat_id = harness.store.create_chat(user, None);

    let mut stream = harness
        .deps
        .chat()
        .send_message(user, chat_id, ask("hey"))
        .await
        .unwrap();
    let message_id = stream.message_id();
    assert_eq!(stream.next().await.unwrap().delta, "Hel");
    assert_eq!(stream.next().await.unwrap().delta, "lo");
    drop(stream);

    let store = harness.store.clone();
    eventually(move || !store.usage_increments().is_empty()).await;

    let stored = harness.store.chat_messages(chat_id);
    let reply = stored.iter().find(|m| m.id == message_id).unwrap();
    assert_eq!(reply.content, "Hello");
    assert_eq!(
        harness.store.usage_increments(),
        vec![(user, estimate_tokens("Hello") + estimate_tokens("hey"))]
    );
    assert_eq!(harness.source.close_calls(), 1);
}

#[tokio::test]
async fn test_quota_exceeded_rejects_before_anything_is_written() {
    let harness = TestHarness::new(ScriptedGenerationSource::from_text(&["never"]));
    let user = UserId::new();
    let chat_id = harness.store.create_chat(user, None);
    harness.store.set_quota(user, 100, 100);

    let result = harness
        .deps
        .chat()
        .send_message(user, chat_id, ask("hello"))
        .await;

    assert!(matches!(
        result,
        Err(ChatError::QuotaExceeded {
            used: 100,
            limit: 100
        })
    ));
    assert!(harness.store.chat_messages(chat_id).is_empty());
    assert!(harness.store.usage_increments().is_empty());
    assert!(harness.source.opened_contexts().is_empty());
}

#[tokio::test]
async fn test_unlimited_allowance_always_admits() {
    let harness = TestHarness::new(ScriptedGenerationSource::from_text(&["fine"]));
    let user = UserId::new();
    let chat_id = harness.store.create_chat(user, None);
    harness.store.set_quota(user, 1_000_000, UNLIMITED);

    let stream = harness
        .deps
        .chat()
        .send_message(user, chat_id, ask("hello"))
        .await
        .unwrap();
    collect_chunks(stream).await;

    assert_eq!(harness.store.usage_increments().len(), 1);
}

#[tokio::test]
async fn test_timeout_ends_stream_with_error_and_keeps_partial_text() {
    let harness = TestHarness::new(ScriptedGenerationSource::hanging(&["par"]))
        .with_generation_timeout(Duration::from_millis(50));
    let user = UserId::new();
    let chat_id = harness.store.create_chat(user, None);

    let stream = harness
        .deps
        .chat()
        .send_message(user, chat_id, ask("slow?"))
        .await
        .unwrap();
    let chunks = collect_chunks(stream).await;

    assert_eq!(chunks.len(), 2);
    assert_eq!(chunks[0].delta, "par");
    let last = &chunks[1];
    assert!(last.done);
    assert_eq!(last.error.as_deref(), Some(TIMEOUT_ERROR));

    let stored = harness.store.chat_messages(chat_id);
    assert_eq!(stored.last().unwrap().content, "par");
    assert_eq!(harness.store.usage_increments().len(), 1);
    assert_eq!(harness.source.close_calls(), 1);
}

#[tokio::test]
async fn test_upstream_error_mid_stream_is_reported_on_final_chunk() {
    let harness = TestHarness::new(ScriptedGenerationSource::new(vec![
        GenerationDelta::text("part"),
        GenerationDelta::failed("connection reset"),
    ]));
    let user = UserId::new();
    let chat_id = harness.store.create_chat(user, None);

    let stream = harness
        .deps
        .chat()
        .send_message(user, chat_id, ask("go"))
        .await
        .unwrap();
    let chunks = collect_chunks(stream).await;

    let last = chunks.last().unwrap();
    assert!(last.done);
    assert_eq!(last.error.as_deref(), Some("connection reset"));
    assert_eq!(
        harness.store.chat_messages(chat_id).last().unwrap().content,
        "part"
    );
}

#[tokio::test]
async fn test_provider_usage_overrides_estimate() {
    let harness = TestHarness::new(ScriptedGenerationSource::new(vec![
        GenerationDelta::text("abcdefgh"),
        GenerationDelta::done().with_usage(Some(7)),
    ]));
    let user = UserId::new();
    let chat_id = harness.store.create_chat(user, None);

    let stream = harness
        .deps
        .chat()
        .send_message(user, chat_id, ask("count"))
        .await
        .unwrap();
    let chunks = collect_chunks(stream).await;

    assert_eq!(chunks.last().unwrap().total_tokens, Some(7));
    assert_eq!(
        harness.store.usage_increments(),
        vec![(user, 7 + estimate_tokens("count"))]
    );
}

#[tokio::test]
async fn test_persistence_failure_still_bills() {
    let harness = TestHarness::new(ScriptedGenerationSource::from_text(&["lost", " words"]));
    let user = UserId::new();
    let chat_id = harness.store.create_chat(user, None);
    harness.store.fail_message_writes(true);

    let pipeline = harness.deps.pipeline();
    let admission = pipeline.admit(user).await.unwrap();
    let stream = pipeline
        .start(
            admission,
            GenerationRequest {
                chat_id,
                target: FinalizeTarget::Insert {
                    message_id: ChatMessageId::new(),
                },
                context: GenerationContext {
                    model: "test-model".to_string(),
                    messages: Vec::new(),
                },
                prompt_tokens: 3,
            },
        )
        .await
        .unwrap();
    let chunks = collect_chunks(stream).await;

    let last = chunks.last().unwrap();
    assert!(last.done);
    assert!(last
        .error
        .as_deref()
        .unwrap()
        .contains("failed to save message"));
    assert!(harness.store.chat_messages(chat_id).is_empty());
    assert!(harness.store.touched_chats().is_empty());
    assert_eq!(
        harness.store.usage_increments(),
        vec![(user, estimate_tokens("lost words") + 3)]
    );
}

#[tokio::test]
async fn test_open_failure_is_upstream_error_and_bills_nothing() {
    let harness = TestHarness::new(ScriptedGenerationSource::failing_open("refused"));
    let user = UserId::new();
    let chat_id = harness.store.create_chat(user, None);

    let result = harness
        .deps
        .chat()
        .send_message(user, chat_id, ask("hello"))
        .await;

    match result {
        Err(ChatError::Upstream(message)) => assert!(message.contains("refused")),
        Err(other) => panic!("unexpected error: {other}"),
        Ok(_) => panic!("expected open failure"),
    }
    assert!(harness.store.usage_increments().is_empty());
    assert!(harness
        .store
        .chat_messages(chat_id)
        .iter()
        .all(|m| m.role != "assistant"));
}

#[tokio::test]
async fn test_empty_reply_is_stored_under_the_streamed_id() {
    let harness = TestHarness::new(ScriptedGenerationSource::new(vec![GenerationDelta::done()]));
    let user = UserId::new();
    let chat_id = harness.store.create_chat(user, None);

    let stream = harness
        .deps
        .chat()
        .send_message(user, chat_id, ask("anyone there?"))
        .await
        .unwrap();
    let message_id = stream.message_id();
    let chunks = collect_chunks(stream).await;

    assert_eq!(chunks.len(), 1);
    assert!(chunks[0].done);
    assert_eq!(chunks[0].message_id, message_id);
    assert_eq!(chunks[0].total_tokens, Some(0));
    assert_eq!(chunks[0].error, None);

    let stored = harness.store.chat_messages(chat_id);
    assert_eq!(stored.len(), 2);
    let reply = stored.iter().find(|m| m.id == message_id).unwrap();
    assert_eq!(reply.role, "assistant");
    assert_eq!(reply.content, "");
    assert_eq!(reply.tokens, 0);
    assert_eq!(harness.store.touched_chats(), vec![chat_id]);
    assert_eq!(
        harness.store.usage_increments(),
        vec![(user, estimate_tokens("anyone there?"))]
    );
}
