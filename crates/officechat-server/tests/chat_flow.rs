mod common;

use async_trait::async_trait;
use common::{ask, harness, harness_with, parse, run_turn, ScriptedLlm};
use officechat_server::config::ChatConfig;
use officechat_server::models::chat::{
    ChatMessage, ContentPart, MessageRole, MessageType, TokenUsage,
};
use officechat_server::services::conversation::{
    ContentHandler, ContentRegistry, HandleResult, TurnRequest, WireFormat,
};
use officechat_server::utils::error::ChatError;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

fn stored(id: &str, role: MessageRole, text: &str, created_at: i64) -> ChatMessage {
    let message_type = if role == MessageRole::User {
        MessageType::Question
    } else {
        MessageType::Answer
    };
    let mut m = ChatMessage::new(id, role, message_type);
    m.content = vec![ContentPart::text(text)];
    m.text = text.to_string();
    m.created_at = created_at;
    m.is_end = role == MessageRole::Assistant;
    m
}

/// Answers every part itself with a fixed reply.
struct OpenFileHandler;

#[async_trait]
impl ContentHandler for OpenFileHandler {
    async fn handle(
        &self,
        _user_id: &str,
        content: &ContentPart,
        _history: &[ChatMessage],
    ) -> anyhow::Result<HandleResult> {
        Ok(HandleResult {
            need_ai_chat: false,
            request_contents: vec![content.clone()],
            response_contents: vec![ContentPart::text("opened")],
            text: "open file".to_string(),
            action: "open".to_string(),
        })
    }
}

#[tokio::test]
async fn first_turn_streams_and_persists_both_messages() {
    let h = harness(ScriptedLlm::new(&["hi ", "there"]));
    let conversation = h.manager.new_conversation("u1", "", "f1").await.unwrap();
    assert_eq!(conversation.system, ChatConfig::default().default_system_message);

    let lines = run_turn(
        &h.manager,
        ask("u1", &conversation.conversation_id, "hello"),
        WireFormat::Json,
    )
    .await;
    let fragments = parse(&lines);

    let last = fragments.last().unwrap();
    assert!(last.is_end);
    assert_eq!(fragments.iter().filter(|f| f.is_end).count(), 1);
    let streamed: String = fragments.iter().map(|f| f.text.as_str()).collect();
    assert_eq!(streamed, "hi there");

    let window = &h.llm.windows()[0];
    assert_eq!(window.len(), 2);
    assert_eq!(window[0].role, "system");
    assert_eq!(window[0].content, conversation.system);
    assert_eq!(window[1].content, "hello");

    let saved = h
        .manager
        .get_conversation("u1", &conversation.conversation_id)
        .await
        .unwrap();
    assert_eq!(saved.messages.len(), 2);
    assert_eq!(saved.messages[0].role, MessageRole::User);
    assert_eq!(saved.messages[0].text, "hello");
    assert_eq!(saved.messages[0].usage.unwrap().prompt_tokens, 5);

    let reply = &saved.messages[1];
    assert_eq!(reply.message_id, last.message_id);
    assert_eq!(reply.text, "hi there");
    assert!(reply.is_end);
    assert_eq!(reply.usage, Some(TokenUsage::new(5, 8)));
}

#[tokio::test]
async fn second_turn_sees_previous_exchange() {
    let h = harness(ScriptedLlm::new(&["ok"]));
    let c = h.manager.new_conversation("u1", "be brief", "").await.unwrap();

    run_turn(&h.manager, ask("u1", &c.conversation_id, "one"), WireFormat::Json).await;
    run_turn(&h.manager, ask("u1", &c.conversation_id, "two"), WireFormat::Json).await;

    let window: Vec<_> = h.llm.windows()[1]
        .iter()
        .map(|m| (m.role.clone(), m.content.clone()))
        .collect();
    assert_eq!(
        window,
        vec![
            ("system".to_string(), "be brief".to_string()),
            ("user".to_string(), "one".to_string()),
            ("assistant".to_string(), "ok".to_string()),
            ("user".to_string(), "two".to_string()),
        ]
    );
}

#[tokio::test]
async fn regeneration_rebuilds_context_and_keeps_timestamp() {
    let h = harness(ScriptedLlm::new(&["again"]));
    let c = h.manager.new_conversation("u1", "", "").await.unwrap();
    let history = vec![
        stored("q1", MessageRole::User, "Q1", 1_000),
        stored("a1", MessageRole::Assistant, "A1", 2_000),
        stored("q2", MessageRole::User, "Q2", 3_000),
        stored("a2", MessageRole::Assistant, "A2", 4_000),
    ];
    h.store.add_messages("u1", &c.conversation_id, &history).await.unwrap();

    let req = TurnRequest {
        regen_message_id: Some("a1".to_string()),
        content: Vec::new(),
        ..ask("u1", &c.conversation_id, "")
    };
    let fragments = parse(&run_turn(&h.manager, req, WireFormat::Json).await);
    assert!(fragments.iter().all(|f| f.message_id == "a1"));

    let window: Vec<_> = h.llm.windows()[0].iter().map(|m| m.content.clone()).collect();
    assert_eq!(window, vec![c.system.clone(), "Q1".to_string()]);

    let saved = h.manager.get_conversation("u1", &c.conversation_id).await.unwrap();
    assert_eq!(saved.messages.len(), 4);
    let replaced = saved.messages.iter().find(|m| m.message_id == "a1").unwrap();
    assert_eq!(replaced.text, "again");
    assert_eq!(replaced.created_at, 2_000);
}

#[tokio::test]
async fn regeneration_of_unknown_or_user_message_fails() {
    let h = harness(ScriptedLlm::new(&["x"]));
    let c = h.manager.new_conversation("u1", "", "").await.unwrap();
    h.store
        .add_message("u1", &c.conversation_id, &stored("q1", MessageRole::User, "Q1", 1))
        .await
        .unwrap();

    for id in ["missing", "q1"] {
        let req = TurnRequest {
            regen_message_id: Some(id.to_string()),
            ..ask("u1", &c.conversation_id, "")
        };
        let err = h
            .manager
            .begin_turn(req, &CancellationToken::new())
            .await
            .err()
            .unwrap();
        assert!(matches!(err, ChatError::RegenMessageNotFound));
    }
    assert!(h.llm.windows().is_empty());
}

#[tokio::test(start_paused = true)]
async fn break_flag_stops_further_model_reads() {
    let chunk = "abcdefghijklmnopqrstuvwxyz0123";
    let llm = ScriptedLlm::new(&[chunk; 6]).with_delay(Duration::from_secs(1));
    let h = harness(llm);
    let c = h.manager.new_conversation("u1", "", "").await.unwrap();

    let (tx, mut rx) = mpsc::unbounded_channel();
    let handle = h
        .manager
        .chat(
            ask("u1", &c.conversation_id, "go"),
            &CancellationToken::new(),
            tx,
            WireFormat::Json,
        )
        .await
        .unwrap();

    let mut lines = vec![rx.recv().await.unwrap()];
    h.manager.break_conversation("u1", &c.conversation_id).await.unwrap();
    while let Some(line) = rx.recv().await {
        lines.push(line);
    }
    handle.await.unwrap();

    let fragments = parse(&lines);
    assert!(h.llm.produced() <= 2, "model kept streaming after break");
    assert!(fragments.len() <= 3);
    assert!(fragments.last().unwrap().is_end);
    assert_eq!(fragments[0].text, chunk);
    for (i, f) in fragments.iter().enumerate() {
        assert_eq!(f.sentence_id, i as u32);
    }

    // Already delivered output is what gets stored.
    let delivered: String = fragments.iter().map(|f| f.text.as_str()).collect();
    let saved = h.manager.get_conversation("u1", &c.conversation_id).await.unwrap();
    assert_eq!(saved.messages[1].text, delivered);

    // The next turn clears the flag and runs to completion.
    let fragments = parse(
        &run_turn(&h.manager, ask("u1", &c.conversation_id, "more"), WireFormat::Json).await,
    );
    assert_eq!(fragments.len(), 7);
}

#[tokio::test]
async fn break_on_fast_stream_stops_after_next_fragment() {
    let chunk = "abcdefghijklmnopqrstuvwxyz0123";
    let h = harness(ScriptedLlm::new(&[chunk; 20]));
    let c = h.manager.new_conversation("u1", "", "").await.unwrap();

    let turn = h
        .manager
        .begin_turn(ask("u1", &c.conversation_id, "go"), &CancellationToken::new())
        .await
        .unwrap();
    // Raised before any output; seen by the check after the first fragment.
    h.manager.break_conversation("u1", &c.conversation_id).await.unwrap();

    let (tx, mut rx) = mpsc::unbounded_channel();
    let handle = turn.stream_to(tx, WireFormat::Json);
    let mut lines = Vec::new();
    while let Some(line) = rx.recv().await {
        lines.push(line);
    }
    handle.await.unwrap();

    let fragments = parse(&lines);
    assert_eq!(h.llm.produced(), 1, "model read past the break");
    assert_eq!(fragments.len(), 2);
    assert_eq!(fragments[0].text, chunk);
    assert!(fragments[1].is_end && fragments[1].is_truncated);
    assert_eq!(fragments[1].text, "");

    let saved = h.manager.get_conversation("u1", &c.conversation_id).await.unwrap();
    assert_eq!(saved.messages[1].text, chunk);
}

#[tokio::test(start_paused = true)]
async fn client_disconnect_still_persists_turn() {
    let chunk = "abcdefghijklmnopqrstuvwxyz0123";
    let h = harness(ScriptedLlm::new(&[chunk; 4]).with_delay(Duration::from_secs(1)));
    let c = h.manager.new_conversation("u1", "", "").await.unwrap();

    let (tx, mut rx) = mpsc::unbounded_channel();
    let handle = h
        .manager
        .chat(
            ask("u1", &c.conversation_id, "go"),
            &CancellationToken::new(),
            tx,
            WireFormat::Json,
        )
        .await
        .unwrap();
    rx.recv().await.unwrap();
    drop(rx);
    handle.await.unwrap();

    let saved = h.manager.get_conversation("u1", &c.conversation_id).await.unwrap();
    assert_eq!(saved.messages.len(), 2);
    assert!(saved.messages[1].text.starts_with(chunk));
    assert!(h.llm.produced() < 4);
}

#[tokio::test]
async fn canned_reply_skips_the_model() {
    let mut registry = ContentRegistry::with_defaults(Default::default());
    registry.register("image", Arc::new(OpenFileHandler));
    let h = harness_with(ScriptedLlm::new(&["ai"]), registry, 4000, ChatConfig::default());
    let c = h.manager.new_conversation("u1", "", "").await.unwrap();

    let req = TurnRequest {
        content: vec![ContentPart::Image {
            image_url: "https://x/1.png".to_string(),
        }],
        ..ask("u1", &c.conversation_id, "")
    };
    let fragments = parse(&run_turn(&h.manager, req, WireFormat::Json).await);
    assert_eq!(fragments.len(), 1);
    assert!(fragments[0].is_end);
    assert_eq!(fragments[0].sentence_id, 0);
    assert_eq!(fragments[0].content, vec![ContentPart::text("opened")]);
    assert!(h.llm.windows().is_empty());

    let saved = h.manager.get_conversation("u1", &c.conversation_id).await.unwrap();
    assert_eq!(saved.messages.len(), 2);
    assert!(saved.messages.iter().all(|m| !m.need_ai_chat));
    assert_eq!(saved.messages[1].text, "opened");

    // Canned exchanges never reach later model windows.
    run_turn(&h.manager, ask("u1", &c.conversation_id, "hi"), WireFormat::Json).await;
    assert_eq!(h.llm.windows()[0].len(), 2);
}

#[tokio::test]
async fn unsupported_content_aborts_without_persisting() {
    let h = harness(ScriptedLlm::new(&["x"]));
    let c = h.manager.new_conversation("u1", "", "").await.unwrap();
    let req = TurnRequest {
        content: vec![ContentPart::Image {
            image_url: "u".to_string(),
        }],
        ..ask("u1", &c.conversation_id, "")
    };

    let err = h.manager.begin_turn(req, &CancellationToken::new()).await.err().unwrap();
    assert!(matches!(err, ChatError::ContentHandle(_)));
    assert_eq!(err.code(), 10004);
    let saved = h.manager.get_conversation("u1", &c.conversation_id).await.unwrap();
    assert!(saved.messages.is_empty());
}

#[tokio::test]
async fn oversized_message_is_truncated_in_window() {
    let h = harness_with(
        ScriptedLlm::new(&["ok"]),
        ContentRegistry::with_defaults(Default::default()),
        10,
        ChatConfig::default(),
    );
    let c = h.manager.new_conversation("u1", "", "").await.unwrap();

    run_turn(
        &h.manager,
        ask("u1", &c.conversation_id, "abcdefghijklmnopqrstuvwxyz0123"),
        WireFormat::Json,
    )
    .await;

    let window = &h.llm.windows()[0];
    assert_eq!(window.len(), 2);
    assert_eq!(window[1].content, "abcde...z0123");
}

#[tokio::test]
async fn prompt_over_limit_is_rejected() {
    let chat = ChatConfig {
        max_prompt_tokens: 3,
        ..ChatConfig::default()
    };
    let h = harness_with(
        ScriptedLlm::new(&["ok"]),
        ContentRegistry::with_defaults(Default::default()),
        4000,
        chat,
    );
    let c = h.manager.new_conversation("u1", "", "").await.unwrap();

    let err = h
        .manager
        .begin_turn(ask("u1", &c.conversation_id, "four"), &CancellationToken::new())
        .await
        .err()
        .unwrap();
    assert!(matches!(err, ChatError::MaxTokenExceed));
}

#[tokio::test]
async fn model_failure_ends_with_error_fragment_and_saves_nothing() {
    let h = harness(ScriptedLlm::new(&["abcdefghijklmnopqrstuvwxyz0123", "tail"]).failing());
    let c = h.manager.new_conversation("u1", "", "").await.unwrap();

    let fragments = parse(&run_turn(&h.manager, ask("u1", &c.conversation_id, "go"), WireFormat::Json).await);
    let last = fragments.last().unwrap();
    assert_eq!(last.message_type, MessageType::Error);
    assert!(last.is_end);
    assert_eq!(last.error_code, Some(500));

    let saved = h.manager.get_conversation("u1", &c.conversation_id).await.unwrap();
    assert!(saved.messages.is_empty());
}

#[tokio::test]
async fn empty_model_reply_is_not_persisted() {
    let h = harness(ScriptedLlm::new(&[]));
    let c = h.manager.new_conversation("u1", "", "").await.unwrap();

    let fragments = parse(&run_turn(&h.manager, ask("u1", &c.conversation_id, "go"), WireFormat::Json).await);
    assert_eq!(fragments.len(), 1);
    assert!(fragments[0].is_end);

    let saved = h.manager.get_conversation("u1", &c.conversation_id).await.unwrap();
    assert!(saved.messages.is_empty());
}

#[tokio::test]
async fn data_stream_format_emits_protocol_lines() {
    let h = harness(ScriptedLlm::new(&["hi ", "there"]));
    let c = h.manager.new_conversation("u1", "", "").await.unwrap();

    let lines = run_turn(&h.manager, ask("u1", &c.conversation_id, "hello"), WireFormat::DataStream).await;
    assert_eq!(
        lines,
        vec![
            "0:\"hi there\"\n".to_string(),
            "d:{\"finishReason\":\"stop\",\"usage\":{\"promptTokens\":5,\"completionTokens\":8}}\n"
                .to_string(),
        ]
    );
}

#[tokio::test]
async fn conversation_quota_and_file_binding() {
    let chat = ChatConfig {
        conversation_limit: 1,
        ..ChatConfig::default()
    };
    let h = harness_with(
        ScriptedLlm::new(&["ok"]),
        ContentRegistry::with_defaults(Default::default()),
        4000,
        chat,
    );

    let first = h.manager.get_or_create_file_conversation("u1", "f1").await.unwrap();
    let again = h.manager.get_or_create_file_conversation("u1", "f1").await.unwrap();
    assert_eq!(first.conversation_id, again.conversation_id);
    assert_eq!(first.file_guid, "f1");

    let err = h.manager.new_conversation("u1", "", "f2").await.err().unwrap();
    assert!(matches!(err, ChatError::ConversationLimitReached));
    assert_eq!(err.code(), 10016);

    // Quota is per user.
    h.manager.new_conversation("u2", "", "f2").await.unwrap();
}

#[tokio::test]
async fn deleted_conversation_is_gone() {
    let h = harness(ScriptedLlm::new(&["ok"]));
    let c = h.manager.new_conversation("u1", "", "").await.unwrap();
    run_turn(&h.manager, ask("u1", &c.conversation_id, "hi"), WireFormat::Json).await;

    h.manager.delete_conversation("u1", &c.conversation_id).await.unwrap();
    let err = h
        .manager
        .get_conversation("u1", &c.conversation_id)
        .await
        .err()
        .unwrap();
    assert!(matches!(err, ChatError::ConversationNotFound));

    let err = h
        .manager
        .begin_turn(ask("u1", &c.conversation_id, "hi"), &CancellationToken::new())
        .await
        .err()
        .unwrap();
    assert!(matches!(err, ChatError::ConversationNotFound));
}
