//! End-to-end turns against a mocked OpenAI-compatible upstream.

use quill::credentials::{
    CallerIdentity, KeyRetrievalStrategy, LayeredCredentialResolver, MemoryKeyStore,
};
use quill::errors::ChatError;
use quill::models::event::FinishReason;
use quill::models::message::Message;
use quill::models::role::Role;
use quill::orchestrator::{ChatOrchestrator, ChatRequest};
use quill::protocol::StreamFrame;
use quill::providers::configs::OpenAiProviderConfig;
use quill::providers::openai::OpenAiProvider;
use quill::providers::{ProviderName, ProviderRegistry};
use quill::tools::{CatalogToolExecutor, MemoryNotesStore, NotesStore};
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::mpsc;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn sse(chunks: &[Value]) -> String {
    let mut body: String = chunks
        .iter()
        .map(|chunk| format!("data: {}\n\n", chunk))
        .collect();
    body.push_str("data: [DONE]\n\n");
    body
}

fn delta(delta: Value, finish_reason: Value) -> Value {
    json!({"choices": [{"index": 0, "delta": delta, "finish_reason": finish_reason}]})
}

async fn setup(server: &MockServer) -> (ChatOrchestrator, Arc<MemoryNotesStore>) {
    let mut registry = ProviderRegistry::new();
    registry.register(Arc::new(
        OpenAiProvider::new(OpenAiProviderConfig {
            host: server.uri(),
            temperature: None,
            max_tokens: None,
        })
        .unwrap(),
    ));
    let keys = MemoryKeyStore::new().with_key("alice", ProviderName::OpenAi, "sk-alice");
    let resolver = LayeredCredentialResolver::new(
        Arc::new(keys),
        Arc::new(MemoryKeyStore::new()),
        KeyRetrievalStrategy::PersonalFirst,
    );
    let store = Arc::new(MemoryNotesStore::new());
    let orchestrator = ChatOrchestrator::new(
        registry,
        Arc::new(resolver),
        Arc::new(CatalogToolExecutor::new(store.clone())),
    );
    (orchestrator, store)
}

fn chat(messages: Vec<Message>) -> ChatRequest {
    ChatRequest {
        provider: "openai".to_string(),
        model: "gpt-4o".to_string(),
        thinking: false,
        messages,
    }
}

async fn collect(mut rx: mpsc::Receiver<StreamFrame>) -> Vec<StreamFrame> {
    let mut frames = Vec::new();
    while let Some(frame) = rx.recv().await {
        frames.push(frame);
    }
    frames
}

#[tokio::test]
async fn test_tool_call_round_trip() {
    let server = MockServer::start().await;
    let (orchestrator, store) = setup(&server).await;
    let note = store
        .create_note("alice", "Shopping", "eggs, flour", None)
        .await
        .unwrap();

    // second invocation: the tool result is in the history
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(body_partial_json(json!({"messages": [{}, {}, {}, {"role": "tool"}]})))
        .respond_with(ResponseTemplate::new(200).set_body_raw(
            sse(&[
                delta(json!({"content": "You need eggs and flour."}), Value::Null),
                delta(json!({}), json!("stop")),
            ]),
            "text/event-stream",
        ))
        .with_priority(1)
        .expect(1)
        .mount(&server)
        .await;

    // first invocation: ask for the note
    let arguments = json!({"note_id": note.id}).to_string();
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(
            sse(&[
                delta(
                    json!({"tool_calls": [{"index": 0, "id": "call_1", "type": "function",
                        "function": {"name": "get_note", "arguments": arguments}}]}),
                    Value::Null,
                ),
                delta(json!({}), json!("tool_calls")),
            ]),
            "text/event-stream",
        ))
        .with_priority(2)
        .expect(1)
        .mount(&server)
        .await;

    let prepared = orchestrator
        .prepare(
            CallerIdentity::new("alice"),
            chat(vec![Message::user().with_text("What's on my shopping list?")]),
        )
        .await
        .unwrap();
    let (tx, rx) = mpsc::channel(32);
    let frames = tokio::spawn(collect(rx));
    let outcome = prepared.run(tx).await.unwrap();
    let frames = frames.await.unwrap();

    assert_eq!(outcome.iterations, 2);
    assert_eq!(outcome.finish_reason, FinishReason::Stop);
    let roles: Vec<Role> = outcome.messages.iter().map(|m| m.role).collect();
    assert_eq!(
        roles,
        vec![Role::System, Role::User, Role::Assistant, Role::Tool, Role::Assistant]
    );
    let result = outcome.messages[3].tool_responses().next().unwrap();
    assert_eq!(result.id, "call_1");
    assert_eq!(result.tool_result["content"], "eggs, flour");

    let codes: String = frames.iter().map(|f| f.code()).collect();
    assert_eq!(codes, "9ea0ed");
    assert_eq!(frames.last(), Some(&StreamFrame::Finish(FinishReason::Stop)));
}

#[tokio::test]
async fn test_finished_conversation_replays_once() {
    let server = MockServer::start().await;
    let (orchestrator, _) = setup(&server).await;

    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(
            sse(&[delta(json!({"content": "Anything else?"}), json!("stop"))]),
            "text/event-stream",
        ))
        .expect(1)
        .mount(&server)
        .await;

    let history = vec![
        Message::user().with_text("Hi"),
        Message::assistant().with_text("Hello! How can I help?"),
    ];
    let prepared = orchestrator
        .prepare(CallerIdentity::new("alice"), chat(history))
        .await
        .unwrap();
    let (tx, rx) = mpsc::channel(32);
    let frames = tokio::spawn(collect(rx));
    let outcome = prepared.run(tx).await.unwrap();
    frames.await.unwrap();

    assert_eq!(outcome.iterations, 1);
    assert!(outcome
        .messages
        .iter()
        .all(|m| m.tool_requests().next().is_none()));
}

#[tokio::test]
async fn test_rejected_key_becomes_error_frame() {
    let server = MockServer::start().await;
    let (orchestrator, _) = setup(&server).await;

    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({
            "error": {"message": "Incorrect API key provided", "type": "invalid_request_error",
                "code": "invalid_api_key"}
        })))
        .mount(&server)
        .await;

    let prepared = orchestrator
        .prepare(
            CallerIdentity::new("alice"),
            chat(vec![Message::user().with_text("Hi")]),
        )
        .await
        .unwrap();
    let (tx, rx) = mpsc::channel(32);
    let frames = tokio::spawn(collect(rx));
    let result = prepared.run(tx).await;
    let frames = frames.await.unwrap();

    assert!(matches!(result, Err(ChatError::Upstream(_))));
    assert_eq!(
        frames,
        vec![
            StreamFrame::Error("The API key configured for this provider was rejected".to_string()),
            StreamFrame::Finish(FinishReason::Error),
        ]
    );
}

#[tokio::test]
async fn test_unknown_provider_makes_no_calls() {
    let server = MockServer::start().await;
    let (orchestrator, _) = setup(&server).await;

    let mut request = chat(vec![Message::user().with_text("Hi")]);
    request.provider = "foo".to_string();
    let err = orchestrator
        .prepare(CallerIdentity::new("alice"), request)
        .await
        .err()
        .unwrap();

    assert_eq!(err.status_code(), 400);
    assert!(server.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_missing_credential_makes_no_calls() {
    let server = MockServer::start().await;
    let (orchestrator, _) = setup(&server).await;

    let err = orchestrator
        .prepare(
            CallerIdentity::new("bob").with_org("acme"),
            chat(vec![Message::user().with_text("Hi")]),
        )
        .await
        .err()
        .unwrap();

    assert!(matches!(err, ChatError::Credential(_)));
    assert_eq!(err.status_code(), 400);
    assert!(server.received_requests().await.unwrap().is_empty());
}
