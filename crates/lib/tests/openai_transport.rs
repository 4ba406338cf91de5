//! OpenAI-compatible transport and adapter against a mock chat-completions server.

use std::sync::{Arc, Mutex};

use httpmock::prelude::*;
use serde_json::json;
use switchyard::llm::{
    CapabilitySource, ChatMessage, EventKind, LlmError, OpenAiCompatClient, Provider,
    ProviderKind, ProviderOptions, StreamEvent, ToolDefinition, ToolSupport,
};

fn client(server: &MockServer, source: CapabilitySource) -> OpenAiCompatClient {
    OpenAiCompatClient::with_client(
        &server.url("/v1"),
        Some("sk-test".to_string()),
        source,
        reqwest::Client::new(),
    )
}

fn provider(server: &MockServer, kind: ProviderKind) -> Provider {
    Provider::new(
        kind,
        Arc::new(client(server, kind.capability_source())),
        ProviderOptions::new("m"),
    )
}

fn search_tool() -> ToolDefinition {
    ToolDefinition::new(
        "search",
        "Search the web",
        json!({"type": "object", "properties": {"q": {"type": "string"}}, "required": ["q"]}),
    )
}

#[tokio::test]
async fn complete_returns_text_and_sends_bearer_key() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/v1/chat/completions")
                .header("authorization", "Bearer sk-test");
            then.status(200).json_body(json!({
                "choices": [{"message": {"role": "assistant", "content": "hello"}}],
                "usage": {"prompt_tokens": 3, "completion_tokens": 1}
            }));
        })
        .await;

    let p = provider(&server, ProviderKind::GenericOpenAi);
    let result = p.complete(&[ChatMessage::user("hi")], &[]).await.unwrap();
    assert_eq!(result.text_response.as_deref(), Some("hello"));
    assert!(result.function_call.is_none());
    assert_eq!(result.cost, 0.0);
    assert_eq!(mock.hits_async().await, 1);
}

#[tokio::test]
async fn streamed_tool_call_fragments_assemble() {
    let server = MockServer::start_async().await;
    let body = concat!(
        "data: {\"choices\":[{\"delta\":{\"tool_calls\":[{\"index\":0,\"id\":\"c1\",\"type\":\"function\",\"function\":{\"name\":\"search\"}}]}}]}\n\n",
        "data: {\"choices\":[{\"delta\":{\"tool_calls\":[{\"index\":0,\"function\":{\"arguments\":\"{\\\"q\\\":\"}}]}}]}\n\n",
        "data: {\"choices\":[{\"delta\":{\"tool_calls\":[{\"index\":0,\"function\":{\"arguments\":\"\\\"cats\\\"}\"}}]}}]}\n\n",
        "data: [DONE]\n\n"
    );
    server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/v1/chat/completions")
                .body_contains("\"stream\":true")
                .body_contains("\"tools\"");
            then.status(200)
                .header("content-type", "text/event-stream")
                .body(body);
        })
        .await;

    let p = provider(&server, ProviderKind::OpenAi);
    let events = Arc::new(Mutex::new(Vec::new()));
    let seen = Arc::clone(&events);
    let sink = move |e: StreamEvent| seen.lock().unwrap().push(e);
    let result = p
        .stream(&[ChatMessage::user("find cats")], &[search_tool()], &sink)
        .await
        .unwrap();

    let call = result.function_call.unwrap();
    assert_eq!(call.id.as_deref(), Some("c1"));
    assert_eq!(call.name, "search");
    assert_eq!(json!(call.arguments), json!({"q": "cats"}));
    let events = events.lock().unwrap();
    assert_eq!(
        events
            .iter()
            .filter(|e| e.kind == EventKind::ToolCallAssembling)
            .count(),
        3
    );
    assert!(events.iter().any(|e| e.kind == EventKind::ToolCallInvocation));
}

#[tokio::test]
async fn streamed_text_emits_chunks() {
    let server = MockServer::start_async().await;
    let body = concat!(
        "data: {\"choices\":[{\"delta\":{\"role\":\"assistant\",\"content\":\"Hel\"}}]}\n\n",
        "data: {\"choices\":[{\"delta\":{\"content\":\"lo\"}}]}\n\n",
        "data: [DONE]\n\n"
    );
    server
        .mock_async(|when, then| {
            when.method(POST).path("/v1/chat/completions");
            then.status(200)
                .header("content-type", "text/event-stream")
                .body(body);
        })
        .await;

    let p = provider(&server, ProviderKind::LocalAi);
    let chunks = Arc::new(Mutex::new(String::new()));
    let seen = Arc::clone(&chunks);
    let sink = move |e: StreamEvent| {
        if e.kind == EventKind::TextChunk {
            seen.lock().unwrap().push_str(&e.content);
        }
    };
    let result = p.stream(&[ChatMessage::user("hi")], &[], &sink).await.unwrap();
    assert_eq!(result.text_response.as_deref(), Some("Hello"));
    assert_eq!(*chunks.lock().unwrap(), "Hello");
}

#[tokio::test]
async fn malformed_arguments_stop_after_one_retry() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(POST).path("/v1/chat/completions");
            then.status(200).json_body(json!({
                "choices": [{"message": {
                    "role": "assistant",
                    "content": null,
                    "tool_calls": [{
                        "id": "c1",
                        "type": "function",
                        "function": {"name": "search", "arguments": "{\"q\": cats"}
                    }]
                }}]
            }));
        })
        .await;

    let p = provider(&server, ProviderKind::OpenAi);
    let result = p
        .complete(&[ChatMessage::user("find cats")], &[search_tool()])
        .await
        .unwrap();
    assert!(result.function_call.is_none());
    assert_eq!(mock.hits_async().await, 2);
}

#[tokio::test]
async fn unauthorized_is_auth_error() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/v1/chat/completions");
            then.status(401)
                .json_body(json!({"error": {"message": "invalid api key"}}));
        })
        .await;

    let p = provider(&server, ProviderKind::OpenAi);
    let err = p.complete(&[ChatMessage::user("hi")], &[]).await.unwrap_err();
    assert!(matches!(err, LlmError::Auth(_)));
}

#[tokio::test]
async fn rate_limit_is_retryable() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/v1/chat/completions");
            then.status(429).body("slow down");
        })
        .await;

    let p = provider(&server, ProviderKind::OpenAi);
    let err = p.complete(&[ChatMessage::user("hi")], &[]).await.unwrap_err();
    match err {
        LlmError::Retryable { status, message } => {
            assert_eq!(status, Some(429));
            assert_eq!(message, "slow down");
        }
        other => panic!("expected retryable, got {other:?}"),
    }
}

#[tokio::test]
async fn lm_studio_capabilities_drive_the_probe() {
    let server = MockServer::start_async().await;
    let caps = server
        .mock_async(|when, then| {
            when.method(GET).path("/api/v0/models/m");
            then.status(200)
                .json_body(json!({"id": "m", "type": "llm", "capabilities": ["tool_use"]}));
        })
        .await;

    let p = provider(&server, ProviderKind::LmStudio);
    assert_eq!(p.supports_native_tools().await, ToolSupport::Supported);
    assert_eq!(p.supports_native_tools().await, ToolSupport::Supported);
    assert_eq!(caps.hits_async().await, 1);
}

#[tokio::test]
async fn missing_capability_endpoint_resolves_unknown() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/api/v0/models/m");
            then.status(404);
        })
        .await;

    let p = provider(&server, ProviderKind::LmStudio);
    assert_eq!(p.supports_native_tools().await, ToolSupport::Unknown);
}

#[tokio::test]
async fn models_and_embeddings() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/v1/models");
            then.status(200)
                .json_body(json!({"object": "list", "data": [{"id": "a"}, {"id": "b"}]}));
        })
        .await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/v1/embeddings").body_contains("\"model\":\"m\"");
            then.status(200).json_body(json!({"data": [
                {"index": 1, "embedding": [0.3, 0.4]},
                {"index": 0, "embedding": [0.1, 0.2]}
            ]}));
        })
        .await;

    let p = provider(&server, ProviderKind::GenericOpenAi);
    assert_eq!(p.list_models().await.unwrap(), vec!["a", "b"]);
    let vectors = p
        .embed(&["first".to_string(), "second".to_string()])
        .await
        .unwrap();
    assert_eq!(vectors.len(), 2);
    assert!((vectors[0][0] - 0.1).abs() < f32::EPSILON);
    assert!((vectors[1][1] - 0.4).abs() < f32::EPSILON);
}
