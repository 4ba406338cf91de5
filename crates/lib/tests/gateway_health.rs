//! Integration tests: start the gateway on a free port and talk to it over HTTP.
//! No model server is needed. Server tasks are left running when a test ends.

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use switchyard::config::Config;
use switchyard::gateway::{self, GatewayState};
use switchyard::llm::{
    ChatReply, ChatRequest, ChatTransport, DeltaHandler, LlmError, Provider, ProviderKind,
    ProviderOptions, StreamDelta,
};
use switchyard::session::ProviderFactory;

fn free_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind free port");
    listener.local_addr().expect("local_addr").port()
}

fn temp_config() -> (PathBuf, PathBuf) {
    let dir = std::env::temp_dir().join(format!("switchyard-gateway-test-{}", uuid::Uuid::new_v4()));
    std::fs::create_dir_all(&dir).expect("create config dir");
    let config_path = dir.join("config.json");
    std::fs::File::create(&config_path)
        .and_then(|mut f| f.write_all(b"{}"))
        .expect("write config.json");
    (dir, config_path)
}

/// Always answers "pong"; streamed replies arrive in two pieces.
struct Pong;

#[async_trait]
impl ChatTransport for Pong {
    async fn chat(&self, _request: &ChatRequest) -> Result<ChatReply, LlmError> {
        Ok(ChatReply {
            content: "pong".to_string(),
            ..Default::default()
        })
    }

    async fn chat_stream(
        &self,
        _request: &ChatRequest,
        on_delta: &mut DeltaHandler<'_>,
    ) -> Result<(), LlmError> {
        on_delta(StreamDelta::text("po"));
        on_delta(StreamDelta::text("ng"));
        Ok(())
    }

    async fn list_models(&self) -> Result<Vec<String>, LlmError> {
        Ok(vec!["pong-1".to_string()])
    }

    async fn embed(&self, _model: &str, inputs: &[String]) -> Result<Vec<Vec<f32>>, LlmError> {
        Ok(inputs.iter().map(|_| vec![1.0]).collect())
    }
}

fn pong_state(config: Config) -> GatewayState {
    let factory: ProviderFactory = Arc::new(|| {
        Ok(Provider::new(
            ProviderKind::GenericOpenAi,
            Arc::new(Pong),
            ProviderOptions::new("pong-1"),
        ))
    });
    GatewayState::new(config, factory)
}

async fn serve(state: GatewayState) -> String {
    let app = gateway::router(state);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind");
    let addr = listener.local_addr().expect("local_addr");
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    format!("http://{}", addr)
}

async fn serve_pong() -> String {
    serve(pong_state(Config::default())).await
}

#[tokio::test]
async fn gateway_health_http_responds_with_running() {
    let port = free_port();
    let (_temp_dir, config_path) = temp_config();

    let mut config = Config::default();
    config.gateway.port = port;
    config.gateway.bind = "127.0.0.1".to_string();

    let gateway_handle = tokio::spawn(async move {
        let _ = gateway::run_gateway(config, config_path).await;
    });

    let url = format!("http://127.0.0.1:{}/", port);
    let client = reqwest::Client::new();
    let mut last_err = None;
    for _ in 0..100 {
        match client.get(&url).send().await {
            Ok(resp) if resp.status().is_success() => {
                let json: serde_json::Value = resp.json().await.expect("parse JSON");
                assert_eq!(json.get("runtime").and_then(|v| v.as_str()), Some("running"));
                assert_eq!(json.get("protocol").and_then(|v| v.as_u64()), Some(1));
                assert_eq!(json.get("port").and_then(|v| v.as_u64()), Some(port as u64));
                return;
            }
            Ok(_) => {}
            Err(e) => last_err = Some(e),
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    gateway_handle.abort();
    panic!(
        "GET {} did not return 200 with health JSON within 5s; last error: {:?}",
        url, last_err
    );
}

#[tokio::test]
async fn gateway_refuses_uninitialized_config() {
    let missing = std::env::temp_dir()
        .join(format!("switchyard-missing-{}", uuid::Uuid::new_v4()))
        .join("config.json");
    let mut config = Config::default();
    config.gateway.port = free_port();
    let err = gateway::run_gateway(config, missing).await.unwrap_err();
    assert!(err.to_string().contains("not initialized"));
}

#[tokio::test]
async fn chat_returns_result_and_reuses_session() {
    let base = serve_pong().await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("{}/api/chat", base))
        .json(&json!({"messages": [{"role": "user", "content": "ping"}]}))
        .send()
        .await
        .unwrap();
    assert!(resp.status().is_success());
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["result"]["textResponse"], "pong");
    let session = body["sessionId"].as_str().unwrap().to_string();
    assert!(session.starts_with("sess-"));

    let resp = client
        .post(format!("{}/api/chat", base))
        .json(&json!({
            "sessionId": session,
            "messages": [{"role": "user", "content": "again"}]
        }))
        .send()
        .await
        .unwrap();
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["sessionId"], session.as_str());
}

#[tokio::test]
async fn streamed_chat_sends_events_then_result() {
    let base = serve_pong().await;
    let resp = reqwest::Client::new()
        .post(format!("{}/api/chat", base))
        .json(&json!({
            "messages": [{"role": "user", "content": "ping"}],
            "stream": true
        }))
        .send()
        .await
        .unwrap();
    assert!(resp.status().is_success());
    let text = resp.text().await.unwrap();

    let event_at = text.find("event: event").expect("progress frame");
    let result_at = text.find("event: result").expect("result frame");
    assert!(event_at < result_at);
    assert!(text.contains("\"textChunk\""));
    assert!(text.contains("\"textResponse\":\"pong\""));
}

#[tokio::test]
async fn models_capabilities_and_embeddings() {
    let base = serve_pong().await;
    let client = reqwest::Client::new();

    let models: serde_json::Value = client
        .get(format!("{}/api/models", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(models["models"], json!(["pong-1"]));

    let caps: serde_json::Value = client
        .get(format!("{}/api/capabilities", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(caps["model"], "pong-1");
    assert_eq!(caps["nativeToolCalling"], "unsupported");

    let embeddings: serde_json::Value = client
        .post(format!("{}/api/embeddings", base))
        .json(&json!({"input": ["a", "b"]}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(embeddings["embeddings"], json!([[1.0], [1.0]]));
}

#[tokio::test]
async fn sessionless_chats_stay_within_session_limit() {
    let mut config = Config::default();
    config.gateway.max_sessions = 4;
    let state = pong_state(config);
    let sessions = Arc::clone(&state.sessions);
    let base = serve(state).await;
    let client = reqwest::Client::new();

    for _ in 0..12 {
        let resp = client
            .post(format!("{}/api/chat", base))
            .json(&json!({"messages": [{"role": "user", "content": "ping"}]}))
            .send()
            .await
            .unwrap();
        assert!(resp.status().is_success());
    }
    assert_eq!(sessions.len().await, 4);
}

#[tokio::test]
async fn delete_ends_session() {
    let state = pong_state(Config::default());
    let sessions = Arc::clone(&state.sessions);
    let base = serve(state).await;
    let client = reqwest::Client::new();

    let body: serde_json::Value = client
        .post(format!("{}/api/chat", base))
        .json(&json!({"messages": [{"role": "user", "content": "ping"}]}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let id = body["sessionId"].as_str().unwrap().to_string();
    assert_eq!(sessions.len().await, 1);

    let url = format!("{}/api/sessions/{}", base, id);
    let resp = client.delete(&url).send().await.unwrap();
    assert_eq!(resp.status().as_u16(), 204);
    assert!(sessions.is_empty().await);

    let resp = client.delete(&url).send().await.unwrap();
    assert_eq!(resp.status().as_u16(), 404);
}
