//! Gateway HTTP server (single port).

use std::convert::Infallible;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{
    extract::{Path, State},
    http::{header, HeaderMap, StatusCode},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::{delete, get, post},
    Json, Router,
};
use futures_util::stream::{self, Stream};
use serde_json::json;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::config::{self, Config};
use crate::gateway::protocol::{
    CapabilitiesResponse, ChatParams, ChatResponse, EmbeddingsParams, EmbeddingsResponse,
    ErrorBody, ModelsResponse,
};
use crate::init;
use crate::llm::{ChannelSink, CompletionResult, LlmError, Provider, StreamEvent};
use crate::session::{ProviderFactory, SessionStore};

const PROTOCOL_VERSION: u32 = 1;

/// Session used by the model listing, capability and embedding routes.
const SHARED_SESSION: &str = "shared";

fn require_token(config: &Config) -> Option<String> {
    if config.gateway.auth.mode == config::GatewayAuthMode::Token {
        config::resolve_gateway_token(config)
    } else {
        None
    }
}

/// Shared state for the gateway (config, sessions).
#[derive(Clone)]
pub struct GatewayState {
    pub config: Arc<Config>,
    /// When Some, `/api/*` requests must carry `Authorization: Bearer <token>`.
    pub required_token: Option<String>,
    pub sessions: Arc<SessionStore>,
}

impl GatewayState {
    pub fn new(config: Config, factory: ProviderFactory) -> Self {
        Self {
            required_token: require_token(&config),
            sessions: Arc::new(SessionStore::with_capacity(
                factory,
                config.gateway.max_sessions,
            )),
            config: Arc::new(config),
        }
    }

    /// State whose sessions build providers from `config`.
    pub fn from_config(config: Config) -> Self {
        let provider_config = config.clone();
        Self::new(
            config,
            Arc::new(move || Provider::from_config(&provider_config)),
        )
    }

    fn authorize(&self, headers: &HeaderMap) -> Result<(), Response> {
        let Some(expected) = &self.required_token else {
            return Ok(());
        };
        let provided = headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .map(str::trim);
        if provided == Some(expected.as_str()) {
            Ok(())
        } else {
            Err((
                StatusCode::UNAUTHORIZED,
                Json(ErrorBody {
                    error: "missing or invalid gateway token".to_string(),
                    retryable: false,
                }),
            )
                .into_response())
        }
    }
}

/// Router for all gateway routes.
pub fn router(state: GatewayState) -> Router {
    Router::new()
        .route("/", get(health_http))
        .route("/api/models", get(list_models))
        .route("/api/capabilities", get(capabilities))
        .route("/api/chat", post(chat))
        .route("/api/embeddings", post(embeddings))
        .route("/api/sessions/:id", delete(end_session))
        .with_state(state)
}

pub async fn run_gateway(config: Config, config_path: PathBuf) -> Result<()> {
    init::require_initialized(&config_path)?;
    let bind = config.gateway.bind.trim().to_string();
    if !config::is_loopback_bind(&bind) {
        let token = config::resolve_gateway_token(&config);
        if token.is_none() || config.gateway.auth.mode != config::GatewayAuthMode::Token {
            anyhow::bail!(
                "refusing to bind gateway to {} without auth (set gateway.auth.mode to \"token\" and gateway.auth.token or SWITCHYARD_GATEWAY_TOKEN)",
                bind
            );
        }
    }

    // Sessions build providers lazily; report a broken provider config up front.
    if let Err(e) = Provider::from_config(&config) {
        log::warn!("provider not usable yet: {}", e);
    }

    let bind_addr = format!("{}:{}", bind, config.gateway.port);
    let app = router(GatewayState::from_config(config));
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("binding to {}", bind_addr))?;
    log::info!("gateway listening on {}", bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("gateway server exited")?;
    log::info!("gateway stopped");
    Ok(())
}

/// Future that completes when the process should shut down (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            log::warn!("failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut s) => {
                s.recv().await;
            }
            Err(e) => {
                log::warn!("failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    log::info!("shutdown signal received, draining connections");
}

fn error_body(e: &LlmError) -> ErrorBody {
    ErrorBody {
        error: e.to_string(),
        retryable: e.is_retryable(),
    }
}

fn error_response(e: &LlmError) -> Response {
    let status = match e {
        LlmError::Auth(_) => StatusCode::UNAUTHORIZED,
        LlmError::Retryable { .. } => StatusCode::SERVICE_UNAVAILABLE,
        LlmError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(error_body(e))).into_response()
}

/// GET / returns a simple health JSON (for probes).
async fn health_http(State(state): State<GatewayState>) -> Json<serde_json::Value> {
    Json(json!({
        "runtime": "running",
        "protocol": PROTOCOL_VERSION,
        "port": state.config.gateway.port,
        "provider": config::resolve_provider_kind(&state.config),
        "model": config::resolve_model(&state.config),
    }))
}

/// GET /api/models
async fn list_models(State(state): State<GatewayState>, headers: HeaderMap) -> Response {
    if let Err(r) = state.authorize(&headers) {
        return r;
    }
    let provider = match state.sessions.get_or_create(SHARED_SESSION).await {
        Ok(p) => p,
        Err(e) => return error_response(&e),
    };
    match provider.list_models().await {
        Ok(models) => Json(ModelsResponse { models }).into_response(),
        Err(e) => error_response(&e),
    }
}

/// GET /api/capabilities
async fn capabilities(State(state): State<GatewayState>, headers: HeaderMap) -> Response {
    if let Err(r) = state.authorize(&headers) {
        return r;
    }
    let provider = match state.sessions.get_or_create(SHARED_SESSION).await {
        Ok(p) => p,
        Err(e) => return error_response(&e),
    };
    Json(CapabilitiesResponse {
        provider: provider.kind().to_string(),
        model: provider.model().to_string(),
        native_tool_calling: provider.supports_native_tools().await,
    })
    .into_response()
}

/// POST /api/embeddings
async fn embeddings(
    State(state): State<GatewayState>,
    headers: HeaderMap,
    Json(params): Json<EmbeddingsParams>,
) -> Response {
    if let Err(r) = state.authorize(&headers) {
        return r;
    }
    let provider = match state.sessions.get_or_create(SHARED_SESSION).await {
        Ok(p) => p,
        Err(e) => return error_response(&e),
    };
    match provider.embed(&params.input.into_vec()).await {
        Ok(embeddings) => Json(EmbeddingsResponse { embeddings }).into_response(),
        Err(e) => error_response(&e),
    }
}

/// DELETE /api/sessions/{id}
async fn end_session(
    State(state): State<GatewayState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Response {
    if let Err(r) = state.authorize(&headers) {
        return r;
    }
    if state.sessions.remove(&id).await {
        StatusCode::NO_CONTENT.into_response()
    } else {
        (
            StatusCode::NOT_FOUND,
            Json(ErrorBody {
                error: format!("no session {}", id),
                retryable: false,
            }),
        )
            .into_response()
    }
}

/// POST /api/chat: one JSON result, or an SSE stream of `event` frames ending in
/// a `result` (or `error`) frame.
async fn chat(
    State(state): State<GatewayState>,
    headers: HeaderMap,
    Json(params): Json<ChatParams>,
) -> Response {
    if let Err(r) = state.authorize(&headers) {
        return r;
    }
    let session = match params.session_id.as_deref() {
        Some(id) => state
            .sessions
            .get_or_create(id)
            .await
            .map(|p| (id.to_string(), p)),
        None => state.sessions.create().await,
    };
    let (session_id, provider) = match session {
        Ok(s) => s,
        Err(e) => return error_response(&e),
    };

    if !params.stream {
        return match provider.complete(&params.messages, &params.tools).await {
            Ok(result) => Json(ChatResponse { session_id, result }).into_response(),
            Err(e) => error_response(&e),
        };
    }

    let (tx, rx) = mpsc::unbounded_channel();
    let sink = ChannelSink(tx);
    let task = tokio::spawn(async move {
        provider
            .stream(&params.messages, &params.tools, &sink)
            .await
    });
    Sse::new(sse_frames(session_id, rx, task))
        .keep_alive(KeepAlive::default())
        .into_response()
}

struct FrameState {
    session_id: String,
    events: mpsc::UnboundedReceiver<StreamEvent>,
    task: Option<JoinHandle<Result<CompletionResult, LlmError>>>,
}

/// Progress events until the sink is dropped with the finished task, then the
/// task's outcome.
fn sse_frames(
    session_id: String,
    events: mpsc::UnboundedReceiver<StreamEvent>,
    task: JoinHandle<Result<CompletionResult, LlmError>>,
) -> impl Stream<Item = Result<Event, Infallible>> {
    let state = FrameState {
        session_id,
        events,
        task: Some(task),
    };
    stream::unfold(state, |mut st| async move {
        if let Some(event) = st.events.recv().await {
            let frame = Event::default()
                .event("event")
                .data(serde_json::to_string(&event).unwrap_or_default());
            return Some((Ok(frame), st));
        }
        let task = st.task.take()?;
        let frame = match task.await {
            Ok(Ok(result)) => {
                let body = ChatResponse {
                    session_id: st.session_id.clone(),
                    result,
                };
                Event::default()
                    .event("result")
                    .data(serde_json::to_string(&body).unwrap_or_default())
            }
            Ok(Err(e)) => Event::default()
                .event("error")
                .data(serde_json::to_string(&error_body(&e)).unwrap_or_default()),
            Err(e) => {
                log::warn!("chat stream task failed: {}", e);
                Event::default().event("error").data(
                    serde_json::to_string(&ErrorBody {
                        error: "internal error".to_string(),
                        retryable: false,
                    })
                    .unwrap_or_default(),
                )
            }
        };
        Some((Ok(frame), st))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_status_mapping() {
        let status = |e: LlmError| error_response(&e).status();
        assert_eq!(status(LlmError::Auth("x".into())), StatusCode::UNAUTHORIZED);
        assert_eq!(
            status(LlmError::from_status(429, "slow")),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            status(LlmError::Config("x".into())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn token_auth() {
        let mut config = Config::default();
        config.gateway.auth.mode = config::GatewayAuthMode::Token;
        config.gateway.auth.token = Some("s3cret".into());
        let mut state = GatewayState::from_config(config);
        // Pin the token so an ambient SWITCHYARD_GATEWAY_TOKEN does not matter.
        state.required_token = Some("s3cret".into());

        let mut headers = HeaderMap::new();
        assert!(state.authorize(&headers).is_err());
        headers.insert(header::AUTHORIZATION, "Bearer wrong".parse().unwrap());
        assert!(state.authorize(&headers).is_err());
        headers.insert(header::AUTHORIZATION, "Bearer s3cret".parse().unwrap());
        assert!(state.authorize(&headers).is_ok());
    }

    #[test]
    fn no_token_when_auth_mode_none() {
        let state = GatewayState::from_config(Config::default());
        assert!(state.required_token.is_none());
        assert!(state.authorize(&HeaderMap::new()).is_ok());
    }
}
