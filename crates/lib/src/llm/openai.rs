//! OpenAI-compatible chat-completions transport.
//!
//! Serves every backend that speaks `/chat/completions` (OpenAI, Groq, LM Studio,
//! LocalAI, ...). Streaming uses SSE `data:` lines. LM Studio additionally exposes
//! per-model capability labels under `/api/v0/models/{id}`.

use async_trait::async_trait;
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};

use super::error::LlmError;
use super::format::WireTool;
use super::history::WireMessage;
use super::transport::{
    check_status, drain_lines, ChatReply, ChatRequest, ChatTransport, DeltaHandler, RawToolCall,
    StreamDelta, ToolCallDelta, TransportConfig,
};
use super::types::{Content, Usage};

/// Where an OpenAI-compatible server keeps per-model capability metadata, if anywhere.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CapabilitySource {
    None,
    LmStudio,
}

/// Client for an OpenAI-compatible server. `base_url` includes the version
/// prefix (e.g. `https://api.openai.com/v1`).
#[derive(Clone)]
pub struct OpenAiCompatClient {
    base_url: String,
    api_key: Option<String>,
    capabilities: CapabilitySource,
    client: reqwest::Client,
}

impl OpenAiCompatClient {
    pub fn new(
        base_url: &str,
        api_key: Option<String>,
        capabilities: CapabilitySource,
        transport: &TransportConfig,
    ) -> Result<Self, LlmError> {
        Ok(Self::with_client(
            base_url,
            api_key,
            capabilities,
            transport.http_client()?,
        ))
    }

    pub fn with_client(
        base_url: &str,
        api_key: Option<String>,
        capabilities: CapabilitySource,
        client: reqwest::Client,
    ) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.filter(|k| !k.trim().is_empty()),
            capabilities,
            client,
        }
    }

    /// Server root without a trailing `/v1`.
    fn server_root(&self) -> &str {
        self.base_url.strip_suffix("/v1").unwrap_or(&self.base_url)
    }

    fn get(&self, url: &str) -> reqwest::RequestBuilder {
        self.authorize(self.client.get(url))
    }

    fn post(&self, url: &str) -> reqwest::RequestBuilder {
        self.authorize(self.client.post(url))
    }

    fn authorize(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => req.bearer_auth(key),
            None => req,
        }
    }
}

#[async_trait]
impl ChatTransport for OpenAiCompatClient {
    /// POST /chat/completions, non-streaming.
    async fn chat(&self, request: &ChatRequest) -> Result<ChatReply, LlmError> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = OpenAiChatRequest::new(request, false);
        let res = check_status(self.post(&url).json(&body).send().await?).await?;
        let data: OpenAiChatResponse = res.json().await?;
        if let Some(err) = &data.error {
            return Err(LlmError::in_band(err.message()));
        }
        Ok(response_to_reply(data))
    }

    /// POST /chat/completions with `stream: true`; parses SSE `data:` lines.
    async fn chat_stream(
        &self,
        request: &ChatRequest,
        on_delta: &mut DeltaHandler<'_>,
    ) -> Result<(), LlmError> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = OpenAiChatRequest::new(request, true);
        let res = check_status(self.post(&url).json(&body).send().await?).await?;
        let mut stream = res.bytes_stream();
        let mut buffer = Vec::new();

        while let Some(chunk) = stream.next().await {
            buffer.extend_from_slice(&chunk?);
            for line in drain_lines(&mut buffer) {
                match parse_sse_line(&line)? {
                    SseLine::Done => return Ok(()),
                    SseLine::Delta(delta) => on_delta(delta),
                    SseLine::Skip => {}
                }
            }
        }
        // Servers that close without [DONE] may leave a final unterminated line.
        let tail = String::from_utf8_lossy(&buffer).trim().to_string();
        if let SseLine::Delta(delta) = parse_sse_line(&tail)? {
            on_delta(delta);
        }
        Ok(())
    }

    /// GET /models.
    async fn list_models(&self) -> Result<Vec<String>, LlmError> {
        let url = format!("{}/models", self.base_url);
        let res = check_status(self.get(&url).send().await?).await?;
        let data: OpenAiModelsResponse = res.json().await?;
        Ok(data
            .data
            .unwrap_or_default()
            .into_iter()
            .map(|m| m.id)
            .collect())
    }

    /// LM Studio: GET /api/v0/models/{id} → `capabilities`.
    async fn model_capabilities(&self, model: &str) -> Result<Option<Vec<String>>, LlmError> {
        match self.capabilities {
            CapabilitySource::None => Ok(None),
            CapabilitySource::LmStudio => {
                let url = format!("{}/api/v0/models/{}", self.server_root(), model);
                let res = check_status(self.get(&url).send().await?).await?;
                let data: LmStudioModelInfo = res.json().await?;
                Ok(Some(data.capabilities.unwrap_or_default()))
            }
        }
    }

    /// POST /embeddings.
    async fn embed(&self, model: &str, inputs: &[String]) -> Result<Vec<Vec<f32>>, LlmError> {
        let url = format!("{}/embeddings", self.base_url);
        let body = OpenAiEmbeddingRequest {
            model,
            input: inputs,
        };
        let res = check_status(self.post(&url).json(&body).send().await?).await?;
        let mut data: OpenAiEmbeddingResponse = res.json().await?;
        data.data.sort_by_key(|d| d.index);
        Ok(data.data.into_iter().map(|d| d.embedding).collect())
    }
}

enum SseLine {
    Delta(StreamDelta),
    Done,
    Skip,
}

fn parse_sse_line(line: &str) -> Result<SseLine, LlmError> {
    let Some(data) = line.strip_prefix("data:") else {
        return Ok(SseLine::Skip);
    };
    let data = data.trim();
    if data == "[DONE]" {
        return Ok(SseLine::Done);
    }
    if data.is_empty() {
        return Ok(SseLine::Skip);
    }
    let chunk: OpenAiStreamChunk = match serde_json::from_str(data) {
        Ok(c) => c,
        Err(e) => {
            log::debug!("skipping unparseable stream line: {}", e);
            return Ok(SseLine::Skip);
        }
    };
    if let Some(err) = chunk.error {
        return Err(LlmError::in_band(err.message()));
    }
    let Some(delta) = chunk
        .choices
        .and_then(|c| c.into_iter().next())
        .and_then(|c| c.delta)
    else {
        return Ok(SseLine::Skip);
    };
    Ok(SseLine::Delta(StreamDelta {
        content: delta.content.filter(|c| !c.is_empty()),
        tool_calls: delta
            .tool_calls
            .unwrap_or_default()
            .into_iter()
            .map(|tc| ToolCallDelta {
                index: tc.index.unwrap_or(0),
                id: tc.id,
                name: tc.function.as_ref().and_then(|f| f.name.clone()),
                arguments: tc.function.and_then(|f| f.arguments),
            })
            .collect(),
    }))
}

fn response_to_reply(data: OpenAiChatResponse) -> ChatReply {
    let message = data
        .choices
        .and_then(|c| c.into_iter().next())
        .and_then(|c| c.message);
    let Some(m) = message else {
        return ChatReply {
            usage: data.usage,
            ..Default::default()
        };
    };
    let tool_calls = m
        .tool_calls
        .unwrap_or_default()
        .into_iter()
        .filter_map(|tc| {
            let f = tc.function?;
            Some(RawToolCall {
                id: tc.id,
                name: f.name?,
                arguments: f.arguments.unwrap_or_default(),
            })
        })
        .collect();
    ChatReply {
        content: m.content.unwrap_or_default(),
        tool_calls,
        usage: data.usage,
    }
}

// --- wire types ---

#[derive(Debug, Serialize)]
struct OpenAiChatRequest<'a> {
    model: &'a str,
    messages: Vec<OpenAiMessage<'a>>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<&'a [WireTool]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

impl<'a> OpenAiChatRequest<'a> {
    fn new(request: &'a ChatRequest, stream: bool) -> Self {
        Self {
            model: &request.model,
            messages: request.messages.iter().map(OpenAiMessage::from).collect(),
            stream,
            tools: request.tools.as_deref(),
            temperature: request.temperature,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(tag = "role", rename_all = "snake_case")]
enum OpenAiMessage<'a> {
    System {
        content: &'a Content,
    },
    User {
        content: &'a Content,
    },
    Assistant {
        content: Option<&'a str>,
        #[serde(skip_serializing_if = "Vec::is_empty")]
        tool_calls: Vec<OpenAiToolCallRef<'a>>,
        #[serde(skip_serializing_if = "Option::is_none")]
        reasoning_content: Option<&'a str>,
    },
    Tool {
        tool_call_id: &'a str,
        content: &'a str,
    },
}

impl<'a> From<&'a WireMessage> for OpenAiMessage<'a> {
    fn from(m: &'a WireMessage) -> Self {
        match m {
            WireMessage::System { content } => OpenAiMessage::System { content },
            WireMessage::User { content } => OpenAiMessage::User { content },
            WireMessage::Assistant {
                content,
                tool_calls,
                reasoning_content,
            } => OpenAiMessage::Assistant {
                content: if content.is_empty() && !tool_calls.is_empty() {
                    None
                } else {
                    Some(content.as_str())
                },
                tool_calls: tool_calls
                    .iter()
                    .map(|c| OpenAiToolCallRef {
                        id: &c.id,
                        typ: "function",
                        function: OpenAiToolCallFunctionRef {
                            name: &c.name,
                            arguments: &c.arguments,
                        },
                    })
                    .collect(),
                reasoning_content: reasoning_content.as_deref(),
            },
            WireMessage::Tool {
                tool_call_id,
                content,
                ..
            } => OpenAiMessage::Tool {
                tool_call_id,
                content,
            },
        }
    }
}

#[derive(Debug, Serialize)]
struct OpenAiToolCallRef<'a> {
    id: &'a str,
    #[serde(rename = "type")]
    typ: &'static str,
    function: OpenAiToolCallFunctionRef<'a>,
}

#[derive(Debug, Serialize)]
struct OpenAiToolCallFunctionRef<'a> {
    name: &'a str,
    arguments: &'a str,
}

#[derive(Debug, Deserialize)]
struct OpenAiErrorBody {
    message: Option<String>,
}

impl OpenAiErrorBody {
    fn message(&self) -> String {
        self.message
            .clone()
            .unwrap_or_else(|| "provider reported an error".to_string())
    }
}

#[derive(Debug, Deserialize)]
struct OpenAiChatResponse {
    choices: Option<Vec<OpenAiChoice>>,
    usage: Option<Usage>,
    error: Option<OpenAiErrorBody>,
}

#[derive(Debug, Deserialize)]
struct OpenAiChoice {
    message: Option<OpenAiResponseMessage>,
}

#[derive(Debug, Deserialize)]
struct OpenAiResponseMessage {
    content: Option<String>,
    tool_calls: Option<Vec<OpenAiResponseToolCall>>,
}

#[derive(Debug, Deserialize)]
struct OpenAiResponseToolCall {
    id: Option<String>,
    function: Option<OpenAiResponseToolCallFunction>,
}

#[derive(Debug, Deserialize)]
struct OpenAiResponseToolCallFunction {
    name: Option<String>,
    arguments: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAiStreamChunk {
    choices: Option<Vec<OpenAiStreamChoice>>,
    error: Option<OpenAiErrorBody>,
}

#[derive(Debug, Deserialize)]
struct OpenAiStreamChoice {
    delta: Option<OpenAiStreamDelta>,
}

#[derive(Debug, Deserialize)]
struct OpenAiStreamDelta {
    content: Option<String>,
    tool_calls: Option<Vec<OpenAiStreamDeltaToolCall>>,
}

#[derive(Debug, Deserialize)]
struct OpenAiStreamDeltaToolCall {
    index: Option<u32>,
    id: Option<String>,
    function: Option<OpenAiStreamDeltaToolCallFunction>,
}

#[derive(Debug, Deserialize)]
struct OpenAiStreamDeltaToolCallFunction {
    name: Option<String>,
    arguments: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAiModelsResponse {
    data: Option<Vec<OpenAiModelObject>>,
}

#[derive(Debug, Deserialize)]
struct OpenAiModelObject {
    id: String,
}

#[derive(Debug, Deserialize)]
struct LmStudioModelInfo {
    capabilities: Option<Vec<String>>,
}

#[derive(Debug, Serialize)]
struct OpenAiEmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Debug, Deserialize)]
struct OpenAiEmbeddingResponse {
    data: Vec<OpenAiEmbedding>,
}

#[derive(Debug, Deserialize)]
struct OpenAiEmbedding {
    #[serde(default)]
    index: usize,
    embedding: Vec<f32>,
}
