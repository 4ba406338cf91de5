//! Ollama API transport (http://127.0.0.1:11434 by default).
//! Non-streaming and streaming chat (NDJSON), model listing, `/api/show`
//! capability labels and embeddings.

use async_trait::async_trait;
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};

use super::error::LlmError;
use super::format::WireTool;
use super::history::{WireMessage, WireToolCall};
use super::transport::{
    check_status, drain_lines, ChatReply, ChatRequest, ChatTransport, DeltaHandler, RawToolCall,
    StreamDelta, ToolCallDelta, TransportConfig,
};
use super::types::Usage;

pub const DEFAULT_BASE_URL: &str = "http://127.0.0.1:11434";

/// Client for the Ollama HTTP API.
#[derive(Clone)]
pub struct OllamaClient {
    base_url: String,
    client: reqwest::Client,
}

impl OllamaClient {
    pub fn new(base_url: Option<&str>, transport: &TransportConfig) -> Result<Self, LlmError> {
        Ok(Self::with_client(base_url, transport.http_client()?))
    }

    pub fn with_client(base_url: Option<&str>, client: reqwest::Client) -> Self {
        let base_url = base_url
            .map(|u| u.trim_end_matches('/').to_string())
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        Self { base_url, client }
    }
}

#[async_trait]
impl ChatTransport for OllamaClient {
    /// POST /api/chat, non-streaming.
    async fn chat(&self, request: &ChatRequest) -> Result<ChatReply, LlmError> {
        let url = format!("{}/api/chat", self.base_url);
        let body = OllamaChatRequest::new(request, false);
        let res = check_status(self.client.post(&url).json(&body).send().await?).await?;
        let data: OllamaChatChunk = res.json().await?;
        if let Some(err) = &data.error {
            return Err(LlmError::in_band(err.clone()));
        }
        let usage = data.usage();
        let message = data.message.unwrap_or_default();
        Ok(ChatReply {
            content: message.content,
            tool_calls: message
                .tool_calls
                .unwrap_or_default()
                .into_iter()
                .map(|tc| RawToolCall {
                    id: tc.id,
                    name: tc.function.name,
                    arguments: encode_arguments(&tc.function.arguments),
                })
                .collect(),
            usage,
        })
    }

    /// POST /api/chat with `stream: true`. Ollama delivers each tool call whole in
    /// one line; calls are numbered in arrival order.
    async fn chat_stream(
        &self,
        request: &ChatRequest,
        on_delta: &mut DeltaHandler<'_>,
    ) -> Result<(), LlmError> {
        let url = format!("{}/api/chat", self.base_url);
        let body = OllamaChatRequest::new(request, true);
        let res = check_status(self.client.post(&url).json(&body).send().await?).await?;
        let mut stream = res.bytes_stream();
        let mut buffer = Vec::new();
        let mut next_index = 0u32;

        while let Some(chunk) = stream.next().await {
            buffer.extend_from_slice(&chunk?);
            for line in drain_lines(&mut buffer) {
                if handle_line(&line, &mut next_index, on_delta)? {
                    return Ok(());
                }
            }
        }
        let tail = String::from_utf8_lossy(&buffer).trim().to_string();
        handle_line(&tail, &mut next_index, on_delta)?;
        Ok(())
    }

    /// GET /api/tags.
    async fn list_models(&self) -> Result<Vec<String>, LlmError> {
        let url = format!("{}/api/tags", self.base_url);
        let res = check_status(self.client.get(&url).send().await?).await?;
        let data: TagsResponse = res.json().await?;
        Ok(data
            .models
            .unwrap_or_default()
            .into_iter()
            .map(|m| m.name)
            .collect())
    }

    /// POST /api/show → `capabilities` (e.g. `["completion", "tools"]`). Older
    /// servers omit the field.
    async fn model_capabilities(&self, model: &str) -> Result<Option<Vec<String>>, LlmError> {
        let url = format!("{}/api/show", self.base_url);
        let res = check_status(
            self.client
                .post(&url)
                .json(&serde_json::json!({ "model": model }))
                .send()
                .await?,
        )
        .await?;
        let data: ShowResponse = res.json().await?;
        Ok(data.capabilities)
    }

    /// POST /api/embed.
    async fn embed(&self, model: &str, inputs: &[String]) -> Result<Vec<Vec<f32>>, LlmError> {
        let url = format!("{}/api/embed", self.base_url);
        let body = EmbedRequest {
            model,
            input: inputs,
        };
        let res = check_status(self.client.post(&url).json(&body).send().await?).await?;
        let data: EmbedResponse = res.json().await?;
        Ok(data.embeddings)
    }
}

/// Returns true when the line ends the stream.
fn handle_line(
    line: &str,
    next_index: &mut u32,
    on_delta: &mut DeltaHandler<'_>,
) -> Result<bool, LlmError> {
    if line.is_empty() {
        return Ok(false);
    }
    let event: OllamaChatChunk = match serde_json::from_str(line) {
        Ok(e) => e,
        Err(e) => {
            log::debug!("skipping unparseable ollama line: {}", e);
            return Ok(false);
        }
    };
    if let Some(err) = event.error {
        return Err(LlmError::in_band(err));
    }
    if let Some(msg) = event.message {
        let tool_calls: Vec<ToolCallDelta> = msg
            .tool_calls
            .unwrap_or_default()
            .into_iter()
            .map(|tc| {
                let index = *next_index;
                *next_index += 1;
                ToolCallDelta {
                    index,
                    id: tc.id,
                    name: Some(tc.function.name),
                    arguments: Some(encode_arguments(&tc.function.arguments)),
                }
            })
            .collect();
        if !msg.content.is_empty() || !tool_calls.is_empty() {
            on_delta(StreamDelta {
                content: Some(msg.content).filter(|c| !c.is_empty()),
                tool_calls,
            });
        }
    }
    Ok(event.done)
}

/// Ollama returns arguments as an object; the drivers expect raw JSON text.
fn encode_arguments(arguments: &serde_json::Value) -> String {
    match arguments {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Ollama types call arguments as an object and rejects anything else. Text that
/// does not parse to one (a malformed call being sent back) goes out as `{}`; the
/// tool-result message still quotes it.
fn object_arguments(call: &WireToolCall) -> serde_json::Value {
    match call.arguments_value() {
        v @ serde_json::Value::Object(_) => v,
        _ => {
            log::debug!("sending non-object arguments for {} as {{}}", call.name);
            serde_json::Value::Object(serde_json::Map::new())
        }
    }
}

// --- wire types ---

#[derive(Debug, Serialize)]
struct OllamaChatRequest<'a> {
    model: &'a str,
    messages: Vec<OllamaMessage<'a>>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<&'a [WireTool]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    options: Option<OllamaOptions>,
}

impl<'a> OllamaChatRequest<'a> {
    fn new(request: &'a ChatRequest, stream: bool) -> Self {
        Self {
            model: &request.model,
            messages: request.messages.iter().map(OllamaMessage::from).collect(),
            stream,
            tools: request.tools.as_deref(),
            options: request
                .temperature
                .map(|temperature| OllamaOptions { temperature }),
        }
    }
}

#[derive(Debug, Serialize)]
struct OllamaOptions {
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct OllamaMessage<'a> {
    role: &'static str,
    content: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tool_calls: Vec<OllamaToolCallOut<'a>>,
    /// When role is "tool", the name of the tool this result is for.
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_name: Option<&'a str>,
}

#[derive(Debug, Serialize)]
struct OllamaToolCallOut<'a> {
    function: OllamaFunctionOut<'a>,
}

#[derive(Debug, Serialize)]
struct OllamaFunctionOut<'a> {
    name: &'a str,
    arguments: serde_json::Value,
}

impl<'a> From<&'a WireMessage> for OllamaMessage<'a> {
    fn from(m: &'a WireMessage) -> Self {
        match m {
            WireMessage::System { content } => OllamaMessage {
                role: "system",
                content: content.as_text(),
                tool_calls: Vec::new(),
                tool_name: None,
            },
            WireMessage::User { content } => OllamaMessage {
                role: "user",
                content: content.as_text(),
                tool_calls: Vec::new(),
                tool_name: None,
            },
            WireMessage::Assistant {
                content,
                tool_calls,
                ..
            } => OllamaMessage {
                role: "assistant",
                content: content.clone(),
                tool_calls: tool_calls
                    .iter()
                    .map(|c| OllamaToolCallOut {
                        function: OllamaFunctionOut {
                            name: &c.name,
                            arguments: object_arguments(c),
                        },
                    })
                    .collect(),
                tool_name: None,
            },
            WireMessage::Tool { name, content, .. } => OllamaMessage {
                role: "tool",
                content: content.clone(),
                tool_calls: Vec::new(),
                tool_name: Some(name.as_str()),
            },
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct OllamaChatChunk {
    #[serde(default)]
    message: Option<OllamaResponseMessage>,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    prompt_eval_count: Option<u64>,
    #[serde(default)]
    eval_count: Option<u64>,
}

impl OllamaChatChunk {
    fn usage(&self) -> Option<Usage> {
        if self.prompt_eval_count.is_none() && self.eval_count.is_none() {
            return None;
        }
        Some(Usage {
            prompt_tokens: self.prompt_eval_count.unwrap_or(0),
            completion_tokens: self.eval_count.unwrap_or(0),
        })
    }
}

#[derive(Debug, Default, Deserialize)]
struct OllamaResponseMessage {
    #[serde(default)]
    content: String,
    #[serde(default)]
    tool_calls: Option<Vec<OllamaToolCallIn>>,
}

#[derive(Debug, Deserialize)]
struct OllamaToolCallIn {
    #[serde(default)]
    id: Option<String>,
    function: OllamaFunctionIn,
}

#[derive(Debug, Deserialize)]
struct OllamaFunctionIn {
    name: String,
    /// Arguments as JSON object or string (model-dependent).
    #[serde(default)]
    arguments: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct TagsResponse {
    models: Option<Vec<OllamaModel>>,
}

#[derive(Debug, Deserialize)]
struct OllamaModel {
    name: String,
}

#[derive(Debug, Deserialize)]
struct ShowResponse {
    #[serde(default)]
    capabilities: Option<Vec<String>>,
}

#[derive(Debug, Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    embeddings: Vec<Vec<f32>>,
}
