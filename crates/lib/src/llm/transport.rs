//! Transport seam between the drivers and a provider's HTTP API.
//!
//! Every call returns a typed result with a declared shape; drivers never inspect
//! raw provider JSON.

use std::time::Duration;

use async_trait::async_trait;

use super::error::LlmError;
use super::format::WireTool;
use super::history::WireMessage;
use super::types::Usage;

/// One chat request after reconciliation and tool formatting.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<WireMessage>,
    /// None means the request carries no `tools` field.
    pub tools: Option<Vec<WireTool>>,
    pub temperature: Option<f32>,
}

/// A tool call as returned by a non-streamed reply; arguments are still raw text.
#[derive(Debug, Clone, PartialEq)]
pub struct RawToolCall {
    pub id: Option<String>,
    pub name: String,
    pub arguments: String,
}

/// Non-streamed reply.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChatReply {
    pub content: String,
    pub tool_calls: Vec<RawToolCall>,
    pub usage: Option<Usage>,
}

/// Tool-call fragment keyed by position in the reply's call list.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ToolCallDelta {
    pub index: u32,
    pub id: Option<String>,
    pub name: Option<String>,
    pub arguments: Option<String>,
}

/// One streamed fragment.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StreamDelta {
    pub content: Option<String>,
    pub tool_calls: Vec<ToolCallDelta>,
}

impl StreamDelta {
    pub fn text(s: impl Into<String>) -> Self {
        Self {
            content: Some(s.into()),
            tool_calls: Vec::new(),
        }
    }
}

/// Callback receiving stream fragments in arrival order.
pub type DeltaHandler<'a> = dyn FnMut(StreamDelta) + Send + 'a;

#[async_trait]
pub trait ChatTransport: Send + Sync {
    /// Non-streaming chat completion.
    async fn chat(&self, request: &ChatRequest) -> Result<ChatReply, LlmError>;

    /// Streaming chat completion; `on_delta` sees every fragment in order.
    async fn chat_stream(
        &self,
        request: &ChatRequest,
        on_delta: &mut DeltaHandler<'_>,
    ) -> Result<(), LlmError>;

    /// Model ids the server offers.
    async fn list_models(&self) -> Result<Vec<String>, LlmError>;

    /// Capability labels for `model` from the provider's metadata endpoint.
    /// Ok(None) means the provider has no such endpoint.
    async fn model_capabilities(&self, _model: &str) -> Result<Option<Vec<String>>, LlmError> {
        Ok(None)
    }

    /// One embedding vector per input.
    async fn embed(&self, model: &str, inputs: &[String]) -> Result<Vec<Vec<f32>>, LlmError>;
}

/// Timeouts for the underlying HTTP client. The drivers impose no deadlines of
/// their own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransportConfig {
    pub request_timeout: Duration,
    pub connect_timeout: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_millis(120_000),
            connect_timeout: Duration::from_millis(10_000),
        }
    }
}

impl TransportConfig {
    pub fn http_client(&self) -> Result<reqwest::Client, LlmError> {
        reqwest::Client::builder()
            .timeout(self.request_timeout)
            .connect_timeout(self.connect_timeout)
            .build()
            .map_err(|e| LlmError::Config(format!("building http client: {e}")))
    }
}

/// Turn a non-success response into the error taxonomy.
pub(crate) async fn check_status(res: reqwest::Response) -> Result<reqwest::Response, LlmError> {
    if res.status().is_success() {
        return Ok(res);
    }
    let status = res.status().as_u16();
    let body = res.text().await.unwrap_or_default();
    Err(LlmError::from_status(status, &body))
}

/// Split complete lines off the front of `buffer`, leaving any partial tail.
pub(crate) fn drain_lines(buffer: &mut Vec<u8>) -> Vec<String> {
    let mut lines = Vec::new();
    while let Some(i) = buffer.iter().position(|&b| b == b'\n') {
        let line_bytes: Vec<u8> = buffer.drain(..=i).collect();
        let line = String::from_utf8_lossy(&line_bytes[..i]).trim().to_string();
        lines.push(line);
    }
    lines
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drain_lines_keeps_partial_tail() {
        let mut buf = b"one\r\ntwo\nthr".to_vec();
        assert_eq!(drain_lines(&mut buf), vec!["one", "two"]);
        assert_eq!(buf, b"thr");
        buf.extend_from_slice(b"ee\n");
        assert_eq!(drain_lines(&mut buf), vec!["three"]);
        assert!(buf.is_empty());
    }

    #[test]
    fn default_timeouts() {
        let t = TransportConfig::default();
        assert_eq!(t.request_timeout, Duration::from_secs(120));
        assert_eq!(t.connect_timeout, Duration::from_secs(10));
    }
}
