//! Gateway HTTP request and response bodies.

use serde::{Deserialize, Serialize};

use crate::llm::{ChatMessage, CompletionResult, ToolDefinition, ToolSupport};

/// `POST /api/chat` body.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatParams {
    /// Reuse a session (and its duplicate tracker); a new one is created when absent.
    #[serde(default)]
    pub session_id: Option<String>,
    pub messages: Vec<ChatMessage>,
    #[serde(default)]
    pub tools: Vec<ToolDefinition>,
    /// Respond with Server-Sent Events instead of one JSON body.
    #[serde(default)]
    pub stream: bool,
}

/// `POST /api/chat` response, and the payload of the final `result` SSE frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatResponse {
    pub session_id: String,
    pub result: CompletionResult,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EmbeddingInput {
    One(String),
    Many(Vec<String>),
}

impl EmbeddingInput {
    pub fn into_vec(self) -> Vec<String> {
        match self {
            EmbeddingInput::One(s) => vec![s],
            EmbeddingInput::Many(v) => v,
        }
    }
}

/// `POST /api/embeddings` body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingsParams {
    pub input: EmbeddingInput,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingsResponse {
    pub embeddings: Vec<Vec<f32>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelsResponse {
    pub models: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CapabilitiesResponse {
    pub provider: String,
    pub model: String,
    pub native_tool_calling: ToolSupport,
}

/// Error body for every non-2xx API response and the `error` SSE frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    pub retryable: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn chat_params_defaults() {
        let p: ChatParams = serde_json::from_value(json!({
            "messages": [{"role": "user", "content": "hi"}]
        }))
        .unwrap();
        assert!(p.session_id.is_none());
        assert!(p.tools.is_empty());
        assert!(!p.stream);
    }

    #[test]
    fn embedding_input_accepts_string_or_list() {
        let one: EmbeddingsParams = serde_json::from_value(json!({"input": "a"})).unwrap();
        assert_eq!(one.input.into_vec(), vec!["a"]);
        let many: EmbeddingsParams = serde_json::from_value(json!({"input": ["a", "b"]})).unwrap();
        assert_eq!(many.input.into_vec(), vec!["a", "b"]);
    }

    #[test]
    fn capabilities_serialize_camel_case() {
        let v = serde_json::to_value(CapabilitiesResponse {
            provider: "ollama".into(),
            model: "m".into(),
            native_tool_calling: ToolSupport::Unknown,
        })
        .unwrap();
        assert_eq!(v["nativeToolCalling"], "unknown");
    }
}
