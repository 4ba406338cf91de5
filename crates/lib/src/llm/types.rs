//! Request-scoped data model shared by every provider: transcript messages, tool
//! definitions, tool calls and the uniform completion result.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Transcript role. `Function` is the synthetic wrapper the orchestrator uses to
/// record a prior tool result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Function,
}

/// Message content: plain text or a list of structured parts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Content {
    Text(String),
    Parts(Vec<ContentPart>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageUrl {
    pub url: String,
}

impl Content {
    /// Concatenated text of the content; image parts are skipped.
    pub fn as_text(&self) -> String {
        match self {
            Content::Text(s) => s.clone(),
            Content::Parts(parts) => parts
                .iter()
                .filter_map(|p| match p {
                    ContentPart::Text { text } => Some(text.as_str()),
                    ContentPart::ImageUrl { .. } => None,
                })
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Content::Text(s) => s.is_empty(),
            Content::Parts(parts) => parts.is_empty(),
        }
    }
}

impl Default for Content {
    fn default() -> Self {
        Content::Text(String::new())
    }
}

impl From<&str> for Content {
    fn from(s: &str) -> Self {
        Content::Text(s.to_string())
    }
}

impl From<String> for Content {
    fn from(s: String) -> Self {
        Content::Text(s)
    }
}

/// The call a `function` message answers. `id` is absent when the call came from
/// the prompt-emulated path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OriginalFunctionCall {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub name: String,
    /// Object, or the raw string the model produced.
    #[serde(default)]
    pub arguments: Value,
}

/// One transcript message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub role: Role,
    #[serde(default)]
    pub content: Content,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_function_call: Option<OriginalFunctionCall>,
}

impl ChatMessage {
    fn plain(role: Role, content: impl Into<Content>) -> Self {
        Self {
            role,
            content: content.into(),
            name: None,
            original_function_call: None,
        }
    }

    pub fn system(content: impl Into<Content>) -> Self {
        Self::plain(Role::System, content)
    }

    pub fn user(content: impl Into<Content>) -> Self {
        Self::plain(Role::User, content)
    }

    pub fn assistant(content: impl Into<Content>) -> Self {
        Self::plain(Role::Assistant, content)
    }

    /// Tool result for `call`.
    pub fn function_result(call: OriginalFunctionCall, content: impl Into<Content>) -> Self {
        Self {
            role: Role::Function,
            content: content.into(),
            name: Some(call.name.clone()),
            original_function_call: Some(call),
        }
    }
}

/// A callable tool as declared by the orchestrator. Names are unique within a request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDefinition {
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// JSON-schema-like object (`type`, `properties`, `required`).
    #[serde(default, alias = "parametersSchema")]
    pub parameters: Value,
}

impl ToolDefinition {
    pub fn new(name: impl Into<String>, description: impl Into<String>, parameters: Value) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
        }
    }

    /// Names listed under `required` in the parameter schema.
    pub fn required_arguments(&self) -> Vec<&str> {
        self.parameters
            .get("required")
            .and_then(|r| r.as_array())
            .map(|r| r.iter().filter_map(|v| v.as_str()).collect())
            .unwrap_or_default()
    }

    /// Declared property names, or None when the schema does not list properties.
    pub fn declared_properties(&self) -> Option<Vec<&str>> {
        self.parameters
            .get("properties")
            .and_then(|p| p.as_object())
            .map(|p| p.keys().map(|k| k.as_str()).collect())
    }
}

/// A structured tool invocation surfaced to the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub arguments: Map<String, Value>,
}

impl ToolCall {
    /// Parse a raw argument string into a call. Blank input is an empty argument
    /// object; anything that is not a JSON object is an error.
    pub fn parse(id: Option<String>, name: String, raw: &str) -> Result<Self, String> {
        let arguments = parse_arguments(raw)?;
        Ok(Self {
            id,
            name,
            arguments,
        })
    }
}

pub(crate) fn parse_arguments(raw: &str) -> Result<Map<String, Value>, String> {
    if raw.trim().is_empty() {
        return Ok(Map::new());
    }
    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(other) => Err(format!("expected a JSON object, got {}", json_kind(&other))),
        Err(e) => Err(e.to_string()),
    }
}

fn json_kind(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Token usage reported by a provider, when available.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    #[serde(default)]
    pub prompt_tokens: u64,
    #[serde(default)]
    pub completion_tokens: u64,
}

impl std::ops::AddAssign for Usage {
    fn add_assign(&mut self, other: Usage) {
        self.prompt_tokens += other.prompt_tokens;
        self.completion_tokens += other.completion_tokens;
    }
}

/// Uniform result of `stream` / `complete`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionResult {
    pub text_response: Option<String>,
    pub function_call: Option<ToolCall>,
    pub cost: f64,
}

impl CompletionResult {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text_response: Some(text.into()),
            function_call: None,
            cost: 0.0,
        }
    }

    pub fn call(call: ToolCall) -> Self {
        Self {
            text_response: None,
            function_call: Some(call),
            cost: 0.0,
        }
    }
}
