//! Prompt-emulated tool calling for models without native function calling.
//!
//! The tool list is described in a system prompt and the model is asked to reply
//! with a single JSON object `{"name": ..., "arguments": {...}}` when it wants a
//! tool. Anything else is a plain answer. Parsed calls are validated against the
//! declared schema and checked against a per-session duplicate tracker.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

use super::error::LlmError;
use super::events::{new_event_uuid, EventKind, EventSink, StreamEvent};
use super::history::{reconcile, ReconcileOptions};
use super::transport::{ChatRequest, ChatTransport};
use super::types::{ChatMessage, CompletionResult, Content, Role, ToolCall, ToolDefinition, Usage};

/// Request parameters the emulated driver needs from its adapter.
#[derive(Debug, Clone)]
pub struct RequestSettings {
    pub model: String,
    pub temperature: Option<f32>,
}

/// Outcome of reading a model reply for a tool selection.
#[derive(Debug, Clone, PartialEq)]
pub enum Selection {
    /// Not a call; the text is the answer.
    Text(String),
    Call(ToolCall),
    /// Looked like a call but failed validation.
    Rejected(String),
}

/// The emulation strategy held by an adapter. Owns the duplicate tracker, so one
/// instance belongs to one session.
#[derive(Debug)]
pub struct UnTooled {
    tracker: Mutex<ToolCallTracker>,
}

impl UnTooled {
    pub fn new(cooldown: Option<Duration>) -> Self {
        Self {
            tracker: Mutex::new(ToolCallTracker::new(cooldown)),
        }
    }

    fn tracker(&self) -> MutexGuard<'_, ToolCallTracker> {
        self.tracker.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Clear the duplicate set.
    pub fn reset(&self) {
        self.tracker().reset();
    }

    /// Non-streamed emulated completion. Returns the result and the usage summed
    /// over every request made.
    pub async fn complete(
        &self,
        transport: &dyn ChatTransport,
        settings: &RequestSettings,
        messages: &[ChatMessage],
        tools: &[ToolDefinition],
    ) -> Result<(CompletionResult, Usage), LlmError> {
        let mut usage = Usage::default();
        if !tools.is_empty() {
            let request = selection_request(settings, messages, tools);
            let reply = transport.chat(&request).await?;
            usage += reply.usage.unwrap_or_default();
            match self.select(&reply.content, tools) {
                Selection::Call(call) => return Ok((CompletionResult::call(call), usage)),
                Selection::Text(text) => {
                    self.reset();
                    return Ok((CompletionResult::text(text), usage));
                }
                Selection::Rejected(_) => {}
            }
        }
        let reply = transport.chat(&plain_request(settings, messages)).await?;
        usage += reply.usage.unwrap_or_default();
        self.reset();
        Ok((CompletionResult::text(reply.content), usage))
    }

    /// Streamed emulated completion.
    pub async fn stream(
        &self,
        transport: &dyn ChatTransport,
        settings: &RequestSettings,
        messages: &[ChatMessage],
        tools: &[ToolDefinition],
        sink: &dyn EventSink,
    ) -> Result<CompletionResult, LlmError> {
        let message_uuid = new_event_uuid();
        if tools.is_empty() {
            let text = stream_text(transport, &plain_request(settings, messages), sink, &message_uuid)
                .await?;
            self.reset();
            return Ok(CompletionResult::text(text));
        }

        let status_uuid = new_event_uuid();
        sink.emit(StreamEvent::new(
            EventKind::Status,
            status_uuid.as_str(),
            "Checking available tools",
        ));
        let request = selection_request(settings, messages, tools);
        let mut text = String::new();
        let mut flushed = false;
        let streamed = transport
            .chat_stream(&request, &mut |delta| {
                let Some(chunk) = delta.content else {
                    return;
                };
                text.push_str(&chunk);
                if flushed {
                    sink.emit(StreamEvent::new(
                        EventKind::TextChunk,
                        message_uuid.as_str(),
                        chunk.as_str(),
                    ));
                } else if !could_be_call(&text) {
                    flushed = true;
                    sink.emit(StreamEvent::new(
                        EventKind::TextChunk,
                        message_uuid.as_str(),
                        text.as_str(),
                    ));
                }
            })
            .await;
        sink.emit(StreamEvent::new(EventKind::RemoveStatus, status_uuid.as_str(), ""));
        streamed?;

        if flushed {
            self.reset();
            return Ok(CompletionResult::text(text));
        }
        match self.select(&text, tools) {
            Selection::Call(call) => {
                sink.emit(StreamEvent::new(
                    EventKind::ToolCallInvocation,
                    format!("{message_uuid}:tool_call_invocation"),
                    format!("{}({})", call.name, Value::Object(call.arguments.clone())),
                ));
                Ok(CompletionResult::call(call))
            }
            Selection::Text(text) => {
                if !text.is_empty() {
                    sink.emit(StreamEvent::new(
                        EventKind::TextChunk,
                        message_uuid.as_str(),
                        text.as_str(),
                    ));
                }
                self.reset();
                Ok(CompletionResult::text(text))
            }
            Selection::Rejected(reason) => {
                sink.emit(StreamEvent::new(EventKind::Status, new_event_uuid(), reason));
                let text =
                    stream_text(transport, &plain_request(settings, messages), sink, &message_uuid)
                        .await?;
                self.reset();
                Ok(CompletionResult::text(text))
            }
        }
    }

    /// Parse, validate and deduplicate a tool-selection reply.
    pub fn select(&self, text: &str, tools: &[ToolDefinition]) -> Selection {
        let call = match parse_selection(text, tools) {
            Selection::Call(call) => call,
            Selection::Rejected(reason) => {
                log::warn!("ignoring emulated tool call: {}", reason);
                return Selection::Rejected(reason);
            }
            text => return text,
        };
        match self.tracker().check_and_record(&call) {
            Ok(()) => Selection::Call(call),
            Err(reason) => {
                log::warn!("ignoring emulated tool call: {}", reason);
                Selection::Rejected(reason)
            }
        }
    }
}

async fn stream_text(
    transport: &dyn ChatTransport,
    request: &ChatRequest,
    sink: &dyn EventSink,
    uuid: &str,
) -> Result<String, LlmError> {
    let mut text = String::new();
    transport
        .chat_stream(request, &mut |delta| {
            if let Some(chunk) = delta.content {
                sink.emit(StreamEvent::new(EventKind::TextChunk, uuid, chunk.as_str()));
                text.push_str(&chunk);
            }
        })
        .await?;
    Ok(text)
}

/// True while the accumulated reply may still turn out to be a JSON call.
fn could_be_call(text: &str) -> bool {
    let t = text.trim_start();
    t.is_empty() || t.starts_with('{') || t.starts_with("```") || "```".starts_with(t)
}

fn selection_request(
    settings: &RequestSettings,
    messages: &[ChatMessage],
    tools: &[ToolDefinition],
) -> ChatRequest {
    let mut with_prompt = Vec::with_capacity(messages.len() + 1);
    with_prompt.push(ChatMessage::system(tool_prompt(tools)));
    with_prompt.extend(flatten_history(messages));
    ChatRequest {
        model: settings.model.clone(),
        messages: reconcile(&with_prompt, ReconcileOptions::default()),
        tools: None,
        temperature: settings.temperature,
    }
}

fn plain_request(settings: &RequestSettings, messages: &[ChatMessage]) -> ChatRequest {
    ChatRequest {
        model: settings.model.clone(),
        messages: reconcile(&flatten_history(messages), ReconcileOptions::default()),
        tools: None,
        temperature: settings.temperature,
    }
}

/// System prompt describing the available tools and the reply format.
pub fn tool_prompt(tools: &[ToolDefinition]) -> String {
    let mut prompt = String::from(
        "You can call one of the tools listed below. If a tool would help answer the \
         latest message, reply with only a JSON object of the form \
         {\"name\": \"<tool name>\", \"arguments\": {<argument name>: <value>}} and nothing \
         else. If no tool is needed, or the conversation already contains the result \
         you need, answer normally in plain text.\n\nAvailable tools:\n",
    );
    for tool in tools {
        prompt.push_str(&format!("\n- {}", tool.name));
        if !tool.description.is_empty() {
            prompt.push_str(&format!(": {}", tool.description));
        }
        if let Some(props) = tool.parameters.get("properties").and_then(Value::as_object) {
            if !props.is_empty() {
                prompt.push_str(&format!("\n  parameters: {}", Value::Object(props.clone())));
            }
        }
        let required = tool.required_arguments();
        if !required.is_empty() {
            prompt.push_str(&format!("\n  required: {}", required.join(", ")));
        }
    }
    prompt
}

/// Prompt-only models cannot take tool-result messages; rewrite each `function`
/// message as a user message describing the call and its result.
pub fn flatten_history(messages: &[ChatMessage]) -> Vec<ChatMessage> {
    messages
        .iter()
        .map(|m| {
            if m.role != Role::Function {
                return m.clone();
            }
            let (name, arguments) = match &m.original_function_call {
                Some(call) => (call.name.as_str(), call.arguments.to_string()),
                None => (m.name.as_deref().unwrap_or("tool"), "{}".to_string()),
            };
            ChatMessage::user(Content::Text(format!(
                "Tool {} was called with arguments {} and returned:\n{}",
                name,
                arguments,
                m.content.as_text()
            )))
        })
        .collect()
}

/// The JSON object in `text`: the whole reply, optionally inside a code fence.
pub(crate) fn extract_json(text: &str) -> Option<Map<String, Value>> {
    let trimmed = text.trim();
    let body = match trimmed.strip_prefix("```") {
        Some(rest) => {
            let rest = rest.strip_suffix("```")?;
            // Drop an info string such as `json`.
            match rest.find('\n') {
                Some(nl) if !rest[..nl].trim_start().starts_with('{') => &rest[nl + 1..],
                _ => rest,
            }
        }
        None => trimmed,
    };
    match serde_json::from_str::<Value>(body.trim()) {
        Ok(Value::Object(map)) => Some(map),
        _ => None,
    }
}

/// Read a reply as a tool selection and validate it against `tools`.
pub fn parse_selection(text: &str, tools: &[ToolDefinition]) -> Selection {
    let Some(mut object) = extract_json(text) else {
        return Selection::Text(text.to_string());
    };
    let Some(name) = object.get("name").and_then(Value::as_str).map(str::to_string) else {
        return Selection::Rejected("tool call is missing a name".to_string());
    };
    let arguments = match object.remove("arguments") {
        None | Some(Value::Null) => Map::new(),
        Some(Value::Object(map)) => map,
        Some(Value::String(raw)) => match serde_json::from_str::<Value>(&raw) {
            Ok(Value::Object(map)) => map,
            _ => {
                return Selection::Rejected(format!(
                    "arguments for {name} must be a JSON object"
                ))
            }
        },
        Some(_) => {
            return Selection::Rejected(format!("arguments for {name} must be a JSON object"))
        }
    };
    let call = ToolCall {
        id: None,
        name,
        arguments,
    };
    match validate(&call, tools) {
        Ok(()) => Selection::Call(call),
        Err(reason) => Selection::Rejected(reason),
    }
}

/// Check a call against the declared tools. The error is a readable reason.
pub fn validate(call: &ToolCall, tools: &[ToolDefinition]) -> Result<(), String> {
    let Some(tool) = tools.iter().find(|t| t.name == call.name) else {
        return Err(format!("unknown tool {}", call.name));
    };
    let missing: Vec<&str> = tool
        .required_arguments()
        .into_iter()
        .filter(|r| !call.arguments.contains_key(*r))
        .collect();
    if !missing.is_empty() {
        return Err(format!(
            "tool {} is missing required arguments: {}",
            call.name,
            missing.join(", ")
        ));
    }
    if let Some(declared) = tool.declared_properties() {
        let extra: Vec<&str> = call
            .arguments
            .keys()
            .map(String::as_str)
            .filter(|k| !declared.contains(k))
            .collect();
        if !extra.is_empty() {
            return Err(format!(
                "tool {} got unexpected arguments: {}",
                call.name,
                extra.join(", ")
            ));
        }
    }
    Ok(())
}

/// Remembers which `(name, arguments)` pairs already ran this session.
#[derive(Debug)]
pub struct ToolCallTracker {
    seen: HashMap<String, Instant>,
    /// None: a pair stays blocked until `reset`.
    cooldown: Option<Duration>,
}

impl ToolCallTracker {
    pub fn new(cooldown: Option<Duration>) -> Self {
        Self {
            seen: HashMap::new(),
            cooldown,
        }
    }

    /// Record `call`, or reject it if the same pair ran within the cooldown.
    pub fn check_and_record(&mut self, call: &ToolCall) -> Result<(), String> {
        let key = call_key(call);
        let now = Instant::now();
        if let Some(at) = self.seen.get(&key) {
            let expired = self
                .cooldown
                .is_some_and(|c| now.duration_since(*at) >= c);
            if !expired {
                return Err(format!(
                    "tool {} was already called with the same arguments; use the earlier result",
                    call.name
                ));
            }
        }
        self.seen.insert(key, now);
        Ok(())
    }

    pub fn reset(&mut self) {
        self.seen.clear();
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}

/// Hash of the name and arguments with object keys sorted.
fn call_key(call: &ToolCall) -> String {
    let mut hasher = Sha256::new();
    hasher.update(call.name.as_bytes());
    hasher.update([0u8]);
    hasher.update(canonical(&Value::Object(call.arguments.clone())).as_bytes());
    hasher
        .finalize()
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}

fn canonical(value: &Value) -> String {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let fields: Vec<String> = keys
                .into_iter()
                .map(|k| format!("{}:{}", Value::String(k.clone()), canonical(&map[k])))
                .collect();
            format!("{{{}}}", fields.join(","))
        }
        Value::Array(items) => {
            let items: Vec<String> = items.iter().map(canonical).collect();
            format!("[{}]", items.join(","))
        }
        other => other.to_string(),
    }
}
