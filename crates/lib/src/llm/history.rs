//! History reconciliation: the internal transcript records a tool round as one
//! `function` message; native tool-calling providers expect an assistant message
//! carrying the call followed by a tool-result message linked by call id.

use serde_json::Value;

use super::types::{ChatMessage, Content, OriginalFunctionCall, Role};

/// Provider-neutral message after reconciliation. Transports serialize it into
/// their own request shape.
#[derive(Debug, Clone, PartialEq)]
pub enum WireMessage {
    System {
        content: Content,
    },
    User {
        content: Content,
    },
    Assistant {
        content: String,
        tool_calls: Vec<WireToolCall>,
        /// Set (possibly empty) when the provider needs the field on every assistant turn.
        reasoning_content: Option<String>,
    },
    Tool {
        tool_call_id: String,
        name: String,
        content: String,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct WireToolCall {
    pub id: String,
    pub name: String,
    /// Arguments, JSON-encoded.
    pub arguments: String,
}

impl WireToolCall {
    /// Arguments as a JSON value; falls back to the raw string.
    pub fn arguments_value(&self) -> Value {
        serde_json::from_str(&self.arguments).unwrap_or_else(|_| Value::String(self.arguments.clone()))
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ReconcileOptions {
    /// Give every assistant message an explicit `reasoning_content`.
    pub reasoning_content: bool,
}

/// Expand `function` messages into assistant-call + tool-result pairs. Order is
/// preserved; no other message is reordered or dropped.
pub fn reconcile(messages: &[ChatMessage], opts: ReconcileOptions) -> Vec<WireMessage> {
    let reasoning = || opts.reasoning_content.then(String::new);
    let mut out: Vec<WireMessage> = Vec::with_capacity(messages.len() + 2);

    for m in messages {
        match m.role {
            Role::System => out.push(WireMessage::System {
                content: m.content.clone(),
            }),
            Role::User => out.push(WireMessage::User {
                content: m.content.clone(),
            }),
            Role::Assistant => out.push(WireMessage::Assistant {
                content: m.content.as_text(),
                tool_calls: Vec::new(),
                reasoning_content: reasoning(),
            }),
            Role::Function => {
                let Some(call) = function_call_of(m) else {
                    // Nothing to link the result to; keep it as readable context.
                    out.push(WireMessage::User {
                        content: Content::Text(m.content.as_text()),
                    });
                    continue;
                };
                let id = call.id.clone().unwrap_or_else(synthetic_call_id);
                if !last_is_call_with_id(&out, &id) {
                    out.push(WireMessage::Assistant {
                        content: String::new(),
                        tool_calls: vec![WireToolCall {
                            id: id.clone(),
                            name: call.name.clone(),
                            arguments: encode_arguments(&call.arguments),
                        }],
                        reasoning_content: reasoning(),
                    });
                }
                out.push(WireMessage::Tool {
                    tool_call_id: id,
                    name: call.name,
                    content: m.content.as_text(),
                });
            }
        }
    }
    out
}

/// The call a function message answers: `originalFunctionCall`, or just its `name`.
fn function_call_of(m: &ChatMessage) -> Option<OriginalFunctionCall> {
    if let Some(call) = &m.original_function_call {
        return Some(call.clone());
    }
    m.name.as_ref().map(|name| OriginalFunctionCall {
        id: None,
        name: name.clone(),
        arguments: Value::Object(Default::default()),
    })
}

fn last_is_call_with_id(out: &[WireMessage], id: &str) -> bool {
    matches!(
        out.last(),
        Some(WireMessage::Assistant { tool_calls, .. }) if tool_calls.iter().any(|c| c.id == id)
    )
}

pub(crate) fn synthetic_call_id() -> String {
    format!("call_{}", uuid::Uuid::new_v4().simple())
}

/// Strings are passed through (they are already the model's raw JSON); other
/// values are encoded.
fn encode_arguments(arguments: &Value) -> String {
    match arguments {
        Value::String(s) => s.clone(),
        Value::Null => "{}".to_string(),
        other => other.to_string(),
    }
}
