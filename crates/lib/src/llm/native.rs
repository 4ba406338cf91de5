//! Native tool-call driver: requests go out with the formatted tool list and the
//! provider answers with structured calls.
//!
//! Streaming replies deliver calls as fragments keyed by position; they are merged
//! per index in arrival order. Only the lowest-index call is surfaced.

use std::collections::BTreeMap;

use serde_json::Value;

use super::error::LlmError;
use super::events::{new_event_uuid, EventKind, EventSink, StreamEvent};
use super::transport::{ChatReply, ChatRequest, ChatTransport, ToolCallDelta};
use super::types::{ChatMessage, CompletionResult, OriginalFunctionCall, ToolCall};

/// A call under construction.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PartialCall {
    pub id: Option<String>,
    pub name: String,
    pub arguments: String,
}

impl PartialCall {
    /// `name(arguments)` as shown in progress events.
    pub fn display(&self) -> String {
        format!("{}({})", self.name, self.arguments)
    }
}

/// Per-index accumulator for streamed tool-call fragments.
#[derive(Debug, Default)]
pub struct ToolCallAssembler {
    calls: BTreeMap<u32, PartialCall>,
}

impl ToolCallAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge one fragment. The first fragment for an index initializes the call;
    /// later ones append to its name and arguments.
    pub fn merge(&mut self, delta: ToolCallDelta) -> &PartialCall {
        let call = self.calls.entry(delta.index).or_default();
        if call.id.is_none() {
            call.id = delta.id.filter(|id| !id.is_empty());
        }
        if let Some(name) = delta.name {
            call.name.push_str(&name);
        }
        if let Some(args) = delta.arguments {
            call.arguments.push_str(&args);
        }
        call
    }

    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }

    /// The lowest-index call; the rest are dropped.
    pub fn finish(self) -> Option<PartialCall> {
        let count = self.calls.len();
        let first = self.calls.into_values().next();
        if count > 1 {
            log::debug!(
                "model requested {} parallel tool calls; keeping the first",
                count
            );
        }
        first
    }
}

/// Stream a completion with tools attached. Text chunks and assembly progress are
/// emitted to `sink` as they arrive.
pub async fn stream(
    transport: &dyn ChatTransport,
    request: &ChatRequest,
    sink: &dyn EventSink,
) -> Result<CompletionResult, LlmError> {
    let message_uuid = new_event_uuid();
    let call_uuid = format!("{message_uuid}:tool_call_invocation");
    let mut text = String::new();
    let mut assembler = ToolCallAssembler::new();

    transport
        .chat_stream(request, &mut |delta| {
            if let Some(chunk) = delta.content {
                sink.emit(StreamEvent::new(
                    EventKind::TextChunk,
                    message_uuid.as_str(),
                    chunk.as_str(),
                ));
                text.push_str(&chunk);
            }
            for fragment in delta.tool_calls {
                let call = assembler.merge(fragment);
                sink.emit(StreamEvent::new(
                    EventKind::ToolCallAssembling,
                    call_uuid.as_str(),
                    format!("Assembling Tool Call: {}", call.display()),
                ));
            }
        })
        .await?;

    let function_call = match assembler.finish() {
        None => None,
        Some(partial) => match ToolCall::parse(partial.id, partial.name.clone(), &partial.arguments)
        {
            Ok(call) => {
                sink.emit(StreamEvent::new(
                    EventKind::ToolCallInvocation,
                    call_uuid.as_str(),
                    format!("{}({})", call.name, Value::Object(call.arguments.clone())),
                ));
                Some(call)
            }
            Err(e) => {
                log::warn!(
                    "discarding tool call {}: arguments are not valid JSON: {}",
                    partial.name,
                    e
                );
                sink.emit(StreamEvent::new(
                    EventKind::Status,
                    call_uuid.as_str(),
                    format!("Ignored tool call {}: arguments were not valid JSON", partial.name),
                ));
                None
            }
        },
    };

    Ok(finish_result(text, function_call))
}

/// What a non-streamed reply means for the caller.
#[derive(Debug, Clone, PartialEq)]
pub enum NativeOutcome {
    Done(CompletionResult),
    /// The first call's arguments did not parse. `message` reports the raw
    /// arguments back to the model; append it and resubmit.
    Retry {
        message: ChatMessage,
        text: Option<String>,
    },
}

/// Interpret a non-streamed reply: the first call wins.
pub fn interpret_reply(reply: ChatReply) -> NativeOutcome {
    let call_count = reply.tool_calls.len();
    let Some(raw) = reply.tool_calls.into_iter().next() else {
        return NativeOutcome::Done(CompletionResult::text(reply.content));
    };
    if call_count > 1 {
        log::debug!(
            "model requested {} parallel tool calls; keeping the first",
            call_count
        );
    }
    match ToolCall::parse(raw.id.clone(), raw.name.clone(), &raw.arguments) {
        Ok(call) => NativeOutcome::Done(finish_result(reply.content, Some(call))),
        Err(e) => {
            log::warn!(
                "tool call {} has malformed arguments ({}); asking the model again",
                raw.name,
                e
            );
            let content = format!(
                "The arguments for {} could not be parsed as a JSON object ({}). \
                 Raw arguments: {}. Call the tool again with a valid JSON object.",
                raw.name, e, raw.arguments
            );
            let call = OriginalFunctionCall {
                id: raw.id,
                name: raw.name,
                arguments: Value::String(raw.arguments),
            };
            NativeOutcome::Retry {
                message: ChatMessage::function_result(call, content),
                text: Some(reply.content).filter(|t| !t.is_empty()),
            }
        }
    }
}

fn finish_result(text: String, function_call: Option<ToolCall>) -> CompletionResult {
    let text_response = if function_call.is_some() && text.is_empty() {
        None
    } else {
        Some(text)
    };
    CompletionResult {
        text_response,
        function_call,
        cost: 0.0,
    }
}
