//! Provider-agnostic chat completion with tool calling.
//!
//! A [`Provider`] takes a transcript and optional tool definitions and returns a
//! [`CompletionResult`]: text and/or at most one [`ToolCall`], whether or not the
//! backing model supports function calling natively.

mod error;
mod events;
mod format;
mod history;
pub mod native;
mod ollama;
mod openai;
mod probe;
mod provider;
mod transport;
mod types;
pub mod untooled;

pub use error::LlmError;
pub use events::{ChannelSink, EventKind, EventSink, NoopSink, StreamEvent};
pub use format::{format_tools, WireTool, WireToolFunction};
pub use history::{reconcile, ReconcileOptions, WireMessage, WireToolCall};
pub use ollama::{OllamaClient, DEFAULT_BASE_URL as OLLAMA_DEFAULT_BASE_URL};
pub use openai::{CapabilitySource, OpenAiCompatClient};
pub use probe::{allow_list_includes, CapabilityProbe, ToolSupport};
pub use provider::{
    CostModel, PerTokenCost, Provider, ProviderKind, ProviderOptions, WireProtocol, ZeroCost,
};
pub use transport::{
    ChatReply, ChatRequest, ChatTransport, DeltaHandler, RawToolCall, StreamDelta, ToolCallDelta,
    TransportConfig,
};
pub use types::{
    ChatMessage, CompletionResult, Content, ContentPart, ImageUrl, OriginalFunctionCall, Role,
    ToolCall, ToolDefinition, Usage,
};
