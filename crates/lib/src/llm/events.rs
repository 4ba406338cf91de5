//! Progress events emitted while a completion is produced.
//!
//! Events for one uuid arrive in emission order; nothing is promised across uuids.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EventKind {
    /// A piece of assistant text.
    TextChunk,
    /// A native tool call fragment was merged; content shows the call so far.
    ToolCallAssembling,
    /// A tool call was selected.
    ToolCallInvocation,
    /// Transient status line (e.g. "checking tools", a rejected call).
    Status,
    /// Clears the status line with the same uuid.
    RemoveStatus,
}

/// `{type, uuid, content}` as delivered to the event handler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamEvent {
    #[serde(rename = "type")]
    pub kind: EventKind,
    pub uuid: String,
    pub content: String,
}

impl StreamEvent {
    pub fn new(kind: EventKind, uuid: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            kind,
            uuid: uuid.into(),
            content: content.into(),
        }
    }
}

/// Sink for progress events. Emission must not block.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: StreamEvent);
}

impl<F> EventSink for F
where
    F: Fn(StreamEvent) + Send + Sync,
{
    fn emit(&self, event: StreamEvent) {
        self(event)
    }
}

/// Forwards events into a channel; a closed receiver drops them.
#[derive(Clone)]
pub struct ChannelSink(pub mpsc::UnboundedSender<StreamEvent>);

impl EventSink for ChannelSink {
    fn emit(&self, event: StreamEvent) {
        if self.0.send(event).is_err() {
            log::debug!("event receiver dropped");
        }
    }
}

/// Discards every event.
pub struct NoopSink;

impl EventSink for NoopSink {
    fn emit(&self, _event: StreamEvent) {}
}

/// Fresh uuid for a group of related events.
pub(crate) fn new_event_uuid() -> String {
    uuid::Uuid::new_v4().to_string()
}
