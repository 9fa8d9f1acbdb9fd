//! Session lifecycle events
//!
//! Clients publish what happens to their session on a channel handed to them
//! by their owner (usually the [`McpManager`](crate::McpManager)). Events are
//! tagged with the server name so one channel can carry every server.

use crate::protocol::{Prompt, Resource, Tool};

/// Capacity of an event channel created by [`channel`].
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

/// What happened to a session.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    Connected,
    Disconnected,
    Error(String),
    ToolsUpdated(Vec<Tool>),
    ResourcesUpdated(Vec<Resource>),
    PromptsUpdated(Vec<Prompt>),
}

/// A [`SessionEvent`] tagged with the server it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct ServerEvent {
    pub server: String,
    pub event: SessionEvent,
}

pub type EventSender = async_channel::Sender<ServerEvent>;
pub type EventReceiver = async_channel::Receiver<ServerEvent>;

/// Create a bounded event channel.
pub fn channel() -> (EventSender, EventReceiver) {
    async_channel::bounded(EVENT_CHANNEL_CAPACITY)
}

/// Publish without blocking; a full or closed channel drops the event.
pub(crate) fn emit(tx: &EventSender, server: &str, event: SessionEvent) {
    let event = ServerEvent {
        server: server.to_string(),
        event,
    };
    if let Err(e) = tx.try_send(event) {
        tracing::debug!(server = %server, "Dropped MCP session event: {}", e);
    }
}
