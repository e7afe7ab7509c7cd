//! Event types for streaming run progress
//!
//! Events are sent from the runner to any consumer to report executor
//! lifecycle, partial output, branch failures, and the terminal outcome
//! of a run. Every event stream ends in exactly one terminal event:
//! either `Output` (final output from the sink executor) or `RunFailed`.

use serde::{Deserialize, Serialize};

use crate::message::Message;

/// Trait for sending run events
///
/// This abstracts over the transport mechanism (tokio channel, collection
/// buffer, etc.) allowing the runner to be used in different contexts.
pub trait EventSink: Send + Sync {
    /// Send an event
    ///
    /// Returns an error if the event could not be sent (e.g., channel closed)
    fn send(&self, event: RunEvent) -> Result<(), EventError>;
}

/// Error when sending events fails
#[derive(Debug, Clone)]
pub struct EventError {
    pub message: String,
}

impl std::fmt::Display for EventError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Event error: {}", self.message)
    }
}

impl std::error::Error for EventError {}

impl EventError {
    pub fn channel_closed() -> Self {
        Self {
            message: "Channel closed".to_string(),
        }
    }
}

/// Events emitted during a workflow run
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum RunEvent {
    /// The run started
    #[serde(rename_all = "camelCase")]
    RunStarted { run_id: String, graph_id: String },

    /// An executor received a message and began handling it
    #[serde(rename_all = "camelCase")]
    ExecutorStarted {
        run_id: String,
        executor: String,
        message_type: String,
    },

    /// An executor finished handling a message
    #[serde(rename_all = "camelCase")]
    ExecutorCompleted {
        run_id: String,
        executor: String,
        emitted: usize,
    },

    /// An executor is holding its input at a barrier, waiting for more
    #[serde(rename_all = "camelCase")]
    ExecutorWaiting { run_id: String, executor: String },

    /// A task function failed
    ///
    /// Inside a fan-out this is a per-branch report and does not terminate
    /// the run; anywhere else a `RunFailed` event follows.
    #[serde(rename_all = "camelCase")]
    ExecutorFailed {
        run_id: String,
        executor: String,
        error: String,
    },

    /// Partial output streamed by an executor mid-handling
    #[serde(rename_all = "camelCase")]
    Progress {
        run_id: String,
        executor: String,
        data: serde_json::Value,
    },

    /// Terminal: final output emitted by the sink executor
    #[serde(rename_all = "camelCase")]
    Output {
        run_id: String,
        messages: Vec<Message>,
    },

    /// Terminal: the run failed
    #[serde(rename_all = "camelCase")]
    RunFailed { run_id: String, error: String },
}

impl RunEvent {
    /// Whether this event terminates the stream
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Output { .. } | Self::RunFailed { .. })
    }
}

/// A no-op event sink that discards all events
///
/// Useful for testing or when events aren't needed.
pub struct NullEventSink;

impl EventSink for NullEventSink {
    fn send(&self, _event: RunEvent) -> Result<(), EventError> {
        Ok(())
    }
}

/// A vector-based event sink that collects events
///
/// Useful for testing to verify events were emitted correctly.
pub struct VecEventSink {
    events: std::sync::Mutex<Vec<RunEvent>>,
}

impl VecEventSink {
    pub fn new() -> Self {
        Self {
            events: std::sync::Mutex::new(Vec::new()),
        }
    }

    /// Get all collected events
    pub fn events(&self) -> Vec<RunEvent> {
        self.events.lock().unwrap().clone()
    }

    /// Clear all collected events
    pub fn clear(&self) {
        self.events.lock().unwrap().clear();
    }
}

impl Default for VecEventSink {
    fn default() -> Self {
        Self::new()
    }
}

impl EventSink for VecEventSink {
    fn send(&self, event: RunEvent) -> Result<(), EventError> {
        self.events.lock().unwrap().push(event);
        Ok(())
    }
}

/// Sink that forwards events into an unbounded tokio channel
///
/// The runner uses this to back the event stream on a `RunHandle`.
pub struct ChannelEventSink {
    tx: tokio::sync::mpsc::UnboundedSender<RunEvent>,
}

impl ChannelEventSink {
    /// Create a sink and the receiver that drains it
    pub fn new() -> (Self, tokio::sync::mpsc::UnboundedReceiver<RunEvent>) {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl EventSink for ChannelEventSink {
    fn send(&self, event: RunEvent) -> Result<(), EventError> {
        self.tx.send(event).map_err(|_| EventError::channel_closed())
    }
}
