//! Messages and their dispatch keys
//!
//! A message is an opaque typed payload plus the identity of the executor
//! that produced it. The payload type tag is the dispatch key: routing and
//! handler lookup both key on it. Payloads are immutable once sent: they
//! are moved or cloned, never shared mutably.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Dispatch key for a message payload (e.g. `"claim.submitted"`)
pub type MessageType = String;

/// Unique identifier for an executor within a graph
pub type ExecutorId = String;

/// A typed payload travelling between executors
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    /// The payload type tag used for dispatch
    pub message_type: MessageType,
    /// The payload itself
    pub payload: serde_json::Value,
    /// Name of the executor that produced this message, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<ExecutorId>,
}

impl Message {
    /// Create a new message with the given type tag and payload
    pub fn new(message_type: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            message_type: message_type.into(),
            payload,
            source: None,
        }
    }

    /// Stamp the producing executor onto this message
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// Check the type tag
    pub fn is(&self, message_type: &str) -> bool {
        self.message_type == message_type
    }

    /// Deserialize the payload into a concrete type
    pub fn payload_as<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_value(self.payload.clone())?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_construction() {
        let msg = Message::new("claim.submitted", serde_json::json!({"id": 7}))
            .with_source("intake");

        assert!(msg.is("claim.submitted"));
        assert!(!msg.is("claim.validated"));
        assert_eq!(msg.source.as_deref(), Some("intake"));
    }

    #[test]
    fn test_payload_as() {
        #[derive(Deserialize)]
        struct Claim {
            id: u32,
        }

        let msg = Message::new("claim.submitted", serde_json::json!({"id": 42}));
        let claim: Claim = msg.payload_as().unwrap();
        assert_eq!(claim.id, 42);

        let bad = Message::new("claim.submitted", serde_json::json!("not an object"));
        assert!(bad.payload_as::<Claim>().is_err());
    }

    #[test]
    fn test_serialization() {
        let msg = Message::new("finding.identity", serde_json::json!({"score": 0.8}));
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"messageType\":\"finding.identity\""));
        // No source set, so the field is omitted entirely
        assert!(!json.contains("source"));

        let restored: Message = serde_json::from_str(&json).unwrap();
        assert_eq!(restored.message_type, "finding.identity");
    }
}
