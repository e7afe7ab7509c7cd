//! Error types for the flow engine

use thiserror::Error;

/// Result type alias using FlowEngineError
pub type Result<T> = std::result::Result<T, FlowEngineError>;

/// Errors that can occur while building or running a workflow
#[derive(Debug, Error)]
pub enum FlowEngineError {
    /// Malformed workflow graph, raised at build time
    #[error("Invalid workflow graph:\n{0}")]
    Configuration(String),

    /// A task function failed
    #[error("Executor '{executor}' failed: {message}")]
    Handler { executor: String, message: String },

    /// No route could carry the emitted message at run time
    #[error("Routing error at '{at}': {detail}")]
    Routing { at: String, detail: String },

    /// Run was cancelled
    #[error("Run cancelled")]
    Cancelled,

    /// Global dispatch budget for the run was exhausted
    #[error("Dispatch budget exhausted after {0} executor invocations")]
    BudgetExhausted(u32),

    /// Every chain ended without the sink executor emitting
    #[error("Run stalled: all message chains ended without reaching the output executor")]
    Stalled,

    /// State store write or value conversion failure
    #[error("State error: {0}")]
    State(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl FlowEngineError {
    /// Create a handler error for the named executor
    pub fn handler(executor: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Handler {
            executor: executor.into(),
            message: message.into(),
        }
    }

    /// Create a routing error originating at the named executor
    pub fn routing(source: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::Routing {
            at: source.into(),
            detail: detail.into(),
        }
    }
}
