//! Executor contract and closure-backed executors
//!
//! An executor is a named unit of work that declares which message types
//! it accepts and which it may emit. The engine looks up the handler whose
//! declared input type matches an incoming message's type; an unmatched
//! type is a configuration error caught at graph-build time.
//!
//! Executors may hold private mutable state scoped to themselves (interior
//! mutability across calls) without going through the shared state store.

use std::future::Future;
use std::pin::Pin;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::context::RunContext;
use crate::error::{FlowEngineError, Result};
use crate::message::{Message, MessageType};

/// Declared io contract for one handler of an executor
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HandlerSpec {
    /// The message type this handler consumes
    pub input: MessageType,
    /// The message types this handler may legally emit
    pub emits: Vec<MessageType>,
}

impl HandlerSpec {
    /// Create a handler spec
    pub fn new<I, S>(input: impl Into<String>, emits: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            input: input.into(),
            emits: emits.into_iter().map(Into::into).collect(),
        }
    }
}

/// What a handler produced
#[derive(Debug)]
pub enum HandlerOutput {
    /// Zero or more messages to route onward
    Messages(Vec<Message>),
    /// No output yet; the executor is waiting for more input (barrier)
    Wait,
}

impl HandlerOutput {
    /// A single output message
    pub fn single(message: Message) -> Self {
        Self::Messages(vec![message])
    }

    /// No output at all (the chain ends here)
    pub fn none() -> Self {
        Self::Messages(Vec::new())
    }
}

/// A named unit of work consuming and producing typed messages
#[async_trait]
pub trait Executor: Send + Sync {
    /// Unique name within a graph
    fn name(&self) -> &str;

    /// Declared (input type, legal output types) pairs
    fn handlers(&self) -> Vec<HandlerSpec>;

    /// Whether this instance is safe to share across concurrent fan-out
    /// branches or concurrent runs
    fn shareable(&self) -> bool {
        false
    }

    /// Handle one message
    async fn handle(&self, message: Message, ctx: RunContext) -> Result<HandlerOutput>;

    /// Clear private per-run state so the instance can be reused
    async fn reset(&self) {}

    /// Whether a handler is declared for `message_type`
    fn accepts(&self, message_type: &str) -> bool {
        self.handlers().iter().any(|h| h.input == message_type)
    }

    /// All message types this executor can legally emit, deduplicated
    fn emitted_types(&self) -> Vec<MessageType> {
        let mut types = Vec::new();
        for spec in self.handlers() {
            for t in spec.emits {
                if !types.contains(&t) {
                    types.push(t);
                }
            }
        }
        types
    }
}

type HandlerFuture = Pin<Box<dyn Future<Output = Result<HandlerOutput>> + Send>>;
type HandlerFn = Box<dyn Fn(Message, RunContext) -> HandlerFuture + Send + Sync>;

struct RegisteredHandler {
    spec: HandlerSpec,
    func: HandlerFn,
}

/// Executor backed by registered async closures, one per input type
///
/// # Example
///
/// ```ignore
/// let intake = FnExecutor::new("intake")
///     .on("claim.submitted", ["claim.compiled"], |msg, _ctx| async move {
///         Ok(HandlerOutput::single(Message::new(
///             "claim.compiled",
///             msg.payload,
///         )))
///     });
/// ```
pub struct FnExecutor {
    name: String,
    handlers: Vec<RegisteredHandler>,
    shared: bool,
}

impl FnExecutor {
    /// Create an executor with no handlers yet
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            handlers: Vec::new(),
            shared: false,
        }
    }

    /// Register a handler for one input type
    pub fn on<F, Fut, I, S>(mut self, input: impl Into<String>, emits: I, func: F) -> Self
    where
        F: Fn(Message, RunContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<HandlerOutput>> + Send + 'static,
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let spec = HandlerSpec::new(input, emits);
        self.handlers.push(RegisteredHandler {
            spec,
            func: Box::new(move |message, ctx| -> HandlerFuture {
                Box::pin(func(message, ctx))
            }),
        });
        self
    }

    /// Mark this instance safe to share across concurrent branches/runs
    pub fn shared(mut self) -> Self {
        self.shared = true;
        self
    }
}

#[async_trait]
impl Executor for FnExecutor {
    fn name(&self) -> &str {
        &self.name
    }

    fn handlers(&self) -> Vec<HandlerSpec> {
        self.handlers.iter().map(|h| h.spec.clone()).collect()
    }

    fn shareable(&self) -> bool {
        self.shared
    }

    async fn handle(&self, message: Message, ctx: RunContext) -> Result<HandlerOutput> {
        let handler = self
            .handlers
            .iter()
            .find(|h| h.spec.input == message.message_type)
            .ok_or_else(|| {
                FlowEngineError::routing(
                    self.name.clone(),
                    format!("no handler for message type '{}'", message.message_type),
                )
            })?;
        (handler.func)(message, ctx).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn echo_executor() -> FnExecutor {
        FnExecutor::new("echo")
            .on("ping", ["pong"], |msg, _ctx| async move {
                Ok(HandlerOutput::single(
                    Message::new("pong", msg.payload).with_source("echo"),
                ))
            })
            .on("hold", Vec::<String>::new(), |_msg, _ctx| async move {
                Ok(HandlerOutput::Wait)
            })
    }

    #[test]
    fn test_declared_contract() {
        let exec = echo_executor();
        assert_eq!(exec.name(), "echo");
        assert!(exec.accepts("ping"));
        assert!(exec.accepts("hold"));
        assert!(!exec.accepts("pong"));
        assert_eq!(exec.emitted_types(), vec!["pong".to_string()]);
        assert!(!exec.shareable());
        assert!(echo_executor().shared().shareable());
    }

    #[test]
    fn test_emitted_types_deduplicated() {
        let exec = FnExecutor::new("multi")
            .on("a", ["x", "y"], |_m, _c| async move { Ok(HandlerOutput::none()) })
            .on("b", ["y", "z"], |_m, _c| async move { Ok(HandlerOutput::none()) });
        assert_eq!(
            exec.emitted_types(),
            vec!["x".to_string(), "y".to_string(), "z".to_string()]
        );
    }

    #[tokio::test]
    async fn test_dispatch_by_type() {
        let exec = echo_executor();
        let ctx = RunContext::detached();

        let out = exec
            .handle(Message::new("ping", serde_json::json!(1)), ctx.clone())
            .await
            .unwrap();
        match out {
            HandlerOutput::Messages(messages) => {
                assert_eq!(messages.len(), 1);
                assert!(messages[0].is("pong"));
                assert_eq!(messages[0].source.as_deref(), Some("echo"));
            }
            HandlerOutput::Wait => panic!("Expected messages"),
        }

        let out = exec
            .handle(Message::new("hold", serde_json::Value::Null), ctx)
            .await
            .unwrap();
        assert!(matches!(out, HandlerOutput::Wait));
    }

    #[tokio::test]
    async fn test_unknown_type_is_error() {
        let exec = echo_executor();
        let ctx = RunContext::detached();

        let err = exec
            .handle(Message::new("unknown", serde_json::Value::Null), ctx)
            .await
            .unwrap_err();
        assert!(matches!(err, FlowEngineError::Routing { .. }));
    }

    #[tokio::test]
    async fn test_private_executor_state() {
        use std::sync::atomic::{AtomicU32, Ordering};
        use std::sync::Arc;

        // Executors may hold private mutable state across calls
        let calls = Arc::new(AtomicU32::new(0));
        let counted = {
            let calls = calls.clone();
            FnExecutor::new("counted").on("tick", ["tock"], move |_msg, _ctx| {
                let calls = calls.clone();
                async move {
                    let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                    Ok(HandlerOutput::single(Message::new(
                        "tock",
                        serde_json::json!(n),
                    )))
                }
            })
        };

        let ctx = RunContext::detached();
        for _ in 0..3 {
            counted
                .handle(Message::new("tick", serde_json::Value::Null), ctx.clone())
                .await
                .unwrap();
        }
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
